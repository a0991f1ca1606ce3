//! Bot definitions and runtime settings.
//!
//! Each bot is one JSON file in the config directory. A file whose
//! `strategy` is `"portfolio"` describes a group of agents over several
//! symbols; anything else describes a single agent.

use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::MarketGateway;
use crate::error::{BotError, Result};

use super::agent::Agent;
use super::strategy::{RiskParams, StrategyKind};
use super::symbol_registry::SymbolRegistry;

/// Accepted range for a single agent's budget.
pub const INVESTMENT_RANGE: (Decimal, Decimal) = (dec!(10), dec!(1000));
pub const PROFIT_TARGET_RANGE: (Decimal, Decimal) = (dec!(1.001), dec!(1.5));
pub const STOP_LOSS_RANGE: (Decimal, Decimal) = (dec!(0.5), dec!(0.999));
pub const TRAILING_STOP_RANGE: (Decimal, Decimal) = (dec!(0.0001), dec!(0.5));
pub const MAX_SYMBOLS_RANGE: (usize, usize) = (1, 50);

fn default_strategy() -> StrategyKind {
    StrategyKind::Simple
}

fn default_investment() -> Decimal {
    dec!(100)
}

fn default_profit_target() -> Decimal {
    RiskParams::default().profit_target
}

fn default_stop_loss() -> Decimal {
    RiskParams::default().stop_loss
}

fn default_trailing_stop() -> Option<Decimal> {
    RiskParams::default().trailing_stop
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_max_symbols() -> usize {
    10
}

fn default_investment_per_coin() -> Decimal {
    dec!(20)
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    errors: &mut Vec<String>,
    field: &str,
    value: T,
    (min, max): (T, T),
) {
    if value < min || value > max {
        errors.push(format!("{} must be between {} and {} (got {})", field, min, max, value));
    }
}

/// One agent trading one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub name: Option<String>,

    pub symbol: String,

    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    /// Quote-currency budget per buy
    #[serde(default = "default_investment")]
    pub investment_amount: Decimal,

    #[serde(default = "default_profit_target")]
    pub profit_target: Decimal,

    #[serde(default = "default_stop_loss")]
    pub stop_loss: Decimal,

    #[serde(default = "default_trailing_stop")]
    pub trailing_stop: Option<Decimal>,
}

impl AgentConfig {
    pub fn new(symbol: &str, strategy: StrategyKind, investment_amount: Decimal) -> Self {
        Self {
            name: None,
            symbol: symbol.to_string(),
            strategy,
            investment_amount,
            profit_target: default_profit_target(),
            stop_loss: default_stop_loss(),
            trailing_stop: default_trailing_stop(),
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.symbol, self.strategy))
    }

    pub fn risk(&self) -> RiskParams {
        RiskParams {
            profit_target: self.profit_target,
            stop_loss: self.stop_loss,
            trailing_stop: self.trailing_stop,
        }
    }

    /// Check value ranges and, when the registry is loaded, the symbol.
    pub fn validate(&self, registry: &SymbolRegistry) -> Result<()> {
        let mut errors = Vec::new();
        check_range(&mut errors, "investment_amount", self.investment_amount, INVESTMENT_RANGE);
        check_range(&mut errors, "profit_target", self.profit_target, PROFIT_TARGET_RANGE);
        check_range(&mut errors, "stop_loss", self.stop_loss, STOP_LOSS_RANGE);
        if let Some(trail) = self.trailing_stop {
            check_range(&mut errors, "trailing_stop", trail, TRAILING_STOP_RANGE);
        }

        if !errors.is_empty() {
            return Err(BotError::InvalidConfig(format!(
                "{}: {}",
                self.display_name(),
                errors.join("; ")
            )));
        }

        if !registry.is_empty() && !registry.validate_symbol(&self.symbol) {
            return Err(BotError::UnknownSymbol(self.symbol.clone()));
        }

        Ok(())
    }

    pub fn build_agent(&self) -> Agent {
        Agent::new(
            self.display_name(),
            self.symbol.clone(),
            self.strategy.build(self.investment_amount),
            self.risk(),
        )
    }
}

/// How a portfolio picks its symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    TopVolume,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSelection {
    pub method: SelectionMethod,

    /// Candidates fetched for `top_volume`
    #[serde(default)]
    pub limit: Option<usize>,

    /// Explicit list for `manual`; empty means every symbol of the quote asset
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl Default for SymbolSelection {
    fn default() -> Self {
        Self {
            method: SelectionMethod::TopVolume,
            limit: Some(20),
            symbols: Vec::new(),
        }
    }
}

/// A group of below-average agents over several symbols of one quote asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    #[serde(default = "default_max_symbols")]
    pub max_symbols: usize,

    /// Maximum agents holding at once; caps the number of symbols traded
    #[serde(default)]
    pub max_holdings: Option<usize>,

    #[serde(default = "default_investment_per_coin")]
    pub investment_per_coin: Decimal,

    #[serde(default = "default_profit_target")]
    pub profit_target: Decimal,

    #[serde(default = "default_stop_loss")]
    pub stop_loss: Decimal,

    #[serde(default = "default_trailing_stop")]
    pub trailing_stop: Option<Decimal>,

    #[serde(default)]
    pub symbol_selection: SymbolSelection,
}

impl PortfolioConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} portfolio", self.quote_asset))
    }

    fn symbol_cap(&self) -> usize {
        self.max_holdings
            .map_or(self.max_symbols, |h| h.min(self.max_symbols))
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_range(&mut errors, "max_symbols", self.max_symbols, MAX_SYMBOLS_RANGE);
        if let Some(holdings) = self.max_holdings {
            check_range(&mut errors, "max_holdings", holdings, MAX_SYMBOLS_RANGE);
        }
        check_range(&mut errors, "investment_per_coin", self.investment_per_coin, INVESTMENT_RANGE);
        check_range(&mut errors, "profit_target", self.profit_target, PROFIT_TARGET_RANGE);
        check_range(&mut errors, "stop_loss", self.stop_loss, STOP_LOSS_RANGE);
        if let Some(trail) = self.trailing_stop {
            check_range(&mut errors, "trailing_stop", trail, TRAILING_STOP_RANGE);
        }
        if self.quote_asset.trim().is_empty() {
            errors.push("quote_asset must not be empty".to_string());
        }
        if self.symbol_selection.method == SelectionMethod::Manual
            && self.symbol_selection.symbols.len() > self.max_symbols
        {
            errors.push(format!("more manual symbols than max_symbols ({})", self.max_symbols));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BotError::InvalidConfig(format!(
                "{}: {}",
                self.display_name(),
                errors.join("; ")
            )))
        }
    }

    /// Resolve the symbols this portfolio trades.
    pub async fn select_symbols(
        &self,
        registry: &SymbolRegistry,
        gateway: &dyn MarketGateway,
    ) -> Result<Vec<String>> {
        let cap = self.symbol_cap();
        let mut symbols: Vec<String> = match self.symbol_selection.method {
            SelectionMethod::TopVolume => {
                let limit = self.symbol_selection.limit.unwrap_or(20);
                registry
                    .top_volume_symbols(gateway, &self.quote_asset, limit)
                    .await?
                    .into_iter()
                    .map(|v| v.symbol)
                    .collect()
            }
            SelectionMethod::Manual if !self.symbol_selection.symbols.is_empty() => {
                for symbol in &self.symbol_selection.symbols {
                    if !registry.is_empty() && !registry.validate_symbol(symbol) {
                        return Err(BotError::UnknownSymbol(symbol.clone()));
                    }
                }
                self.symbol_selection.symbols.clone()
            }
            SelectionMethod::Manual => registry
                .symbols_for_quote_asset(&self.quote_asset)
                .into_iter()
                .map(|r| r.symbol)
                .collect(),
        };
        symbols.truncate(cap);
        Ok(symbols)
    }

    /// Per-symbol agent definitions for the selected symbols.
    pub fn agent_configs(&self, symbols: &[String]) -> Vec<AgentConfig> {
        let name = self.display_name();
        symbols
            .iter()
            .map(|symbol| AgentConfig {
                name: Some(format!("{} / {}", name, symbol)),
                symbol: symbol.clone(),
                strategy: StrategyKind::Simple,
                investment_amount: self.investment_per_coin,
                profit_target: self.profit_target,
                stop_loss: self.stop_loss,
                trailing_stop: self.trailing_stop,
            })
            .collect()
    }
}

/// Contents of one bot definition file.
#[derive(Debug, Clone)]
pub enum BotDefinition {
    Agent(AgentConfig),
    Portfolio(PortfolioConfig),
}

impl BotDefinition {
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let strategy = value
            .get("strategy")
            .and_then(|s| s.as_str())
            .unwrap_or(default_strategy().as_str());

        if strategy == "portfolio" {
            Ok(BotDefinition::Portfolio(serde_json::from_value(value)?))
        } else {
            Ok(BotDefinition::Agent(serde_json::from_value(value)?))
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            BotDefinition::Agent(c) => c.display_name(),
            BotDefinition::Portfolio(c) => c.display_name(),
        }
    }

    /// Validate and expand into agent definitions.
    pub async fn resolve(
        &self,
        registry: &SymbolRegistry,
        gateway: &dyn MarketGateway,
    ) -> Result<Vec<AgentConfig>> {
        match self {
            BotDefinition::Agent(config) => {
                config.validate(registry)?;
                Ok(vec![config.clone()])
            }
            BotDefinition::Portfolio(config) => {
                config.validate()?;
                let symbols = config.select_symbols(registry, gateway).await?;
                Ok(config.agent_configs(&symbols))
            }
        }
    }
}

/// Load every `*.json` definition in `dir`, sorted by file name. A file that
/// fails to parse is reported and skipped.
pub fn load_definitions(dir: &Path) -> Result<Vec<BotDefinition>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        BotError::InvalidConfig(format!("Cannot read config directory {}: {}", dir.display(), e))
    })?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| BotError::InvalidConfig(e.to_string()))
            .and_then(|raw| BotDefinition::from_json(&raw));

        match parsed {
            Ok(definition) => {
                info!(file = %path.display(), bot = %definition.display_name(), "Loaded bot definition");
                definitions.push(definition);
            }
            Err(e) => warn!(file = %path.display(), error = %e, "Skipping bot definition"),
        }
    }

    Ok(definitions)
}

/// Timing of the orchestrator task.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Delay between agent cycles
    pub cycle_interval: Duration,

    /// Delay between portfolio valuations; `None` disables them
    pub portfolio_interval: Option<Duration>,

    /// Delay between symbol rule refreshes; `None` disables them
    pub symbol_refresh_interval: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(60),             // 1 minute
            portfolio_interval: Some(Duration::from_secs(300)),  // 5 minutes
            symbol_refresh_interval: Some(Duration::from_secs(3600)), // hourly
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{rule, MockGateway};

    fn registry() -> SymbolRegistry {
        SymbolRegistry::from_rules(vec![
            rule("BTCUSDT", "BTC", "USDT", dec!(0.00001), dec!(10)),
            rule("ETHUSDT", "ETH", "USDT", dec!(0.0001), dec!(10)),
            rule("SOLUSDT", "SOL", "USDT", dec!(0.01), dec!(10)),
            rule("ETHBTC", "ETH", "BTC", dec!(0.0001), dec!(0.0001)),
        ])
    }

    #[test]
    fn test_agent_definition_defaults() {
        let def = BotDefinition::from_json(r#"{"name": "BTC dip buyer", "symbol": "BTCUSDT"}"#).unwrap();
        let BotDefinition::Agent(config) = def else {
            panic!("expected agent definition");
        };
        assert_eq!(config.strategy, StrategyKind::Simple);
        assert_eq!(config.investment_amount, dec!(100));
        assert_eq!(config.profit_target, dec!(1.02));
        assert_eq!(config.trailing_stop, Some(dec!(0.005)));
        assert!(config.validate(&registry()).is_ok());

        let agent = config.build_agent();
        assert_eq!(agent.name(), "BTC dip buyer");
        assert_eq!(agent.strategy_name(), "simple");
        assert!(!agent.is_running());
    }

    #[test]
    fn test_agent_validation_ranges() {
        let mut config = AgentConfig::new("BTCUSDT", StrategyKind::InstantBuy, dec!(5));
        config.stop_loss = dec!(0.3);
        let err = config.validate(&registry()).unwrap_err().to_string();
        assert!(err.contains("investment_amount"));
        assert!(err.contains("stop_loss"));

        let config = AgentConfig::new("DOGEUSDT", StrategyKind::Simple, dec!(50));
        assert!(matches!(config.validate(&registry()), Err(BotError::UnknownSymbol(_))));

        // An empty registry cannot vouch for symbols, so only ranges are checked
        assert!(config.validate(&SymbolRegistry::new()).is_ok());
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let err = BotDefinition::from_json(r#"{"symbol": "BTCUSDT", "strategy": "grid"}"#).unwrap_err();
        assert!(matches!(err, BotError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_portfolio_top_volume_selection() {
        let gateway = MockGateway::new();
        gateway.set_volume("SOLUSDT", dec!(300));
        gateway.set_volume("BTCUSDT", dec!(900));
        gateway.set_volume("ETHUSDT", dec!(600));
        gateway.set_volume("ETHBTC", dec!(5000));

        let def = BotDefinition::from_json(
            r#"{
                "name": "Top movers",
                "strategy": "portfolio",
                "quote_asset": "USDT",
                "max_symbols": 2,
                "investment_per_coin": 25,
                "profit_target": 1.03,
                "stop_loss": 0.97,
                "symbol_selection": {"method": "top_volume", "limit": 10}
            }"#,
        )
        .unwrap();

        let agents = def.resolve(&registry(), &gateway).await.unwrap();
        let symbols: Vec<&str> = agents.iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert!(agents.iter().all(|a| a.investment_amount == dec!(25)));
        assert!(agents.iter().all(|a| a.strategy == StrategyKind::Simple));
        assert_eq!(agents[0].name.as_deref(), Some("Top movers / BTCUSDT"));
    }

    #[tokio::test]
    async fn test_portfolio_manual_selection() {
        let gateway = MockGateway::new();
        let mut config = PortfolioConfig {
            name: None,
            quote_asset: "USDT".to_string(),
            max_symbols: 5,
            max_holdings: Some(2),
            investment_per_coin: dec!(20),
            profit_target: dec!(1.02),
            stop_loss: dec!(0.98),
            trailing_stop: None,
            symbol_selection: SymbolSelection {
                method: SelectionMethod::Manual,
                limit: None,
                symbols: vec![],
            },
        };

        // No explicit list: every USDT symbol, capped by max_holdings
        let symbols = config.select_symbols(&registry(), &gateway).await.unwrap();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);

        config.symbol_selection.symbols = vec!["SOLUSDT".to_string(), "XRPUSDT".to_string()];
        let err = config.select_symbols(&registry(), &gateway).await.unwrap_err();
        assert!(matches!(err, BotError::UnknownSymbol(s) if s == "XRPUSDT"));
    }

    #[test]
    fn test_portfolio_validation() {
        let def = BotDefinition::from_json(
            r#"{"strategy": "portfolio", "max_symbols": 80, "investment_per_coin": 5, "symbol_selection": {"method": "manual"}}"#,
        )
        .unwrap();
        let BotDefinition::Portfolio(config) = def else {
            panic!("expected portfolio definition");
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_symbols"));
        assert!(err.contains("investment_per_coin"));

        let err = BotDefinition::from_json(
            r#"{"strategy": "portfolio", "symbol_selection": {"method": "random"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BotError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_definitions_skips_bad_files() {
        let dir = std::env::temp_dir().join(format!("botfleet-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a_btc.json"), r#"{"symbol": "BTCUSDT", "strategy": "instant_buy", "investment_amount": 50}"#).unwrap();
        std::fs::write(dir.join("b_broken.json"), "{not json").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let defs = load_definitions(&dir).unwrap();
        assert_eq!(defs.len(), 1);
        assert!(matches!(&defs[0], BotDefinition::Agent(c) if c.strategy == StrategyKind::InstantBuy));

        std::fs::remove_dir_all(&dir).unwrap();
        assert!(load_definitions(&dir).is_err());
    }
}
