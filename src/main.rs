//! Binance Bot Fleet
//!
//! Runs a pool of independent spot trading agents against the Binance
//! testnet. Each agent sizes its orders to the exchange's lot and notional
//! rules and manages a single position with profit target, stop loss and
//! trailing stop exits.

mod api;
mod error;
mod models;
mod orchestrator;
mod portfolio;
mod trading;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{ApiCredentials, BinanceClient, MarketGateway, TESTNET_URL};
use crate::orchestrator::Orchestrator;
use crate::portfolio::{PortfolioAggregator, OVER_EXPOSED, UNDER_EXPOSED};
use crate::trading::{
    load_definitions, quantize_at_price, AgentConfig, BotDefinition, OrchestratorConfig,
    RiskParams, StrategyKind, SymbolRegistry, INVESTMENT_RANGE, MAX_SYMBOLS_RANGE, PROFIT_TARGET_RANGE, STOP_LOSS_RANGE,
    TRAILING_STOP_RANGE,
};

/// Multi-agent spot trading CLI.
#[derive(Parser)]
#[command(name = "botfleet")]
#[command(about = "Run a fleet of spot trading bots on the Binance testnet", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Exchange REST endpoint
    #[arg(long, env = "BINANCE_BASE_URL", default_value = TESTNET_URL)]
    base_url: String,

    /// Directory of bot definition files (*.json)
    #[arg(short, long, env = "BOTFLEET_CONFIG_DIR", default_value = "config/bots")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every configured bot
    Run {
        /// Seconds between agent cycles
        #[arg(short, long, default_value = "60")]
        interval: u64,

        /// Seconds between portfolio valuations
        #[arg(long, default_value = "300")]
        portfolio_interval: u64,

        /// Disable portfolio tracking
        #[arg(long)]
        no_portfolio: bool,

        /// Split this quote amount equally across all agents
        #[arg(long)]
        total_funds: Option<f64>,

        /// Quote asset used for portfolio valuation
        #[arg(long, default_value = "USDT")]
        quote: String,
    },

    /// Validate bot definitions against the exchange symbol list
    Validate,

    /// List tradable symbols for a quote asset
    Symbols {
        /// Quote asset (e.g. USDT, BTC)
        #[arg(short, long, default_value = "USDT")]
        quote: String,

        /// Show the top N symbols by 24h volume instead
        #[arg(short, long)]
        top: Option<usize>,
    },

    /// Show the exchange-legal quantity for a quote budget
    Quantize {
        /// Trading pair, e.g. BTCUSDT
        symbol: String,

        /// Budget in the quote asset
        amount: f64,
    },

    /// Value the account once
    Portfolio {
        /// Quote asset to value holdings in
        #[arg(short, long, default_value = "USDT")]
        quote: String,
    },

    /// Show default risk parameters and validation ranges
    Config,
}

fn build_gateway(base_url: &str, require_credentials: bool) -> Result<Arc<dyn MarketGateway>> {
    let credentials = match ApiCredentials::from_env() {
        Ok(creds) => Some(creds),
        Err(e) if require_credentials => {
            return Err(e).context("Set BINANCE_API_KEY and BINANCE_API_SECRET (a .env file works)");
        }
        Err(e) => {
            warn!("{}. Only public endpoints are available.", e);
            None
        }
    };

    let client = BinanceClient::with_base_url(base_url.to_string(), credentials)?;
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            interval,
            portfolio_interval,
            no_portfolio,
            total_funds,
            quote,
        } => {
            let gateway = build_gateway(&cli.base_url, true)?;
            gateway.ping().await.context("Exchange unreachable")?;

            let registry = Arc::new(SymbolRegistry::new());
            registry
                .refresh(gateway.as_ref())
                .await
                .context("Failed to load symbol rules")?;

            let definitions = load_definitions(&cli.config_dir)?;
            if definitions.is_empty() {
                println!("No bot definitions found in {}.", cli.config_dir.display());
                return Ok(());
            }

            let config = OrchestratorConfig {
                cycle_interval: Duration::from_secs(interval.max(1)),
                portfolio_interval: (!no_portfolio).then(|| Duration::from_secs(portfolio_interval.max(1))),
                ..OrchestratorConfig::default()
            };

            let mut orch = Orchestrator::new(gateway.clone(), registry.clone(), config);
            if !no_portfolio {
                orch = orch.with_portfolio(Arc::new(PortfolioAggregator::new(gateway.clone(), &quote)));
            }

            for definition in &definitions {
                let agents = match definition.resolve(&registry, gateway.as_ref()).await {
                    Ok(agents) => agents,
                    Err(e) => {
                        warn!(bot = %definition.display_name(), error = %e, "Skipping invalid bot");
                        continue;
                    }
                };

                register_agents(&orch, agents).await;
            }

            if orch.agent_count().await == 0 {
                println!("No valid agents to run.");
                return Ok(());
            }

            orch.start().await;

            if let Some(funds) = total_funds {
                orch.allocate_equally(Decimal::try_from(funds)?).await;
            }

            println!("\n=== Binance Bot Fleet ===");
            println!("Endpoint:       {}", cli.base_url);
            println!("Agents:         {}", orch.symbols().await.join(", "));
            println!("Cycle interval: {}s", orch.cycle_interval().as_secs());
            println!(
                "Portfolio:      {}",
                if no_portfolio { "disabled".to_string() } else { format!("every {}s in {}", portfolio_interval, quote) }
            );
            println!("\nPress Ctrl+C to stop.\n");

            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            orch.stop().await;

            println!();
            for status in orch.statuses().await {
                println!("{}", status);
            }

            if let Some(portfolio) = orch.portfolio() {
                if let Some(snapshot) = portfolio.latest().await {
                    println!("{}", snapshot);
                }
                if let Some(change) = portfolio.daily_change().await {
                    println!("{}", change);
                }
            }
        }

        Commands::Validate => {
            let gateway = build_gateway(&cli.base_url, false)?;
            let registry = SymbolRegistry::new();
            if let Err(e) = registry.refresh(gateway.as_ref()).await {
                warn!(error = %e, "Symbol list unavailable, checking value ranges only");
            }

            let definitions = load_definitions(&cli.config_dir)?;
            if definitions.is_empty() {
                println!("No bot definitions found in {}.", cli.config_dir.display());
                return Ok(());
            }

            let mut failed = 0;
            for definition in &definitions {
                match definition.resolve(&registry, gateway.as_ref()).await {
                    Ok(agents) => {
                        let symbols: Vec<&str> = agents.iter().map(|a| a.symbol.as_str()).collect();
                        println!("OK    {:<30} {}", truncate(&definition.display_name(), 28), symbols.join(", "));
                    }
                    Err(e) => {
                        failed += 1;
                        println!("FAIL  {:<30} {}", truncate(&definition.display_name(), 28), e);
                    }
                }
            }

            if failed > 0 {
                anyhow::bail!("{} of {} bot definitions are invalid", failed, definitions.len());
            }
        }

        Commands::Symbols { quote, top } => {
            let gateway = build_gateway(&cli.base_url, false)?;
            let registry = SymbolRegistry::new();
            registry.refresh(gateway.as_ref()).await?;

            match top {
                Some(limit) => {
                    let volumes = registry.top_volume_symbols(gateway.as_ref(), &quote, limit).await?;
                    println!("\n{:<14} {:>20} {:>16}", "SYMBOL", "24H VOLUME", "LAST PRICE");
                    println!("{}", "-".repeat(52));
                    for v in volumes {
                        println!("{:<14} {:>20} {:>16}", v.symbol, v.volume.round_dp(2), v.last_price.normalize());
                    }
                }
                None => {
                    let rules = registry.symbols_for_quote_asset(&quote);
                    println!("\n{:<14} {:>14} {:>14} {:>14}", "SYMBOL", "STEP", "MIN QTY", "MIN NOTIONAL");
                    println!("{}", "-".repeat(59));
                    for r in &rules {
                        println!(
                            "{:<14} {:>14} {:>14} {:>14}",
                            r.symbol,
                            r.step_size.normalize(),
                            r.min_qty.normalize(),
                            r.min_notional.normalize()
                        );
                    }
                    println!("\n{} symbols quoted in {}", rules.len(), quote);
                }
            }
        }

        Commands::Quantize { symbol, amount } => {
            let gateway = build_gateway(&cli.base_url, false)?;
            let rule = gateway.get_symbol_filters(&symbol).await?;
            let price = gateway.get_price(&symbol).await?;
            let amount = Decimal::try_from(amount)?;

            println!("\nSymbol:       {}", rule.symbol);
            println!("Price:        {}", price.normalize());
            println!("Step size:    {} ({} decimals)", rule.step_size.normalize(), rule.quantity_precision());
            println!("Min notional: {}", rule.min_notional.normalize());

            match quantize_at_price(&rule, amount, price) {
                Ok(qty) => {
                    println!("Quantity:     {}", qty);
                    println!("Notional:     {:.8}", qty * price);
                }
                Err(e) => println!("Rejected:     {}", e),
            }
        }

        Commands::Portfolio { quote } => {
            let gateway = build_gateway(&cli.base_url, true)?;
            let portfolio = PortfolioAggregator::new(gateway, &quote);
            let snapshot = portfolio.value_portfolio().await?;
            println!("\n{}", snapshot);
            if let Some(signal) = portfolio.maybe_rebalance().await {
                println!("Allocation:    {:?}", signal);
            }
        }

        Commands::Config => {
            let risk = RiskParams::default();
            let orch = OrchestratorConfig::default();

            println!("\n=== Default Risk Parameters ===\n");
            println!("  Profit Target:        {} (+{}%)", risk.profit_target, (risk.profit_target - Decimal::ONE) * dec!(100));
            println!("  Stop Loss:            {} (-{}%)", risk.stop_loss, (Decimal::ONE - risk.stop_loss) * dec!(100));
            println!(
                "  Trailing Stop:        {}",
                risk.trailing_stop.map(|t| format!("{}%", t * dec!(100))).unwrap_or_else(|| "off".to_string())
            );

            println!("\n=== Validation Ranges ===\n");
            println!("  investment_amount:    {} - {}", INVESTMENT_RANGE.0, INVESTMENT_RANGE.1);
            println!("  profit_target:        {} - {}", PROFIT_TARGET_RANGE.0, PROFIT_TARGET_RANGE.1);
            println!("  stop_loss:            {} - {}", STOP_LOSS_RANGE.0, STOP_LOSS_RANGE.1);
            println!("  trailing_stop:        {} - {}", TRAILING_STOP_RANGE.0, TRAILING_STOP_RANGE.1);
            println!("  max_symbols:          {} - {}", MAX_SYMBOLS_RANGE.0, MAX_SYMBOLS_RANGE.1);
            println!("  symbol_selection:     top_volume | manual");
            let strategies: Vec<&str> = StrategyKind::ALL.iter().map(|k| k.as_str()).collect();
            println!("  strategy:             {} | portfolio", strategies.join(" | "));

            println!("\n=== Orchestrator ===\n");
            println!("  Cycle Interval:       {}s", orch.cycle_interval.as_secs());
            println!(
                "  Portfolio Interval:   {}s",
                orch.portfolio_interval.map(|d| d.as_secs()).unwrap_or(0)
            );
            println!(
                "  Symbol Refresh:       {}s",
                orch.symbol_refresh_interval.map(|d| d.as_secs()).unwrap_or(0)
            );
            println!("  Exposure Bounds:      {}% - {}%", UNDER_EXPOSED * dec!(100), OVER_EXPOSED * dec!(100));

            println!("\nBot definitions are read from {}", cli.config_dir.display());
            if let Ok(defs) = load_definitions(&cli.config_dir) {
                for def in defs {
                    let kind = match &def {
                        BotDefinition::Agent(c) => c.strategy.to_string(),
                        BotDefinition::Portfolio(_) => "portfolio".to_string(),
                    };
                    println!("  {:<30} {}", truncate(&def.display_name(), 28), kind);
                }
            }
        }
    }

    Ok(())
}

/// Add each agent, logging the ones the orchestrator rejects. Returns how many were added.
async fn register_agents(orch: &Orchestrator, configs: Vec<AgentConfig>) -> usize {
    let mut added = 0;
    for config in configs {
        match orch.add_agent(config.build_agent()).await {
            Ok(()) => added += 1,
            Err(e) => warn!(symbol = %config.symbol, error = %e, "Agent not added"),
        }
    }
    added
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
