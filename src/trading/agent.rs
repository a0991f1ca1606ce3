//! A single trading agent: one symbol, one strategy, one position at most.
//!
//! The agent is a two-state machine. While flat it asks its strategy whether
//! to buy. While holding it checks the risk exits first, then lets the
//! strategy signal a sell. A position is only cleared after a sell order has
//! been accepted; a failed order leaves every piece of state untouched.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::api::MarketGateway;
use crate::error::{BotError, Result};
use crate::models::{Position, TradeRecord, TradeSide};

use super::strategy::{Decision, ExitReason, MarketContext, RiskParams, Strategy};
use super::symbol_registry::SymbolRegistry;

/// What one `step` did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Nothing to do this cycle
    Waited,
    Opened { quantity: Decimal, price: Decimal },
    Closed { reason: String, realized_pl: Decimal },
    /// Buy wanted but the order size was not exchange-legal
    Skipped { reason: String },
}

/// Trading agent owned by the orchestrator.
pub struct Agent {
    name: String,
    symbol: String,
    strategy: Box<dyn Strategy>,
    risk: RiskParams,
    position: Option<Position>,
    trade_history: Vec<TradeRecord>,
    running: bool,
}

impl Agent {
    pub fn new(name: String, symbol: String, strategy: Box<dyn Strategy>, risk: RiskParams) -> Self {
        Self {
            name,
            symbol,
            strategy,
            risk,
            position: None,
            trade_history: Vec::new(),
            running: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn risk(&self) -> &RiskParams {
        &self.risk
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn trade_history(&self) -> &[TradeRecord] {
        &self.trade_history
    }

    /// Sum of realized P/L over all sells.
    pub fn realized_pl(&self) -> Decimal {
        self.trade_history.iter().filter_map(|t| t.realized_pl).sum()
    }

    pub fn investment_amount(&self) -> Decimal {
        self.strategy.investment_amount()
    }

    pub fn set_investment_amount(&mut self, amount: Decimal) {
        self.strategy.set_investment_amount(amount);
    }

    /// One decide-and-act pass. Never retries; a failure is retried on the
    /// next cycle.
    pub async fn step(&mut self, gateway: &dyn MarketGateway, registry: &SymbolRegistry) -> Result<StepOutcome> {
        let price = gateway
            .get_price(&self.symbol)
            .await
            .map_err(|e| BotError::PriceUnavailable {
                symbol: self.symbol.clone(),
                reason: e.to_string(),
            })?;

        if let Some(position) = self.position.as_mut() {
            position.observe_price(price);
            if let Some(reason) = self.risk.check_exit(position, price) {
                return self.sell(gateway, reason).await;
            }
        }

        let candles = match self.strategy.candle_request() {
            Some(req) => gateway.get_klines(&self.symbol, req.interval, req.limit).await?,
            None => Vec::new(),
        };
        let ctx = MarketContext::new(price, candles);

        match self.strategy.decide(&ctx, self.position.as_ref()) {
            Decision::Wait => Ok(StepOutcome::Waited),
            Decision::Buy { quote_amount } if self.position.is_none() => {
                self.buy(gateway, registry, quote_amount).await
            }
            Decision::Sell { reason } if self.position.is_some() => {
                self.sell(gateway, ExitReason::Signal(reason)).await
            }
            decision => {
                debug!(symbol = %self.symbol, ?decision, "Ignoring decision that does not match position state");
                Ok(StepOutcome::Waited)
            }
        }
    }

    async fn buy(
        &mut self,
        gateway: &dyn MarketGateway,
        registry: &SymbolRegistry,
        quote_amount: Decimal,
    ) -> Result<StepOutcome> {
        let quantity = match registry.quantize(gateway, &self.symbol, quote_amount).await {
            Ok(quantity) => quantity,
            Err(e) if e.is_order_size_rejection() => {
                info!(symbol = %self.symbol, amount = %quote_amount, reason = %e, "Buy skipped");
                return Ok(StepOutcome::Skipped { reason: e.to_string() });
            }
            Err(e) => return Err(e),
        };

        let fill = match gateway
            .place_market_order(&self.symbol, TradeSide::Buy, quantity)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                error!(symbol = %self.symbol, quantity = %quantity, error = %e, "Buy order failed");
                return Err(e);
            }
        };

        let position = Position::open(self.symbol.clone(), fill.quantity, fill.price);
        self.trade_history.push(TradeRecord::buy(
            &self.symbol,
            fill.price,
            fill.quantity,
            fill.order_id,
        ));
        self.position = Some(position);
        self.strategy.on_fill(TradeSide::Buy);

        info!(
            agent = %self.name,
            symbol = %self.symbol,
            quantity = %fill.quantity,
            price = %fill.price,
            "Position opened"
        );

        Ok(StepOutcome::Opened {
            quantity: fill.quantity,
            price: fill.price,
        })
    }

    /// Close the whole position. State is only changed after the order succeeds.
    async fn sell(&mut self, gateway: &dyn MarketGateway, reason: ExitReason) -> Result<StepOutcome> {
        let Some(position) = self.position.as_ref() else {
            return Ok(StepOutcome::Waited);
        };
        let quantity = position.quantity;
        let entry_price = position.entry_price;

        let fill = match gateway
            .place_market_order(&self.symbol, TradeSide::Sell, quantity)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                error!(
                    symbol = %self.symbol,
                    reason = %reason,
                    error = %e,
                    "Sell order failed, keeping position"
                );
                return Err(e);
            }
        };

        let record = TradeRecord::sell(
            &self.symbol,
            fill.price,
            quantity,
            entry_price,
            reason.as_str(),
            fill.order_id,
        );
        let realized_pl = record.realized_pl.unwrap_or_default();
        self.trade_history.push(record);
        self.position = None;
        self.strategy.on_fill(TradeSide::Sell);

        info!(
            agent = %self.name,
            symbol = %self.symbol,
            reason = %reason,
            price = %fill.price,
            realized_pl = %realized_pl,
            "Position closed"
        );

        Ok(StepOutcome::Closed {
            reason: reason.to_string(),
            realized_pl,
        })
    }

    /// Read-only status. An unavailable price is reported as `None`.
    pub async fn status(&self, gateway: &dyn MarketGateway) -> AgentStatus {
        let current_price = match gateway.get_price(&self.symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Price unavailable for status");
                None
            }
        };

        let position = self.position.as_ref().map(|p| PositionStatus {
            quantity: p.quantity,
            entry_price: p.entry_price,
            current_value: current_price.map(|price| p.market_value(price)),
            unrealized_pl: current_price.map(|price| p.unrealized_pl(price)),
            unrealized_pl_percent: current_price.map(|price| p.unrealized_pl_percent(price)),
        });

        AgentStatus {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            strategy: self.strategy.name().to_string(),
            current_price,
            position,
            is_running: self.running,
            investment_amount: self.investment_amount(),
            trades: self.trade_history.len(),
            realized_pl: self.realized_pl(),
            risk: self.risk().clone(),
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("symbol", &self.symbol)
            .field("strategy", &self.strategy.name())
            .field("position", &self.position)
            .field("running", &self.running)
            .finish()
    }
}

/// Open position as seen at status time.
#[derive(Debug, Clone, Serialize)]
pub struct PositionStatus {
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_value: Option<Decimal>,
    pub unrealized_pl: Option<Decimal>,
    pub unrealized_pl_percent: Option<Decimal>,
}

/// Snapshot of an agent for display.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub symbol: String,
    pub strategy: String,
    pub current_price: Option<Decimal>,
    pub position: Option<PositionStatus>,
    pub is_running: bool,
    pub investment_amount: Decimal,
    pub trades: usize,
    pub realized_pl: Decimal,
    pub risk: RiskParams,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let price = self
            .current_price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unavailable".to_string());
        writeln!(
            f,
            "{} [{}] {} ({})",
            self.symbol,
            self.strategy,
            if self.is_running { "running" } else { "stopped" },
            self.name
        )?;
        writeln!(f, "  Price:        {}", price)?;
        writeln!(f, "  Budget:       {:.2}", self.investment_amount)?;
        writeln!(
            f,
            "  Exits:        take profit x{}, stop loss x{}, trailing {}",
            self.risk.profit_target,
            self.risk.stop_loss,
            self.risk
                .trailing_stop
                .map(|t| t.to_string())
                .unwrap_or_else(|| "off".to_string())
        )?;
        match &self.position {
            Some(p) => {
                writeln!(f, "  Position:     {} @ {}", p.quantity, p.entry_price)?;
                if let (Some(pl), Some(pct)) = (p.unrealized_pl, p.unrealized_pl_percent) {
                    writeln!(f, "  Unrealized:   {:.2} ({:.2}%)", pl, pct)?;
                }
            }
            None => writeln!(f, "  Position:     none")?,
        }
        writeln!(f, "  Trades:       {} (realized {:.2})", self.trades, self.realized_pl)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{rule, MockGateway};
    use crate::trading::strategy::{BelowAverageStrategy, InstantBuyStrategy, MovingAverageStrategy};
    use rust_decimal_macros::dec;

    fn registry() -> SymbolRegistry {
        SymbolRegistry::from_rules(vec![
            rule("BTCUSDT", "BTC", "USDT", dec!(0.001), dec!(10)),
            rule("ETHUSDT", "ETH", "USDT", dec!(0.001), dec!(10)),
        ])
    }

    fn instant_agent(symbol: &str, amount: Decimal, risk: RiskParams) -> Agent {
        Agent::new(
            format!("{} test", symbol),
            symbol.to_string(),
            Box::new(InstantBuyStrategy::new(amount)),
            risk,
        )
    }

    fn no_trail() -> RiskParams {
        RiskParams {
            trailing_stop: None,
            ..RiskParams::default()
        }
    }

    #[tokio::test]
    async fn test_take_profit_realizes_pl() {
        let gateway = MockGateway::new();
        let registry = registry();
        gateway.set_price("BTCUSDT", dec!(100));

        let mut agent = instant_agent("BTCUSDT", dec!(200), no_trail());
        let outcome = agent.step(&gateway, &registry).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Opened {
                quantity: dec!(2),
                price: dec!(100)
            }
        );
        assert_eq!(agent.position().unwrap().cost_basis, dec!(200));

        gateway.set_price("BTCUSDT", dec!(102.5));
        let outcome = agent.step(&gateway, &registry).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Closed {
                reason: "take profit".to_string(),
                realized_pl: dec!(5.0)
            }
        );
        assert!(agent.position().is_none());
        assert_eq!(agent.trade_history().len(), 2);
        assert_eq!(agent.realized_pl(), dec!(5.0));

        // Instant buy does not re-enter after the exit
        let outcome = agent.step(&gateway, &registry).await.unwrap();
        assert_eq!(outcome, StepOutcome::Waited);
        assert_eq!(gateway.order_count(), 2);
    }

    #[tokio::test]
    async fn test_stop_loss_exit() {
        let gateway = MockGateway::new();
        let registry = registry();
        gateway.set_price("ETHUSDT", dec!(50));

        let mut agent = instant_agent("ETHUSDT", dec!(15), no_trail());
        agent.step(&gateway, &registry).await.unwrap();
        assert_eq!(agent.position().unwrap().quantity, dec!(0.3));

        gateway.set_price("ETHUSDT", dec!(48));
        let outcome = agent.step(&gateway, &registry).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Closed {
                reason: "stop loss".to_string(),
                realized_pl: dec!(-0.6)
            }
        );
    }

    #[tokio::test]
    async fn test_failed_sell_keeps_position() {
        let gateway = MockGateway::new();
        let registry = registry();
        gateway.set_price("BTCUSDT", dec!(100));

        let mut agent = instant_agent("BTCUSDT", dec!(200), no_trail());
        agent.step(&gateway, &registry).await.unwrap();

        gateway.set_price("BTCUSDT", dec!(103));
        gateway.fail_orders("BTCUSDT", true);
        assert!(agent.step(&gateway, &registry).await.is_err());

        let pos = agent.position().unwrap();
        assert_eq!(pos.quantity, dec!(2));
        assert_eq!(pos.entry_price, dec!(100));
        assert_eq!(agent.trade_history().len(), 1);

        // Next cycle retries and succeeds
        gateway.fail_orders("BTCUSDT", false);
        let outcome = agent.step(&gateway, &registry).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Closed { .. }));
    }

    #[tokio::test]
    async fn test_failed_buy_stays_idle() {
        let gateway = MockGateway::new();
        let registry = registry();
        gateway.set_price("BTCUSDT", dec!(100));
        gateway.fail_orders("BTCUSDT", true);

        let mut agent = instant_agent("BTCUSDT", dec!(200), no_trail());
        assert!(agent.step(&gateway, &registry).await.is_err());
        assert!(agent.position().is_none());
        assert!(agent.trade_history().is_empty());
    }

    #[tokio::test]
    async fn test_below_min_notional_skips_without_order() {
        let gateway = MockGateway::new();
        let registry = registry();
        gateway.set_price("ETHUSDT", dec!(50));

        let mut agent = instant_agent("ETHUSDT", dec!(4), no_trail());
        let outcome = agent.step(&gateway, &registry).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Skipped { .. }));
        assert_eq!(gateway.order_count(), 0);
        assert!(agent.position().is_none());
    }

    #[tokio::test]
    async fn test_trailing_stop_after_peak() {
        let gateway = MockGateway::new();
        let registry = registry();
        gateway.set_price("BTCUSDT", dec!(100));

        let risk = RiskParams {
            profit_target: dec!(1.05),
            stop_loss: dec!(0.9),
            trailing_stop: Some(dec!(0.01)),
        };
        let mut agent = instant_agent("BTCUSDT", dec!(200), risk);
        agent.step(&gateway, &registry).await.unwrap();

        gateway.set_price("BTCUSDT", dec!(104));
        assert_eq!(agent.step(&gateway, &registry).await.unwrap(), StepOutcome::Waited);
        assert_eq!(agent.position().unwrap().peak_price, dec!(104));

        gateway.set_price("BTCUSDT", dec!(102.9));
        let outcome = agent.step(&gateway, &registry).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Closed { ref reason, .. } if reason == "trailing stop"));
    }

    #[tokio::test]
    async fn test_strategy_sell_signal() {
        let gateway = MockGateway::new();
        let registry = registry();
        let mut closes = vec![dec!(100); 18];
        closes.extend(vec![dec!(110); 6]);
        gateway.set_closes("BTCUSDT", &closes);
        gateway.set_price("BTCUSDT", dec!(101));

        let mut agent = Agent::new(
            "ma".to_string(),
            "BTCUSDT".to_string(),
            Box::new(MovingAverageStrategy::new(dec!(101))),
            RiskParams {
                profit_target: dec!(1.5),
                stop_loss: dec!(0.5),
                trailing_stop: None,
            },
        );
        let outcome = agent.step(&gateway, &registry).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Opened { .. }));

        let mut closes = vec![dec!(100); 18];
        closes.extend(vec![dec!(95); 6]);
        gateway.set_closes("BTCUSDT", &closes);
        let outcome = agent.step(&gateway, &registry).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Closed { ref reason, .. } if reason == "moving average crossover"));
        assert_eq!(gateway.orders_for("BTCUSDT").len(), 2);
    }

    #[tokio::test]
    async fn test_buy_and_sell_are_exclusive() {
        let gateway = MockGateway::new();
        let registry = registry();
        gateway.set_closes("BTCUSDT", &vec![dec!(200); 24]);
        gateway.set_price("BTCUSDT", dec!(100));

        let mut agent = Agent::new(
            "simple".to_string(),
            "BTCUSDT".to_string(),
            Box::new(BelowAverageStrategy::new(dec!(100))),
            no_trail(),
        );
        for _ in 0..5 {
            agent.step(&gateway, &registry).await.unwrap();
        }
        // Price stays below average but only one buy happens while holding
        let orders = gateway.orders_for("BTCUSDT");
        assert_eq!(orders, vec![(TradeSide::Buy, dec!(1))]);
    }

    #[tokio::test]
    async fn test_status_with_unavailable_price() {
        let gateway = MockGateway::new();
        let registry = registry();
        gateway.set_price("BTCUSDT", dec!(100));

        let mut agent = instant_agent("BTCUSDT", dec!(200), no_trail());
        agent.set_running(true);
        agent.step(&gateway, &registry).await.unwrap();

        gateway.set_price("BTCUSDT", dec!(101));
        let status = agent.status(&gateway).await;
        assert_eq!(status.current_price, Some(dec!(101)));
        let pos = status.position.as_ref().unwrap();
        assert_eq!(pos.unrealized_pl, Some(dec!(2)));
        assert_eq!(pos.unrealized_pl_percent, Some(dec!(1)));
        assert!(status.is_running);

        gateway.fail_price("BTCUSDT", true);
        let status = agent.status(&gateway).await;
        assert!(status.current_price.is_none());
        assert!(status.position.unwrap().unrealized_pl.is_none());
        let rendered = format!("{}", agent.status(&gateway).await);
        assert!(rendered.contains("unavailable"));
        assert!(rendered.contains("trailing off"));
        assert_eq!(status.risk.stop_loss, dec!(0.98));
    }

    #[tokio::test]
    async fn test_price_failure_is_an_error() {
        let gateway = MockGateway::new();
        let registry = registry();
        let mut agent = instant_agent("BTCUSDT", dec!(200), no_trail());

        let err = agent.step(&gateway, &registry).await.unwrap_err();
        assert!(matches!(err, BotError::PriceUnavailable { .. }));
    }
}
