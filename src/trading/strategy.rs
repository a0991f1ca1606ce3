//! Entry strategies and risk exits.
//!
//! A strategy only decides; it never touches the exchange. Risk exits
//! (take profit, stop loss, trailing stop) are evaluated by [`RiskParams`]
//! before the strategy gets a chance to signal a sell, so every agent
//! shares the same exit priority regardless of its strategy.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::models::{Candle, Position, TradeSide};

/// Risk parameters applied to an open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    /// Sell when price >= entry * profit_target (e.g. 1.02)
    pub profit_target: Decimal,

    /// Sell when price <= entry * stop_loss (e.g. 0.98)
    pub stop_loss: Decimal,

    /// Fractional pullback from the peak that triggers a sell once the
    /// position has been in profit (e.g. 0.005)
    pub trailing_stop: Option<Decimal>,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            profit_target: dec!(1.02),        // +2%
            stop_loss: dec!(0.98),            // -2%
            trailing_stop: Some(dec!(0.005)), // 0.5% off the high
        }
    }
}

impl RiskParams {
    /// First matching risk exit, in priority order: take profit, stop loss,
    /// trailing stop. `position.peak_price` must already include `price`.
    pub fn check_exit(&self, position: &Position, price: Decimal) -> Option<ExitReason> {
        let entry = position.entry_price;

        if price >= entry * self.profit_target {
            return Some(ExitReason::TakeProfit);
        }

        if price <= entry * self.stop_loss {
            return Some(ExitReason::StopLoss);
        }

        if let Some(trail) = self.trailing_stop {
            let peak = position.peak_price;
            if trail > Decimal::ZERO && peak > entry && price <= peak * (Decimal::ONE - trail) {
                return Some(ExitReason::TrailingStop);
            }
        }

        None
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    /// Sell requested by the strategy
    Signal(String),
}

impl ExitReason {
    pub fn as_str(&self) -> &str {
        match self {
            ExitReason::TakeProfit => "take profit",
            ExitReason::StopLoss => "stop loss",
            ExitReason::TrailingStop => "trailing stop",
            ExitReason::Signal(reason) => reason,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candle history a strategy wants alongside the live price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandleRequest {
    pub interval: &'static str,
    pub limit: usize,
}

/// Market data handed to a strategy for one decision.
#[derive(Debug, Clone)]
pub struct MarketContext {
    pub price: Decimal,
    /// Oldest first; empty unless the strategy asked for candles
    pub candles: Vec<Candle>,
}

impl MarketContext {
    pub fn new(price: Decimal, candles: Vec<Candle>) -> Self {
        Self { price, candles }
    }

    /// Close prices as floats, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.candles
            .iter()
            .filter_map(|c| c.close.to_f64())
            .collect()
    }

    fn price_f64(&self) -> f64 {
        self.price.to_f64().unwrap_or(f64::NAN)
    }
}

/// Outcome of one strategy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Wait,
    /// Spend `quote_amount` of the quote asset
    Buy { quote_amount: Decimal },
    /// Close the whole position
    Sell { reason: String },
}

/// Pluggable decision logic.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn candle_request(&self) -> Option<CandleRequest> {
        None
    }

    fn decide(&self, ctx: &MarketContext, position: Option<&Position>) -> Decision;

    /// Called after an order this agent placed was filled.
    fn on_fill(&self, _side: TradeSide) {}

    /// Budget used for buys.
    fn investment_amount(&self) -> Decimal;

    fn set_investment_amount(&mut self, amount: Decimal);
}

/// Strategy selector used in bot definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Buy below the 24h average close
    Simple,
    /// 6h / 24h moving average crossover
    MovingAverage,
    /// Buy on the first cycle, then manage exits
    InstantBuy,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Simple,
        StrategyKind::MovingAverage,
        StrategyKind::InstantBuy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Simple => "simple",
            StrategyKind::MovingAverage => "moving_average",
            StrategyKind::InstantBuy => "instant_buy",
        }
    }

    pub fn build(self, investment_amount: Decimal) -> Box<dyn Strategy> {
        match self {
            StrategyKind::Simple => Box::new(BelowAverageStrategy::new(investment_amount)),
            StrategyKind::MovingAverage => Box::new(MovingAverageStrategy::new(investment_amount)),
            StrategyKind::InstantBuy => Box::new(InstantBuyStrategy::new(investment_amount)),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(StrategyKind::Simple),
            "moving_average" | "ma" => Ok(StrategyKind::MovingAverage),
            "instant_buy" | "instant" => Ok(StrategyKind::InstantBuy),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

const DAY_OF_HOURS: CandleRequest = CandleRequest {
    interval: "1h",
    limit: 24,
};

/// Buys when the live price is below the mean of the last 24 hourly closes.
/// Never signals a sell; exits come from the risk parameters.
pub struct BelowAverageStrategy {
    investment_amount: Decimal,
}

impl BelowAverageStrategy {
    pub fn new(investment_amount: Decimal) -> Self {
        Self { investment_amount }
    }
}

impl Strategy for BelowAverageStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::Simple.as_str()
    }

    fn candle_request(&self) -> Option<CandleRequest> {
        Some(DAY_OF_HOURS)
    }

    fn decide(&self, ctx: &MarketContext, position: Option<&Position>) -> Decision {
        if position.is_some() {
            return Decision::Wait;
        }

        let closes = ctx.closes();
        if closes.is_empty() {
            return Decision::Wait;
        }

        let average = closes.iter().mean();
        if ctx.price_f64() < average {
            Decision::Buy {
                quote_amount: self.investment_amount,
            }
        } else {
            Decision::Wait
        }
    }

    fn investment_amount(&self) -> Decimal {
        self.investment_amount
    }

    fn set_investment_amount(&mut self, amount: Decimal) {
        self.investment_amount = amount;
    }
}

/// Short/long moving average crossover on hourly closes.
pub struct MovingAverageStrategy {
    investment_amount: Decimal,
    short_window: usize,
    long_window: usize,
}

impl MovingAverageStrategy {
    pub fn new(investment_amount: Decimal) -> Self {
        Self {
            investment_amount,
            short_window: 6,
            long_window: 24,
        }
    }

    /// (short MA, long MA). The long average covers whatever history is
    /// available up to `long_window`; None below `short_window` closes.
    fn averages(&self, closes: &[f64]) -> Option<(f64, f64)> {
        if closes.len() < self.short_window {
            return None;
        }
        let long = &closes[closes.len() - closes.len().min(self.long_window)..];
        let short = &long[long.len() - self.short_window..];
        Some((short.iter().mean(), long.iter().mean()))
    }
}

impl Strategy for MovingAverageStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::MovingAverage.as_str()
    }

    fn candle_request(&self) -> Option<CandleRequest> {
        Some(CandleRequest {
            interval: "1h",
            limit: self.long_window,
        })
    }

    fn decide(&self, ctx: &MarketContext, position: Option<&Position>) -> Decision {
        let Some((ma_short, ma_long)) = self.averages(&ctx.closes()) else {
            return Decision::Wait;
        };

        match position {
            Some(_) if ma_short < ma_long => Decision::Sell {
                reason: "moving average crossover".to_string(),
            },
            Some(_) => Decision::Wait,
            None if ma_short > ma_long && ctx.price_f64() < ma_long => Decision::Buy {
                quote_amount: self.investment_amount,
            },
            None => Decision::Wait,
        }
    }

    fn investment_amount(&self) -> Decimal {
        self.investment_amount
    }

    fn set_investment_amount(&mut self, amount: Decimal) {
        self.investment_amount = amount;
    }
}

/// Buys as soon as it runs, once. A failed buy is retried next cycle; after
/// the first filled buy it only waits.
pub struct InstantBuyStrategy {
    investment_amount: Decimal,
    bought: AtomicBool,
}

impl InstantBuyStrategy {
    pub fn new(investment_amount: Decimal) -> Self {
        Self {
            investment_amount,
            bought: AtomicBool::new(false),
        }
    }
}

impl Strategy for InstantBuyStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::InstantBuy.as_str()
    }

    fn decide(&self, _ctx: &MarketContext, position: Option<&Position>) -> Decision {
        if position.is_none() && !self.bought.load(Ordering::SeqCst) {
            Decision::Buy {
                quote_amount: self.investment_amount,
            }
        } else {
            Decision::Wait
        }
    }

    fn on_fill(&self, side: TradeSide) {
        if side == TradeSide::Buy {
            self.bought.store(true, Ordering::SeqCst);
        }
    }

    fn investment_amount(&self) -> Decimal {
        self.investment_amount
    }

    fn set_investment_amount(&mut self, amount: Decimal) {
        self.investment_amount = amount;
    }
}
