//! Exchange-side market data: symbol trading rules, candles, balances and fills.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TradeSide;

/// Trading constraints of one symbol, taken from the exchange filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRule {
    pub symbol: String,

    pub base_asset: String,

    pub quote_asset: String,

    /// LOT_SIZE step; quantities must be integer multiples of it
    pub step_size: Decimal,

    /// Minimum order value in quote currency
    pub min_notional: Decimal,

    /// LOT_SIZE minimum quantity
    pub min_qty: Decimal,
}

impl SymbolRule {
    /// `step_size > 0` and `min_notional >= 0`.
    pub fn is_valid(&self) -> bool {
        self.step_size > Decimal::ZERO
            && self.min_notional >= Decimal::ZERO
            && self.min_qty >= Decimal::ZERO
    }

    /// Number of decimal places implied by the step size.
    pub fn quantity_precision(&self) -> u32 {
        self.step_size.normalize().scale()
    }
}

/// One OHLCV candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
}

/// Free and locked amounts of one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Result of an accepted market order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub order_id: Option<String>,
}

/// 24h rolling volume of a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolVolume {
    pub symbol: String,
    pub volume: Decimal,
    pub last_price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rule(step: Decimal, min_notional: Decimal) -> SymbolRule {
        SymbolRule {
            symbol: "ETHUSDT".to_string(),
            base_asset: "ETH".to_string(),
            quote_asset: "USDT".to_string(),
            step_size: step,
            min_notional,
            min_qty: dec!(0.00000001),
        }
    }

    #[test]
    fn test_rule_validity() {
        assert!(rule(dec!(0.001), dec!(10)).is_valid());
        assert!(!rule(dec!(0), dec!(10)).is_valid());
        assert!(!rule(dec!(0.001), dec!(-1)).is_valid());
    }

    #[test]
    fn test_quantity_precision() {
        assert_eq!(rule(dec!(0.00100000), dec!(10)).quantity_precision(), 3);
        assert_eq!(rule(dec!(1.00000000), dec!(10)).quantity_precision(), 0);
    }

    #[test]
    fn test_balance_total() {
        let bal = AssetBalance {
            asset: "BTC".to_string(),
            free: dec!(0.5),
            locked: dec!(0.25),
        };
        assert_eq!(bal.total(), dec!(0.75));
    }
}
