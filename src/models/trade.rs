//! Trade record kept in each agent's append-only history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An executed order as recorded by an agent. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub side: TradeSide,

    pub symbol: String,

    /// Fill price in quote currency
    pub price: Decimal,

    /// Base-asset quantity
    pub quantity: Decimal,

    /// price * quantity
    pub value: Decimal,

    pub timestamp: DateTime<Utc>,

    /// Exit reason for sells (e.g. "take profit")
    #[serde(default)]
    pub reason: Option<String>,

    /// Realized P/L, only set on sells
    #[serde(default)]
    pub realized_pl: Option<Decimal>,

    /// Exchange or client order id, when the venue returned one
    #[serde(default)]
    pub order_id: Option<String>,
}

impl TradeRecord {
    /// Record a filled buy.
    pub fn buy(symbol: &str, price: Decimal, quantity: Decimal, order_id: Option<String>) -> Self {
        Self {
            side: TradeSide::Buy,
            symbol: symbol.to_string(),
            price,
            quantity,
            value: price * quantity,
            timestamp: Utc::now(),
            reason: None,
            realized_pl: None,
            order_id,
        }
    }

    /// Record a filled sell closing a position opened at `entry_price`.
    pub fn sell(
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        entry_price: Decimal,
        reason: &str,
        order_id: Option<String>,
    ) -> Self {
        Self {
            side: TradeSide::Sell,
            symbol: symbol.to_string(),
            price,
            quantity,
            value: price * quantity,
            timestamp: Utc::now(),
            reason: Some(reason.to_string()),
            realized_pl: Some((price - entry_price) * quantity),
            order_id,
        }
    }
}
