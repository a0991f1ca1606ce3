//! Position held by a single agent.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Inventory bought by an agent and not yet sold. An agent holds at most one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,

    /// Base-asset quantity held
    pub quantity: Decimal,

    /// Fill price of the opening buy
    pub entry_price: Decimal,

    pub opened_at: DateTime<Utc>,

    /// quantity * entry_price
    pub cost_basis: Decimal,

    /// Highest price observed while open, used by the trailing stop
    pub peak_price: Decimal,
}

impl Position {
    /// Open a position from a filled buy.
    pub fn open(symbol: String, quantity: Decimal, entry_price: Decimal) -> Self {
        Self {
            symbol,
            quantity,
            entry_price,
            opened_at: Utc::now(),
            cost_basis: quantity * entry_price,
            peak_price: entry_price,
        }
    }

    /// Track the running high. Returns the new peak.
    pub fn observe_price(&mut self, price: Decimal) -> Decimal {
        if price > self.peak_price {
            self.peak_price = price;
        }
        self.peak_price
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    pub fn unrealized_pl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity
    }

    /// Unrealized P/L as a percentage of cost basis.
    pub fn unrealized_pl_percent(&self, price: Decimal) -> Decimal {
        if self.cost_basis.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pl(price) / self.cost_basis * Decimal::ONE_HUNDRED
    }
}
