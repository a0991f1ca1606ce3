//! Point-in-time valuation of the whole account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Value of one non-quote asset at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub asset: String,
    pub quantity: Decimal,
    pub value: Decimal,
}

/// Account value snapshot, expressed in the quote asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_value: Decimal,
    pub holdings: Vec<Holding>,
    pub quote_balance: Decimal,
}

impl PortfolioSnapshot {
    /// Fraction of the portfolio held in non-quote assets. Zero for an empty account.
    pub fn exposure(&self) -> Decimal {
        if self.total_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.total_value - self.quote_balance) / self.total_value
    }
}

impl std::fmt::Display for PortfolioSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Portfolio @ {} ===", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Total Value:   {:.2}", self.total_value)?;
        writeln!(f, "Quote Balance: {:.2}", self.quote_balance)?;
        writeln!(f, "Exposure:      {:.1}%", self.exposure() * Decimal::ONE_HUNDRED)?;
        for h in &self.holdings {
            writeln!(f, "  {:<8} {:>18} {:>14.2}", h.asset, h.quantity, h.value)?;
        }
        Ok(())
    }
}
