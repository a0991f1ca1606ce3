//! Response types for the Binance spot REST API.

use chrono::DateTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::models::{AssetBalance, Candle, SymbolRule, SymbolVolume};

/// Step and minimum quantity used when a symbol carries no LOT_SIZE filter.
pub const DEFAULT_STEP_SIZE: Decimal = dec!(0.00000001);
/// Minimum notional used when a symbol carries no notional filter.
pub const DEFAULT_MIN_NOTIONAL: Decimal = dec!(10);

/// `/api/v3/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilter {
    pub filter_type: String,
    #[serde(default)]
    pub step_size: Option<Decimal>,
    #[serde(default)]
    pub min_qty: Option<Decimal>,
    #[serde(default)]
    pub min_notional: Option<Decimal>,
}

impl SymbolInfo {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING"
    }

    fn filter(&self, filter_type: &str) -> Option<&SymbolFilter> {
        self.filters.iter().find(|f| f.filter_type == filter_type)
    }

    /// Collapse the exchange filters into a rule, falling back to defaults
    /// for anything missing.
    pub fn to_rule(&self) -> SymbolRule {
        let lot = self.filter("LOT_SIZE");
        let step_size = lot.and_then(|f| f.step_size).unwrap_or(DEFAULT_STEP_SIZE);
        let min_qty = lot.and_then(|f| f.min_qty).unwrap_or(DEFAULT_STEP_SIZE);
        let min_notional = self
            .filter("MIN_NOTIONAL")
            .or_else(|| self.filter("NOTIONAL"))
            .and_then(|f| f.min_notional)
            .unwrap_or(DEFAULT_MIN_NOTIONAL);

        SymbolRule {
            symbol: self.symbol.clone(),
            base_asset: self.base_asset.clone(),
            quote_asset: self.quote_asset.clone(),
            step_size,
            min_notional,
            min_qty,
        }
    }
}

/// `/api/v3/ticker/price`
#[derive(Debug, Clone, Deserialize)]
pub struct PriceTicker {
    pub price: Decimal,
}

/// `/api/v3/ticker/24hr` (one element)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hResponse {
    pub symbol: String,
    pub volume: Decimal,
    pub last_price: Decimal,
}

impl From<Ticker24hResponse> for SymbolVolume {
    fn from(t: Ticker24hResponse) -> Self {
        SymbolVolume {
            symbol: t.symbol,
            volume: t.volume,
            last_price: t.last_price,
        }
    }
}

/// `/api/v3/account`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl From<BalanceEntry> for AssetBalance {
    fn from(b: BalanceEntry) -> Self {
        AssetBalance {
            asset: b.asset,
            free: b.free,
            locked: b.locked,
        }
    }
}

/// Error body returned by Binance on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

/// Parse one `/api/v3/klines` row:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
pub fn parse_kline_row(row: &[serde_json::Value]) -> Option<Candle> {
    if row.len() < 7 {
        return None;
    }

    let open_time = DateTime::from_timestamp_millis(row[0].as_i64()?)?;
    let close_time = DateTime::from_timestamp_millis(row[6].as_i64()?)?;

    Some(Candle {
        open_time,
        open: row[1].as_str()?.parse().ok()?,
        high: row[2].as_str()?.parse().ok()?,
        low: row[3].as_str()?.parse().ok()?,
        close: row[4].as_str()?.parse().ok()?,
        volume: row[5].as_str()?.parse().ok()?,
        close_time,
    })
}
