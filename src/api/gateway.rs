//! Exchange capability used by the registry, agents and the portfolio aggregator.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{BotError, Result};
use crate::models::{AssetBalance, Candle, Fill, SymbolRule, SymbolVolume, TradeSide};

fn unsupported(feature: &str) -> BotError {
    BotError::Gateway(format!("{} is not supported by this gateway", feature))
}

/// Everything the engine needs from a market venue. Every call may fail.
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Last traded price of `symbol`.
    async fn get_price(&self, symbol: &str) -> Result<Decimal>;

    /// Most recent `limit` candles at `interval` (e.g. "1h"), oldest first.
    async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;

    async fn get_account_balances(&self) -> Result<Vec<AssetBalance>>;

    /// Trading rules of a single symbol.
    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolRule>;

    /// Trading rules of every symbol currently open for trading.
    async fn get_symbol_rules(&self) -> Result<Vec<SymbolRule>>;

    /// Place a market order and report the fill. Must not mutate anything on failure.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<Fill>;

    /// 24h volumes of all symbols.
    async fn get_24h_volumes(&self) -> Result<Vec<SymbolVolume>> {
        Err(unsupported("24h volume ranking"))
    }

    /// Connectivity check.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
