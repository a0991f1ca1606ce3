//! Data models for symbols, positions, trades and portfolio snapshots.

mod market;
mod portfolio;
mod position;
mod trade;

pub use market::{AssetBalance, Candle, Fill, SymbolRule, SymbolVolume};
pub use portfolio::{Holding, PortfolioSnapshot};
pub use position::Position;
pub use trade::{TradeRecord, TradeSide};
