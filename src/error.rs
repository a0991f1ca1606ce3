//! Error types shared by the trading engine.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the gateway, the symbol registry, agents and the orchestrator.
#[derive(Error, Debug)]
pub enum BotError {
    /// Any failure talking to the exchange (network, status, decoding).
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Price unavailable for {symbol}: {reason}")]
    PriceUnavailable { symbol: String, reason: String },

    #[error("Order for {symbol} below minimum notional: {notional} < {min_notional}")]
    BelowMinNotional {
        symbol: String,
        notional: Decimal,
        min_notional: Decimal,
    },

    #[error("Order for {symbol} below minimum quantity: {quantity} < {min_qty}")]
    BelowMinQuantity {
        symbol: String,
        quantity: Decimal,
        min_qty: Decimal,
    },

    #[error("An agent is already registered for {0}")]
    DuplicateSymbol(String),
}

impl BotError {
    /// Order-size rejections are expected outcomes, not faults.
    pub fn is_order_size_rejection(&self) -> bool {
        matches!(
            self,
            BotError::BelowMinNotional { .. } | BotError::BelowMinQuantity { .. }
        )
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        BotError::Gateway(err.to_string())
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
