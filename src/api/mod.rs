//! Market venue access: the gateway capability and its Binance implementation.

mod binance_client;
mod gateway;
#[cfg(test)]
pub mod mock;
mod types;

pub use binance_client::{ApiCredentials, BinanceClient, TESTNET_URL};
pub use gateway::MarketGateway;
