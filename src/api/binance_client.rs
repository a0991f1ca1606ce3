//! Binance spot REST client.
//!
//! Public market data is read without authentication. Account and order
//! endpoints are signed with HMAC-SHA256 over the query string and carry the
//! API key in the `X-MBX-APIKEY` header.
//!
//! Orders are only ever sent to `/api/v3/order/test`, which validates the
//! order without executing it. Because that endpoint returns no fill, the
//! fill price reported to callers is the ticker price read just before the
//! order is sent.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, info};

use crate::error::{BotError, Result};
use crate::models::{AssetBalance, Candle, Fill, SymbolRule, SymbolVolume, TradeSide};

use super::gateway::MarketGateway;
use super::types::*;

type HmacSha256 = Hmac<Sha256>;

/// Spot testnet REST endpoint.
pub const TESTNET_URL: &str = "https://testnet.binance.vision";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_WINDOW_MS: u64 = 5000;
const MAX_KLINES: usize = 1000;

/// API key pair for signed endpoints.
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl ApiCredentials {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self { api_key, api_secret }
    }

    /// Read `BINANCE_API_KEY` / `BINANCE_API_SECRET`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BINANCE_API_KEY")
            .map_err(|_| BotError::InvalidConfig("BINANCE_API_KEY not set".to_string()))?;
        let api_secret = std::env::var("BINANCE_API_SECRET")
            .map_err(|_| BotError::InvalidConfig("BINANCE_API_SECRET not set".to_string()))?;

        if api_key.trim().is_empty() || api_secret.trim().is_empty() {
            return Err(BotError::InvalidConfig("Binance credentials are empty".to_string()));
        }

        Ok(Self::new(api_key, api_secret))
    }

    /// Hex-encoded HMAC-SHA256 of `payload` keyed by the API secret.
    pub fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| BotError::InvalidConfig(format!("Invalid API secret: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// REST client implementing [`MarketGateway`] for Binance spot.
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<ApiCredentials>,
}

impl BinanceClient {
    /// Create with custom base URL.
    pub fn with_base_url(base_url: String, credentials: Option<ApiCredentials>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| BotError::Gateway(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn credentials(&self) -> Result<&ApiCredentials> {
        self.credentials.as_ref().ok_or_else(|| {
            BotError::InvalidConfig("API credentials are required for this request".to_string())
        })
    }

    async fn public_get<T: DeserializeOwned>(&self, path: &str, query: &str, what: &str) -> Result<T> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BotError::Gateway(format!("{} request failed: {}", what, e)))?;

        Self::decode(response, what).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        what: &str,
    ) -> Result<T> {
        let credentials = self.credentials()?;

        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        query.push(format!("recvWindow={}", RECV_WINDOW_MS));
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let query = query.join("&");
        let signature = credentials.sign(&query)?;

        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        debug!(path = %path, method = %method, "Signed request");

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await
            .map_err(|e| BotError::Gateway(format!("{} request failed: {}", what, e)))?;

        Self::decode(response, what).await
    }

    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(err) => format!("{} ({})", err.msg, err.code),
                Err(_) => body,
            };
            return Err(BotError::Gateway(format!("{} failed: {} - {}", what, status, detail)));
        }

        response
            .json()
            .await
            .map_err(|e| BotError::Gateway(format!("Failed to parse {} response: {}", what, e)))
    }

    async fn exchange_info(&self, query: &str) -> Result<ExchangeInfoResponse> {
        self.public_get("/api/v3/exchangeInfo", query, "exchange info").await
    }
}

#[async_trait]
impl MarketGateway for BinanceClient {
    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let ticker: PriceTicker = self
            .public_get("/api/v3/ticker/price", &format!("symbol={}", symbol), "price ticker")
            .await?;
        Ok(ticker.price)
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let query = format!(
            "symbol={}&interval={}&limit={}",
            symbol,
            interval,
            limit.min(MAX_KLINES)
        );
        let rows: Vec<Vec<serde_json::Value>> =
            self.public_get("/api/v3/klines", &query, "klines").await?;

        let candles: Vec<Candle> = rows.iter().filter_map(|row| parse_kline_row(row)).collect();
        debug!(symbol = %symbol, count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    async fn get_account_balances(&self) -> Result<Vec<AssetBalance>> {
        let account: AccountResponse = self
            .signed_request(Method::GET, "/api/v3/account", &[], "account")
            .await?;
        Ok(account.balances.into_iter().map(AssetBalance::from).collect())
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolRule> {
        let info = self.exchange_info(&format!("symbol={}", symbol)).await?;
        info.symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .map(SymbolInfo::to_rule)
            .ok_or_else(|| BotError::UnknownSymbol(symbol.to_string()))
    }

    async fn get_symbol_rules(&self) -> Result<Vec<SymbolRule>> {
        let info = self.exchange_info("").await?;
        Ok(info
            .symbols
            .iter()
            .filter(|s| s.is_trading())
            .map(SymbolInfo::to_rule)
            .collect())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<Fill> {
        // Read before sending so an accepted order always yields a fill.
        let price = self.get_price(symbol).await?;

        let client_order_id = uuid::Uuid::new_v4().simple().to_string();
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newClientOrderId", client_order_id.clone()),
        ];

        let _: serde_json::Value = self
            .signed_request(Method::POST, "/api/v3/order/test", &params, "test order")
            .await?;

        info!(
            symbol = %symbol,
            side = %side,
            quantity = %quantity,
            price = %price,
            order_id = %client_order_id,
            "Test order accepted"
        );

        Ok(Fill {
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            order_id: Some(client_order_id),
        })
    }

    async fn get_24h_volumes(&self) -> Result<Vec<SymbolVolume>> {
        let tickers: Vec<Ticker24hResponse> =
            self.public_get("/api/v3/ticker/24hr", "", "24h ticker").await?;
        Ok(tickers.into_iter().map(SymbolVolume::from).collect())
    }

    async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self.public_get("/api/v3/ping", "", "ping").await?;
        Ok(())
    }
}
