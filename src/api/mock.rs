//! Scriptable in-memory gateway for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::error::{BotError, Result};
use crate::models::{AssetBalance, Candle, Fill, SymbolRule, SymbolVolume, TradeSide};

use super::gateway::MarketGateway;

#[derive(Default)]
pub struct MockGateway {
    prices: Mutex<HashMap<String, Decimal>>,
    klines: Mutex<HashMap<String, Vec<Candle>>>,
    balances: Mutex<Vec<AssetBalance>>,
    rules: Mutex<Vec<SymbolRule>>,
    volumes: Mutex<Vec<SymbolVolume>>,
    failing_prices: Mutex<HashSet<String>>,
    failing_orders: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    rules_fail: Mutex<bool>,
    pub orders: Mutex<Vec<(String, TradeSide, Decimal)>>,
    pub price_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    /// Hourly candles with the given closes, oldest first.
    pub fn set_closes(&self, symbol: &str, closes: &[Decimal]) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let open_time = start + Duration::hours(i as i64);
                Candle {
                    open_time,
                    open: *c,
                    high: *c,
                    low: *c,
                    close: *c,
                    volume: Decimal::ONE,
                    close_time: open_time + Duration::minutes(59),
                }
            })
            .collect();
        self.klines.lock().unwrap().insert(symbol.to_string(), candles);
    }

    pub fn set_balance(&self, asset: &str, free: Decimal, locked: Decimal) {
        let mut balances = self.balances.lock().unwrap();
        balances.retain(|b| b.asset != asset);
        balances.push(AssetBalance {
            asset: asset.to_string(),
            free,
            locked,
        });
    }

    pub fn add_rule(&self, rule: SymbolRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn set_volume(&self, symbol: &str, volume: Decimal) {
        self.volumes.lock().unwrap().push(SymbolVolume {
            symbol: symbol.to_string(),
            volume,
            last_price: Decimal::ONE,
        });
    }

    pub fn fail_price(&self, symbol: &str, fail: bool) {
        let mut set = self.failing_prices.lock().unwrap();
        if fail {
            set.insert(symbol.to_string());
        } else {
            set.remove(symbol);
        }
    }

    pub fn fail_orders(&self, symbol: &str, fail: bool) {
        let mut set = self.failing_orders.lock().unwrap();
        if fail {
            set.insert(symbol.to_string());
        } else {
            set.remove(symbol);
        }
    }

    /// Make every price lookup for `symbol` panic.
    pub fn panic_on(&self, symbol: &str) {
        self.panicking.lock().unwrap().insert(symbol.to_string());
    }

    pub fn fail_rules(&self, fail: bool) {
        *self.rules_fail.lock().unwrap() = fail;
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn orders_for(&self, symbol: &str) -> Vec<(TradeSide, Decimal)> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| s == symbol)
            .map(|(_, side, qty)| (*side, *qty))
            .collect()
    }
}

/// Rule with the given step and minimum notional; `min_qty` equals the step.
pub fn rule(symbol: &str, base: &str, quote: &str, step: Decimal, min_notional: Decimal) -> SymbolRule {
    SymbolRule {
        symbol: symbol.to_string(),
        base_asset: base.to_string(),
        quote_asset: quote.to_string(),
        step_size: step,
        min_notional,
        min_qty: step,
    }
}

#[async_trait]
impl MarketGateway for MockGateway {
    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        if self.panicking.lock().unwrap().contains(symbol) {
            panic!("injected panic for {}", symbol);
        }
        if self.failing_prices.lock().unwrap().contains(symbol) {
            return Err(BotError::Gateway(format!("price feed down for {}", symbol)));
        }
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| BotError::Gateway(format!("no price for {}", symbol)))
    }

    async fn get_klines(&self, symbol: &str, _interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let klines = self.klines.lock().unwrap();
        let candles = klines.get(symbol).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn get_account_balances(&self) -> Result<Vec<AssetBalance>> {
        Ok(self.balances.lock().unwrap().clone())
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolRule> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.symbol == symbol)
            .cloned()
            .ok_or_else(|| BotError::UnknownSymbol(symbol.to_string()))
    }

    async fn get_symbol_rules(&self) -> Result<Vec<SymbolRule>> {
        if *self.rules_fail.lock().unwrap() {
            return Err(BotError::Gateway("exchange info unavailable".to_string()));
        }
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<Fill> {
        if self.failing_orders.lock().unwrap().contains(symbol) {
            return Err(BotError::Gateway(format!("order rejected for {}", symbol)));
        }
        let price = self.get_price(symbol).await?;
        self.orders
            .lock()
            .unwrap()
            .push((symbol.to_string(), side, quantity));
        Ok(Fill {
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            order_id: Some(format!("mock-{}", self.order_count())),
        })
    }

    async fn get_24h_volumes(&self) -> Result<Vec<SymbolVolume>> {
        Ok(self.volumes.lock().unwrap().clone())
    }
}
