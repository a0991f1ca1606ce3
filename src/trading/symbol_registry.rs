//! Cache of per-symbol trading rules and order quantization.
//!
//! The cache is an immutable map behind an `Arc`. A refresh builds a complete
//! new map and swaps it in, so readers always see either the old or the new
//! rule set, never a partial one. The lock is only held to clone or replace
//! the `Arc`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::api::MarketGateway;
use crate::error::{BotError, Result};
use crate::models::{SymbolRule, SymbolVolume};

type RuleMap = HashMap<String, SymbolRule>;

/// Shared symbol rule cache.
#[derive(Default)]
pub struct SymbolRegistry {
    rules: RwLock<Arc<RuleMap>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `rules`. Invalid rules are dropped.
    pub fn from_rules(rules: Vec<SymbolRule>) -> Self {
        let registry = Self::new();
        registry.replace(rules);
        registry
    }

    fn snapshot(&self) -> Arc<RuleMap> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new rule set. Returns the number of rules kept.
    pub fn replace(&self, rules: Vec<SymbolRule>) -> usize {
        let mut map = RuleMap::with_capacity(rules.len());
        for rule in rules {
            if !rule.is_valid() {
                warn!(
                    symbol = %rule.symbol,
                    step_size = %rule.step_size,
                    min_notional = %rule.min_notional,
                    "Dropping symbol with invalid trading rules"
                );
                continue;
            }
            map.insert(rule.symbol.clone(), rule);
        }

        let count = map.len();
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(map);
        count
    }

    /// Re-fetch all tradable symbols. On failure the previous cache stays in place.
    pub async fn refresh(&self, gateway: &dyn MarketGateway) -> Result<usize> {
        let rules = match gateway.get_symbol_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, cached = self.len(), "Symbol refresh failed, keeping cached rules");
                return Err(e);
            }
        };

        let count = self.replace(rules);
        info!(
            symbols = count,
            quote_assets = self.quote_assets().len(),
            "Loaded trading pairs"
        );
        Ok(count)
    }

    /// Whether `symbol` is in the cache. No network call.
    pub fn validate_symbol(&self, symbol: &str) -> bool {
        self.snapshot().contains_key(symbol)
    }

    pub fn rule(&self, symbol: &str) -> Option<SymbolRule> {
        self.snapshot().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn quote_assets(&self) -> BTreeSet<String> {
        self.snapshot()
            .values()
            .map(|r| r.quote_asset.clone())
            .collect()
    }

    /// Cached rules quoted in `quote_asset`, sorted by symbol.
    pub fn symbols_for_quote_asset(&self, quote_asset: &str) -> Vec<SymbolRule> {
        let mut rules: Vec<SymbolRule> = self
            .snapshot()
            .values()
            .filter(|r| r.quote_asset == quote_asset)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        rules
    }

    /// Highest 24h-volume cached symbols quoted in `quote_asset`.
    pub async fn top_volume_symbols(
        &self,
        gateway: &dyn MarketGateway,
        quote_asset: &str,
        limit: usize,
    ) -> Result<Vec<SymbolVolume>> {
        let rules = self.snapshot();
        let mut volumes: Vec<SymbolVolume> = gateway
            .get_24h_volumes()
            .await?
            .into_iter()
            .filter(|v| {
                rules
                    .get(&v.symbol)
                    .is_some_and(|r| r.quote_asset == quote_asset)
            })
            .collect();

        volumes.sort_by(|a, b| b.volume.cmp(&a.volume));
        volumes.truncate(limit);
        Ok(volumes)
    }

    /// Convert a quote-currency budget into an exchange-legal base quantity at
    /// the current price. Never rounds up. Has no side effects.
    pub async fn quantize(
        &self,
        gateway: &dyn MarketGateway,
        symbol: &str,
        desired_quote_amount: Decimal,
    ) -> Result<Decimal> {
        let rule = self
            .rule(symbol)
            .ok_or_else(|| BotError::UnknownSymbol(symbol.to_string()))?;

        let price = gateway
            .get_price(symbol)
            .await
            .map_err(|e| BotError::PriceUnavailable {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        let quantity = quantize_at_price(&rule, desired_quote_amount, price)?;
        debug!(
            symbol = %symbol,
            desired = %desired_quote_amount,
            price = %price,
            quantity = %quantity,
            "Quantized order"
        );
        Ok(quantity)
    }
}

/// `floor(desired / price / step) * step`, checked against the rule's
/// minimum notional and minimum quantity.
pub fn quantize_at_price(rule: &SymbolRule, desired_quote_amount: Decimal, price: Decimal) -> Result<Decimal> {
    if price <= Decimal::ZERO {
        return Err(BotError::PriceUnavailable {
            symbol: rule.symbol.clone(),
            reason: format!("non-positive price {}", price),
        });
    }

    let raw = if desired_quote_amount > Decimal::ZERO {
        desired_quote_amount / price
    } else {
        Decimal::ZERO
    };
    let quantity = ((raw / rule.step_size).floor() * rule.step_size).normalize();

    let notional = quantity * price;
    if notional < rule.min_notional {
        return Err(BotError::BelowMinNotional {
            symbol: rule.symbol.clone(),
            notional,
            min_notional: rule.min_notional,
        });
    }

    if quantity.is_zero() || quantity < rule.min_qty {
        return Err(BotError::BelowMinQuantity {
            symbol: rule.symbol.clone(),
            quantity,
            min_qty: rule.min_qty,
        });
    }

    Ok(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{rule, MockGateway};
    use rust_decimal_macros::dec;

    fn eth_rule() -> SymbolRule {
        rule("ETHUSDT", "ETH", "USDT", dec!(0.001), dec!(10))
    }

    #[test]
    fn test_quantize_accepts_legal_order() {
        let qty = quantize_at_price(&eth_rule(), dec!(15), dec!(50)).unwrap();
        assert_eq!(qty, dec!(0.3));
    }

    #[test]
    fn test_quantize_rejects_below_min_notional() {
        let err = quantize_at_price(&eth_rule(), dec!(4), dec!(50)).unwrap_err();
        match err {
            BotError::BelowMinNotional { notional, min_notional, .. } => {
                assert_eq!(notional, dec!(4));
                assert_eq!(min_notional, dec!(10));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_quantize_never_rounds_up() {
        let r = eth_rule();
        let cases = [
            (dec!(100), dec!(33.33)),
            (dec!(10.999), dec!(7)),
            (dec!(250), dec!(1234.5678)),
            (dec!(19.99), dec!(0.137)),
        ];
        for (desired, price) in cases {
            let qty = quantize_at_price(&r, desired, price).unwrap();
            assert!(qty <= desired / price, "{qty} exceeds {desired}/{price}");
            assert!((qty / r.step_size).fract().is_zero(), "{qty} not a step multiple");
            assert!(qty * price >= r.min_notional);
        }
    }

    #[test]
    fn test_quantize_min_qty_and_bad_inputs() {
        let mut r = eth_rule();
        r.min_notional = dec!(0);
        r.min_qty = dec!(0.01);

        let err = quantize_at_price(&r, dec!(0.4), dec!(50)).unwrap_err();
        assert!(matches!(err, BotError::BelowMinQuantity { .. }));

        let err = quantize_at_price(&r, dec!(0), dec!(50)).unwrap_err();
        assert!(matches!(err, BotError::BelowMinQuantity { .. }));

        let err = quantize_at_price(&r, dec!(15), dec!(0)).unwrap_err();
        assert!(matches!(err, BotError::PriceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_quantize_via_gateway() {
        let gateway = MockGateway::new();
        gateway.set_price("ETHUSDT", dec!(50));
        let registry = SymbolRegistry::from_rules(vec![eth_rule()]);

        let qty = registry.quantize(&gateway, "ETHUSDT", dec!(15)).await.unwrap();
        assert_eq!(qty, dec!(0.3));

        let err = registry.quantize(&gateway, "DOGEUSDT", dec!(15)).await.unwrap_err();
        assert!(matches!(err, BotError::UnknownSymbol(_)));

        gateway.fail_price("ETHUSDT", true);
        let err = registry.quantize(&gateway, "ETHUSDT", dec!(15)).await.unwrap_err();
        assert!(matches!(err, BotError::PriceUnavailable { .. }));
        assert_eq!(gateway.order_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_replaces_and_keeps_cache_on_failure() {
        let gateway = MockGateway::new();
        gateway.add_rule(eth_rule());
        gateway.add_rule(rule("BTCUSDT", "BTC", "USDT", dec!(0.00001), dec!(10)));
        gateway.add_rule(rule("BADUSDT", "BAD", "USDT", dec!(0), dec!(10)));
        gateway.add_rule(rule("ETHBTC", "ETH", "BTC", dec!(0.0001), dec!(0.0001)));

        let registry = SymbolRegistry::new();
        assert!(registry.is_empty());

        assert_eq!(registry.refresh(&gateway).await.unwrap(), 3);
        assert!(registry.validate_symbol("BTCUSDT"));
        assert!(!registry.validate_symbol("BADUSDT"));
        assert_eq!(registry.quote_assets().len(), 2);
        assert_eq!(registry.rule("BTCUSDT").map(|r| r.quantity_precision()), Some(5));

        let usdt: Vec<String> = registry
            .symbols_for_quote_asset("USDT")
            .into_iter()
            .map(|r| r.symbol)
            .collect();
        assert_eq!(usdt, vec!["BTCUSDT", "ETHUSDT"]);

        gateway.fail_rules(true);
        assert!(registry.refresh(&gateway).await.is_err());
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_top_volume_symbols() {
        let gateway = MockGateway::new();
        gateway.set_volume("ETHUSDT", dec!(500));
        gateway.set_volume("BTCUSDT", dec!(900));
        gateway.set_volume("ETHBTC", dec!(10000));
        gateway.set_volume("XRPUSDT", dec!(700));

        let registry = SymbolRegistry::from_rules(vec![
            eth_rule(),
            rule("BTCUSDT", "BTC", "USDT", dec!(0.00001), dec!(10)),
            rule("ETHBTC", "ETH", "BTC", dec!(0.0001), dec!(0.0001)),
        ]);

        let top = registry.top_volume_symbols(&gateway, "USDT", 5).await.unwrap();
        let symbols: Vec<&str> = top.iter().map(|v| v.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);

        let top = registry.top_volume_symbols(&gateway, "USDT", 1).await.unwrap();
        assert_eq!(top.len(), 1);
    }
}
