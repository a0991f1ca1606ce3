//! Account valuation with a rolling 7-day history and exposure drift checks.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::MarketGateway;
use crate::error::Result;
use crate::models::{Holding, PortfolioSnapshot};

/// Exposure above which the portfolio is over-exposed.
pub const OVER_EXPOSED: Decimal = dec!(0.8);
/// Exposure below which the portfolio is under-exposed.
pub const UNDER_EXPOSED: Decimal = dec!(0.2);

fn history_window() -> Duration {
    Duration::days(7)
}

fn daily_tolerance() -> Duration {
    Duration::hours(2)
}

fn rebalance_interval() -> Duration {
    Duration::hours(4)
}

/// Result of an exposure check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RebalanceSignal {
    OverExposed { exposure: Decimal },
    UnderExposed { exposure: Decimal },
    Balanced { exposure: Decimal },
}

impl RebalanceSignal {
    pub fn from_exposure(exposure: Decimal) -> Self {
        if exposure > OVER_EXPOSED {
            RebalanceSignal::OverExposed { exposure }
        } else if exposure < UNDER_EXPOSED {
            RebalanceSignal::UnderExposed { exposure }
        } else {
            RebalanceSignal::Balanced { exposure }
        }
    }

    pub fn exposure(&self) -> Decimal {
        match self {
            RebalanceSignal::OverExposed { exposure }
            | RebalanceSignal::UnderExposed { exposure }
            | RebalanceSignal::Balanced { exposure } => *exposure,
        }
    }
}

/// Reaction to an exposure check. Detection and reaction are kept apart so a
/// trading policy can be plugged in later.
pub trait RebalancePolicy: Send + Sync {
    fn on_signal(&self, signal: &RebalanceSignal, snapshot: &PortfolioSnapshot);
}

/// Logs drift and does nothing else.
pub struct LogOnlyPolicy;

impl RebalancePolicy for LogOnlyPolicy {
    fn on_signal(&self, signal: &RebalanceSignal, snapshot: &PortfolioSnapshot) {
        let pct = signal.exposure() * Decimal::ONE_HUNDRED;
        match signal {
            RebalanceSignal::OverExposed { .. } => warn!(
                exposure_pct = %pct.round_dp(2),
                total = %snapshot.total_value,
                "Portfolio over-exposed, consider taking profits"
            ),
            RebalanceSignal::UnderExposed { .. } => warn!(
                exposure_pct = %pct.round_dp(2),
                total = %snapshot.total_value,
                "Portfolio under-exposed, consider deploying cash"
            ),
            RebalanceSignal::Balanced { .. } => {
                info!(exposure_pct = %pct.round_dp(2), "Portfolio allocation within bounds")
            }
        }
    }
}

/// Change of total value over roughly the last 24 hours.
#[derive(Debug, Clone, Serialize)]
pub struct DailyChange {
    pub previous_timestamp: DateTime<Utc>,
    pub previous_value: Decimal,
    pub current_value: Decimal,
    pub absolute: Decimal,
    /// Percent of the previous value; zero when the previous value was zero
    pub percent: Decimal,
}

impl std::fmt::Display for DailyChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.absolute >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "24h change: {}{:.2} ({}{:.2}%) since {}",
            sign,
            self.absolute,
            sign,
            self.percent,
            self.previous_timestamp.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Values the account periodically and keeps the recent history.
pub struct PortfolioAggregator {
    gateway: Arc<dyn MarketGateway>,
    quote_asset: String,
    history: RwLock<VecDeque<PortfolioSnapshot>>,
    last_rebalance_check: RwLock<Option<DateTime<Utc>>>,
    policy: Box<dyn RebalancePolicy>,
}

impl PortfolioAggregator {
    pub fn new(gateway: Arc<dyn MarketGateway>, quote_asset: &str) -> Self {
        Self::with_policy(gateway, quote_asset, Box::new(LogOnlyPolicy))
    }

    pub fn with_policy(
        gateway: Arc<dyn MarketGateway>,
        quote_asset: &str,
        policy: Box<dyn RebalancePolicy>,
    ) -> Self {
        Self {
            gateway,
            quote_asset: quote_asset.to_string(),
            history: RwLock::new(VecDeque::new()),
            last_rebalance_check: RwLock::new(None),
            policy,
        }
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    pub async fn value_portfolio(&self) -> Result<PortfolioSnapshot> {
        self.value_portfolio_at(Utc::now()).await
    }

    /// Value every non-zero balance in the quote asset and append the
    /// snapshot. Assets without a price are skipped.
    pub async fn value_portfolio_at(&self, now: DateTime<Utc>) -> Result<PortfolioSnapshot> {
        let balances = self.gateway.get_account_balances().await?;

        let mut quote_balance = Decimal::ZERO;
        let mut holdings = Vec::new();

        for balance in balances {
            let quantity = balance.total();
            if quantity <= Decimal::ZERO {
                continue;
            }

            if balance.asset == self.quote_asset {
                quote_balance += quantity;
                continue;
            }

            let pair = format!("{}{}", balance.asset, self.quote_asset);
            match self.gateway.get_price(&pair).await {
                Ok(price) => holdings.push(Holding {
                    asset: balance.asset,
                    quantity,
                    value: quantity * price,
                }),
                Err(e) => {
                    warn!(asset = %balance.asset, pair = %pair, error = %e, "No price for asset, skipping");
                }
            }
        }

        let total_value = quote_balance + holdings.iter().map(|h| h.value).sum::<Decimal>();
        let snapshot = PortfolioSnapshot {
            timestamp: now,
            total_value,
            holdings,
            quote_balance,
        };

        debug!(total = %total_value, quote = %quote_balance, "Portfolio valued");
        self.record(snapshot.clone()).await;
        Ok(snapshot)
    }

    /// Append a snapshot and drop everything older than 7 days before it.
    pub async fn record(&self, snapshot: PortfolioSnapshot) {
        let cutoff = snapshot.timestamp - history_window();
        let mut history = self.history.write().await;
        history.push_back(snapshot);
        history.retain(|s| s.timestamp >= cutoff);
    }

    pub async fn history(&self) -> Vec<PortfolioSnapshot> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn latest(&self) -> Option<PortfolioSnapshot> {
        self.history.read().await.back().cloned()
    }

    pub async fn daily_change(&self) -> Option<DailyChange> {
        self.daily_change_at(Utc::now()).await
    }

    /// Compare the latest snapshot with the one closest to `now - 24h`.
    /// Unavailable when nothing lies within 2 hours of that target.
    pub async fn daily_change_at(&self, now: DateTime<Utc>) -> Option<DailyChange> {
        let history = self.history.read().await;
        let latest = history.back()?;
        let target = now - Duration::hours(24);

        let previous = history
            .iter()
            .min_by_key(|s| (s.timestamp - target).num_seconds().abs())
            .filter(|s| (s.timestamp - target).num_seconds().abs() <= daily_tolerance().num_seconds())?;

        let absolute = latest.total_value - previous.total_value;
        let percent = if previous.total_value.is_zero() {
            Decimal::ZERO
        } else {
            absolute / previous.total_value * Decimal::ONE_HUNDRED
        };

        Some(DailyChange {
            previous_timestamp: previous.timestamp,
            previous_value: previous.total_value,
            current_value: latest.total_value,
            absolute,
            percent,
        })
    }

    pub async fn maybe_rebalance(&self) -> Option<RebalanceSignal> {
        self.maybe_rebalance_at(Utc::now()).await
    }

    /// Check exposure of the latest snapshot, at most once every 4 hours.
    pub async fn maybe_rebalance_at(&self, now: DateTime<Utc>) -> Option<RebalanceSignal> {
        let snapshot = self.latest().await?;

        {
            let mut last = self.last_rebalance_check.write().await;
            if let Some(prev) = *last {
                if now - prev < rebalance_interval() {
                    return None;
                }
            }
            *last = Some(now);
        }

        let signal = RebalanceSignal::from_exposure(snapshot.exposure());
        self.policy.on_signal(&signal, &snapshot);
        Some(signal)
    }
}
