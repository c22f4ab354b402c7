use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::errors::CoreError;
use crate::models::monitor::{
    DailyIncrease, IncreaseDetail, MonitorReport, PortfolioSnapshot, UserBalances,
};
use crate::models::position::PortfolioMetrics;
use crate::storage::traits::{MonitorStore, PriceCacheStore};
use uuid::Uuid;

/// Symbol recorded for portfolio-wide increases.
pub const PORTFOLIO_SYMBOL: &str = "PORTFOLIO";

/// Server-side scan for users whose portfolio rose sharply within a day.
///
/// For every user holding something, the current value (balances × cached
/// prices) is compared with the lowest snapshot of the last 24 hours. An
/// increase at or above the threshold is logged at most once per user per day.
pub struct PortfolioMonitor {
    store: Arc<dyn MonitorStore>,
    cache: Arc<dyn PriceCacheStore>,
    threshold_percent: f64,
}

impl PortfolioMonitor {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        cache: Arc<dyn PriceCacheStore>,
        threshold_percent: f64,
    ) -> Self {
        Self {
            store,
            cache,
            threshold_percent,
        }
    }

    pub async fn run(&self) -> Result<MonitorReport, CoreError> {
        self.run_at(Utc::now()).await
    }

    /// Run a scan as of `now`. A failure for one user is logged and skipped;
    /// only failing to list users or read prices aborts the run.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<MonitorReport, CoreError> {
        info!("starting portfolio monitoring check");
        let users = self.store.users_with_balances().await?;

        let symbols: Vec<String> = users
            .iter()
            .flat_map(|u| u.balances.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let quotes = self.cache.read(&symbols).await?;
        let mut prices: HashMap<String, f64> = HashMap::new();
        for quote in quotes {
            prices.entry(quote.symbol).or_insert(quote.price_usd);
        }

        let mut details = Vec::new();
        for user in &users {
            match self.check_user(user, &prices, now).await {
                Ok(Some(detail)) => details.push(detail),
                Ok(None) => {}
                Err(e) => error!(user_id = %user.user_id, "error processing user: {e}"),
            }
        }

        let report = MonitorReport {
            timestamp: now,
            users_checked: users.len(),
            increases_detected: details.len(),
            details,
        };
        info!(
            users_checked = report.users_checked,
            increases_detected = report.increases_detected,
            "portfolio monitoring completed"
        );
        Ok(report)
    }

    /// Record a snapshot built from full valuation metrics.
    pub async fn record_metrics_snapshot(
        &self,
        user_id: Uuid,
        metrics: &PortfolioMetrics,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.store
            .record_snapshot(&PortfolioSnapshot {
                user_id,
                total_value: metrics.total_value,
                total_cost: metrics.total_cost,
                unrealized_pnl: metrics.total_unrealized_pnl,
                created_at: at,
            })
            .await
    }

    async fn check_user(
        &self,
        user: &UserBalances,
        prices: &HashMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Result<Option<IncreaseDetail>, CoreError> {
        let current_value = portfolio_value(user, prices);
        if current_value <= 0.0 {
            return Ok(None);
        }

        let low = self
            .store
            .lowest_snapshot_since(user.user_id, now - Duration::hours(24))
            .await?;

        // Balance-only snapshot: cost fields are unknown here.
        self.store
            .record_snapshot(&PortfolioSnapshot {
                user_id: user.user_id,
                total_value: current_value,
                total_cost: 0.0,
                unrealized_pnl: 0.0,
                created_at: now,
            })
            .await?;

        let Some(low_24h) = low.filter(|v| *v > 0.0) else {
            return Ok(None);
        };

        let increase_percentage = (current_value - low_24h) / low_24h * 100.0;
        debug!(
            user_id = %user.user_id,
            current_value,
            low_24h,
            increase_percentage,
            "evaluated portfolio change"
        );
        if increase_percentage < self.threshold_percent {
            return Ok(None);
        }

        let today = now.date_naive();
        let already_logged = self.store.has_daily_increase(user.user_id, today).await?;
        if already_logged {
            debug!(user_id = %user.user_id, "increase already logged today");
        } else {
            self.store
                .log_daily_increase(&DailyIncrease {
                    user_id: user.user_id,
                    previous_value: low_24h,
                    new_value: current_value,
                    increase_percentage,
                    crypto_symbol: PORTFOLIO_SYMBOL.to_string(),
                    update_date: today,
                })
                .await?;
            info!(user_id = %user.user_id, increase_percentage, "logged portfolio increase");
        }

        Ok(Some(IncreaseDetail {
            user_id: user.user_id,
            current_value,
            low_24h,
            increase_percentage,
            logged: !already_logged,
        }))
    }
}

/// Σ balance × price; symbols without a price count as zero.
pub fn portfolio_value(user: &UserBalances, prices: &HashMap<String, f64>) -> f64 {
    user.balances
        .iter()
        .map(|(symbol, amount)| amount * prices.get(symbol).copied().unwrap_or(0.0))
        .sum()
}
