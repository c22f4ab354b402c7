use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::monitor::{DailyIncrease, PortfolioSnapshot, UserBalances};
use crate::models::price::Quote;
use crate::models::transaction::Transaction;

/// Persisted symbol → last known quote table.
///
/// Serves as the stale-while-revalidate fallback for the price feed and is
/// written through after every successful live fetch.
#[async_trait]
pub trait PriceCacheStore: Send + Sync {
    /// Cached quotes for `symbols`, most recently updated first.
    /// Unknown symbols are simply absent.
    async fn read(&self, symbols: &[String]) -> Result<Vec<Quote>, CoreError>;

    /// Upsert keyed by symbol; existing rows are overwritten.
    async fn upsert(&self, quotes: &[Quote]) -> Result<(), CoreError>;
}

/// A user's append-only transaction history.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// All transactions of `user_id`, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>, CoreError>;

    async fn insert(&self, user_id: Uuid, transaction: &Transaction) -> Result<(), CoreError>;
}

/// Tables used by the server-side portfolio monitor.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Users holding a positive balance of at least one asset.
    async fn users_with_balances(&self) -> Result<Vec<UserBalances>, CoreError>;

    /// Lowest recorded portfolio value for `user_id` since `since`.
    async fn lowest_snapshot_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, CoreError>;

    async fn record_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), CoreError>;

    /// Whether an increase was already logged for `user_id` on or after `date`.
    async fn has_daily_increase(&self, user_id: Uuid, date: NaiveDate) -> Result<bool, CoreError>;

    async fn log_daily_increase(&self, entry: &DailyIncrease) -> Result<(), CoreError>;
}
