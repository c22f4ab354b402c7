use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::traits::{MonitorStore, PriceCacheStore, TransactionStore};
use crate::errors::CoreError;
use crate::models::monitor::{DailyIncrease, PortfolioSnapshot, UserBalances};
use crate::models::price::Quote;
use crate::models::transaction::Transaction;

/// Process-local price cache. Upserts are last-write-wins per symbol.
#[derive(Default)]
pub struct InMemoryPriceCache {
    quotes: RwLock<HashMap<String, Quote>>,
}

impl InMemoryPriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached symbols.
    pub async fn len(&self) -> usize {
        self.quotes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.quotes.read().await.is_empty()
    }

    pub async fn get(&self, symbol: &str) -> Option<Quote> {
        self.quotes.read().await.get(symbol).cloned()
    }
}

#[async_trait]
impl PriceCacheStore for InMemoryPriceCache {
    async fn read(&self, symbols: &[String]) -> Result<Vec<Quote>, CoreError> {
        let map = self.quotes.read().await;
        let mut quotes: Vec<Quote> = symbols.iter().filter_map(|s| map.get(s).cloned()).collect();
        quotes.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(quotes)
    }

    async fn upsert(&self, quotes: &[Quote]) -> Result<(), CoreError> {
        let mut map = self.quotes.write().await;
        for quote in quotes {
            map.insert(quote.symbol.clone(), quote.clone());
        }
        Ok(())
    }
}

/// Process-local transaction history keyed by user.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    rows: RwLock<HashMap<Uuid, Vec<Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Transaction>, CoreError> {
        let rows = self.rows.read().await;
        let mut list = rows.get(&user_id).cloned().unwrap_or_default();
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(list)
    }

    async fn insert(&self, user_id: Uuid, transaction: &Transaction) -> Result<(), CoreError> {
        let mut rows = self.rows.write().await;
        let list = rows.entry(user_id).or_default();
        if list.iter().any(|t| t.id == transaction.id) {
            return Err(CoreError::store(
                "crypto_transactions",
                format!("duplicate transaction id {}", transaction.id),
            ));
        }
        list.push(transaction.clone());
        Ok(())
    }
}

/// Process-local monitor tables.
#[derive(Default)]
pub struct InMemoryMonitorStore {
    balances: RwLock<Vec<UserBalances>>,
    snapshots: RwLock<Vec<PortfolioSnapshot>>,
    increases: RwLock<Vec<DailyIncrease>>,
}

impl InMemoryMonitorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_balances(&self, user_id: Uuid, balances: HashMap<String, f64>) {
        let mut rows = self.balances.write().await;
        rows.retain(|b| b.user_id != user_id);
        rows.push(UserBalances { user_id, balances });
    }

    pub async fn snapshots(&self) -> Vec<PortfolioSnapshot> {
        self.snapshots.read().await.clone()
    }

    pub async fn increases(&self) -> Vec<DailyIncrease> {
        self.increases.read().await.clone()
    }
}

#[async_trait]
impl MonitorStore for InMemoryMonitorStore {
    async fn users_with_balances(&self) -> Result<Vec<UserBalances>, CoreError> {
        Ok(self
            .balances
            .read()
            .await
            .iter()
            .filter(|b| b.has_holdings())
            .cloned()
            .collect())
    }

    async fn lowest_snapshot_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, CoreError> {
        Ok(self
            .snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.user_id == user_id && s.created_at >= since)
            .map(|s| s.total_value)
            .fold(None, |low: Option<f64>, v| Some(low.map_or(v, |l| l.min(v)))))
    }

    async fn record_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<(), CoreError> {
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn has_daily_increase(&self, user_id: Uuid, date: NaiveDate) -> Result<bool, CoreError> {
        Ok(self
            .increases
            .read()
            .await
            .iter()
            .any(|e| e.user_id == user_id && e.update_date >= date))
    }

    async fn log_daily_increase(&self, entry: &DailyIncrease) -> Result<(), CoreError> {
        self.increases.write().await.push(entry.clone());
        Ok(())
    }
}
