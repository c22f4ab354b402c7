use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Per-user holdings as tracked by the hosted balances table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBalances {
    pub user_id: Uuid,
    /// Symbol → held amount.
    pub balances: HashMap<String, f64>,
}

impl UserBalances {
    pub fn has_holdings(&self) -> bool {
        self.balances.values().any(|amount| *amount > 0.0)
    }
}

/// Point-in-time portfolio value recorded for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub user_id: Uuid,
    pub total_value: f64,
    pub total_cost: f64,
    pub unrealized_pnl: f64,
    pub created_at: DateTime<Utc>,
}

/// Daily log row for a detected portfolio-wide increase (one per user per day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyIncrease {
    pub user_id: Uuid,
    pub previous_value: f64,
    pub new_value: f64,
    pub increase_percentage: f64,
    /// `PORTFOLIO` for portfolio-wide increases.
    pub crypto_symbol: String,
    pub update_date: NaiveDate,
}

/// Increase detected for one user in a monitor run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncreaseDetail {
    pub user_id: Uuid,
    pub current_value: f64,
    pub low_24h: f64,
    pub increase_percentage: f64,
    /// False when today's log entry already existed.
    pub logged: bool,
}

/// Outcome of one monitor run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub timestamp: DateTime<Utc>,
    pub users_checked: usize,
    pub increases_detected: usize,
    pub details: Vec<IncreaseDetail>,
}
