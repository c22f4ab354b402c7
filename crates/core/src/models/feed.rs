use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::price::Quote;

/// Where a subscription is in its fetch cycle.
///
/// `Idle → Fetching → {Success, Failed}`; a failure moves to `Retrying`
/// while the retry budget lasts, then back to `Fetching`, or to `Error`
/// once the budget is spent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedStatus {
    Idle,
    Fetching,
    Success,
    Failed,
    Retrying { attempt: u32, delay_ms: u64 },
    Error { attempts: u32 },
}

/// Whether the quotes currently published came from the cache or a live fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteOrigin {
    Cache,
    Live,
}

/// Everything a presentation layer needs about one price subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub status: FeedStatus,
    /// Last known good quotes; never blanked by a failed fetch.
    pub quotes: Vec<Quote>,
    pub origin: Option<QuoteOrigin>,
    pub last_update: Option<DateTime<Utc>>,
    /// Consecutive failures in the current cycle.
    pub retry_count: u32,
    /// Set once retries are exhausted; cleared by the next fetch attempt.
    pub error: Option<String>,
}

impl FeedSnapshot {
    pub fn is_loading(&self) -> bool {
        matches!(self.status, FeedStatus::Fetching | FeedStatus::Retrying { .. })
    }
}

impl Default for FeedSnapshot {
    fn default() -> Self {
        Self {
            status: FeedStatus::Idle,
            quotes: Vec::new(),
            origin: None,
            last_update: None,
            retry_count: 0,
            error: None,
        }
    }
}
