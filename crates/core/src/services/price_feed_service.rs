use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::CoreError;
use crate::models::feed::{FeedSnapshot, FeedStatus, QuoteOrigin};
use crate::models::price::Quote;
use crate::models::settings::Settings;
use crate::providers::traits::QuoteSource;
use crate::storage::traits::PriceCacheStore;

/// Exponential backoff for failed live fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `retry_count` (1-based): `base × 2^retry_count`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(2_000))
    }
}

/// Keeps quotes for a set of symbols up to date.
///
/// Every fetch cycle runs two ordered stages:
/// 1. **Cache**: publish whatever the cache store holds. Failures here are
///    logged and treated as "no cached data"; they never fail the cycle.
/// 2. **Live**: one batch request to the quote source. Failures are retried
///    with exponential backoff; once the budget is spent the error is
///    surfaced and the last good quotes stay published.
pub struct PriceFeedService {
    source: Arc<dyn QuoteSource>,
    cache: Arc<dyn PriceCacheStore>,
    policy: RetryPolicy,
    currency: String,
}

impl PriceFeedService {
    pub fn new(
        source: Arc<dyn QuoteSource>,
        cache: Arc<dyn PriceCacheStore>,
        policy: RetryPolicy,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            source,
            cache,
            policy,
            currency: currency.into(),
        }
    }

    pub fn from_settings(
        source: Arc<dyn QuoteSource>,
        cache: Arc<dyn PriceCacheStore>,
        settings: &Settings,
    ) -> Self {
        let policy = RetryPolicy::new(
            settings.feed.max_retries,
            Duration::from_millis(settings.feed.retry_delay_base_ms),
        );
        Self::new(source, cache, policy, settings.currency.clone())
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run one full fetch cycle (cache stage, live stage with retries) and
    /// return the quotes to value against.
    ///
    /// Returns an empty list without any I/O when `symbols` is empty. An empty
    /// live batch falls back to the cached quotes. Fails with
    /// [`CoreError::RetriesExhausted`] once every retry has failed; use
    /// [`PriceFeedService::fetch_snapshot`] to keep the cached quotes in that case.
    pub async fn fetch_prices(&self, symbols: &BTreeSet<String>) -> Result<Vec<Quote>, CoreError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let (tx, _rx) = watch::channel(FeedSnapshot::default());
        let publisher = Publisher::new(Arc::new(tx), CancellationToken::new());
        let symbols: Vec<String> = symbols.iter().cloned().collect();
        self.run_cycle(&symbols, &publisher).await
    }

    /// Run one full fetch cycle and return the final snapshot: the last good
    /// quotes (live, or cached when the live stage failed or came back empty)
    /// plus the error once retries are exhausted.
    pub async fn fetch_snapshot(&self, symbols: &BTreeSet<String>) -> FeedSnapshot {
        if symbols.is_empty() {
            return FeedSnapshot::default();
        }
        let (tx, rx) = watch::channel(FeedSnapshot::default());
        let publisher = Publisher::new(Arc::new(tx), CancellationToken::new());
        let symbols: Vec<String> = symbols.iter().cloned().collect();
        // Failures are recorded in the snapshot.
        let _ = self.run_cycle(&symbols, &publisher).await;
        let snapshot = rx.borrow().clone();
        snapshot
    }

    /// Start a recurring refresh: fetch now, then every `interval` until the
    /// returned subscription is cancelled or dropped.
    ///
    /// Must be called from within a Tokio runtime. An empty symbol set
    /// yields an idle subscription that never fetches.
    pub fn subscribe(self: &Arc<Self>, symbols: BTreeSet<String>, interval: Duration) -> FeedSubscription {
        let (tx, rx) = watch::channel(FeedSnapshot::default());
        let mut subscription = FeedSubscription {
            service: Arc::clone(self),
            sender: Arc::new(tx),
            receiver: rx,
            symbols: BTreeSet::new(),
            interval,
            refresh: Arc::new(Notify::new()),
            worker: None,
        };
        subscription.update(symbols, interval);
        subscription
    }

    async fn run_cycle(&self, symbols: &[String], publisher: &Publisher) -> Result<Vec<Quote>, CoreError> {
        publisher.publish(|s| {
            s.status = FeedStatus::Fetching;
            s.error = None;
        });

        // Stage 1: cached quotes as an interim result.
        let cached = match self.cache.read(symbols).await {
            Ok(cached) if !cached.is_empty() => {
                debug!(count = cached.len(), "publishing cached quotes");
                let interim = cached.clone();
                publisher.publish(|s| {
                    s.quotes = interim;
                    s.origin = Some(QuoteOrigin::Cache);
                    s.last_update = Some(Utc::now());
                });
                cached
            }
            Ok(_) => {
                debug!("no cached quotes for requested symbols");
                Vec::new()
            }
            Err(e) => {
                warn!("price cache read failed, continuing without cached quotes: {e}");
                Vec::new()
            }
        };

        // Stage 2: live fetch with retry/backoff.
        let mut retry_count = 0u32;
        loop {
            if publisher.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let result = self.source.fetch_quotes(symbols, &self.currency).await;

            match result {
                Ok(fresh) => {
                    if fresh.is_empty() {
                        warn!(symbols = symbols.len(), "quote source returned no quotes, keeping cached quotes");
                        if !publisher.publish(|s| {
                            s.status = FeedStatus::Success;
                            s.retry_count = 0;
                        }) {
                            return Err(discarded());
                        }
                        return Ok(cached);
                    }

                    let published = publisher.publish(|s| {
                        s.status = FeedStatus::Success;
                        s.quotes = fresh.clone();
                        s.origin = Some(QuoteOrigin::Live);
                        s.last_update = Some(Utc::now());
                        s.retry_count = 0;
                        s.error = None;
                    });
                    // A cancelled subscription neither publishes nor caches.
                    if !published {
                        return Err(discarded());
                    }
                    info!(count = fresh.len(), source = self.source.name(), "fetched live quotes");
                    if let Err(e) = self.cache.upsert(&fresh).await {
                        warn!("failed to write quotes to price cache: {e}");
                    }
                    return Ok(fresh);
                }
                Err(e) => {
                    retry_count += 1;
                    if e.is_retryable() {
                        warn!(attempt = retry_count, "live price fetch failed: {e}");
                    } else {
                        error!(attempt = retry_count, "live price fetch failed: {e}");
                    }
                    if !publisher.publish(|s| {
                        s.status = FeedStatus::Failed;
                        s.retry_count = retry_count;
                    }) {
                        return Err(discarded());
                    }

                    if retry_count > self.policy.max_retries {
                        let attempts = retry_count;
                        let exhausted = CoreError::RetriesExhausted {
                            attempts,
                            message: e.to_string(),
                        };
                        error!("{exhausted}");
                        let message = exhausted.to_string();
                        // Counter resets so the next manual refresh starts clean.
                        publisher.publish(|s| {
                            s.status = FeedStatus::Error { attempts };
                            s.error = Some(message);
                            s.retry_count = 0;
                        });
                        return Err(exhausted);
                    }

                    let delay = self.policy.delay_for(retry_count);
                    debug!(attempt = retry_count, delay_ms = delay.as_millis() as u64, "scheduling retry");
                    publisher.publish(|s| {
                        s.status = FeedStatus::Retrying {
                            attempt: retry_count,
                            delay_ms: delay.as_millis() as u64,
                        }
                    });

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = publisher.token.cancelled() => return Err(CoreError::Cancelled),
                    }
                    publisher.publish(|s| s.status = FeedStatus::Fetching);
                }
            }
        }
    }
}

fn discarded() -> CoreError {
    debug!("discarding result of fetch for a cancelled subscription");
    CoreError::Cancelled
}

/// Writes snapshots on behalf of one worker task.
///
/// Publishing and cancelling both take `gate`, so once `cancel` returns no
/// further snapshot from this worker can be observed.
struct Publisher {
    sender: Arc<watch::Sender<FeedSnapshot>>,
    token: CancellationToken,
    gate: Mutex<()>,
}

impl Publisher {
    fn new(sender: Arc<watch::Sender<FeedSnapshot>>, token: CancellationToken) -> Self {
        Self {
            sender,
            token,
            gate: Mutex::new(()),
        }
    }

    fn publish(&self, update: impl FnOnce(&mut FeedSnapshot)) -> bool {
        let _guard = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        if self.token.is_cancelled() {
            return false;
        }
        self.sender.send_modify(update);
        true
    }

    fn cancel(&self) {
        let _guard = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct Worker {
    publisher: Arc<Publisher>,
    handle: JoinHandle<()>,
}

/// Handle to a recurring price refresh.
///
/// Cancelling (or dropping) the handle stops the timer and any pending
/// retry; a network call already in flight completes and its result is
/// discarded. Observers keep their receivers across [`FeedSubscription::update`].
pub struct FeedSubscription {
    service: Arc<PriceFeedService>,
    sender: Arc<watch::Sender<FeedSnapshot>>,
    receiver: watch::Receiver<FeedSnapshot>,
    symbols: BTreeSet<String>,
    interval: Duration,
    refresh: Arc<Notify>,
    worker: Option<Worker>,
}

impl FeedSubscription {
    /// Receiver for snapshot updates.
    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.receiver.clone()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.receiver.borrow().clone()
    }

    pub fn symbols(&self) -> &BTreeSet<String> {
        &self.symbols
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Request an immediate fetch. If a cycle (including its retries) is in
    /// progress, the refresh runs right after it finishes.
    pub fn refresh(&self) {
        if self.worker.is_some() {
            self.refresh.notify_one();
        }
    }

    /// Replace the symbol set and interval. The running timer is torn down
    /// and a new one started (with an immediate fetch); no-op when nothing changed.
    pub fn update(&mut self, symbols: BTreeSet<String>, interval: Duration) {
        if self.worker.is_some() && symbols == self.symbols && interval == self.interval {
            return;
        }
        self.stop();
        self.symbols = symbols;
        self.interval = interval;

        if self.symbols.is_empty() || interval.is_zero() {
            debug!("price subscription idle: no symbols to track");
            return;
        }

        let publisher = Arc::new(Publisher::new(
            Arc::clone(&self.sender),
            CancellationToken::new(),
        ));
        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.service),
            self.symbols.iter().cloned().collect(),
            interval,
            Arc::clone(&publisher),
            Arc::clone(&self.refresh),
        ));
        info!(symbols = self.symbols.len(), interval_ms = interval.as_millis() as u64, "price subscription started");
        self.worker = Some(Worker { publisher, handle });
    }

    /// Stop refreshing. No snapshot is published after this returns.
    pub fn cancel(&mut self) {
        if self.worker.is_some() {
            info!("price subscription cancelled");
        }
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.publisher.cancel();
            // The task exits at its next await on the token; nothing to join.
            drop(worker.handle);
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_worker(
    service: Arc<PriceFeedService>,
    symbols: Vec<String>,
    interval: Duration,
    publisher: Arc<Publisher>,
    refresh: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = publisher.token.cancelled() => break,
            _ = ticker.tick() => {}
            _ = refresh.notified() => {}
        }
        // Errors are already published to the snapshot.
        if let Err(CoreError::Cancelled) = service.run_cycle(&symbols, &publisher).await {
            break;
        }
    }
    debug!("price subscription worker stopped");
}
