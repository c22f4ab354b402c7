use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::alert::{AlertKind, PerformanceAlert};
use crate::models::feed::FeedSnapshot;
use crate::models::position::PortfolioMetrics;
use crate::models::price::Quote;
use crate::models::settings::{AlertThresholds, RefreshCadence, Settings};
use crate::models::transaction::Transaction;
use crate::services::price_feed_service::{FeedSubscription, PriceFeedService};
use crate::services::valuation_service::ValuationService;
use crate::storage::traits::TransactionStore;

/// Pick the single alert for a total P&L percentage.
///
/// The high-performance threshold takes precedence over the regular
/// milestone; inside the neutral band there is no alert.
pub fn evaluate_alert(pnl_percent: f64, thresholds: &AlertThresholds) -> Option<PerformanceAlert> {
    let kind = if pnl_percent >= thresholds.high_performance_threshold {
        AlertKind::TakeProfits
    } else if pnl_percent >= thresholds.performance_alert_threshold {
        AlertKind::Milestone
    } else if pnl_percent <= -thresholds.performance_alert_threshold {
        AlertKind::Decline
    } else {
        return None;
    };
    Some(PerformanceAlert::new(kind, pnl_percent))
}

/// In-memory valuation state for one portfolio.
///
/// Recomputes metrics whenever transactions or quotes change and keeps at
/// most one active alert.
pub struct PortfolioTracker {
    valuation: ValuationService,
    thresholds: AlertThresholds,
    transactions: Vec<Transaction>,
    quotes: Vec<Quote>,
    metrics: PortfolioMetrics,
    alert: Option<PerformanceAlert>,
    dismissed: Option<AlertKind>,
}

impl PortfolioTracker {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self::with_valuation(ValuationService::new(), thresholds)
    }

    pub fn with_valuation(valuation: ValuationService, thresholds: AlertThresholds) -> Self {
        Self {
            valuation,
            thresholds,
            transactions: Vec::new(),
            quotes: Vec::new(),
            metrics: PortfolioMetrics::default(),
            alert: None,
            dismissed: None,
        }
    }

    pub fn set_transactions(&mut self, transactions: Vec<Transaction>) {
        self.transactions = transactions;
        self.recompute();
    }

    pub fn apply_quotes(&mut self, quotes: Vec<Quote>) {
        self.quotes = quotes;
        self.recompute();
    }

    /// Distinct symbols appearing in the transaction history.
    pub fn symbols(&self) -> BTreeSet<String> {
        self.transactions.iter().map(|t| t.symbol.clone()).collect()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn metrics(&self) -> &PortfolioMetrics {
        &self.metrics
    }

    pub fn alert(&self) -> Option<&PerformanceAlert> {
        self.alert.as_ref()
    }

    /// Hide the current alert until a different kind of alert fires.
    pub fn dismiss_alert(&mut self) {
        if let Some(alert) = self.alert.take() {
            self.dismissed = Some(alert.kind);
        }
    }

    fn recompute(&mut self) {
        self.metrics = self.valuation.compute_metrics(&self.transactions, &self.quotes);

        if self.transactions.is_empty() {
            self.alert = None;
            self.dismissed = None;
            return;
        }
        // An unpriced position counts as zero until its quote arrives; that is not a decline.
        let priced: HashSet<&str> = self.quotes.iter().map(|q| q.symbol.as_str()).collect();
        if let Some(missing) = self
            .metrics
            .positions
            .iter()
            .find(|p| !priced.contains(p.symbol.as_str()))
        {
            debug!(symbol = %missing.symbol, "alert evaluation deferred until every position is priced");
            return;
        }

        let evaluated = evaluate_alert(self.metrics.total_pnl_percent, &self.thresholds);
        match (&evaluated, self.dismissed) {
            (Some(alert), Some(kind)) if alert.kind == kind => {
                self.alert = None;
            }
            _ => {
                self.dismissed = None;
                if let Some(alert) = &evaluated {
                    if self.alert.as_ref().map(|a| a.kind) != Some(alert.kind) {
                        info!(kind = ?alert.kind, pnl_percent = alert.pnl_percent, "performance alert");
                    }
                }
                self.alert = evaluated;
            }
        }
    }
}

/// What presentation layers observe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerState {
    pub transactions: Vec<Transaction>,
    pub metrics: PortfolioMetrics,
    pub alert: Option<PerformanceAlert>,
    pub feed: FeedSnapshot,
    /// Price-fetch error banner, unless dismissed.
    pub price_error: Option<String>,
}

struct Shared {
    tracker: Mutex<PortfolioTracker>,
    dismissed_error: Mutex<Option<String>>,
    state: watch::Sender<TrackerState>,
}

impl Shared {
    fn publish(&self, feed: FeedSnapshot) {
        let tracker = self.tracker.lock().unwrap_or_else(|e| e.into_inner());
        let dismissed = self.dismissed_error.lock().unwrap_or_else(|e| e.into_inner());
        let price_error = match (&feed.error, dismissed.as_ref()) {
            (Some(err), Some(hidden)) if err == hidden => None,
            (err, _) => err.clone(),
        };
        self.state.send_replace(TrackerState {
            transactions: tracker.transactions().to_vec(),
            metrics: tracker.metrics().clone(),
            alert: tracker.alert().cloned(),
            feed,
            price_error,
        });
    }
}

/// Ties a user's transaction history to the live price feed.
///
/// Loads transactions from the store, subscribes the feed to the held
/// symbols, and republishes [`TrackerState`] whenever quotes or
/// transactions change. Dropping the controller cancels the subscription.
pub struct TrackingController {
    user_id: Uuid,
    store: Arc<dyn TransactionStore>,
    interval: Duration,
    shared: Arc<Shared>,
    subscription: Mutex<FeedSubscription>,
    forwarder: JoinHandle<()>,
}

impl TrackingController {
    /// Load the user's transactions and start tracking at the normal
    /// cadence. Must be called from within a Tokio runtime.
    pub async fn start(
        user_id: Uuid,
        store: Arc<dyn TransactionStore>,
        feed: Arc<PriceFeedService>,
        settings: &Settings,
    ) -> Result<Self, CoreError> {
        Self::start_with_cadence(user_id, store, feed, settings, RefreshCadence::Normal).await
    }

    pub async fn start_with_cadence(
        user_id: Uuid,
        store: Arc<dyn TransactionStore>,
        feed: Arc<PriceFeedService>,
        settings: &Settings,
        cadence: RefreshCadence,
    ) -> Result<Self, CoreError> {
        let transactions = store.list_for_user(user_id).await?;

        let mut tracker = PortfolioTracker::new(settings.alerts.clone());
        tracker.set_transactions(transactions);
        let symbols = tracker.symbols();
        let interval = settings.feed.interval_for(cadence);

        let (state_tx, _) = watch::channel(TrackerState::default());
        let shared = Arc::new(Shared {
            tracker: Mutex::new(tracker),
            dismissed_error: Mutex::new(None),
            state: state_tx,
        });

        let subscription = feed.subscribe(symbols, interval);
        let feed_rx = subscription.watch();
        shared.publish(subscription.snapshot());

        let forwarder = tokio::spawn(forward_quotes(Arc::clone(&shared), feed_rx));
        info!(%user_id, ?cadence, interval_ms = interval.as_millis() as u64, "portfolio tracking started");

        Ok(Self {
            user_id,
            store,
            interval,
            shared,
            subscription: Mutex::new(subscription),
            forwarder,
        })
    }

    pub fn watch(&self) -> watch::Receiver<TrackerState> {
        self.shared.state.subscribe()
    }

    /// Price refresh interval of the underlying subscription.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> TrackerState {
        self.shared.state.borrow().clone()
    }

    /// Re-read the transaction store; the feed is re-subscribed if the held
    /// symbol set changed.
    pub async fn reload_transactions(&self) -> Result<(), CoreError> {
        let transactions = self.store.list_for_user(self.user_id).await?;
        debug!(count = transactions.len(), "reloaded transactions");

        let symbols = {
            let mut tracker = self.shared.tracker.lock().unwrap_or_else(|e| e.into_inner());
            tracker.set_transactions(transactions);
            tracker.symbols()
        };

        let feed = {
            let mut subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
            subscription.update(symbols, self.interval);
            subscription.snapshot()
        };
        self.shared.publish(feed);
        Ok(())
    }

    /// Append a transaction for this user and refresh the valuation.
    pub async fn add_transaction(&self, transaction: Transaction) -> Result<(), CoreError> {
        if !(transaction.amount.is_finite() && transaction.amount >= 0.0) {
            return Err(CoreError::Validation(format!(
                "transaction amount must be a non-negative number, got {}",
                transaction.amount
            )));
        }
        if !(transaction.fees.is_finite() && transaction.fees >= 0.0) {
            return Err(CoreError::Validation(format!(
                "transaction fees must be a non-negative number, got {}",
                transaction.fees
            )));
        }
        self.store.insert(self.user_id, &transaction).await?;
        self.reload_transactions().await
    }

    /// Fetch prices now instead of waiting for the next tick.
    pub fn refresh_prices(&self) {
        let subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
        subscription.refresh();
    }

    pub fn dismiss_alert(&self) {
        {
            let mut tracker = self.shared.tracker.lock().unwrap_or_else(|e| e.into_inner());
            tracker.dismiss_alert();
        }
        self.republish();
    }

    /// Hide the current price-fetch error banner.
    pub fn dismiss_error(&self) {
        let feed = self.feed_snapshot();
        {
            let mut dismissed = self.shared.dismissed_error.lock().unwrap_or_else(|e| e.into_inner());
            *dismissed = feed.error.clone();
        }
        self.shared.publish(feed);
    }

    /// Stop the price subscription. The last published state stays readable.
    pub fn shutdown(&self) {
        let mut subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
        subscription.cancel();
        self.forwarder.abort();
    }

    fn feed_snapshot(&self) -> FeedSnapshot {
        let subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
        subscription.snapshot()
    }

    fn republish(&self) {
        let feed = self.feed_snapshot();
        self.shared.publish(feed);
    }
}

impl Drop for TrackingController {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

async fn forward_quotes(shared: Arc<Shared>, mut feed_rx: watch::Receiver<FeedSnapshot>) {
    while feed_rx.changed().await.is_ok() {
        let feed = feed_rx.borrow_and_update().clone();
        {
            let mut tracker = shared.tracker.lock().unwrap_or_else(|e| e.into_inner());
            tracker.apply_quotes(feed.quotes.clone());
        }
        shared.publish(feed);
    }
}
