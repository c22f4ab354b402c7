pub mod errors;
pub mod format;
pub mod logging;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;

use std::collections::BTreeSet;
use std::sync::Arc;

use models::{
    position::{PortfolioMetrics, PortfolioValuation},
    price::Quote,
    settings::{RefreshCadence, Settings},
};
use providers::{registry::QuoteSourceRegistry, traits::QuoteSource};
use services::{
    monitor_service::PortfolioMonitor, price_feed_service::PriceFeedService,
    tracking_service::TrackingController, valuation_service::ValuationService,
};
use storage::{
    memory::{InMemoryMonitorStore, InMemoryPriceCache, InMemoryTransactionStore},
    rest::RestBackend,
    traits::{MonitorStore, PriceCacheStore, TransactionStore},
};
use tracing::warn;
use uuid::Uuid;

use errors::CoreError;

/// Main entry point for the coinvest core library.
/// Wires the quote sources, stores and price feed described by [`Settings`].
#[must_use]
pub struct Coinvest {
    settings: Settings,
    source: Arc<dyn QuoteSource>,
    feed: Arc<PriceFeedService>,
    cache: Arc<dyn PriceCacheStore>,
    transactions: Arc<dyn TransactionStore>,
    monitor_store: Arc<dyn MonitorStore>,
}

impl std::fmt::Debug for Coinvest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coinvest")
            .field("currency", &self.settings.currency)
            .field("source", &self.source.name())
            .field("backend", &self.settings.backend.as_ref().map(|b| &b.url))
            .field("policy", &self.feed.policy())
            .finish()
    }
}

impl Coinvest {
    /// Build from settings. With a configured backend every store is the
    /// hosted REST backend; otherwise everything lives in memory.
    pub fn new(settings: Settings) -> Result<Self, CoreError> {
        settings.validate()?;
        let source: Arc<dyn QuoteSource> =
            Arc::new(QuoteSourceRegistry::new_with_defaults(&settings.api_keys));

        match settings.backend.clone() {
            Some(backend) => {
                let rest = Arc::new(RestBackend::new(&backend)?);
                Self::with_stores(settings, source, rest.clone(), rest.clone(), rest)
            }
            None => Self::with_stores(
                settings,
                source,
                Arc::new(InMemoryPriceCache::new()),
                Arc::new(InMemoryTransactionStore::new()),
                Arc::new(InMemoryMonitorStore::new()),
            ),
        }
    }

    /// Build from environment variables (see [`Settings::from_env`]).
    pub fn from_env() -> Result<Self, CoreError> {
        Self::new(Settings::from_env())
    }

    /// Build with explicit collaborators.
    pub fn with_stores(
        settings: Settings,
        source: Arc<dyn QuoteSource>,
        cache: Arc<dyn PriceCacheStore>,
        transactions: Arc<dyn TransactionStore>,
        monitor_store: Arc<dyn MonitorStore>,
    ) -> Result<Self, CoreError> {
        settings.validate()?;
        let feed = Arc::new(PriceFeedService::from_settings(
            Arc::clone(&source),
            Arc::clone(&cache),
            &settings,
        ));
        Ok(Self {
            settings,
            source,
            feed,
            cache,
            transactions,
            monitor_store,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn price_feed(&self) -> Arc<PriceFeedService> {
        Arc::clone(&self.feed)
    }

    // ── Prices ──────────────────────────────────────────────────────

    /// One cache-then-live fetch cycle with retries.
    pub async fn fetch_prices(&self, symbols: &BTreeSet<String>) -> Result<Vec<Quote>, CoreError> {
        self.feed.fetch_prices(symbols).await
    }

    // ── Portfolio ───────────────────────────────────────────────────

    /// Start live tracking for a user at the normal refresh cadence.
    /// Must be called from within a Tokio runtime.
    pub async fn track(&self, user_id: Uuid) -> Result<TrackingController, CoreError> {
        self.track_with_cadence(user_id, RefreshCadence::Normal).await
    }

    pub async fn track_with_cadence(
        &self,
        user_id: Uuid,
        cadence: RefreshCadence,
    ) -> Result<TrackingController, CoreError> {
        TrackingController::start_with_cadence(
            user_id,
            Arc::clone(&self.transactions),
            Arc::clone(&self.feed),
            &self.settings,
            cadence,
        )
        .await
    }

    /// One-shot valuation: load the user's transactions, run one price
    /// cycle for the held symbols and compute metrics against the last good
    /// quotes. A price failure is reported in [`PortfolioValuation::prices`];
    /// only a transaction store failure is an error.
    pub async fn portfolio_valuation(&self, user_id: Uuid) -> Result<PortfolioValuation, CoreError> {
        let transactions = self.transactions.list_for_user(user_id).await?;
        let symbols: BTreeSet<String> = transactions.iter().map(|t| t.symbol.clone()).collect();
        let prices = self.feed.fetch_snapshot(&symbols).await;
        let metrics = ValuationService::new().compute_metrics(&transactions, &prices.quotes);
        Ok(PortfolioValuation { metrics, prices })
    }

    /// Metrics from [`Coinvest::portfolio_valuation`]; a price failure is
    /// logged and the metrics use whatever quotes were available.
    pub async fn portfolio_metrics(&self, user_id: Uuid) -> Result<PortfolioMetrics, CoreError> {
        let valuation = self.portfolio_valuation(user_id).await?;
        if let Some(err) = valuation.price_error() {
            warn!(%user_id, "valuing against last known quotes: {err}");
        }
        Ok(valuation.metrics)
    }

    // ── Monitoring ──────────────────────────────────────────────────

    /// Daily-increase monitor over the configured stores, using the
    /// performance alert threshold.
    pub fn monitor(&self) -> PortfolioMonitor {
        PortfolioMonitor::new(
            Arc::clone(&self.monitor_store),
            Arc::clone(&self.cache),
            self.settings.alerts.performance_alert_threshold,
        )
    }
}
