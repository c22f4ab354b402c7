// ═══════════════════════════════════════════════════════════════════
// Price Feed Tests: cache stage, retry/backoff, subscriptions
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use coinvest_core::errors::CoreError;
use coinvest_core::models::feed::{FeedStatus, QuoteOrigin};
use coinvest_core::models::price::Quote;
use coinvest_core::providers::traits::QuoteSource;
use coinvest_core::services::price_feed_service::{PriceFeedService, RetryPolicy};
use coinvest_core::storage::memory::InMemoryPriceCache;
use coinvest_core::storage::traits::PriceCacheStore;

// ═══════════════════════════════════════════════════════════════════
// Mock Sources & Stores
// ═══════════════════════════════════════════════════════════════════

const ALWAYS: u32 = u32::MAX;

/// Fails a scripted number of times, then serves fixed prices.
struct ScriptedSource {
    prices: HashMap<String, f64>,
    failures_left: AtomicU32,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    fn new(failures: u32, prices: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self {
            prices: prices.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
            failures_left: AtomicU32::new(failures),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn healthy(prices: &[(&str, f64)]) -> Arc<Self> {
        Self::new(0, prices)
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuoteSource for ScriptedSource {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn fetch_quotes(&self, symbols: &[String], _currency: &str) -> Result<Vec<Quote>, CoreError> {
        self.calls.lock().unwrap().push(Instant::now());
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            if left != ALWAYS {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(CoreError::Network("upstream unavailable".into()));
        }
        Ok(symbols
            .iter()
            .filter_map(|s| self.prices.get(s).map(|p| Quote::new(s.clone(), *p)))
            .collect())
    }
}

/// Holds every fetch until the test opens the gate.
struct GatedSource {
    gate: Notify,
    price: f64,
    calls: AtomicUsize,
}

#[async_trait]
impl QuoteSource for GatedSource {
    fn name(&self) -> &str {
        "Gated"
    }

    async fn fetch_quotes(&self, symbols: &[String], _currency: &str) -> Result<Vec<Quote>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(symbols.iter().map(|s| Quote::new(s.clone(), self.price)).collect())
    }
}

struct BrokenCache;

#[async_trait]
impl PriceCacheStore for BrokenCache {
    async fn read(&self, _symbols: &[String]) -> Result<Vec<Quote>, CoreError> {
        Err(CoreError::Store {
            store: "crypto_prices".into(),
            message: "HTTP 503".into(),
        })
    }

    async fn upsert(&self, _quotes: &[Quote]) -> Result<(), CoreError> {
        Err(CoreError::Store {
            store: "crypto_prices".into(),
            message: "HTTP 503".into(),
        })
    }
}

fn symbols(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn feed(source: Arc<dyn QuoteSource>, cache: Arc<dyn PriceCacheStore>) -> Arc<PriceFeedService> {
    Arc::new(PriceFeedService::new(source, cache, RetryPolicy::default(), "USD"))
}

const INTERVAL: Duration = Duration::from_secs(300);

// ═══════════════════════════════════════════════════════════════════
// RetryPolicy
// ═══════════════════════════════════════════════════════════════════

mod retry_policy {
    use super::*;

    #[test]
    fn default_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(2_000));
    }

    #[test]
    fn delay_doubles_per_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(3), Duration::from_secs(16));
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1));
        assert!(policy.delay_for(64) >= policy.delay_for(31));
    }
}

// ═══════════════════════════════════════════════════════════════════
// One-shot fetch
// ═══════════════════════════════════════════════════════════════════

mod fetch_prices {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn empty_symbol_set_does_no_io() {
        let source = ScriptedSource::healthy(&[("BTC", 1.0)]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));

        let quotes = service.fetch_prices(&BTreeSet::new()).await.unwrap();
        assert!(quotes.is_empty());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_writes_through_to_cache() {
        let source = ScriptedSource::healthy(&[("BTC", 42_000.0), ("ETH", 2_500.0)]);
        let cache = Arc::new(InMemoryPriceCache::new());
        let service = feed(source.clone(), cache.clone());

        let quotes = service.fetch_prices(&symbols(&["BTC", "ETH"])).await.unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(cache.get("BTC").await.unwrap().price_usd, 42_000.0);
        assert_eq!(cache.get("ETH").await.unwrap().price_usd, 2_500.0);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_back_off_exponentially() {
        let source = ScriptedSource::new(3, &[("BTC", 1.0)]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));

        let quotes = service.fetch_prices(&symbols(&["BTC"])).await.unwrap();
        assert_eq!(quotes.len(), 1);

        let times = source.call_times();
        assert_eq!(times.len(), 4);
        assert_eq!(times[1] - times[0], Duration::from_secs(4));
        assert_eq!(times[2] - times[1], Duration::from_secs(8));
        assert_eq!(times[3] - times[2], Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_after_max_retries_plus_one_attempts() {
        let source = ScriptedSource::new(ALWAYS, &[]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));

        let err = service.fetch_prices(&symbols(&["BTC"])).await.unwrap_err();
        match err {
            CoreError::RetriesExhausted { attempts, message } => {
                assert_eq!(attempts, 4);
                assert!(message.contains("upstream unavailable"));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_cache_does_not_fail_the_cycle() {
        let source = ScriptedSource::healthy(&[("SOL", 150.0)]);
        let service = feed(source.clone(), Arc::new(BrokenCache));

        let quotes = service.fetch_prices(&symbols(&["SOL"])).await.unwrap();
        assert_eq!(quotes[0].price_usd, 150.0);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_policy_is_honoured() {
        let source = ScriptedSource::new(ALWAYS, &[]);
        let service = PriceFeedService::new(
            source.clone(),
            Arc::new(InMemoryPriceCache::new()),
            RetryPolicy::new(1, Duration::from_millis(100)),
            "USD",
        );

        let err = service.fetch_prices(&symbols(&["BTC"])).await.unwrap_err();
        assert!(matches!(err, CoreError::RetriesExhausted { attempts: 2, .. }));
        let times = source.call_times();
        assert_eq!(times[1] - times[0], Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_live_batch_falls_back_to_cached_quotes() {
        let cache = Arc::new(InMemoryPriceCache::new());
        cache.upsert(&[Quote::new("BTC", 15_000.0)]).await.unwrap();
        let source = ScriptedSource::healthy(&[]);
        let service = feed(source.clone(), cache);

        let quotes = service.fetch_prices(&symbols(&["BTC"])).await.unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].price_usd, 15_000.0);
        assert_eq!(source.calls(), 1);
    }
}

// ═══════════════════════════════════════════════════════════════════
// One-shot snapshot
// ═══════════════════════════════════════════════════════════════════

mod fetch_snapshot {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn exhaustion_keeps_cached_quotes_and_reports_error() {
        let cache = Arc::new(InMemoryPriceCache::new());
        cache.upsert(&[Quote::new("BTC", 15_000.0)]).await.unwrap();
        let source = ScriptedSource::new(ALWAYS, &[]);
        let service = feed(source.clone(), cache);

        let snap = service.fetch_snapshot(&symbols(&["BTC"])).await;
        assert_eq!(snap.status, FeedStatus::Error { attempts: 4 });
        assert_eq!(snap.origin, Some(QuoteOrigin::Cache));
        assert_eq!(snap.quotes.len(), 1);
        assert_eq!(snap.quotes[0].price_usd, 15_000.0);
        assert!(snap.error.unwrap().contains("4 attempts"));
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn success_replaces_cached_quotes() {
        let cache = Arc::new(InMemoryPriceCache::new());
        cache.upsert(&[Quote::new("ETH", 2_000.0)]).await.unwrap();
        let service = feed(ScriptedSource::healthy(&[("ETH", 2_500.0)]), cache.clone());

        let snap = service.fetch_snapshot(&symbols(&["ETH"])).await;
        assert_eq!(snap.status, FeedStatus::Success);
        assert_eq!(snap.origin, Some(QuoteOrigin::Live));
        assert_eq!(snap.quotes[0].price_usd, 2_500.0);
        assert!(snap.error.is_none());
        assert_eq!(cache.get("ETH").await.unwrap().price_usd, 2_500.0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_live_batch_keeps_cached_quotes() {
        let cache = Arc::new(InMemoryPriceCache::new());
        cache.upsert(&[Quote::new("ADA", 0.45)]).await.unwrap();
        let service = feed(ScriptedSource::healthy(&[]), cache);

        let snap = service.fetch_snapshot(&symbols(&["ADA"])).await;
        assert_eq!(snap.status, FeedStatus::Success);
        assert_eq!(snap.origin, Some(QuoteOrigin::Cache));
        assert_eq!(snap.quotes[0].price_usd, 0.45);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_symbol_set_is_idle() {
        let source = ScriptedSource::healthy(&[("BTC", 1.0)]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));

        let snap = service.fetch_snapshot(&BTreeSet::new()).await;
        assert_eq!(snap.status, FeedStatus::Idle);
        assert_eq!(source.calls(), 0);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Subscriptions: snapshots
// ═══════════════════════════════════════════════════════════════════

mod subscription_snapshots {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cached_quotes_publish_before_live_fetch() {
        let cache = Arc::new(InMemoryPriceCache::new());
        cache.upsert(&[Quote::new("BTC", 100.0)]).await.unwrap();
        let source = Arc::new(GatedSource {
            gate: Notify::new(),
            price: 200.0,
            calls: AtomicUsize::new(0),
        });
        let service = feed(source.clone(), cache.clone());

        let sub = service.subscribe(symbols(&["BTC"]), INTERVAL);
        let mut rx = sub.watch();

        rx.wait_for(|s| s.origin == Some(QuoteOrigin::Cache)).await.unwrap();
        let interim = sub.snapshot();
        assert_eq!(interim.quotes[0].price_usd, 100.0);
        assert_eq!(interim.status, FeedStatus::Fetching);
        assert!(interim.is_loading());

        source.gate.notify_one();
        rx.wait_for(|s| s.origin == Some(QuoteOrigin::Live)).await.unwrap();
        let live = sub.snapshot();
        assert_eq!(live.status, FeedStatus::Success);
        assert_eq!(live.quotes[0].price_usd, 200.0);
        assert!(live.last_update.is_some());
        assert_eq!(cache.get("BTC").await.unwrap().price_usd, 200.0);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_status_carries_attempt_and_delay() {
        let source = ScriptedSource::new(ALWAYS, &[]);
        let service = feed(source, Arc::new(InMemoryPriceCache::new()));
        let sub = service.subscribe(symbols(&["BTC"]), INTERVAL);
        let mut rx = sub.watch();

        rx.wait_for(|s| matches!(s.status, FeedStatus::Retrying { .. }))
            .await
            .unwrap();
        assert_eq!(
            sub.snapshot().status,
            FeedStatus::Retrying {
                attempt: 1,
                delay_ms: 4_000
            }
        );
        assert_eq!(sub.snapshot().retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_error_and_keeps_last_quotes() {
        let cache = Arc::new(InMemoryPriceCache::new());
        cache.upsert(&[Quote::new("ETH", 2_000.0)]).await.unwrap();
        let source = ScriptedSource::new(ALWAYS, &[]);
        let service = feed(source.clone(), cache);
        let sub = service.subscribe(symbols(&["ETH"]), INTERVAL);
        let mut rx = sub.watch();

        rx.wait_for(|s| matches!(s.status, FeedStatus::Error { .. }))
            .await
            .unwrap();
        let snap = sub.snapshot();
        assert_eq!(snap.status, FeedStatus::Error { attempts: 4 });
        assert_eq!(snap.retry_count, 0);
        assert_eq!(
            snap.error.as_deref(),
            Some("Failed to fetch prices after 4 attempts: Network error: upstream unavailable")
        );
        assert_eq!(snap.quotes.len(), 1);
        assert_eq!(snap.quotes[0].price_usd, 2_000.0);
        assert_eq!(snap.origin, Some(QuoteOrigin::Cache));
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_after_exhaustion_starts_clean() {
        let source = ScriptedSource::new(4, &[("BTC", 10.0)]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));
        let sub = service.subscribe(symbols(&["BTC"]), INTERVAL);
        let mut rx = sub.watch();

        rx.wait_for(|s| matches!(s.status, FeedStatus::Error { .. }))
            .await
            .unwrap();
        sub.refresh();
        rx.wait_for(|s| s.status == FeedStatus::Success).await.unwrap();

        let snap = sub.snapshot();
        assert!(snap.error.is_none());
        assert_eq!(snap.retry_count, 0);
        assert_eq!(source.calls(), 5);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Subscriptions: lifecycle
// ═══════════════════════════════════════════════════════════════════

mod subscription_lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fetches_immediately_then_every_interval() {
        let source = ScriptedSource::healthy(&[("BTC", 1.0)]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));
        let sub = service.subscribe(symbols(&["BTC"]), INTERVAL);
        let mut rx = sub.watch();

        rx.wait_for(|s| s.status == FeedStatus::Success).await.unwrap();
        assert_eq!(source.calls(), 1);

        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 2);

        let times = source.call_times();
        assert_eq!(times[1] - times[0], INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_refresh_fetches_without_waiting_for_tick() {
        let source = ScriptedSource::healthy(&[("BTC", 1.0)]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));
        let sub = service.subscribe(symbols(&["BTC"]), INTERVAL);
        let mut rx = sub.watch();
        rx.wait_for(|s| s.status == FeedStatus::Success).await.unwrap();

        sub.refresh();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_symbol_set_stays_idle() {
        let source = ScriptedSource::healthy(&[]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));
        let sub = service.subscribe(BTreeSet::new(), INTERVAL);

        tokio::time::sleep(INTERVAL * 2).await;
        assert!(!sub.is_active());
        assert_eq!(sub.snapshot().status, FeedStatus::Idle);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_timer_and_pending_retries() {
        let source = ScriptedSource::new(ALWAYS, &[]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));
        let mut sub = service.subscribe(symbols(&["BTC"]), INTERVAL);
        let mut rx = sub.watch();

        rx.wait_for(|s| matches!(s.status, FeedStatus::Retrying { .. }))
            .await
            .unwrap();
        sub.cancel();
        let frozen = sub.snapshot();
        let calls = source.calls();

        tokio::time::sleep(INTERVAL * 3).await;
        assert!(!sub.is_active());
        assert_eq!(source.calls(), calls);
        assert_eq!(sub.snapshot(), frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_result_is_discarded_after_cancel() {
        let source = Arc::new(GatedSource {
            gate: Notify::new(),
            price: 500.0,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(InMemoryPriceCache::new());
        let service = feed(source.clone(), cache.clone());
        let mut sub = service.subscribe(symbols(&["BNB"]), INTERVAL);
        let mut rx = sub.watch();

        rx.wait_for(|s| s.status == FeedStatus::Fetching).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        sub.cancel();
        let frozen = sub.snapshot();
        source.gate.notify_one();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(sub.snapshot(), frozen);
        assert!(sub.snapshot().quotes.is_empty());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn update_resubscribes_on_the_same_channel() {
        let source = ScriptedSource::healthy(&[("BTC", 1.0), ("ETH", 2.0)]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));
        let mut sub = service.subscribe(symbols(&["BTC"]), INTERVAL);
        let mut rx = sub.watch();
        rx.wait_for(|s| s.quotes.len() == 1).await.unwrap();

        sub.update(symbols(&["BTC", "ETH"]), INTERVAL);
        rx.wait_for(|s| s.quotes.len() == 2).await.unwrap();
        assert_eq!(sub.symbols(), &symbols(&["BTC", "ETH"]));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn update_with_same_inputs_is_a_no_op() {
        let source = ScriptedSource::healthy(&[("BTC", 1.0)]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));
        let mut sub = service.subscribe(symbols(&["BTC"]), INTERVAL);
        let mut rx = sub.watch();
        rx.wait_for(|s| s.status == FeedStatus::Success).await.unwrap();

        sub.update(symbols(&["BTC"]), INTERVAL);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn update_to_empty_set_goes_idle() {
        let source = ScriptedSource::healthy(&[("BTC", 1.0)]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));
        let mut sub = service.subscribe(symbols(&["BTC"]), INTERVAL);
        let mut rx = sub.watch();
        rx.wait_for(|s| s.status == FeedStatus::Success).await.unwrap();

        sub.update(BTreeSet::new(), INTERVAL);
        assert!(!sub.is_active());
        tokio::time::sleep(INTERVAL * 2).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_fetching() {
        let source = ScriptedSource::healthy(&[("BTC", 1.0)]);
        let service = feed(source.clone(), Arc::new(InMemoryPriceCache::new()));
        let sub = service.subscribe(symbols(&["BTC"]), INTERVAL);
        let mut rx = sub.watch();
        rx.wait_for(|s| s.status == FeedStatus::Success).await.unwrap();

        drop(sub);
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(source.calls(), 1);
    }
}
