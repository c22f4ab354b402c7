use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::CoreError;

/// Cryptocurrencies offered in the UI: (symbol, display name).
pub const SUPPORTED_CRYPTOS: &[(&str, &str)] = &[
    ("BTC", "Bitcoin"),
    ("ETH", "Ethereum"),
    ("USDT", "Tether"),
    ("BNB", "Binance Coin"),
    ("ADA", "Cardano"),
    ("SOL", "Solana"),
    ("XRP", "XRP"),
    ("DOT", "Polkadot"),
    ("MATIC", "Polygon"),
    ("AVAX", "Avalanche"),
];

/// Display name for a symbol, or the symbol itself when it is not in the catalogue.
pub fn crypto_name(symbol: &str) -> &str {
    SUPPORTED_CRYPTOS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, name)| *name)
        .unwrap_or(symbol)
}

/// Top-level configuration for the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Quote currency requested from market-data sources.
    pub currency: String,

    #[serde(default)]
    pub feed: FeedSettings,

    #[serde(default)]
    pub alerts: AlertThresholds,

    /// API keys by provider name (e.g., "coinmarketcap").
    #[serde(default)]
    pub api_keys: HashMap<String, String>,

    /// Hosted backend holding the price cache and transaction tables.
    #[serde(default)]
    pub backend: Option<BackendSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            feed: FeedSettings::default(),
            alerts: AlertThresholds::default(),
            api_keys: HashMap::new(),
            backend: None,
        }
    }
}

/// Refresh cadence and retry policy for the price feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSettings {
    pub refresh_interval_ms: u64,
    /// Cadence for active trading views.
    pub fast_interval_ms: u64,
    /// Cadence for background refreshes.
    pub slow_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_base_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 300_000,
            fast_interval_ms: 60_000,
            slow_interval_ms: 600_000,
            max_retries: 3,
            retry_delay_base_ms: 2_000,
        }
    }
}

/// How often a tracked portfolio refreshes its prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshCadence {
    /// Active trading views.
    Fast,
    #[default]
    Normal,
    /// Background refreshes.
    Slow,
}

impl FeedSettings {
    pub fn refresh_interval(&self) -> Duration {
        self.interval_for(RefreshCadence::Normal)
    }

    pub fn interval_for(&self, cadence: RefreshCadence) -> Duration {
        let ms = match cadence {
            RefreshCadence::Fast => self.fast_interval_ms,
            RefreshCadence::Normal => self.refresh_interval_ms,
            RefreshCadence::Slow => self.slow_interval_ms,
        };
        Duration::from_millis(ms)
    }
}

/// P&L percentages that trigger a performance alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub performance_alert_threshold: f64,
    pub high_performance_threshold: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            performance_alert_threshold: 20.0,
            high_performance_threshold: 50.0,
        }
    }
}

/// Connection details for the hosted REST backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    pub url: String,
    pub api_key: String,
    /// Elevated key for writes that bypass row-level policies (cache upserts, monitor logs).
    #[serde(default)]
    pub service_key: Option<String>,
}

impl Settings {
    /// Build settings from environment variables, falling back to defaults
    /// for anything absent or unparsable.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();

        if let Ok(key) = std::env::var("COINMARKETCAP_API_KEY") {
            settings.api_keys.insert("coinmarketcap".to_string(), key);
        }

        if let (Ok(url), Ok(api_key)) = (
            std::env::var("SUPABASE_URL"),
            std::env::var("SUPABASE_ANON_KEY"),
        ) {
            settings.backend = Some(BackendSettings {
                url,
                api_key,
                service_key: std::env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
            });
        }

        let feed = &mut settings.feed;
        feed.refresh_interval_ms = env_or("PRICE_UPDATE_INTERVAL_MS", feed.refresh_interval_ms);
        feed.max_retries = env_or("PRICE_MAX_RETRIES", feed.max_retries);
        feed.retry_delay_base_ms = env_or("PRICE_RETRY_BASE_MS", feed.retry_delay_base_ms);

        let alerts = &mut settings.alerts;
        alerts.performance_alert_threshold =
            env_or("PERFORMANCE_ALERT_THRESHOLD", alerts.performance_alert_threshold);
        alerts.high_performance_threshold =
            env_or("HIGH_PERFORMANCE_THRESHOLD", alerts.high_performance_threshold);

        settings
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.currency.trim().is_empty() {
            return Err(CoreError::Configuration("currency must not be empty".into()));
        }
        let feed = &self.feed;
        if feed.refresh_interval_ms == 0 || feed.fast_interval_ms == 0 || feed.slow_interval_ms == 0 {
            return Err(CoreError::Configuration(
                "refresh intervals must be greater than zero".into(),
            ));
        }
        if feed.retry_delay_base_ms == 0 {
            return Err(CoreError::Configuration(
                "retry delay base must be greater than zero".into(),
            ));
        }
        let alerts = &self.alerts;
        if alerts.performance_alert_threshold <= 0.0 || alerts.high_performance_threshold <= 0.0 {
            return Err(CoreError::Configuration(
                "alert thresholds must be positive".into(),
            ));
        }
        if alerts.high_performance_threshold < alerts.performance_alert_threshold {
            return Err(CoreError::Configuration(format!(
                "high performance threshold ({}) is below the performance alert threshold ({})",
                alerts.high_performance_threshold, alerts.performance_alert_threshold
            )));
        }
        Ok(())
    }

    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.api_keys.get(provider).map(String::as_str)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
