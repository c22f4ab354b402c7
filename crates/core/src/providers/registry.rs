use async_trait::async_trait;
use std::collections::HashMap;
use tracing::warn;

use super::coincap::CoinCapSource;
use super::coinmarketcap::CoinMarketCapSource;
use super::traits::QuoteSource;
use crate::errors::CoreError;
use crate::models::price::Quote;

/// Ordered list of quote sources with automatic fallback.
///
/// The registry is itself a [`QuoteSource`]: a batch is sent to the first
/// source, and only if that fails is the next one tried.
pub struct QuoteSourceRegistry {
    sources: Vec<Box<dyn QuoteSource>>,
}

impl QuoteSourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Create a registry with the default sources.
    ///
    /// CoinMarketCap is primary when a `coinmarketcap` key is configured;
    /// CoinCap (keyless) is always registered as the fallback.
    pub fn new_with_defaults(api_keys: &HashMap<String, String>) -> Self {
        let mut registry = Self::new();

        if let Some(key) = api_keys.get("coinmarketcap") {
            match CoinMarketCapSource::new(key.clone()) {
                Ok(source) => registry.register(Box::new(source)),
                Err(e) => warn!("CoinMarketCap source disabled: {e}"),
            }
        }

        registry.register(Box::new(CoinCapSource::new()));
        registry
    }

    /// Register a new source at the lowest priority.
    pub fn register(&mut self, source: Box<dyn QuoteSource>) {
        self.sources.push(source);
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Default for QuoteSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteSource for QuoteSourceRegistry {
    fn name(&self) -> &str {
        "registry"
    }

    /// Try sources in registration order. Quotes with a non-finite or
    /// negative price are dropped; a source whose whole batch is invalid
    /// counts as failed.
    async fn fetch_quotes(&self, symbols: &[String], currency: &str) -> Result<Vec<Quote>, CoreError> {
        if self.sources.is_empty() {
            return Err(CoreError::NoProvider("no quote sources registered".into()));
        }

        let mut last_error = None;
        for source in &self.sources {
            match source.fetch_quotes(symbols, currency).await {
                Ok(quotes) => {
                    let total = quotes.len();
                    let valid: Vec<Quote> = quotes.into_iter().filter(Quote::is_valid).collect();
                    if total > 0 && valid.is_empty() {
                        last_error = Some(CoreError::Api {
                            provider: source.name().to_string(),
                            message: "all returned prices were invalid".into(),
                        });
                        continue;
                    }
                    if valid.len() < total {
                        warn!(
                            source = source.name(),
                            dropped = total - valid.len(),
                            "dropped quotes with invalid prices"
                        );
                    }
                    return Ok(valid);
                }
                Err(e) => {
                    warn!(source = source.name(), "quote source failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CoreError::NoProvider("no quote sources registered".into())))
    }
}
