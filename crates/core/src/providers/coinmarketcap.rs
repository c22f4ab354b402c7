use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::traits::QuoteSource;
use crate::errors::CoreError;
use crate::models::price::Quote;

const BASE_URL: &str = "https://pro-api.coinmarketcap.com";
const PROVIDER: &str = "CoinMarketCap";

/// CoinMarketCap Pro API source.
///
/// - **Key**: required, sent as the `X-CMC_PRO_API_KEY` header.
/// - **Endpoint**: `/v1/cryptocurrency/quotes/latest?symbol=BTC,ETH&convert=USD`
///   quotes the whole batch in a single request.
pub struct CoinMarketCapSource {
    client: Client,
    api_key: String,
    base_url: String,
}

impl CoinMarketCapSource {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CoreError> {
        Self::with_base_url(api_key, BASE_URL)
    }

    /// Point the source at another host (sandbox or a mock server).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CoreError::Configuration(
                "CoinMarketCap API key not configured".into(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

// ── CoinMarketCap API response types ────────────────────────────────

#[derive(Deserialize)]
struct QuotesResponse {
    #[serde(default)]
    data: HashMap<String, CoinData>,
}

#[derive(Deserialize)]
struct CoinData {
    last_updated: Option<DateTime<Utc>>,
    quote: HashMap<String, CurrencyQuote>,
}

#[derive(Deserialize)]
struct CurrencyQuote {
    price: Option<f64>,
    percent_change_24h: Option<f64>,
    market_cap: Option<f64>,
    volume_24h: Option<f64>,
}

#[async_trait]
impl QuoteSource for CoinMarketCapSource {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch_quotes(&self, symbols: &[String], currency: &str) -> Result<Vec<Quote>, CoreError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/cryptocurrency/quotes/latest", self.base_url);
        let joined = symbols.join(",");
        debug!(symbols = %joined, "requesting CoinMarketCap quotes");

        let resp = self
            .client
            .get(&url)
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("symbol", joined.as_str()), ("convert", currency)])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CoreError::RateLimited {
                provider: PROVIDER.into(),
            });
        }
        if !status.is_success() {
            return Err(CoreError::Api {
                provider: PROVIDER.into(),
                message: format!("HTTP {status}"),
            });
        }

        let body: QuotesResponse = resp.json().await.map_err(|e| CoreError::Api {
            provider: PROVIDER.into(),
            message: format!("Failed to parse quotes response: {e}"),
        })?;

        let quotes = body
            .data
            .into_iter()
            .filter_map(|(symbol, coin)| {
                let quote = coin.quote.get(currency)?;
                Some(Quote {
                    symbol,
                    price_usd: quote.price?,
                    change_24h_percent: quote.percent_change_24h.unwrap_or(0.0),
                    market_cap_usd: quote.market_cap.unwrap_or(0.0),
                    volume_24h_usd: quote.volume_24h.unwrap_or(0.0),
                    last_updated: coin.last_updated.unwrap_or_else(Utc::now),
                })
            })
            .collect();

        Ok(quotes)
    }
}
