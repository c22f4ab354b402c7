use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use super::traits::QuoteSource;
use crate::errors::CoreError;
use crate::models::price::Quote;

const BASE_URL: &str = "https://api.coincap.io/v2";
const PROVIDER: &str = "CoinCap";

/// CoinCap API source, used as a keyless fallback.
///
/// - **Free**: No API key required.
/// - **Endpoint**: `/assets?ids=bitcoin,ethereum` quotes a batch in one call.
/// - **Currency**: USD only.
///
/// Note: CoinCap uses lowercase ids like "bitcoin", "ethereum".
/// We map common symbols (BTC → bitcoin) and fall back to the lowercased symbol.
pub struct CoinCapSource {
    client: Client,
    base_url: String,
    /// Map from uppercase symbol (BTC) to CoinCap asset id (bitcoin).
    symbol_map: Mutex<HashMap<String, String>>,
}

impl CoinCapSource {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let mut symbol_map = HashMap::new();
        let common = [
            ("BTC", "bitcoin"),
            ("ETH", "ethereum"),
            ("USDT", "tether"),
            ("USDC", "usd-coin"),
            ("BNB", "binance-coin"),
            ("XRP", "xrp"),
            ("ADA", "cardano"),
            ("SOL", "solana"),
            ("DOGE", "dogecoin"),
            ("DOT", "polkadot"),
            ("MATIC", "polygon"),
            ("LTC", "litecoin"),
            ("AVAX", "avalanche"),
            ("LINK", "chainlink"),
            ("UNI", "uniswap"),
            ("ATOM", "cosmos"),
            ("XLM", "stellar"),
            ("TRX", "tron"),
            ("SHIB", "shiba-inu"),
            ("DAI", "multi-collateral-dai"),
        ];
        for (sym, id) in common {
            symbol_map.insert(sym.to_string(), id.to_string());
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            symbol_map: Mutex::new(symbol_map),
        }
    }

    /// Resolve a symbol like "BTC" to a CoinCap id like "bitcoin".
    pub fn resolve_id(&self, symbol: &str) -> String {
        let map = self.symbol_map.lock().unwrap_or_else(|e| e.into_inner());
        map.get(&symbol.to_uppercase())
            .cloned()
            .unwrap_or_else(|| symbol.to_lowercase())
    }

    /// Teach the source an id for a symbol it does not know.
    pub fn register_id(&self, symbol: &str, id: impl Into<String>) {
        let mut map = self.symbol_map.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(symbol.to_uppercase(), id.into());
    }
}

impl Default for CoinCapSource {
    fn default() -> Self {
        Self::new()
    }
}

// ── CoinCap API response types ──────────────────────────────────────

#[derive(Deserialize)]
struct AssetsResponse {
    data: Vec<AssetData>,
    /// Unix timestamp in milliseconds.
    timestamp: Option<i64>,
}

#[derive(Deserialize)]
struct AssetData {
    id: String,
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
    #[serde(rename = "changePercent24Hr")]
    change_percent_24h: Option<String>,
    #[serde(rename = "marketCapUsd")]
    market_cap_usd: Option<String>,
    #[serde(rename = "volumeUsd24Hr")]
    volume_usd_24h: Option<String>,
}

fn parse_num(value: &Option<String>) -> Option<f64> {
    value.as_deref().and_then(|v| v.parse().ok())
}

#[async_trait]
impl QuoteSource for CoinCapSource {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch_quotes(&self, symbols: &[String], currency: &str) -> Result<Vec<Quote>, CoreError> {
        if !currency.eq_ignore_ascii_case("USD") {
            return Err(CoreError::Validation(format!(
                "CoinCap only quotes USD, not {currency}"
            )));
        }
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        // id → requested symbol, so results keep the caller's exact spelling.
        let by_id: HashMap<String, &String> = symbols
            .iter()
            .map(|s| (self.resolve_id(s), s))
            .collect();
        let ids: Vec<&str> = by_id.keys().map(String::as_str).collect();
        let url = format!("{}/assets", self.base_url);
        debug!(ids = %ids.join(","), "requesting CoinCap quotes");

        let resp = self
            .client
            .get(&url)
            .query(&[("ids", ids.join(","))])
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

        let body: AssetsResponse = resp.json().await.map_err(|e| CoreError::Api {
            provider: PROVIDER.into(),
            message: format!("Failed to parse assets response: {e}"),
        })?;

        let stamped = body
            .timestamp
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        let quotes = body
            .data
            .iter()
            .filter_map(|asset| {
                let symbol = by_id.get(&asset.id)?;
                Some(Quote {
                    symbol: (*symbol).clone(),
                    price_usd: parse_num(&asset.price_usd)?,
                    change_24h_percent: parse_num(&asset.change_percent_24h).unwrap_or(0.0),
                    market_cap_usd: parse_num(&asset.market_cap_usd).unwrap_or(0.0),
                    volume_24h_usd: parse_num(&asset.volume_usd_24h).unwrap_or(0.0),
                    last_updated: stamped,
                })
            })
            .collect();

        Ok(quotes)
    }
}
