use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A market snapshot for one asset symbol.
///
/// Wire names follow the hosted `crypto_prices` table so the same shape is
/// used for the live adapters and the cache store. Freshness is advisory:
/// valuation uses whatever quote it is handed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,

    pub price_usd: f64,

    /// 24h change in percent.
    #[serde(rename = "change_24h", default, deserialize_with = "super::null_as_zero")]
    pub change_24h_percent: f64,

    #[serde(rename = "market_cap", default, deserialize_with = "super::null_as_zero")]
    pub market_cap_usd: f64,

    #[serde(rename = "volume_24h", default, deserialize_with = "super::null_as_zero")]
    pub volume_24h_usd: f64,

    pub last_updated: DateTime<Utc>,
}

impl Quote {
    /// A bare price quote stamped now; secondary stats are zero.
    pub fn new(symbol: impl Into<String>, price_usd: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price_usd,
            change_24h_percent: 0.0,
            market_cap_usd: 0.0,
            volume_24h_usd: 0.0,
            last_updated: Utc::now(),
        }
    }

    pub fn with_change_24h(mut self, change: f64) -> Self {
        self.change_24h_percent = change;
        self
    }

    /// A price is usable when it is finite and non-negative.
    pub fn is_valid(&self) -> bool {
        self.price_usd.is_finite() && self.price_usd >= 0.0
    }
}

/// Index a quote list by exact symbol. On duplicates the first entry wins,
/// which is the most recent one for lists ordered newest first.
pub fn index_by_symbol(quotes: &[Quote]) -> HashMap<&str, &Quote> {
    let mut map = HashMap::with_capacity(quotes.len());
    for quote in quotes {
        map.entry(quote.symbol.as_str()).or_insert(quote);
    }
    map
}
