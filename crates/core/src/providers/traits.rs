use async_trait::async_trait;

use crate::errors::CoreError;
use crate::models::price::Quote;

/// A market-data API that can quote a batch of symbols in one request.
///
/// Each API (CoinMarketCap, CoinCap, ...) implements this trait. Swapping
/// or adding a source never touches the feed or the valuation code.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Human-readable name of this source (for logs/errors).
    fn name(&self) -> &str;

    /// Fetch the latest quotes for `symbols`, denominated in `currency`.
    ///
    /// Symbols the API does not know are omitted from the result rather
    /// than failing the batch.
    async fn fetch_quotes(&self, symbols: &[String], currency: &str) -> Result<Vec<Quote>, CoreError>;
}
