use thiserror::Error;

/// Unified error type for the entire coinvest-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── API / Network ───────────────────────────────────────────────
    #[error("API error ({provider}): {message}")]
    Api {
        provider: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("No quote source available: {0}")]
    NoProvider(String),

    #[error("Failed to fetch prices after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("Price subscription cancelled")]
    Cancelled,

    // ── Persistence ─────────────────────────────────────────────────
    #[error("Store error ({store}): {message}")]
    Store { store: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ── Configuration / Input ───────────────────────────────────────
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl CoreError {
    /// Whether a failed price fetch is worth retrying.
    ///
    /// Availability and rate failures are transient; bad configuration or
    /// invalid input will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Api { .. }
                | CoreError::Network(_)
                | CoreError::RateLimited { .. }
                | CoreError::NoProvider(_)
        )
    }

    pub(crate) fn store(store: &str, message: impl Into<String>) -> Self {
        CoreError::Store {
            store: store.to_string(),
            message: message.into(),
        }
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors carry the full URL; strip the query so keys never end up in logs.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        CoreError::Network(sanitized)
    }
}
