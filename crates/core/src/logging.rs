use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::CoreError;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    /// Emit ANSI colours (disable when logs go to a file or collector).
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            ansi: std::env::var("NO_COLOR").is_err(),
        }
    }
}

/// Install a global fmt subscriber filtered by `config.log_level`.
///
/// Calling this again after a subscriber is installed is a no-op.
pub fn init_logging(config: LoggingConfig) -> Result<(), CoreError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| CoreError::Configuration(format!("invalid log filter: {e}")))?;

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(config.ansi))
        .try_init();

    if result.is_ok() {
        tracing::debug!(level = %config.log_level, "logging initialised");
    }
    Ok(())
}
