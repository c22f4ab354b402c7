pub mod alert;
pub mod feed;
pub mod monitor;
pub mod position;
pub mod price;
pub mod settings;
pub mod transaction;

use serde::{Deserialize, Deserializer};

/// Hosted tables leave optional numeric columns `null`; the core treats those as zero.
pub(crate) fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}
