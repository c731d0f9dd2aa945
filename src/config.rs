//! Serializable limiter settings.
//!
//! Everything that can be expressed as plain data lives here. Functions (key
//! function, exceeded callback, extra-rules supplier) and injected components
//! (custom store, clock) are set on [`LimiterBuilder`](crate::LimiterBuilder).

use crate::report::HeaderNames;
use crate::strategies::Strategy;

/// The only storage URL the bundled backend understands.
pub const MEMORY_STORAGE_URL: &str = "memory://";

/// Plain-data configuration for a [`Limiter`](crate::Limiter).
///
/// `strategy` and `storage_url` stay strings so that an unknown value is
/// reported by [`LimiterBuilder::build`](crate::LimiterBuilder::build) as a
/// configuration error instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct LimiterConfig {
    /// Master switch. When false no request is ever checked.
    pub enabled: bool,
    /// `fixed-window`, `fixed-window-elastic-expiry` or `moving-window`.
    pub strategy: String,
    pub storage_url: String,
    /// Rate string applied to handlers without registered rules.
    pub global_limits: Option<String>,
    /// Whether the global limits count per HTTP method.
    pub per_method: bool,
    pub headers: HeaderNames,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: Strategy::default().as_str().to_string(),
            storage_url: MEMORY_STORAGE_URL.to_string(),
            global_limits: None,
            per_method: true,
            headers: HeaderNames::default(),
        }
    }
}

#[cfg(feature = "serde")]
impl LimiterConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, crate::LimiterError> {
        serde_json::from_str(json)
            .map_err(|e| crate::LimiterError::Configuration(format!("invalid limiter config: {e}")))
    }
}
