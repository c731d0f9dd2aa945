//! Quota metadata reported back to clients.

use http::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderName};

use crate::limit::Limit;
use crate::strategies::WindowStats;

pub const DEFAULT_LIMIT_HEADER: &str = "X-RateLimit-Limit";
pub const DEFAULT_REMAINING_HEADER: &str = "X-RateLimit-Remaining";
pub const DEFAULT_RESET_HEADER: &str = "X-RateLimit-Reset";

/// The three values describing the reported limit's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Ceiling of the reported limit.
    pub limit: u64,
    /// Hits left in the current window.
    pub remaining: u64,
    /// Whole seconds until the window resets; 0 once the reset instant has passed.
    pub reset: u64,
}

impl RateLimitHeaders {
    /// Build from a limit, its window stats and the current time (epoch millis).
    pub fn from_stats(limit: &Limit, stats: WindowStats, now_millis: u64) -> Self {
        Self {
            limit: limit.amount(),
            remaining: stats.remaining,
            reset: stats.reset_at_millis.saturating_sub(now_millis) / 1000,
        }
    }

    /// Write the values into `headers`, replacing earlier values.
    pub fn apply(&self, headers: &mut HeaderMap, names: &HeaderNames) {
        headers.insert(names.limit.clone(), HeaderValue::from(self.limit));
        headers.insert(names.remaining.clone(), HeaderValue::from(self.remaining));
        headers.insert(names.reset.clone(), HeaderValue::from(self.reset));
    }
}

/// Validated header names for the three values.
///
/// With the `serde` feature this (de)serializes as three strings,
/// `{"limit": .., "remaining": .., "reset": ..}`, validated on the way in.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "HeaderNamesRepr", into = "HeaderNamesRepr")
)]
pub struct HeaderNames {
    limit: HeaderName,
    remaining: HeaderName,
    reset: HeaderName,
}

impl HeaderNames {
    pub fn new(limit: &str, remaining: &str, reset: &str) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            limit: HeaderName::from_bytes(limit.as_bytes())?,
            remaining: HeaderName::from_bytes(remaining.as_bytes())?,
            reset: HeaderName::from_bytes(reset.as_bytes())?,
        })
    }

    pub fn limit(&self) -> &HeaderName {
        &self.limit
    }

    pub fn remaining(&self) -> &HeaderName {
        &self.remaining
    }

    pub fn reset(&self) -> &HeaderName {
        &self.reset
    }
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            limit: HeaderName::from_static("x-ratelimit-limit"),
            remaining: HeaderName::from_static("x-ratelimit-remaining"),
            reset: HeaderName::from_static("x-ratelimit-reset"),
        }
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
struct HeaderNamesRepr {
    limit: String,
    remaining: String,
    reset: String,
}

#[cfg(feature = "serde")]
impl Default for HeaderNamesRepr {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT_HEADER.to_string(),
            remaining: DEFAULT_REMAINING_HEADER.to_string(),
            reset: DEFAULT_RESET_HEADER.to_string(),
        }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<HeaderNamesRepr> for HeaderNames {
    type Error = InvalidHeaderName;

    fn try_from(repr: HeaderNamesRepr) -> Result<Self, Self::Error> {
        HeaderNames::new(&repr.limit, &repr.remaining, &repr.reset)
    }
}

#[cfg(feature = "serde")]
impl From<HeaderNames> for HeaderNamesRepr {
    fn from(names: HeaderNames) -> Self {
        Self {
            limit: names.limit.as_str().to_string(),
            remaining: names.remaining.as_str().to_string(),
            reset: names.reset.as_str().to_string(),
        }
    }
}
