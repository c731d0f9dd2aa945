//! Error types for the limiter and its middleware
use http::StatusCode;
use std::fmt;

use crate::limit::{Limit, ParseError};
use crate::report::RateLimitHeaders;
use crate::strategies::StoreError;

/// Faults raised by the limiter itself. None of these mean "too many requests".
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum LimiterError {
    /// Unknown strategy identifier or storage URL; raised when building.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A static or per-request rate string did not parse.
    #[error("malformed rate limit expression: {0}")]
    MalformedRateExpression(#[from] ParseError),
    /// The quota store failed; passed through unclassified.
    #[error("quota store error: {0}")]
    Store(#[source] StoreError),
}

/// A limit was exceeded and the request is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitExceeded {
    limit: Limit,
    headers: Option<RateLimitHeaders>,
}

impl RateLimitExceeded {
    pub fn new(limit: Limit) -> Self {
        Self { limit, headers: None }
    }

    /// Attach the quota metadata for the violated limit.
    pub fn with_headers(mut self, headers: RateLimitHeaders) -> Self {
        self.headers = Some(headers);
        self
    }

    /// The violated limit.
    pub fn limit(&self) -> &Limit {
        &self.limit
    }

    /// Quota metadata to send with the rejection, when it was computed.
    pub fn headers(&self) -> Option<&RateLimitHeaders> {
        self.headers.as_ref()
    }

    /// Short title for the rejection response.
    pub fn title(&self) -> &'static str {
        "Rate Limit Exceeded"
    }

    /// Always `429 Too Many Requests`.
    pub fn status(&self) -> StatusCode {
        StatusCode::TOO_MANY_REQUESTS
    }
}

impl fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate limit exceeded, {}", self.limit)
    }
}

impl std::error::Error for RateLimitExceeded {}

/// Error returned by [`RateLimitService`](crate::middleware::RateLimitService).
#[derive(Debug)]
pub enum AdmissionError<E> {
    /// The request was rejected by a limit.
    RateLimited(RateLimitExceeded),
    /// The limiter could not reach a decision.
    Limiter(LimiterError),
    /// The wrapped service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited(e) => write!(f, "{}", e),
            Self::Limiter(e) => write!(f, "rate limiter failed: {}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RateLimited(e) => Some(e),
            Self::Limiter(e) => Some(e),
            Self::Inner(e) => Some(e),
        }
    }
}

impl<E> From<LimiterError> for AdmissionError<E> {
    fn from(e: LimiterError) -> Self {
        Self::Limiter(e)
    }
}

impl<E> AdmissionError<E> {
    /// Check if the request was rejected by a limit
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
    /// Check if the limiter itself failed
    pub fn is_limiter(&self) -> bool {
        matches!(self, Self::Limiter(_))
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Borrow the rejection if this is a RateLimited variant
    pub fn as_rate_limited(&self) -> Option<&RateLimitExceeded> {
        match self {
            Self::RateLimited(e) => Some(e),
            _ => None,
        }
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Suggested response status: 429 for rejections, 500 for limiter faults, `None` for inner errors.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::RateLimited(e) => Some(e.status()),
            Self::Limiter(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Inner(_) => None,
        }
    }
}
