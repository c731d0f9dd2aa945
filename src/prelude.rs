//! Convenient re-exports for wiring a limiter into a service.
pub use crate::{
    error::{AdmissionError, LimiterError, RateLimitExceeded},
    limiter::{Limiter, Verdict},
    middleware::RateLimitLayer,
    registry::{HandlerId, Registry},
    resource::{Resource, Routes},
    rule::Rule,
};
