#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quotagate
//!
//! Request admission for async Rust services: declarative rate-limit rules,
//! scoped quotas and a tower middleware reporting `X-RateLimit-*` headers.
//!
//! ## Features
//!
//! - **Rate strings** such as `"100/minute;1000/day"` parsed into [`Limit`]s
//! - **Per-handler rules** kept in an explicit [`Registry`], with exemptions
//! - **Global defaults** replaced (never merged) by per-handler rules
//! - **Scopes** per resource and HTTP method, or literal and computed ones
//! - **Three strategies** over in-memory storage: fixed window, fixed window
//!   with elastic expiry, moving window
//! - **Pluggable backends** through the [`QuotaStore`] trait
//!
//! ## Quick Start
//!
//! ```rust
//! use http::{Method, Request};
//! use quotagate::{Limiter, Registry, Routes, Rule};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = Registry::new();
//!     let list = registry.declare("list_books").limit(Rule::new("2/minute").unwrap()).finish();
//!     let books = Routes::new("api.books").on(Method::GET, list.id);
//!
//!     let limiter = Limiter::builder().registry(registry).build().unwrap();
//!
//!     let (parts, _) = Request::get("/books").body(()).unwrap().into_parts();
//!     for _ in 0..2 {
//!         assert!(!limiter.check(&parts, &books).await.unwrap().is_rejected());
//!     }
//!     assert!(limiter.check(&parts, &books).await.unwrap().is_rejected());
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod limit;
pub mod limiter;
pub mod middleware;
pub mod prelude;
pub mod registry;
pub mod report;
pub mod resource;
pub mod rule;
pub mod storage;
pub mod strategies;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LimiterConfig;
pub use error::{AdmissionError, LimiterError, RateLimitExceeded};
pub use limit::{parse, parse_many, Granularity, Limit, ParseError, Tightness};
pub use limiter::{Admission, Limiter, LimiterBuilder, ReportingLimit, Verdict};
pub use middleware::{rejection_response, RateLimitLayer, RateLimitService};
pub use registry::{HandlerId, HandlerRegistration, Registered, Registry};
pub use report::{HeaderNames, RateLimitHeaders};
pub use resource::{remote_address, RequestFn, Resource, Routes};
pub use rule::Rule;
pub use storage::{MemoryStorage, Storage};
pub use strategies::{QuotaStore, StoreError, Strategy, WindowStats};
