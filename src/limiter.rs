//! The rate-limit decision engine.
//!
//! [`Limiter::check`] decides whether a request may proceed and picks the
//! limit whose window is reported back to the client; [`Limiter::report`]
//! turns that choice into the three response values.
//!
//! Evaluation order is deterministic: the handler's registered rules (or the
//! global rules when it has none), then whatever the extra-rules supplier
//! returns, each rule's limits in declaration order. The first limit whose
//! hit fails ends evaluation; later limits are never counted.

use http::request::Parts;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{LimiterConfig, MEMORY_STORAGE_URL};
use crate::error::{LimiterError, RateLimitExceeded};
use crate::limit::Limit;
use crate::registry::Registry;
use crate::report::{HeaderNames, RateLimitHeaders};
use crate::resource::{remote_address, RequestFn, Resource};
use crate::rule::Rule;
use crate::storage::MemoryStorage;
use crate::strategies::{QuotaStore, Strategy};

/// Supplies rules evaluated after the registered (or global) ones.
pub type ExtraRulesFn = Arc<dyn Fn(&Parts, &dyn Resource) -> Vec<Arc<Rule>> + Send + Sync>;

/// Decides what happens once a limit has been exceeded.
pub type ExceededFn = Arc<dyn Fn(&Limit) -> Verdict + Send + Sync>;

/// Outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the request through.
    Proceed,
    /// Reject with `429 Too Many Requests`.
    Reject,
}

/// The limit reported to the client, with the key and scope it was counted under.
///
/// The middleware stores this in the request extensions between the check and
/// the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingLimit {
    pub limit: Limit,
    pub key: String,
    pub scope: String,
}

/// Result of [`Limiter::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    reporting: Option<ReportingLimit>,
    violated: Option<Limit>,
    verdict: Verdict,
}

impl Admission {
    /// Nothing was evaluated: disabled, unrouted, exempt or no rules.
    pub fn skipped() -> Self {
        Self { reporting: None, violated: None, verdict: Verdict::Proceed }
    }

    pub fn is_skipped(&self) -> bool {
        self.reporting.is_none()
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn is_rejected(&self) -> bool {
        self.verdict == Verdict::Reject
    }

    /// The limit that failed, even when the exceeded callback let the request through.
    pub fn violated(&self) -> Option<&Limit> {
        self.violated.as_ref()
    }

    pub fn reporting(&self) -> Option<&ReportingLimit> {
        self.reporting.as_ref()
    }

    pub fn into_reporting(self) -> Option<ReportingLimit> {
        self.reporting
    }

    /// The rejection for a rejected admission.
    pub fn rejection(&self) -> Option<RateLimitExceeded> {
        match (&self.verdict, &self.violated) {
            (Verdict::Reject, Some(limit)) => Some(RateLimitExceeded::new(limit.clone())),
            _ => None,
        }
    }
}

/// The decision engine. Build it once with [`Limiter::builder`] and share it behind an `Arc`.
pub struct Limiter {
    enabled: AtomicBool,
    strategy: Option<Strategy>,
    store: Arc<dyn QuotaStore>,
    registry: Arc<Registry>,
    global: Vec<Arc<Rule>>,
    extra_rules: Option<ExtraRulesFn>,
    key_fn: RequestFn,
    on_exceeded: ExceededFn,
    headers: HeaderNames,
    clock: Arc<dyn Clock>,
}

impl Limiter {
    pub fn builder() -> LimiterBuilder {
        LimiterBuilder::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn checking on or off at runtime. Requests already past the check are unaffected.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        info!(enabled, "rate limiting toggled");
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn header_names(&self) -> &HeaderNames {
        &self.headers
    }

    /// Built-in strategy in use; `None` with a custom store.
    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    /// Count the request against every applicable limit, stopping at the first failure.
    ///
    /// Parse failures of dynamic rate strings and store failures are returned
    /// as errors. A violation is not an error: it shows up in the returned
    /// [`Admission`], with the verdict chosen by the exceeded callback.
    pub async fn check(&self, parts: &Parts, resource: &dyn Resource) -> Result<Admission, LimiterError> {
        if !self.is_enabled() {
            return Ok(Admission::skipped());
        }
        let Some(handler) = resource.responder(&parts.method) else {
            debug!(method = %parts.method, "no handler for method; skipping");
            return Ok(Admission::skipped());
        };
        if self.registry.is_exempt(handler) {
            debug!(handler = ?handler, "handler exempt; skipping");
            return Ok(Admission::skipped());
        }

        let registered = self.registry.lookup(handler);
        let mut rules: Cow<'_, [Arc<Rule>]> =
            Cow::Borrowed(if registered.is_empty() { &self.global[..] } else { registered });
        if let Some(extra) = &self.extra_rules {
            let more = extra(parts, resource);
            if !more.is_empty() {
                rules.to_mut().extend(more);
            }
        }

        let mut reporting: Option<ReportingLimit> = None;
        let mut violated: Option<Limit> = None;

        'rules: for rule in rules.iter() {
            let scope = rule.resolve_scope(parts, resource);
            let limits = rule.resolve_limits(parts, resource)?;
            for limit in limits.iter() {
                let key = rule.resolve_key(parts, resource, &self.key_fn);
                let tighter = reporting.as_ref().map_or(true, |r| limit.is_tighter_than(&r.limit));
                if tighter {
                    reporting = Some(ReportingLimit {
                        limit: limit.clone(),
                        key: key.clone(),
                        scope: scope.clone(),
                    });
                }

                let allowed = self.store.hit(limit, &key, &scope).await.map_err(LimiterError::Store)?;
                trace!(limit = %limit, key = %key, scope = %scope, allowed, "hit");
                if !allowed {
                    warn!(limit = %limit, key = %key, scope = %scope, "rate limit exceeded");
                    violated = Some(limit.clone());
                    reporting = Some(ReportingLimit { limit: limit.clone(), key, scope: scope.clone() });
                    break 'rules;
                }
            }
        }

        let verdict = match &violated {
            Some(limit) => (self.on_exceeded)(limit),
            None => Verdict::Proceed,
        };
        Ok(Admission { reporting, violated, verdict })
    }

    /// Current window of the reported limit; `None` while disabled.
    pub async fn report(&self, reporting: &ReportingLimit) -> Result<Option<RateLimitHeaders>, LimiterError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let stats = self
            .store
            .window_stats(&reporting.limit, &reporting.key, &reporting.scope)
            .await
            .map_err(LimiterError::Store)?;
        Ok(Some(RateLimitHeaders::from_stats(&reporting.limit, stats, self.clock.now_millis())))
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("enabled", &self.is_enabled())
            .field("strategy", &self.strategy)
            .field("global", &self.global)
            .field("extra_rules", &self.extra_rules.is_some())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Limiter`].
///
/// ```
/// use quotagate::{Limiter, Registry, Rule};
/// use std::sync::Arc;
///
/// let mut registry = Registry::new();
/// let books = registry.declare("list_books").limit(Rule::new("100/minute").unwrap()).finish();
///
/// let limiter = Limiter::builder()
///     .global_limits("1000/hour")
///     .strategy("moving-window")
///     .registry(registry)
///     .build()
///     .unwrap();
/// assert_eq!(limiter.registry().lookup(books.id).len(), 1);
/// ```
pub struct LimiterBuilder {
    config: LimiterConfig,
    registry: Arc<Registry>,
    key_fn: Option<RequestFn>,
    extra_rules: Option<ExtraRulesFn>,
    on_exceeded: Option<ExceededFn>,
    store: Option<Arc<dyn QuotaStore>>,
    clock: Arc<dyn Clock>,
}

impl Default for LimiterBuilder {
    fn default() -> Self {
        Self {
            config: LimiterConfig::default(),
            registry: Arc::new(Registry::new()),
            key_fn: None,
            extra_rules: None,
            on_exceeded: None,
            store: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl LimiterBuilder {
    /// Replace all plain-data settings at once.
    pub fn config(mut self, config: LimiterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Strategy identifier; validated by [`build`](Self::build).
    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.config.strategy = strategy.into();
        self
    }

    pub fn storage_url(mut self, url: impl Into<String>) -> Self {
        self.config.storage_url = url.into();
        self
    }

    /// Rate string for handlers without registered rules.
    pub fn global_limits(mut self, expr: impl Into<String>) -> Self {
        self.config.global_limits = Some(expr.into());
        self
    }

    /// Whether the global limits count per HTTP method (default `true`).
    pub fn per_method(mut self, per_method: bool) -> Self {
        self.config.per_method = per_method;
        self
    }

    pub fn header_names(mut self, headers: HeaderNames) -> Self {
        self.config.headers = headers;
        self
    }

    pub fn registry(mut self, registry: impl Into<Arc<Registry>>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Default caller key for rules without their own; client address otherwise.
    pub fn key_fn<F>(mut self, key: F) -> Self
    where
        F: Fn(&Parts, &dyn Resource) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key));
        self
    }

    /// Rules appended after the registered or global ones, computed per request.
    pub fn extra_rules<F>(mut self, supplier: F) -> Self
    where
        F: Fn(&Parts, &dyn Resource) -> Vec<Arc<Rule>> + Send + Sync + 'static,
    {
        self.extra_rules = Some(Arc::new(supplier));
        self
    }

    /// Called with the violated limit; the default rejects.
    pub fn on_exceeded<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Limit) -> Verdict + Send + Sync + 'static,
    {
        self.on_exceeded = Some(Arc::new(callback));
        self
    }

    /// Use `store` instead of the built-in strategy over `storage_url`.
    pub fn store<Q: QuotaStore + 'static>(mut self, store: Q) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Time source for the reset countdown and the built-in storage.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validate the settings and build the limiter.
    ///
    /// Fails with [`LimiterError::Configuration`] for an unknown strategy or
    /// storage URL and with [`LimiterError::MalformedRateExpression`] for
    /// unparseable global limits.
    pub fn build(self) -> Result<Limiter, LimiterError> {
        let config = self.config;
        let strategy = Strategy::from_str(&config.strategy)
            .map_err(|e| LimiterError::Configuration(e.to_string()))?;

        let (store, strategy) = match self.store {
            Some(store) => (store, None),
            None => {
                if !config.storage_url.starts_with(MEMORY_STORAGE_URL) {
                    return Err(LimiterError::Configuration(format!(
                        "unsupported storage url: {}",
                        config.storage_url
                    )));
                }
                let storage = MemoryStorage::with_shared_clock(self.clock.clone());
                (strategy.build(storage), Some(strategy))
            }
        };

        let global = match config.global_limits.as_deref() {
            Some(expr) => vec![Arc::new(Rule::new(expr)?.per_method(config.per_method))],
            None => Vec::new(),
        };

        let key_fn: RequestFn = match self.key_fn {
            Some(key_fn) => key_fn,
            None => Arc::new(remote_address),
        };
        let on_exceeded: ExceededFn = match self.on_exceeded {
            Some(callback) => callback,
            None => Arc::new(|_: &Limit| Verdict::Reject),
        };

        info!(
            strategy = %config.strategy,
            storage = %config.storage_url,
            global_limits = ?config.global_limits,
            enabled = config.enabled,
            "rate limiter built"
        );

        Ok(Limiter {
            enabled: AtomicBool::new(config.enabled),
            strategy,
            store,
            registry: self.registry,
            global,
            extra_rules: self.extra_rules,
            key_fn,
            on_exceeded,
            headers: config.headers,
            clock: self.clock,
        })
    }
}
