//! Quota-tracking strategies.
//!
//! The decision engine only talks to a [`QuotaStore`]. This module provides
//! the trait plus the three built-in counting strategies, each backed by a
//! [`Storage`]:
//!
//! - **`fixed-window`**: one counter per window, reset when the window expires.
//! - **`fixed-window-elastic-expiry`**: like `fixed-window`, but every hit
//!   pushes the window end out, so a caller who keeps hammering stays blocked.
//! - **`moving-window`**: remembers individual hits and counts those inside
//!   the trailing period.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::limit::Limit;
use crate::storage::Storage;

/// Boxed backend failure; the engine does not classify these.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Snapshot of the current window for one (limit, key, scope) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    /// Instant the window resets, in epoch milliseconds.
    pub reset_at_millis: u64,
    /// Hits still allowed in the current window.
    pub remaining: u64,
}

/// Backend answering "may this triple be hit again" and "what does its window look like".
///
/// `hit` must be atomic from the caller's perspective: it counts the hit and
/// reports the post-increment verdict in one step.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Count a hit; `true` while the triple is still within `limit`.
    async fn hit(&self, limit: &Limit, key: &str, scope: &str) -> Result<bool, StoreError>;

    /// Current window for the triple.
    async fn window_stats(&self, limit: &Limit, key: &str, scope: &str)
        -> Result<WindowStats, StoreError>;
}

/// Recognized strategy identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strategy {
    #[default]
    FixedWindow,
    FixedWindowElasticExpiry,
    MovingWindow,
}

/// The identifier did not name a known strategy.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid rate limiting strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Strategy::FixedWindow => "fixed-window",
            Strategy::FixedWindowElasticExpiry => "fixed-window-elastic-expiry",
            Strategy::MovingWindow => "moving-window",
        }
    }

    /// Instantiate the strategy over `storage`.
    pub fn build<S>(self, storage: S) -> Arc<dyn QuotaStore>
    where
        S: Storage + 'static,
    {
        match self {
            Strategy::FixedWindow => Arc::new(FixedWindow::new(storage)),
            Strategy::FixedWindowElasticExpiry => Arc::new(FixedWindowElasticExpiry::new(storage)),
            Strategy::MovingWindow => Arc::new(MovingWindow::new(storage)),
        }
    }
}

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed-window" => Ok(Strategy::FixedWindow),
            "fixed-window-elastic-expiry" => Ok(Strategy::FixedWindowElasticExpiry),
            "moving-window" => Ok(Strategy::MovingWindow),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed window counter.
pub struct FixedWindow<S> {
    storage: Arc<S>,
}

impl<S: Storage> FixedWindow<S> {
    pub fn new(storage: S) -> Self {
        Self { storage: Arc::new(storage) }
    }
}

async fn fixed_window_stats<S: Storage>(
    storage: &S,
    limit: &Limit,
    key: &str,
    scope: &str,
) -> Result<WindowStats, StoreError> {
    let counter = limit.key_for(key, scope);
    let used = storage.get(&counter).await?;
    let reset_at_millis = storage.get_expiry(&counter).await?;
    Ok(WindowStats { reset_at_millis, remaining: limit.amount().saturating_sub(used) })
}

#[async_trait]
impl<S> QuotaStore for FixedWindow<S>
where
    S: Storage + 'static,
{
    async fn hit(&self, limit: &Limit, key: &str, scope: &str) -> Result<bool, StoreError> {
        let count = self.storage.incr(&limit.key_for(key, scope), limit.period(), false).await?;
        Ok(count <= limit.amount())
    }

    async fn window_stats(
        &self,
        limit: &Limit,
        key: &str,
        scope: &str,
    ) -> Result<WindowStats, StoreError> {
        fixed_window_stats(&*self.storage, limit, key, scope).await
    }
}

/// Fixed window whose expiry is pushed out on every hit.
pub struct FixedWindowElasticExpiry<S> {
    storage: Arc<S>,
}

impl<S: Storage> FixedWindowElasticExpiry<S> {
    pub fn new(storage: S) -> Self {
        Self { storage: Arc::new(storage) }
    }
}

#[async_trait]
impl<S> QuotaStore for FixedWindowElasticExpiry<S>
where
    S: Storage + 'static,
{
    async fn hit(&self, limit: &Limit, key: &str, scope: &str) -> Result<bool, StoreError> {
        let count = self.storage.incr(&limit.key_for(key, scope), limit.period(), true).await?;
        Ok(count <= limit.amount())
    }

    async fn window_stats(
        &self,
        limit: &Limit,
        key: &str,
        scope: &str,
    ) -> Result<WindowStats, StoreError> {
        fixed_window_stats(&*self.storage, limit, key, scope).await
    }
}

/// Moving (sliding log) window.
pub struct MovingWindow<S> {
    storage: Arc<S>,
}

impl<S: Storage> MovingWindow<S> {
    pub fn new(storage: S) -> Self {
        Self { storage: Arc::new(storage) }
    }
}

#[async_trait]
impl<S> QuotaStore for MovingWindow<S>
where
    S: Storage + 'static,
{
    async fn hit(&self, limit: &Limit, key: &str, scope: &str) -> Result<bool, StoreError> {
        let acquired = self
            .storage
            .acquire_entry(&limit.key_for(key, scope), limit.amount(), limit.period())
            .await?;
        Ok(acquired)
    }

    async fn window_stats(
        &self,
        limit: &Limit,
        key: &str,
        scope: &str,
    ) -> Result<WindowStats, StoreError> {
        let period = limit.period();
        let (oldest, hits) = self
            .storage
            .get_moving_window(&limit.key_for(key, scope), limit.amount(), period)
            .await?;
        let period_millis = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        Ok(WindowStats {
            reset_at_millis: oldest.saturating_add(period_millis),
            remaining: limit.amount().saturating_sub(hits),
        })
    }
}
