//! Counter storage behind the built-in strategies.
//!
//! [`Storage`] is the backend contract: fixed-window counters with expiry and a
//! per-key moving-window log. [`MemoryStorage`] is the `memory://` backend.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};

/// Counter storage behind the built-in quota strategies.
///
/// Two shapes of state are kept per key: an expiring counter (fixed windows)
/// and a list of hit timestamps (moving windows). Timestamps are wall-clock
/// milliseconds as read from the storage's [`Clock`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Increment the counter at `key` and return the new count.
    ///
    /// A missing or expired counter starts over at 1 and expires `expiry` from
    /// now. With `elastic` set, every increment pushes the expiry out again.
    async fn incr(&self, key: &str, expiry: Duration, elastic: bool) -> Result<u64, Self::Error>;

    /// Current count at `key`, 0 when missing or expired.
    async fn get(&self, key: &str) -> Result<u64, Self::Error>;

    /// Instant (epoch millis) the counter at `key` expires; now when missing.
    async fn get_expiry(&self, key: &str) -> Result<u64, Self::Error>;

    /// Record a hit in the moving window at `key` unless `limit` hits already
    /// happened within the last `expiry`. Returns whether the hit was recorded.
    async fn acquire_entry(&self, key: &str, limit: u64, expiry: Duration) -> Result<bool, Self::Error>;

    /// `(oldest_hit_millis, hits)` for the moving window at `key`. When the
    /// window is empty the oldest hit is reported as now.
    async fn get_moving_window(
        &self,
        key: &str,
        limit: u64,
        expiry: Duration,
    ) -> Result<(u64, u64), Self::Error>;

    /// Drop all state for `key`.
    async fn clear(&self, key: &str) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    counters: HashMap<String, Counter>,
    // Newest hit first; each entry is (hit_at, expiry_millis).
    windows: HashMap<String, VecDeque<(u64, u64)>>,
}

/// In-memory storage (`memory://`).
///
/// Every operation runs under one async mutex, so increments are atomic from
/// the caller's point of view.
#[derive(Clone, Debug)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Use a custom clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self::with_shared_clock(Arc::new(clock))
    }

    pub(crate) fn with_shared_clock(clock: Arc<dyn Clock>) -> Self {
        Self { state: Arc::new(Mutex::new(MemoryState::default())), clock }
    }

    /// Evict expired counters and moving-window hits.
    pub async fn purge_expired(&self) {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        state.counters.retain(|_, c| c.expires_at > now);
        state.windows.retain(|_, hits| {
            hits.retain(|&(at, expiry)| at.saturating_add(expiry) > now);
            !hits.is_empty()
        });
        tracing::debug!(
            counters = state.counters.len(),
            windows = state.windows.len(),
            "memory storage purge complete"
        );
    }

    /// Spawn a Tokio task that calls [`purge_expired`](Self::purge_expired)
    /// every `every`. Abort the returned handle to stop it.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let storage = self.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            loop {
                ticks.tick().await;
                storage.purge_expired().await;
            }
        })
    }

    fn millis(d: Duration) -> u64 {
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }

    fn live_counter(state: &mut MemoryState, key: &str, now: u64) -> Option<Counter> {
        match state.counters.get(key).copied() {
            Some(c) if c.expires_at > now => Some(c),
            Some(_) => {
                state.counters.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    type Error = std::convert::Infallible;

    async fn incr(&self, key: &str, expiry: Duration, elastic: bool) -> Result<u64, Self::Error> {
        let now = self.clock.now_millis();
        let expires_at = now.saturating_add(Self::millis(expiry));
        let mut state = self.state.lock().await;
        let counter = match Self::live_counter(&mut state, key, now) {
            Some(c) => Counter {
                count: c.count + 1,
                expires_at: if elastic { expires_at } else { c.expires_at },
            },
            None => Counter { count: 1, expires_at },
        };
        state.counters.insert(key.to_string(), counter);
        Ok(counter.count)
    }

    async fn get(&self, key: &str) -> Result<u64, Self::Error> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        Ok(Self::live_counter(&mut state, key, now).map_or(0, |c| c.count))
    }

    async fn get_expiry(&self, key: &str) -> Result<u64, Self::Error> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().await;
        Ok(Self::live_counter(&mut state, key, now).map_or(now, |c| c.expires_at))
    }

    async fn acquire_entry(&self, key: &str, limit: u64, expiry: Duration) -> Result<bool, Self::Error> {
        let now = self.clock.now_millis();
        let expiry = Self::millis(expiry);
        let window_start = now.saturating_sub(expiry);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);

        let mut state = self.state.lock().await;
        let hits = state.windows.entry(key.to_string()).or_default();
        if limit == 0 {
            return Ok(false);
        }
        // The limit-th newest hit decides: still inside the window means full.
        if let Some(&(at, _)) = hits.get(limit - 1) {
            if at >= window_start {
                return Ok(false);
            }
        }
        hits.push_front((now, expiry));
        hits.truncate(limit);
        Ok(true)
    }

    async fn get_moving_window(
        &self,
        key: &str,
        _limit: u64,
        expiry: Duration,
    ) -> Result<(u64, u64), Self::Error> {
        let now = self.clock.now_millis();
        let window_start = now.saturating_sub(Self::millis(expiry));
        let state = self.state.lock().await;
        let Some(hits) = state.windows.get(key) else {
            return Ok((now, 0));
        };
        let inside: Vec<u64> =
            hits.iter().map(|&(at, _)| at).take_while(|&at| at >= window_start).collect();
        let oldest = inside.last().copied().unwrap_or(now);
        Ok((oldest, inside.len() as u64))
    }

    async fn clear(&self, key: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;
        state.counters.remove(key);
        state.windows.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn fixed_counter_expires_after_window() {
        let clock = ManualClock::starting_at(1_000_000);
        let storage = MemoryStorage::with_clock(clock.clone());

        assert_eq!(storage.incr("k", MINUTE, false).await.unwrap(), 1);
        clock.advance_secs(30);
        assert_eq!(storage.incr("k", MINUTE, false).await.unwrap(), 2);
        assert_eq!(storage.get_expiry("k").await.unwrap(), 1_060_000);

        clock.advance_secs(30);
        assert_eq!(storage.get("k").await.unwrap(), 0);
        assert_eq!(storage.incr("k", MINUTE, false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn elastic_increment_extends_expiry() {
        let clock = ManualClock::starting_at(0);
        let storage = MemoryStorage::with_clock(clock.clone());

        storage.incr("k", MINUTE, true).await.unwrap();
        clock.advance_secs(45);
        storage.incr("k", MINUTE, true).await.unwrap();
        assert_eq!(storage.get_expiry("k").await.unwrap(), 105_000);

        clock.advance_secs(45);
        assert_eq!(storage.get("k").await.unwrap(), 2, "elastic expiry keeps the counter alive");
    }

    #[tokio::test]
    async fn moving_window_slides() {
        let clock = ManualClock::starting_at(0);
        let storage = MemoryStorage::with_clock(clock.clone());

        assert!(storage.acquire_entry("k", 2, MINUTE).await.unwrap());
        clock.advance_secs(20);
        assert!(storage.acquire_entry("k", 2, MINUTE).await.unwrap());
        assert!(!storage.acquire_entry("k", 2, MINUTE).await.unwrap());
        assert_eq!(storage.get_moving_window("k", 2, MINUTE).await.unwrap(), (0, 2));

        // first hit leaves the window at t=60s
        clock.advance_secs(41);
        assert_eq!(storage.get_moving_window("k", 2, MINUTE).await.unwrap(), (20_000, 1));
        assert!(storage.acquire_entry("k", 2, MINUTE).await.unwrap());
    }

    #[tokio::test]
    async fn purge_and_clear_drop_state() {
        let clock = ManualClock::starting_at(0);
        let storage = MemoryStorage::with_clock(clock.clone());
        storage.incr("old", MINUTE, false).await.unwrap();
        storage.acquire_entry("old-window", 5, MINUTE).await.unwrap();
        clock.advance_secs(61);
        storage.incr("fresh", MINUTE, false).await.unwrap();

        storage.purge_expired().await;
        {
            let state = storage.state.lock().await;
            assert!(!state.counters.contains_key("old"));
            assert!(state.counters.contains_key("fresh"));
            assert!(state.windows.is_empty());
        }

        storage.clear("fresh").await.unwrap();
        assert_eq!(storage.get("fresh").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_in_background() {
        let clock = ManualClock::starting_at(0);
        let storage = MemoryStorage::with_clock(clock.clone());
        storage.incr("k", MINUTE, false).await.unwrap();
        clock.advance_secs(61);

        let sweeper = storage.spawn_sweeper(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(storage.state.lock().await.counters.is_empty());
        sweeper.abort();
    }
}
