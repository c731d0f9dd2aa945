#![allow(dead_code)]

use async_trait::async_trait;
use http::request::Parts;
use http::{Method, Request};
use quotagate::{
    Limit, ManualClock, MemoryStorage, QuotaStore, StoreError, Strategy, WindowStats,
};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// One `hit` call as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub limit: Limit,
    pub key: String,
    pub scope: String,
}

/// Fixed-window store over memory that records every call it receives.
#[derive(Clone)]
pub struct CountingStore {
    inner: Arc<dyn QuotaStore>,
    hits: Arc<Mutex<Vec<Hit>>>,
    stats_calls: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            inner: Strategy::FixedWindow.build(MemoryStorage::with_clock(clock)),
            hits: Arc::new(Mutex::new(Vec::new())),
            stats_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hit_count(&self) -> usize {
        self.hits.lock().unwrap().len()
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    /// Total interactions of any kind.
    pub fn calls(&self) -> usize {
        self.hit_count() + self.stats_calls()
    }
}

#[async_trait]
impl QuotaStore for CountingStore {
    async fn hit(&self, limit: &Limit, key: &str, scope: &str) -> Result<bool, StoreError> {
        self.hits.lock().unwrap().push(Hit {
            limit: limit.clone(),
            key: key.to_string(),
            scope: scope.to_string(),
        });
        self.inner.hit(limit, key, scope).await
    }

    async fn window_stats(
        &self,
        limit: &Limit,
        key: &str,
        scope: &str,
    ) -> Result<WindowStats, StoreError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.window_stats(limit, key, scope).await
    }
}

/// Store whose every call fails, standing in for an unreachable backend.
pub struct UnreachableStore;

#[async_trait]
impl QuotaStore for UnreachableStore {
    async fn hit(&self, _: &Limit, _: &str, _: &str) -> Result<bool, StoreError> {
        Err(Box::new(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")))
    }

    async fn window_stats(&self, _: &Limit, _: &str, _: &str) -> Result<WindowStats, StoreError> {
        Err(Box::new(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")))
    }
}

/// Request head from `client` (sent as `X-Forwarded-For`).
pub fn request(method: Method, client: &str) -> Parts {
    Request::builder()
        .method(method)
        .uri("/books")
        .header("x-forwarded-for", client)
        .body(())
        .unwrap()
        .into_parts()
        .0
}

pub fn get(client: &str) -> Parts {
    request(Method::GET, client)
}

/// Captures formatted log output for assertions.
#[derive(Clone, Default)]
pub struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl SharedWriter {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
