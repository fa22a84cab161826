//! In-memory snapshot cache.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned mutex

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stock_control_core::{StockCache, StockError, StockFuture, StockKey, StockSnapshot};
use tokio::time::Instant;

/// [`StockCache`] backed by a `HashMap`, with failure injection.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStockCache {
    entries: Arc<Mutex<HashMap<StockKey, (StockSnapshot, Instant)>>>,
    failing: Arc<AtomicBool>,
    hanging: Arc<AtomicBool>,
    next_write_delay: Arc<Mutex<Option<Duration>>>,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    invalidations: Arc<AtomicUsize>,
}

impl InMemoryStockCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every cache call fail with `CacheError`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every cache call wait forever.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Hold the next `put` or `invalidate` for `delay` before it takes effect.
    ///
    /// Only the first write after this call is delayed, which lets a test
    /// make one writer's cache update land after a later writer's.
    pub fn delay_next_write(&self, delay: Duration) {
        *self.next_write_delay.lock().unwrap() = Some(delay);
    }

    /// Unexpired entry for a key, without counting a read.
    #[must_use]
    pub fn cached(&self, key: &StockKey) -> Option<StockSnapshot> {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(snapshot, _)| snapshot.clone())
    }

    /// Place a snapshot directly, e.g. a stale one.
    pub fn insert(&self, snapshot: StockSnapshot, ttl: Duration) {
        self.entries
            .lock()
            .unwrap()
            .insert(snapshot.key.clone(), (snapshot, Instant::now() + ttl));
    }

    /// Number of `get` calls.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `put` calls that stored an entry.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `invalidate` calls that took effect.
    #[must_use]
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    async fn stall(&self, write: bool) {
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if write {
            let delay = self.next_write_delay.lock().unwrap().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn check_failing(&self) -> Result<(), StockError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StockError::CacheError("cache unavailable".to_string()));
        }
        Ok(())
    }
}

impl StockCache for InMemoryStockCache {
    fn get<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, Option<StockSnapshot>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.stall(false).await;
            self.check_failing()?;
            Ok(self.cached(key))
        })
    }

    fn put<'a>(&'a self, snapshot: &'a StockSnapshot, ttl: Duration) -> StockFuture<'a, ()> {
        Box::pin(async move {
            self.stall(true).await;
            self.check_failing()?;
            self.insert(snapshot.clone(), ttl);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn invalidate<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, ()> {
        Box::pin(async move {
            self.stall(true).await;
            self.check_failing()?;
            self.entries.lock().unwrap().remove(key);
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
