//! Snapshot cache trait.
//!
//! The cache mirrors committed [`StockSnapshot`]s to take read load off the
//! store for hot SKUs. It is an optimization only: the engine never validates
//! a mutation against cached values, drops the entry after every commit,
//! fills it only from store reads, and treats every cache error as a miss.

use crate::StockFuture;
use crate::model::{StockKey, StockSnapshot};
use std::time::Duration;

/// Read-through mirror of stock snapshots, invalidated on write.
pub trait StockCache: Send + Sync {
    /// Look up a snapshot.
    ///
    /// # Errors
    ///
    /// - `CacheError`: backend unavailable or entry undecodable
    fn get<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, Option<StockSnapshot>>;

    /// Store a snapshot under its key for `ttl`.
    ///
    /// # Errors
    ///
    /// - `CacheError`: backend unavailable
    fn put<'a>(&'a self, snapshot: &'a StockSnapshot, ttl: Duration) -> StockFuture<'a, ()>;

    /// Drop the entry for a key.
    ///
    /// # Errors
    ///
    /// - `CacheError`: backend unavailable
    fn invalidate<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, ()>;
}

/// Cache that stores nothing, for deployments with caching disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl StockCache for NoCache {
    fn get<'a>(&'a self, _key: &'a StockKey) -> StockFuture<'a, Option<StockSnapshot>> {
        Box::pin(async { Ok(None) })
    }

    fn put<'a>(&'a self, _snapshot: &'a StockSnapshot, _ttl: Duration) -> StockFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn invalidate<'a>(&'a self, _key: &'a StockKey) -> StockFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}
