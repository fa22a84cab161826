//! Redis snapshot cache.
//!
//! Snapshots are stored as JSON strings under `stock:snapshot:{sku}:{warehouse}`
//! with a TTL. An entry that fails to decode is reported as a cache error,
//! which the engine treats as a miss.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use stock_control_core::{StockCache, StockError, StockFuture, StockKey, StockSnapshot};

/// [`StockCache`] backed by Redis.
#[derive(Clone)]
pub struct RedisStockCache {
    conn_manager: ConnectionManager,
}

impl RedisStockCache {
    /// Build over an existing managed connection.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    /// Connect to `redis_url` and build a cache.
    ///
    /// # Errors
    ///
    /// Returns a [`StockError`] if Redis is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, StockError> {
        crate::connect(redis_url).await.map(Self::new)
    }
}

/// Expiry in whole seconds; `SET EX` needs at least 1.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn encode(snapshot: &StockSnapshot) -> Result<String, StockError> {
    serde_json::to_string(snapshot)
        .map_err(|e| StockError::CacheError(format!("Failed to serialize snapshot: {e}")))
}

fn decode(key: &StockKey, json: &str) -> Result<StockSnapshot, StockError> {
    serde_json::from_str(json).map_err(|e| {
        StockError::CacheError(format!("Failed to deserialize snapshot for {key}: {e}"))
    })
}

impl StockCache for RedisStockCache {
    fn get<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, Option<StockSnapshot>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let json: Option<String> = conn
                .get(key.cache_key())
                .await
                .map_err(|e| StockError::CacheError(format!("Redis GET failed: {e}")))?;

            json.map(|json| decode(key, &json)).transpose()
        })
    }

    fn put<'a>(&'a self, snapshot: &'a StockSnapshot, ttl: Duration) -> StockFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let json = encode(snapshot)?;

            let _: () = conn
                .set_ex(snapshot.key.cache_key(), json, ttl_secs(ttl))
                .await
                .map_err(|e| StockError::CacheError(format!("Redis SET failed: {e}")))?;

            tracing::trace!(key = %snapshot.key, "Snapshot cached");
            Ok(())
        })
    }

    fn invalidate<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let _: () = conn
                .del(key.cache_key())
                .await
                .map_err(|e| StockError::CacheError(format!("Redis DEL failed: {e}")))?;

            Ok(())
        })
    }
}
