//! Redis distributed lock.
//!
//! Acquisition is a single `SET key token NX PX ttl`. Release runs a Lua
//! script that deletes the key only while it still holds the caller's token,
//! so a holder whose lock already expired never frees a successor's lock.

use redis::Script;
use redis::aio::ConnectionManager;
use std::time::Duration;
use stock_control_core::{
    LockCoordinator, LockToken, ReleaseOutcome, StockError, StockFuture, StockKey,
};

const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
";

/// [`LockCoordinator`] backed by a single Redis instance.
///
/// Keys are `stock:lock:{sku}:{warehouse}` (see [`StockKey::lock_key`]).
#[derive(Clone)]
pub struct RedisLockCoordinator {
    conn_manager: ConnectionManager,
    release_script: Script,
}

impl RedisLockCoordinator {
    /// Build over an existing managed connection.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    /// Connect to `redis_url` and build a coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::LockAcquisitionFailed`] if Redis is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, StockError> {
        crate::connect(redis_url).await.map(Self::new)
    }
}

/// TTL in whole milliseconds, at least 1 so `PX` never rejects it.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn unavailable(action: &str, key: &StockKey, e: &redis::RedisError) -> StockError {
    StockError::LockAcquisitionFailed(format!("Failed to {action} lock for {key}: {e}"))
}

impl LockCoordinator for RedisLockCoordinator {
    fn try_acquire<'a>(
        &'a self,
        key: &'a StockKey,
        token: &'a LockToken,
        ttl: Duration,
    ) -> StockFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            // Nil reply means another token holds the key.
            let reply: Option<String> = redis::cmd("SET")
                .arg(key.lock_key())
                .arg(token.as_str())
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable("acquire", key, &e))?;

            let acquired = reply.is_some();
            tracing::trace!(%key, acquired, "Lock acquisition attempt");
            Ok(acquired)
        })
    }

    fn release<'a>(
        &'a self,
        key: &'a StockKey,
        token: &'a LockToken,
    ) -> StockFuture<'a, ReleaseOutcome> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let deleted: i64 = self
                .release_script
                .key(key.lock_key())
                .arg(token.as_str())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| unavailable("release", key, &e))?;

            if deleted == 1 {
                Ok(ReleaseOutcome::Released)
            } else {
                tracing::debug!(%key, "Lock no longer held by this token at release");
                Ok(ReleaseOutcome::NotHeld)
            }
        })
    }
}
