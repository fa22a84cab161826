//! Redis adapters for the stock control engine.
//!
//! - [`RedisLockCoordinator`]: per-key distributed lock with `SET NX PX` and a
//!   Lua compare-and-delete release
//! - [`RedisStockCache`]: JSON snapshot mirror with `SET EX`, `GET` and `DEL`
//!
//! Both share one `ConnectionManager`, which reconnects on its own and is
//! cheap to clone.
//!
//! # Example
//!
//! ```no_run
//! use stock_control_redis::{RedisLockCoordinator, RedisStockCache, connect};
//!
//! # async fn example() -> stock_control_core::Result<()> {
//! let conn = connect("redis://127.0.0.1:6379").await?;
//! let locks = RedisLockCoordinator::new(conn.clone());
//! let cache = RedisStockCache::new(conn);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod cache;
pub mod lock;

pub use cache::RedisStockCache;
pub use lock::RedisLockCoordinator;

use redis::Client;
use redis::aio::ConnectionManager;
use stock_control_core::StockError;

/// Open a managed connection.
///
/// # Connection URL Format
///
/// - TCP: `redis://[:password@]host[:port][/database]`
/// - TLS: `rediss://[:password@]host[:port][/database]`
///
/// # Errors
///
/// Returns [`StockError::LockAcquisitionFailed`] if the URL is malformed or
/// the server cannot be reached; without Redis no lock can be taken.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, StockError> {
    let client = Client::open(redis_url).map_err(|e| {
        StockError::LockAcquisitionFailed(format!("Failed to create Redis client: {e}"))
    })?;

    let conn = ConnectionManager::new(client).await.map_err(|e| {
        StockError::LockAcquisitionFailed(format!("Failed to create Redis connection manager: {e}"))
    })?;

    tracing::info!("Redis connection manager initialized");
    Ok(conn)
}
