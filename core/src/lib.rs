//! # Stock Control Core
//!
//! Domain types, error taxonomy and dependency seams for the stock control engine.
//!
//! The engine tracks physical stock per (SKU, warehouse) pair and serializes
//! every mutation of one pair behind a distributed lock plus a row lock.
//!
//! ## Core Concepts
//!
//! - **Stock record**: on-hand, reserved and available quantities for one key,
//!   with `available = on_hand - reserved` and all three non-negative
//! - **Stock change**: a pure description of one mutation; validated and
//!   applied against freshly locked levels
//! - **Movement**: an immutable ledger entry written in the same transaction
//! - **Seams**: [`StockStore`], [`LockCoordinator`], [`StockCache`] and
//!   [`environment::Clock`] are injected into the engine
//!
//! ## Crate Layout
//!
//! ```text
//! stock-control-core       this crate: types, errors, traits
//! stock-control-postgres   StockStore on PostgreSQL (sqlx)
//! stock-control-redis      LockCoordinator + StockCache on Redis
//! stock-control-runtime    StockEngine, batches, retry
//! stock-control-testing    in-memory implementations of every seam
//! stock-control-app        configuration, bootstrap, stock-reconcile binary
//! ```

#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;

pub mod cache;
pub mod change;
pub mod error;
pub mod lock;
pub mod model;
pub mod store;

pub use cache::{NoCache, StockCache};
pub use change::{AppliedChange, StockChange};
pub use error::{Result, StockError};
pub use lock::{LockCoordinator, LockToken, ReleaseOutcome};
pub use model::{
    MovementType, NewMovement, ReconciliationReport, SkuId, StockKey, StockLevels, StockMovement,
    StockRecord, StockSnapshot, Warehouse, WarehouseId,
};
pub use store::{CommittedChange, StockStore};

/// Boxed future returned by the dyn-compatible seam traits.
pub type StockFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Environment traits for dependency injection.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
