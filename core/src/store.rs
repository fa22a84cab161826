//! Stock store trait: durable stock rows plus the movement ledger.
//!
//! # Design
//!
//! The store owns the transaction. [`StockStore::apply_change`] must, in one
//! transaction:
//!
//! 1. read the record for the key with a row-level lock,
//! 2. call [`StockChange::apply`] on the freshly read levels,
//! 3. write the new levels and append the ledger entry,
//! 4. commit.
//!
//! If any step fails the transaction is rolled back and nothing is written.
//!
//! Steps 1 to 3 are bounded by the caller's timeout; on expiry the store rolls
//! back and returns `TransactionTimeout`. The commit in step 4 is never
//! abandoned by the store itself, so a `TransactionTimeout` always means
//! nothing was written.
//!
//! # Implementations
//!
//! - `PostgresStockStore` (in `stock-control-postgres`): production, `SELECT ... FOR UPDATE`
//! - `InMemoryStockStore` (in `stock-control-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return [`StockFuture`] instead of using `async fn` so the engine can
//! hold stores as `Arc<dyn StockStore>`.

use crate::StockFuture;
use std::time::Duration;
use crate::change::StockChange;
use crate::model::{StockKey, StockMovement, StockRecord, Warehouse, WarehouseId};

/// Maximum number of rows a list query returns.
pub const MAX_LIST_LIMIT: i64 = 1000;

/// Default number of rows a list query returns.
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Clamp a caller-supplied limit to `[1, MAX_LIST_LIMIT]`.
#[must_use]
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// The record and ledger entry written by one committed change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedChange {
    /// Record state after commit.
    pub record: StockRecord,
    /// Ledger entry appended in the same transaction.
    pub movement: StockMovement,
}

/// Durable storage for stock records and their movement ledger.
///
/// Implementations must be `Send + Sync`; the engine shares one store across
/// all concurrent callers.
pub trait StockStore: Send + Sync {
    /// Load the record for a key without locking.
    ///
    /// # Errors
    ///
    /// - `TransactionFailed`: store query failed
    fn get_record<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, Option<StockRecord>>;

    /// Apply a change under a row lock and append its ledger entry, atomically.
    ///
    /// Changes for which [`StockChange::creates_record`] is true insert an
    /// empty record first if none exists.
    ///
    /// # Errors
    ///
    /// - `StockNotFound`: no record and the change does not create one
    /// - `WarehouseNotFound`: intake for an unknown warehouse
    /// - any error from [`StockChange::apply`]
    /// - `LockTimeout`: the row lock was not granted in time
    /// - `TransactionTimeout`: the work before commit exceeded `timeout`,
    ///   nothing was written
    /// - `TransactionFailed`: store error, nothing was written
    fn apply_change<'a>(
        &'a self,
        key: &'a StockKey,
        change: &'a StockChange,
        timeout: Duration,
    ) -> StockFuture<'a, CommittedChange>;

    /// Records whose available quantity is below `threshold`, lowest first.
    ///
    /// # Errors
    ///
    /// - `TransactionFailed`: store query failed
    fn list_low_stock(&self, threshold: i64, limit: i64) -> StockFuture<'_, Vec<StockRecord>>;

    /// Records ordered by id, at most `limit`, starting after `after_id`.
    ///
    /// Passing the last id of one page as `after_id` yields the next page.
    ///
    /// # Errors
    ///
    /// - `TransactionFailed`: store query failed
    fn list_records(&self, after_id: Option<i64>, limit: i64)
    -> StockFuture<'_, Vec<StockRecord>>;

    /// Ledger entries for a key, most recent first.
    ///
    /// # Errors
    ///
    /// - `TransactionFailed`: store query failed
    fn list_movements<'a>(
        &'a self,
        key: &'a StockKey,
        limit: i64,
    ) -> StockFuture<'a, Vec<StockMovement>>;

    /// Every ledger entry for a key in creation order, for reconciliation.
    ///
    /// # Errors
    ///
    /// - `TransactionFailed`: store query failed
    fn replay_movements<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, Vec<StockMovement>>;

    /// Insert or update a warehouse reference entity.
    ///
    /// # Errors
    ///
    /// - `TransactionFailed`: store query failed
    fn upsert_warehouse<'a>(&'a self, warehouse: &'a Warehouse) -> StockFuture<'a, ()>;

    /// Look up a warehouse.
    ///
    /// # Errors
    ///
    /// - `TransactionFailed`: store query failed
    fn get_warehouse<'a>(&'a self, id: &'a WarehouseId) -> StockFuture<'a, Option<Warehouse>>;
}
