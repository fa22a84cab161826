//! The stock engine: one entry point per stock operation.
//!
//! Every mutation follows the same path:
//!
//! ```text
//! validate ─▶ acquire lock ─▶ store.apply_change (row lock, write, ledger, commit)
//!                                  │
//!                                  ▼
//!                            release lock ─▶ invalidate cache entry
//! ```
//!
//! Every call to a backend is bounded: lock calls by `lock_wait` and
//! `release_timeout`, the store by `transaction_timeout` before commit and
//! `commit_timeout` after it, the cache by `cache_timeout`. A store call that
//! outlives both is reported as [`StockError::CommitUnconfirmed`], which is
//! never retried because the write may have landed.
//!
//! Mutations drop the cached snapshot instead of writing the new one. Deletes
//! commute, so writers finishing out of order cannot leave an older snapshot
//! behind; the next [`StockEngine::get_stock`] repopulates the entry.
//!
//! The engine holds no state of its own beyond its injected dependencies, so
//! cloning it is cheap and clones share the same store, lock coordinator and
//! cache.

use crate::config::EngineConfig;
use crate::lock;
use crate::metrics::{CACHE_ERRORS, CACHE_HITS, CACHE_MISSES, OUTCOME_OK, record_operation};
use crate::retry::{RetryPolicy, retry_with_predicate};
use std::sync::Arc;
use stock_control_core::StockFuture;
use stock_control_core::store::clamp_limit;
use stock_control_core::{
    CommittedChange, LockCoordinator, ReconciliationReport, Result, StockCache, StockChange,
    StockError, StockKey, StockMovement, StockRecord, StockSnapshot, StockStore, Warehouse,
    WarehouseId,
};

/// Orchestrates the store, the lock coordinator and the cache.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use stock_control_core::{NoCache, StockKey};
/// use stock_control_runtime::{EngineConfig, StockEngine};
/// # use stock_control_core::{LockCoordinator, StockStore};
///
/// # async fn example(
/// #     store: Arc<dyn StockStore>,
/// #     locks: Arc<dyn LockCoordinator>,
/// # ) -> stock_control_core::Result<()> {
/// let engine = StockEngine::new(store, locks, Arc::new(NoCache), EngineConfig::default());
///
/// let key = StockKey::new("SKU-1", "WH-1");
/// let snapshot = engine.reserve(&key, 5, "order-1").await?;
/// assert!(snapshot.available() >= 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StockEngine {
    store: Arc<dyn StockStore>,
    locks: Arc<dyn LockCoordinator>,
    cache: Arc<dyn StockCache>,
    config: EngineConfig,
    retry: Option<RetryPolicy>,
}

impl StockEngine {
    /// Create an engine from its dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn StockStore>,
        locks: Arc<dyn LockCoordinator>,
        cache: Arc<dyn StockCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            locks,
            cache,
            config,
            retry: None,
        }
    }

    /// Retry mutations that fail with a retryable error.
    ///
    /// Only lock contention, coordinator outages and transaction timeouts are
    /// retried. Rejections such as `InsufficientStock` never are.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Timing configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current snapshot of a stock position.
    ///
    /// Served from the cache when possible. Cache failures and slow cache
    /// calls degrade to a store read.
    ///
    /// # Errors
    ///
    /// - [`StockError::StockNotFound`]: no record for the key
    /// - [`StockError::InvariantViolation`]: the stored row is corrupt
    /// - [`StockError::TransactionFailed`]: store error
    #[tracing::instrument(skip(self), fields(sku = %key.sku_id, warehouse = %key.warehouse_id))]
    pub async fn get_stock(&self, key: &StockKey) -> Result<StockSnapshot> {
        match self.cached(self.cache.get(key)).await {
            Ok(Some(snapshot)) => {
                metrics::counter!(CACHE_HITS).increment(1);
                record_operation("get", OUTCOME_OK);
                return Ok(snapshot);
            }
            Ok(None) => metrics::counter!(CACHE_MISSES).increment(1),
            Err(error) => {
                metrics::counter!(CACHE_ERRORS).increment(1);
                tracing::warn!(error = %error, "Cache read failed, reading from store");
            }
        }

        let result = self.load_snapshot(key).await;
        record_operation("get", outcome(&result));

        let snapshot = result?;
        if let Err(error) = self
            .cached(self.cache.put(&snapshot, self.config.cache_ttl))
            .await
        {
            metrics::counter!(CACHE_ERRORS).increment(1);
            tracing::warn!(error = %error, "Cache repopulation failed");
        }

        Ok(snapshot)
    }

    async fn load_snapshot(&self, key: &StockKey) -> Result<StockSnapshot> {
        let record = self
            .store
            .get_record(key)
            .await?
            .ok_or_else(|| StockError::StockNotFound(key.clone()))?;
        record.check_invariant()?;
        Ok(record.snapshot())
    }

    /// Soft-allocate `quantity` units to an order.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`]: `quantity <= 0`
    /// - [`StockError::StockNotFound`]: no record for the key
    /// - [`StockError::InsufficientStock`]: fewer than `quantity` units available
    /// - lock, timeout and store errors, see [`StockError`]
    #[tracing::instrument(skip(self), fields(sku = %key.sku_id, warehouse = %key.warehouse_id))]
    pub async fn reserve(
        &self,
        key: &StockKey,
        quantity: i64,
        reference: &str,
    ) -> Result<StockSnapshot> {
        let change = StockChange::Reserve {
            quantity,
            reference: reference.to_string(),
        };
        self.mutate(key, &change).await
    }

    /// Return reserved units to the available pool.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`]: `quantity <= 0`
    /// - [`StockError::StockNotFound`]: no record for the key
    /// - [`StockError::ReservedUnderflow`]: fewer than `quantity` units reserved
    /// - lock, timeout and store errors, see [`StockError`]
    #[tracing::instrument(skip(self), fields(sku = %key.sku_id, warehouse = %key.warehouse_id))]
    pub async fn release(
        &self,
        key: &StockKey,
        quantity: i64,
        reference: &str,
    ) -> Result<StockSnapshot> {
        let change = StockChange::Release {
            quantity,
            reference: reference.to_string(),
        };
        self.mutate(key, &change).await
    }

    /// Commit a reservation: the units leave on-hand stock.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`]: `quantity <= 0`
    /// - [`StockError::StockNotFound`]: no record for the key
    /// - [`StockError::InsufficientStock`]: fewer than `quantity` units reserved
    /// - lock, timeout and store errors, see [`StockError`]
    #[tracing::instrument(skip(self), fields(sku = %key.sku_id, warehouse = %key.warehouse_id))]
    pub async fn deduct(
        &self,
        key: &StockKey,
        quantity: i64,
        reference: &str,
    ) -> Result<StockSnapshot> {
        let change = StockChange::Deduct {
            quantity,
            reference: reference.to_string(),
        };
        self.mutate(key, &change).await
    }

    /// Put previously deducted units back on hand.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`]: `quantity <= 0` or overflow
    /// - [`StockError::StockNotFound`]: no record for the key
    /// - lock, timeout and store errors, see [`StockError`]
    #[tracing::instrument(skip(self), fields(sku = %key.sku_id, warehouse = %key.warehouse_id))]
    pub async fn restore(
        &self,
        key: &StockKey,
        quantity: i64,
        reference: &str,
    ) -> Result<StockSnapshot> {
        let change = StockChange::Restore {
            quantity,
            reference: reference.to_string(),
        };
        self.mutate(key, &change).await
    }

    /// Receive goods, creating the record on first intake.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`]: `quantity <= 0` or overflow
    /// - [`StockError::WarehouseNotFound`]: unknown warehouse
    /// - lock, timeout and store errors, see [`StockError`]
    #[tracing::instrument(skip(self), fields(sku = %key.sku_id, warehouse = %key.warehouse_id))]
    pub async fn receive(
        &self,
        key: &StockKey,
        quantity: i64,
        reference: &str,
    ) -> Result<StockSnapshot> {
        let change = StockChange::Receive {
            quantity,
            reference: reference.to_string(),
        };
        self.mutate(key, &change).await
    }

    /// Manually correct on-hand stock by `delta`.
    ///
    /// A negative delta may not exceed the available quantity, so reserved
    /// units are never adjusted away.
    ///
    /// # Errors
    ///
    /// - [`StockError::InvalidQuantity`]: `delta == 0` or overflow
    /// - [`StockError::StockNotFound`]: no record for the key
    /// - [`StockError::InsufficientStock`]: `-delta` exceeds available
    /// - lock, timeout and store errors, see [`StockError`]
    #[tracing::instrument(skip(self), fields(sku = %key.sku_id, warehouse = %key.warehouse_id))]
    pub async fn adjust(
        &self,
        key: &StockKey,
        delta: i64,
        reason: &str,
        operator: &str,
    ) -> Result<StockSnapshot> {
        let change = StockChange::Adjust {
            delta,
            reason: reason.to_string(),
            operator: operator.to_string(),
        };
        self.mutate(key, &change).await
    }

    /// Apply an arbitrary change and return the committed record and ledger entry.
    ///
    /// The named operations above are thin wrappers over this method.
    ///
    /// # Errors
    ///
    /// Any [`StockError`] the change can produce.
    #[tracing::instrument(
        skip(self, change),
        fields(
            sku = %key.sku_id,
            warehouse = %key.warehouse_id,
            operation = change.operation(),
        )
    )]
    pub async fn apply(&self, key: &StockKey, change: &StockChange) -> Result<CommittedChange> {
        let operation = change.operation();
        let result = self.apply_with_retry(key, change).await;
        record_operation(operation, outcome(&result));

        match &result {
            Ok(committed) => tracing::info!(
                movement_id = committed.movement.id,
                reference = %committed.movement.reference,
                on_hand = committed.record.quantity_on_hand,
                reserved = committed.record.quantity_reserved,
                available = committed.record.quantity_available,
                "Stock {operation} committed"
            ),
            Err(error) if error.is_rejection() => {
                tracing::warn!(error = %error, "Stock {operation} rejected");
            }
            Err(error) => tracing::error!(error = %error, "Stock {operation} failed"),
        }

        result
    }

    async fn mutate(&self, key: &StockKey, change: &StockChange) -> Result<StockSnapshot> {
        self.apply(key, change)
            .await
            .map(|committed| committed.record.snapshot())
    }

    async fn apply_with_retry(
        &self,
        key: &StockKey,
        change: &StockChange,
    ) -> Result<CommittedChange> {
        // Rejected before any lock is taken.
        change.validate()?;

        match &self.retry {
            Some(policy) => {
                retry_with_predicate(
                    policy.clone(),
                    || self.execute(key, change),
                    StockError::is_retryable,
                )
                .await
            }
            None => self.execute(key, change).await,
        }
    }

    async fn execute(&self, key: &StockKey, change: &StockChange) -> Result<CommittedChange> {
        let guard = self.acquire(key).await?;

        // The store bounds its own pre-commit work by `transaction_timeout`;
        // this outer bound only fires when the commit itself stalls.
        let waited = self.config.store_wait();
        let result = match tokio::time::timeout(
            waited,
            self.store
                .apply_change(key, change, self.config.transaction_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::error!(key = %key, ?waited, "Store did not confirm commit; outcome unknown");
                Err(StockError::CommitUnconfirmed {
                    key: key.clone(),
                    waited,
                })
            }
        };

        guard.release().await;

        if matches!(result, Ok(_) | Err(StockError::CommitUnconfirmed { .. })) {
            self.invalidate_cached(key).await;
        }
        result
    }

    async fn acquire(&self, key: &StockKey) -> Result<lock::LockGuard> {
        lock::acquire(&self.locks, key, &self.config).await
    }

    async fn invalidate_cached(&self, key: &StockKey) {
        if let Err(error) = self.cached(self.cache.invalidate(key)).await {
            metrics::counter!(CACHE_ERRORS).increment(1);
            tracing::warn!(
                key = %key,
                error = %error,
                "Cache invalidation failed; entry expires after its TTL"
            );
        }
    }

    async fn cached<T>(&self, call: StockFuture<'_, T>) -> Result<T> {
        let limit = self.config.cache_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_elapsed) => Err(StockError::CacheError(format!(
                "cache call timed out after {limit:?}"
            ))),
        }
    }

    /// Records with fewer than `threshold` units available, lowest first.
    ///
    /// # Errors
    ///
    /// - [`StockError::TransactionFailed`]: store error
    #[tracing::instrument(skip(self))]
    pub async fn list_low_stock(
        &self,
        threshold: i64,
        limit: Option<i64>,
    ) -> Result<Vec<StockRecord>> {
        self.store
            .list_low_stock(threshold, clamp_limit(limit))
            .await
    }

    /// Records in id order, starting after `after_id`.
    ///
    /// Pass the id of the last record of a page to fetch the next one; a page
    /// shorter than the limit is the last.
    ///
    /// # Errors
    ///
    /// - [`StockError::TransactionFailed`]: store error
    pub async fn list_records(
        &self,
        after_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<StockRecord>> {
        self.store.list_records(after_id, clamp_limit(limit)).await
    }

    /// Ledger entries for a key, most recent first.
    ///
    /// # Errors
    ///
    /// - [`StockError::TransactionFailed`]: store error
    #[tracing::instrument(skip(self), fields(sku = %key.sku_id, warehouse = %key.warehouse_id))]
    pub async fn list_movements(
        &self,
        key: &StockKey,
        limit: Option<i64>,
    ) -> Result<Vec<StockMovement>> {
        self.store.list_movements(key, clamp_limit(limit)).await
    }

    /// Replay the ledger of a key and compare it with the stored on-hand
    /// quantity.
    ///
    /// Runs under the key's lock so no engine mutation commits between
    /// reading the record and reading the ledger.
    ///
    /// # Errors
    ///
    /// - [`StockError::StockNotFound`]: no record for the key
    /// - lock and store errors, see [`StockError`]
    #[tracing::instrument(skip(self), fields(sku = %key.sku_id, warehouse = %key.warehouse_id))]
    pub async fn reconcile(&self, key: &StockKey) -> Result<ReconciliationReport> {
        let guard = self.acquire(key).await?;
        let result = self.replay_ledger(key).await;
        guard.release().await;

        let report = result?;
        if report.is_consistent() {
            tracing::debug!(movements = report.movement_count, "Ledger reconciles");
        } else {
            tracing::error!(
                ledger_on_hand = report.ledger_on_hand,
                recorded_on_hand = report.recorded_on_hand,
                movements = report.movement_count,
                "Ledger does not reconcile with stock record"
            );
        }
        Ok(report)
    }

    async fn replay_ledger(&self, key: &StockKey) -> Result<ReconciliationReport> {
        let record = self
            .store
            .get_record(key)
            .await?
            .ok_or_else(|| StockError::StockNotFound(key.clone()))?;
        let movements = self.store.replay_movements(key).await?;
        Ok(ReconciliationReport::replay(&record, &movements))
    }

    /// Create or update a warehouse.
    ///
    /// # Errors
    ///
    /// - [`StockError::TransactionFailed`]: store error
    #[tracing::instrument(skip(self, warehouse), fields(warehouse = %warehouse.id))]
    pub async fn upsert_warehouse(&self, warehouse: &Warehouse) -> Result<()> {
        self.store.upsert_warehouse(warehouse).await
    }

    /// Look up a warehouse.
    ///
    /// # Errors
    ///
    /// - [`StockError::TransactionFailed`]: store error
    pub async fn get_warehouse(&self, id: &WarehouseId) -> Result<Option<Warehouse>> {
        self.store.get_warehouse(id).await
    }
}

const fn outcome<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => OUTCOME_OK,
        Err(error) => error.kind(),
    }
}
