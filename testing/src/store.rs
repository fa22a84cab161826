//! In-memory stock store.
//!
//! A `HashMap`-backed [`StockStore`] for fast, deterministic tests. Each
//! `apply_change` runs under one mutex, which plays the role of the row lock.
//! [`InMemoryStockStore::with_write_delay`] removes that guarantee on purpose
//! to reproduce lost updates in a store that is not protected by a lock.
//!
//! Like a database transaction, the work before commit is bounded by the
//! caller's timeout and the commit itself is not. Delays injected with
//! [`InMemoryStockStore::with_ack_delay`] land after the commit, modelling a
//! database that committed but answered late.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned mutex

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stock_control_core::environment::{Clock, SystemClock};
use stock_control_core::store::StockStore;
use stock_control_core::{
    CommittedChange, StockChange, StockError, StockFuture, StockKey, StockLevels, StockMovement,
    StockRecord, Warehouse, WarehouseId,
};

#[derive(Debug, Default)]
struct State {
    records: HashMap<StockKey, StockRecord>,
    movements: Vec<StockMovement>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    next_record_id: i64,
    next_movement_id: i64,
}

impl State {
    fn create_record(&mut self, key: &StockKey, at: DateTime<Utc>) -> &mut StockRecord {
        let next_id = &mut self.next_record_id;
        self.records.entry(key.clone()).or_insert_with(|| {
            *next_id += 1;
            StockRecord {
                id: *next_id,
                sku_id: key.sku_id.clone(),
                warehouse_id: key.warehouse_id.clone(),
                quantity_on_hand: 0,
                quantity_reserved: 0,
                quantity_available: 0,
                created_at: at,
                updated_at: at,
            }
        })
    }

    fn commit(
        &mut self,
        key: &StockKey,
        change: &StockChange,
        levels: StockLevels,
        at: DateTime<Utc>,
    ) -> Result<CommittedChange, StockError> {
        let applied = change.apply(key, levels)?;

        let record = self
            .records
            .get_mut(key)
            .ok_or_else(|| StockError::StockNotFound(key.clone()))?;
        record.set_levels(applied.levels, at);
        let record = record.clone();

        self.next_movement_id += 1;
        let movement = StockMovement {
            id: self.next_movement_id,
            stock_record_id: record.id,
            movement_type: applied.movement.movement_type,
            quantity_delta: applied.movement.quantity_delta,
            reference: applied.movement.reference,
            reason: applied.movement.reason,
            operator: applied.movement.operator,
            on_hand_after: applied.movement.on_hand_after,
            reserved_after: applied.movement.reserved_after,
            created_at: at,
        };
        self.movements.push(movement.clone());

        Ok(CommittedChange { record, movement })
    }

    fn movements_for(&self, key: &StockKey) -> Vec<StockMovement> {
        let Some(record) = self.records.get(key) else {
            return Vec::new();
        };
        self.movements
            .iter()
            .filter(|m| m.stock_record_id == record.id)
            .cloned()
            .collect()
    }
}

/// In-memory [`StockStore`].
///
/// # Example
///
/// ```
/// use stock_control_testing::InMemoryStockStore;
/// use stock_control_core::{StockKey, StockStore};
///
/// # async fn example() -> stock_control_core::Result<()> {
/// let store = InMemoryStockStore::new();
/// let key = StockKey::new("SKU-1", "WH-1");
/// store.seed(&key, 10);
///
/// let record = store.get_record(&key).await?;
/// assert_eq!(record.map(|r| r.quantity_available), Some(10));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryStockStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
    write_delay: Option<Duration>,
    commit_delay: Option<Duration>,
    ack_delay: Option<Duration>,
    failing: Arc<AtomicBool>,
    applies: Arc<AtomicUsize>,
}

impl InMemoryStockStore {
    /// Create an empty store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store with an injected clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
            write_delay: None,
            commit_delay: None,
            ack_delay: None,
            failing: Arc::new(AtomicBool::new(false)),
            applies: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Split every change into read, sleep, write with no lock held in
    /// between.
    ///
    /// Concurrent changes to one key then interleave and lose updates unless
    /// something outside the store serializes them.
    #[must_use]
    pub const fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Sleep before every change, without touching state, to make the
    /// transaction slow.
    #[must_use]
    pub const fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    /// Sleep after every commit before answering.
    ///
    /// The change is durable when the delay starts, so a caller that gives up
    /// during it sees a failure for a write that happened.
    #[must_use]
    pub const fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = Some(delay);
        self
    }

    /// Make every subsequent `apply_change` fail with `TransactionFailed`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `apply_change` calls that reached the store.
    #[must_use]
    pub fn apply_count(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    /// Insert a warehouse and a record with `on_hand` units, bypassing the
    /// ledger except for one inbound movement, so reconciliation holds.
    pub fn seed(&self, key: &StockKey, on_hand: i64) {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        state
            .warehouses
            .entry(key.warehouse_id.clone())
            .or_insert_with(|| Warehouse::new(key.warehouse_id.clone(), "Test warehouse", ""));
        let levels = state.create_record(key, now).levels();
        if on_hand > 0 {
            let change = StockChange::Receive {
                quantity: on_hand,
                reference: "seed".to_string(),
            };
            state.commit(key, &change, levels, now).unwrap();
        }
    }

    /// Overwrite the stored quantities without writing a movement.
    ///
    /// Used to simulate corrupted rows and ledger drift.
    pub fn overwrite_levels(&self, key: &StockKey, levels: StockLevels) {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.records.get_mut(key) {
            record.set_levels(levels, now);
        }
    }

    /// Current record, if any.
    #[must_use]
    pub fn record(&self, key: &StockKey) -> Option<StockRecord> {
        self.state.lock().unwrap().records.get(key).cloned()
    }

    /// Every movement for a key, oldest first.
    #[must_use]
    pub fn movements(&self, key: &StockKey) -> Vec<StockMovement> {
        self.state.lock().unwrap().movements_for(key)
    }

    fn check_failing(&self) -> Result<(), StockError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StockError::TransactionFailed(
                "injected store failure".to_string(),
            ));
        }
        Ok(())
    }

    fn read_levels(&self, key: &StockKey, change: &StockChange) -> Result<StockLevels, StockError> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        lock_row(&mut state, key, change, now)
    }

    async fn apply(
        &self,
        key: &StockKey,
        change: &StockChange,
        timeout: Duration,
    ) -> Result<CommittedChange, StockError> {
        self.applies.fetch_add(1, Ordering::SeqCst);

        let prepared = tokio::time::timeout(timeout, self.prepare(key, change))
            .await
            .map_err(|_elapsed| StockError::TransactionTimeout {
                key: key.clone(),
                timeout,
            })??;

        let now = self.clock.now();
        let committed = {
            let mut state = self.state.lock().unwrap();
            let levels = match prepared {
                Some(levels) => levels,
                // Read and write under one guard: the in-memory row lock.
                None => lock_row(&mut state, key, change, now)?,
            };
            state.commit(key, change, levels, now)?
        };

        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(committed)
    }

    /// Everything before the commit. Returns levels read early when a write
    /// delay splits the read from the write.
    async fn prepare(
        &self,
        key: &StockKey,
        change: &StockChange,
    ) -> Result<Option<StockLevels>, StockError> {
        if let Some(delay) = self.commit_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_failing()?;

        let Some(delay) = self.write_delay else {
            return Ok(None);
        };
        let levels = self.read_levels(key, change)?;
        tokio::time::sleep(delay).await;
        Ok(Some(levels))
    }
}

/// Load the levels a change will be applied to, creating the record for an
/// intake.
fn lock_row(
    state: &mut State,
    key: &StockKey,
    change: &StockChange,
    now: DateTime<Utc>,
) -> Result<StockLevels, StockError> {
    if !state.records.contains_key(key) {
        if !change.creates_record() {
            return Err(StockError::StockNotFound(key.clone()));
        }
        if !state.warehouses.contains_key(&key.warehouse_id) {
            return Err(StockError::WarehouseNotFound(key.warehouse_id.clone()));
        }
        state.create_record(key, now);
    }

    let record = state
        .records
        .get(key)
        .ok_or_else(|| StockError::StockNotFound(key.clone()))?;
    record.check_invariant()?;
    Ok(record.levels())
}

impl Default for InMemoryStockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StockStore for InMemoryStockStore {
    fn get_record<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, Option<StockRecord>> {
        Box::pin(async move { Ok(self.record(key)) })
    }

    fn apply_change<'a>(
        &'a self,
        key: &'a StockKey,
        change: &'a StockChange,
        timeout: Duration,
    ) -> StockFuture<'a, CommittedChange> {
        Box::pin(self.apply(key, change, timeout))
    }

    fn list_low_stock(&self, threshold: i64, limit: i64) -> StockFuture<'_, Vec<StockRecord>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            let mut records: Vec<StockRecord> = state
                .records
                .values()
                .filter(|r| r.quantity_available < threshold)
                .cloned()
                .collect();
            records.sort_by_key(|r| (r.quantity_available, r.id));
            records.truncate(usize::try_from(limit).unwrap_or(0));
            Ok(records)
        })
    }

    fn list_records(
        &self,
        after_id: Option<i64>,
        limit: i64,
    ) -> StockFuture<'_, Vec<StockRecord>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            let mut records: Vec<StockRecord> = state
                .records
                .values()
                .filter(|r| after_id.is_none_or(|after| r.id > after))
                .cloned()
                .collect();
            records.sort_by_key(|r| r.id);
            records.truncate(usize::try_from(limit).unwrap_or(0));
            Ok(records)
        })
    }

    fn list_movements<'a>(
        &'a self,
        key: &'a StockKey,
        limit: i64,
    ) -> StockFuture<'a, Vec<StockMovement>> {
        Box::pin(async move {
            let mut movements = self.movements(key);
            movements.reverse();
            movements.truncate(usize::try_from(limit).unwrap_or(0));
            Ok(movements)
        })
    }

    fn replay_movements<'a>(&'a self, key: &'a StockKey) -> StockFuture<'a, Vec<StockMovement>> {
        Box::pin(async move { Ok(self.movements(key)) })
    }

    fn upsert_warehouse<'a>(&'a self, warehouse: &'a Warehouse) -> StockFuture<'a, ()> {
        Box::pin(async move {
            self.state
                .lock()
                .unwrap()
                .warehouses
                .insert(warehouse.id.clone(), warehouse.clone());
            Ok(())
        })
    }

    fn get_warehouse<'a>(&'a self, id: &'a WarehouseId) -> StockFuture<'a, Option<Warehouse>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().warehouses.get(id).cloned()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TX: Duration = Duration::from_secs(1);

    fn key() -> StockKey {
        StockKey::new("SKU-1", "WH-1")
    }

    #[tokio::test]
    async fn seed_writes_one_inbound_movement() {
        let store = InMemoryStockStore::new();
        store.seed(&key(), 10);

        let movements = store.movements(&key());
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].quantity_delta, 10);
        assert_eq!(store.record(&key()).unwrap().quantity_available, 10);
    }

    #[tokio::test]
    async fn missing_record_is_not_created_by_reserve() {
        let store = InMemoryStockStore::new();
        let change = StockChange::Reserve {
            quantity: 1,
            reference: "order-1".to_string(),
        };

        let result = store.apply_change(&key(), &change, TX).await;

        assert!(matches!(result, Err(StockError::StockNotFound(_))));
        assert!(store.record(&key()).is_none());
    }

    #[tokio::test]
    async fn receive_requires_known_warehouse() {
        let store = InMemoryStockStore::new();
        let change = StockChange::Receive {
            quantity: 1,
            reference: "po-1".to_string(),
        };

        let result = store.apply_change(&key(), &change, TX).await;
        assert!(matches!(result, Err(StockError::WarehouseNotFound(_))));

        store
            .upsert_warehouse(&Warehouse::new("WH-1", "Main", "Berlin"))
            .await
            .unwrap();
        let committed = store.apply_change(&key(), &change, TX).await.unwrap();
        assert_eq!(committed.record.quantity_on_hand, 1);
    }

    #[tokio::test]
    async fn rejected_change_writes_nothing() {
        let store = InMemoryStockStore::new();
        store.seed(&key(), 3);
        let change = StockChange::Reserve {
            quantity: 4,
            reference: "order-1".to_string(),
        };

        let result = store.apply_change(&key(), &change, TX).await;

        assert!(matches!(result, Err(StockError::InsufficientStock { .. })));
        assert_eq!(store.movements(&key()).len(), 1);
        assert_eq!(store.record(&key()).unwrap().quantity_reserved, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_work_before_commit_times_out_with_nothing_written() {
        let store = InMemoryStockStore::new().with_commit_delay(Duration::from_secs(5));
        store.seed(&key(), 10);
        let change = StockChange::Reserve {
            quantity: 2,
            reference: "order-1".to_string(),
        };

        let result = store
            .apply_change(&key(), &change, Duration::from_millis(100))
            .await;

        assert!(matches!(result, Err(StockError::TransactionTimeout { .. })));
        assert_eq!(store.record(&key()).unwrap().quantity_reserved, 0);
        assert_eq!(store.movements(&key()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_acknowledgement_does_not_undo_the_commit() {
        let store = InMemoryStockStore::new().with_ack_delay(Duration::from_secs(1));
        store.seed(&key(), 10);
        let change = StockChange::Reserve {
            quantity: 5,
            reference: "order-1".to_string(),
        };

        // The ack delay is outside the pre-commit bound.
        let committed = store
            .apply_change(&key(), &change, Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(committed.record.quantity_reserved, 5);
        assert_eq!(store.record(&key()).unwrap().quantity_reserved, 5);
    }

    #[tokio::test]
    async fn records_page_by_id() {
        let store = InMemoryStockStore::new();
        for sku in ["SKU-1", "SKU-2", "SKU-3"] {
            store.seed(&StockKey::new(sku, "WH-1"), 1);
        }

        let first = store.list_records(None, 2).await.unwrap();
        let last_id = first.last().unwrap().id;
        let second = store.list_records(Some(last_id), 2).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(second[0].id > last_id);
    }
}
