//! Concurrency, locking and timeout behaviour of the engine.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::Arc;
use std::time::Duration;
use stock_control_core::{NoCache, StockError};
use stock_control_runtime::{EngineConfig, RetryPolicy, StockEngine};
use stock_control_testing::helpers::{assert_invariant, fast_config, key, levels};
use stock_control_testing::{InMemoryStockStore, PassThroughLockCoordinator, TestHarness, test_clock};

// ============================================================================
// Serialization per key
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    let h = TestHarness::with_config(fast_config().with_lock_wait(Duration::from_secs(10)));
    let k = key("SKU-HOT");
    h.store.seed(&k, 30);

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let engine = h.engine.clone();
            let k = k.clone();
            tokio::spawn(async move { engine.reserve(&k, 3, &format!("order-{i}")).await })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(snapshot) => {
                assert_invariant(&snapshot);
                succeeded += 1;
            }
            Err(StockError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(h.store.record(&k).unwrap().levels(), levels(30, 30, 0));
    assert_eq!(h.store.movements(&k).len(), 11);
    assert!(h.engine.reconcile(&k).await.unwrap().is_consistent());
}

#[tokio::test]
async fn lock_serializes_read_modify_write() {
    // The store interleaves on its own; only the lock keeps updates apart.
    let store = InMemoryStockStore::with_clock(Arc::new(test_clock()))
        .with_write_delay(Duration::from_millis(20));
    let h = TestHarness::with_store(store);
    let k = key("SKU-1");
    h.store.seed(&k, 10);

    let (first, second) = tokio::join!(
        h.engine.reserve(&k, 1, "order-1"),
        h.engine.reserve(&k, 1, "order-2"),
    );

    first.unwrap();
    second.unwrap();
    assert_eq!(h.store.record(&k).unwrap().levels(), levels(10, 2, 8));
    assert_eq!(h.locks.max_concurrent(), 1);
}

#[tokio::test]
async fn without_any_lock_updates_are_lost() {
    let store = InMemoryStockStore::with_clock(Arc::new(test_clock()))
        .with_write_delay(Duration::from_millis(20));
    store.seed(&key("SKU-1"), 10);
    let engine = StockEngine::new(
        Arc::new(store.clone()),
        Arc::new(PassThroughLockCoordinator),
        Arc::new(NoCache),
        fast_config(),
    );
    let k = key("SKU-1");

    let (first, second) = tokio::join!(
        engine.reserve(&k, 1, "order-1"),
        engine.reserve(&k, 1, "order-2"),
    );

    first.unwrap();
    second.unwrap();
    // Both committed from the same read: one reservation vanished.
    assert_eq!(store.record(&k).unwrap().levels(), levels(10, 1, 9));
}

#[tokio::test]
async fn different_keys_run_concurrently() {
    let store = InMemoryStockStore::with_clock(Arc::new(test_clock()))
        .with_write_delay(Duration::from_millis(20));
    let h = TestHarness::with_store(store);
    let (a, b) = (key("SKU-A"), key("SKU-B"));
    h.store.seed(&a, 5);
    h.store.seed(&b, 5);

    let (ra, rb) = tokio::join!(
        h.engine.reserve(&a, 1, "order-1"),
        h.engine.reserve(&b, 1, "order-1"),
    );

    ra.unwrap();
    rb.unwrap();
    assert_eq!(h.locks.max_concurrent(), 2);
}

// ============================================================================
// Bounded waits
// ============================================================================

#[tokio::test(start_paused = true)]
async fn contended_lock_times_out_without_touching_store() {
    let h = TestHarness::with_config(fast_config().with_lock_wait(Duration::from_millis(50)));
    let k = key("SKU-1");
    h.store.seed(&k, 10);
    h.locks.hold(&k, Duration::from_secs(30));

    let result = h.engine.reserve(&k, 1, "order-1").await;

    match result {
        Err(StockError::LockTimeout { waited, .. }) => {
            assert!(waited >= Duration::from_millis(50));
        }
        other => panic!("expected LockTimeout, got {other:?}"),
    }
    assert!(result_is_retryable(&h.engine.reserve(&k, 1, "order-1").await));
    assert_eq!(h.store.apply_count(), 0);
}

fn result_is_retryable<T>(result: &Result<T, StockError>) -> bool {
    result.as_ref().err().is_some_and(StockError::is_retryable)
}

#[tokio::test(start_paused = true)]
async fn slow_transaction_times_out_and_releases_lock() {
    let store = InMemoryStockStore::with_clock(Arc::new(test_clock()))
        .with_commit_delay(Duration::from_secs(5));
    let config = EngineConfig::default()
        .with_transaction_timeout(Duration::from_millis(100))
        .with_lock_ttl(Duration::from_secs(2));
    let h = TestHarness::with_store(store);
    let engine = StockEngine::new(
        Arc::new(h.store.clone()),
        Arc::new(h.locks.clone()),
        Arc::new(h.cache.clone()),
        config,
    );
    let k = key("SKU-1");
    h.store.seed(&k, 10);

    let result = engine.reserve(&k, 1, "order-1").await;

    assert!(
        matches!(result, Err(StockError::TransactionTimeout { .. })),
        "got {result:?}"
    );
    assert!(!h.locks.is_locked(&k));
    assert_eq!(h.store.record(&k).unwrap().levels(), levels(10, 0, 10));
}

#[tokio::test(start_paused = true)]
async fn unresponsive_lock_coordinator_times_out_within_lock_wait() {
    let h = TestHarness::with_config(fast_config().with_lock_wait(Duration::from_millis(50)));
    let k = key("SKU-1");
    h.store.seed(&k, 10);
    h.locks.set_hanging(true);

    let result = tokio::time::timeout(Duration::from_secs(1), h.engine.reserve(&k, 1, "order-1"))
        .await
        .expect("reserve must not outlive its lock wait");

    match result {
        Err(StockError::LockTimeout { waited, .. }) => {
            assert!(waited >= Duration::from_millis(50));
            assert!(waited < Duration::from_secs(1));
        }
        other => panic!("expected LockTimeout, got {other:?}"),
    }
    assert_eq!(h.store.apply_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_release_does_not_block_the_operation() {
    let store = InMemoryStockStore::with_clock(Arc::new(test_clock()))
        .with_commit_delay(Duration::from_millis(100));
    let h = TestHarness::with_store(store);
    let k = key("SKU-1");
    h.store.seed(&k, 10);

    let engine = h.engine.clone();
    let task = {
        let k = k.clone();
        tokio::spawn(async move { engine.reserve(&k, 2, "order-1").await })
    };

    // The lock is held by now; only the release will hang.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.locks.is_locked(&k));
    h.locks.set_hanging(true);

    let snapshot = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("reserve must not wait on a hung release")
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.levels, levels(10, 2, 8));

    // The lock is left to its TTL.
    assert!(h.locks.is_locked(&k));
    tokio::time::advance(fast_config().lock_ttl).await;
    assert!(!h.locks.is_locked(&k));
}

#[tokio::test(start_paused = true)]
async fn unresponsive_cache_degrades_to_store() {
    let h = TestHarness::new();
    let k = key("SKU-1");
    h.store.seed(&k, 10);
    h.cache.set_hanging(true);

    let read = tokio::time::timeout(Duration::from_secs(1), h.engine.get_stock(&k))
        .await
        .expect("get_stock must not wait on a hung cache")
        .unwrap();
    assert_eq!(read.levels, levels(10, 0, 10));

    let reserved = tokio::time::timeout(Duration::from_secs(1), h.engine.reserve(&k, 4, "order-1"))
        .await
        .expect("reserve must not wait on a hung cache")
        .unwrap();
    assert_eq!(reserved.levels, levels(10, 4, 6));
    assert!(!h.locks.is_locked(&k));
}

#[tokio::test(start_paused = true)]
async fn expired_lock_of_crashed_holder_is_taken_over() {
    let h = TestHarness::with_config(fast_config().with_lock_wait(Duration::from_millis(500)));
    let k = key("SKU-1");
    h.store.seed(&k, 10);
    h.locks.hold(&k, Duration::from_millis(200));

    let snapshot = h.engine.reserve(&k, 1, "order-1").await.unwrap();

    assert_eq!(snapshot.levels, levels(10, 1, 9));
}

// ============================================================================
// Commit acknowledgement
// ============================================================================

#[tokio::test(start_paused = true)]
async fn late_commit_acknowledgement_is_never_retried() {
    // Committed, then answered long after every engine bound.
    let store = InMemoryStockStore::with_clock(Arc::new(test_clock()))
        .with_ack_delay(Duration::from_secs(1));
    let h = TestHarness::with_store(store);
    let config = fast_config()
        .with_transaction_timeout(Duration::from_millis(100))
        .with_commit_timeout(Duration::from_millis(100));
    let engine = StockEngine::new(
        Arc::new(h.store.clone()),
        Arc::new(h.locks.clone()),
        Arc::new(h.cache.clone()),
        config,
    )
    .with_retry(RetryPolicy::default());
    let k = key("SKU-1");
    h.store.seed(&k, 10);

    let result = engine.reserve(&k, 5, "order-1").await;

    match &result {
        Err(error @ StockError::CommitUnconfirmed { waited, .. }) => {
            assert!(!error.is_retryable());
            assert_eq!(*waited, Duration::from_millis(200));
        }
        other => panic!("expected CommitUnconfirmed, got {other:?}"),
    }
    assert_eq!(h.store.apply_count(), 1);
    assert_eq!(h.store.record(&k).unwrap().levels(), levels(10, 5, 5));
    assert_eq!(h.store.movements(&k).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn transaction_timeout_means_nothing_was_written() {
    let store = InMemoryStockStore::with_clock(Arc::new(test_clock()))
        .with_commit_delay(Duration::from_secs(1));
    let h = TestHarness::with_store(store);
    let engine = StockEngine::new(
        Arc::new(h.store.clone()),
        Arc::new(h.locks.clone()),
        Arc::new(h.cache.clone()),
        fast_config().with_transaction_timeout(Duration::from_millis(100)),
    );
    let k = key("SKU-1");
    h.store.seed(&k, 10);

    let result = engine.reserve(&k, 5, "order-1").await;

    assert!(
        matches!(result, Err(StockError::TransactionTimeout { .. })),
        "got {result:?}"
    );
    assert_eq!(h.store.record(&k).unwrap().levels(), levels(10, 0, 10));
    assert_eq!(h.store.movements(&k).len(), 1);
}

// ============================================================================
// Cache ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn reordered_cache_updates_cannot_leave_a_stale_snapshot() {
    let h = TestHarness::with_config(fast_config().with_cache_timeout(Duration::from_secs(1)));
    let k = key("SKU-1");
    h.store.seed(&k, 10);
    h.engine.get_stock(&k).await.unwrap();

    // The first writer's cache update lands after everything below.
    h.cache.delay_next_write(Duration::from_millis(500));
    let first = {
        let engine = h.engine.clone();
        let k = k.clone();
        tokio::spawn(async move { engine.reserve(&k, 1, "order-1").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.store.record(&k).unwrap().levels(), levels(10, 1, 9));

    h.engine.reserve(&k, 2, "order-2").await.unwrap();
    assert_eq!(h.engine.get_stock(&k).await.unwrap().levels, levels(10, 3, 7));

    first.await.unwrap().unwrap();

    let stored = h.store.record(&k).unwrap().levels();
    assert_eq!(stored, levels(10, 3, 7));
    assert_eq!(h.engine.get_stock(&k).await.unwrap().levels, stored);
}

// ============================================================================
// Guaranteed release
// ============================================================================

#[tokio::test]
async fn lock_is_released_after_rejection() {
    let h = TestHarness::new();
    let k = key("SKU-1");
    h.store.seed(&k, 1);

    let _ = h.engine.reserve(&k, 2, "order-1").await;
    assert!(!h.locks.is_locked(&k));

    h.engine.reserve(&k, 1, "order-2").await.unwrap();
    assert_eq!(h.locks.acquisitions(), 2);
    assert_eq!(h.locks.held_count(), 0);
}

#[tokio::test]
async fn lock_is_released_after_store_failure() {
    let h = TestHarness::new();
    let k = key("SKU-1");
    h.store.seed(&k, 5);
    h.store.set_failing(true);

    let result = h.engine.reserve(&k, 1, "order-1").await;

    assert!(matches!(result, Err(StockError::TransactionFailed(_))));
    assert!(!h.locks.is_locked(&k));
    assert_eq!(h.store.movements(&k).len(), 1);
}

#[tokio::test]
async fn cancelled_operation_releases_lock_in_background() {
    let store = InMemoryStockStore::with_clock(Arc::new(test_clock()))
        .with_commit_delay(Duration::from_millis(200));
    let h = TestHarness::with_store(store);
    let k = key("SKU-1");
    h.store.seed(&k, 5);

    let cancelled =
        tokio::time::timeout(Duration::from_millis(20), h.engine.reserve(&k, 1, "order-1")).await;
    assert!(cancelled.is_err());

    // The guard's drop hands the release to a spawned task.
    for _ in 0..50 {
        if !h.locks.is_locked(&k) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!h.locks.is_locked(&k));
    assert_eq!(h.store.record(&k).unwrap().levels(), levels(5, 0, 5));
}

#[tokio::test]
async fn coordinator_outage_fails_fast() {
    let h = TestHarness::new();
    let k = key("SKU-1");
    h.store.seed(&k, 5);
    h.locks.set_unavailable(true);

    let result = h.engine.reserve(&k, 1, "order-1").await;

    assert!(matches!(result, Err(StockError::LockAcquisitionFailed(_))));
    assert_eq!(h.store.apply_count(), 0);
}

// ============================================================================
// Automatic retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn retry_policy_outlasts_short_contention() {
    let h = TestHarness::with_config(fast_config().with_lock_wait(Duration::from_millis(50)));
    let engine = h.engine.clone().with_retry(
        RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(100))
            .build(),
    );
    let k = key("SKU-1");
    h.store.seed(&k, 10);
    h.locks.hold(&k, Duration::from_millis(120));

    let snapshot = engine.reserve(&k, 2, "order-1").await.unwrap();

    assert_eq!(snapshot.levels, levels(10, 2, 8));
}

#[tokio::test(start_paused = true)]
async fn retry_never_repeats_rejections() {
    let h = TestHarness::new();
    let engine = h.engine.clone().with_retry(RetryPolicy::default());
    let k = key("SKU-1");
    h.store.seed(&k, 1);

    let result = engine.reserve(&k, 5, "order-1").await;

    assert!(matches!(result, Err(StockError::InsufficientStock { .. })));
    assert_eq!(h.store.apply_count(), 1);
}
