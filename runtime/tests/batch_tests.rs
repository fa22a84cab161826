//! Batch operations: per-item application and partial-failure reporting.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use stock_control_core::StockError;
use stock_control_runtime::{BatchError, BatchItem};
use stock_control_testing::TestHarness;
use stock_control_testing::helpers::{key, levels};

fn order(h: &TestHarness) -> Vec<BatchItem> {
    let items = vec![
        BatchItem::new(key("SKU-A"), 2),
        BatchItem::new(key("SKU-B"), 3),
        BatchItem::new(key("SKU-C"), 1),
    ];
    h.store.seed(&items[0].key, 10);
    h.store.seed(&items[1].key, 10);
    h.store.seed(&items[2].key, 10);
    items
}

#[tokio::test]
async fn reserve_release_and_deduct_whole_order() {
    let h = TestHarness::new();
    let items = order(&h);

    let reserved = h.engine.reserve_batch(&items, "order-1").await.unwrap();
    assert_eq!(reserved.len(), 3);
    assert_eq!(reserved[1].levels, levels(10, 3, 7));

    let released = h.engine.release_batch(&items[..1], "order-1").await.unwrap();
    assert_eq!(released[0].levels, levels(10, 0, 10));

    let deducted = h.engine.deduct_batch(&items[1..], "order-1").await.unwrap();
    assert_eq!(deducted[0].levels, levels(7, 0, 7));
    assert_eq!(deducted[1].levels, levels(9, 0, 9));

    for item in &items {
        let latest = h.engine.list_movements(&item.key, Some(1)).await.unwrap();
        assert_eq!(latest[0].reference, "order-1");
    }
}

#[tokio::test]
async fn first_failure_stops_batch_and_reports_completed_items() {
    let h = TestHarness::new();
    let mut items = order(&h);
    items[1].quantity = 11;

    let err = h.engine.reserve_batch(&items, "order-1").await.unwrap_err();

    assert_eq!(err.index, 1);
    assert_eq!(err.key, key("SKU-B"));
    assert_eq!(err.completed, vec![key("SKU-A")]);
    assert!(matches!(err.source, StockError::InsufficientStock { .. }));

    // No cross-item atomicity: A stays reserved, C was never attempted.
    assert_eq!(h.store.record(&key("SKU-A")).unwrap().levels(), levels(10, 2, 8));
    assert_eq!(h.store.record(&key("SKU-C")).unwrap().levels(), levels(10, 0, 10));

    // The caller compensates with the reported keys.
    let compensation: Vec<BatchItem> = items
        .iter()
        .filter(|item| err.completed.contains(&item.key))
        .cloned()
        .collect();
    h.engine
        .release_batch(&compensation, "order-1")
        .await
        .unwrap();
    assert_eq!(h.store.record(&key("SKU-A")).unwrap().levels(), levels(10, 0, 10));
}

#[tokio::test]
async fn malformed_line_fails_before_any_commit() {
    let h = TestHarness::new();
    let mut items = order(&h);
    items[2].quantity = 0;

    let err = h.engine.reserve_batch(&items, "order-1").await.unwrap_err();

    assert_eq!(
        err,
        BatchError {
            index: 2,
            key: key("SKU-C"),
            completed: Vec::new(),
            source: StockError::InvalidQuantity { quantity: 0 },
        }
    );
    assert_eq!(h.store.apply_count(), 0);
    assert_eq!(h.locks.acquisitions(), 0);
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let h = TestHarness::new();

    let snapshots = h.engine.deduct_batch(&[], "order-1").await.unwrap();

    assert!(snapshots.is_empty());
}

#[tokio::test]
async fn batch_error_message_names_item() {
    let h = TestHarness::new();
    let items = vec![BatchItem::new(key("SKU-MISSING"), 1)];

    let err = h.engine.release_batch(&items, "order-9").await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Batch item 0"), "{message}");
    assert!(message.contains("SKU-MISSING@WH-1"), "{message}");
}
