//! Multi-key variants of the single-key operations.
//!
//! A batch applies its items one by one, in input order, each under its own
//! lock and transaction. There is no cross-item atomicity: when item `n`
//! fails, items `0..n` stay committed and are reported in
//! [`BatchError::completed`] so the caller can compensate.

use crate::engine::StockEngine;
use stock_control_core::{StockChange, StockError, StockKey, StockSnapshot};
use thiserror::Error;

/// One line of a batch request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchItem {
    /// Position to change.
    pub key: StockKey,
    /// Units for this position.
    pub quantity: i64,
}

impl BatchItem {
    /// Create a batch item.
    #[must_use]
    pub const fn new(key: StockKey, quantity: i64) -> Self {
        Self { key, quantity }
    }
}

/// First failure of a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Batch item {index} ({key}) failed after {} committed: {source}", .completed.len())]
pub struct BatchError {
    /// Position of the failing item in the request.
    pub index: usize,
    /// Key of the failing item.
    pub key: StockKey,
    /// Keys of the items committed before the failure, in order.
    pub completed: Vec<StockKey>,
    /// Why the item failed.
    #[source]
    pub source: StockError,
}

#[derive(Clone, Copy)]
enum BatchKind {
    Reserve,
    Release,
    Deduct,
}

impl BatchKind {
    fn change(self, quantity: i64, reference: &str) -> StockChange {
        let reference = reference.to_string();
        match self {
            Self::Reserve => StockChange::Reserve {
                quantity,
                reference,
            },
            Self::Release => StockChange::Release {
                quantity,
                reference,
            },
            Self::Deduct => StockChange::Deduct {
                quantity,
                reference,
            },
        }
    }
}

impl StockEngine {
    /// Reserve every item under one order reference.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] for the first failing item; earlier items stay
    /// reserved.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn reserve_batch(
        &self,
        items: &[BatchItem],
        reference: &str,
    ) -> Result<Vec<StockSnapshot>, BatchError> {
        self.run_batch(BatchKind::Reserve, items, reference).await
    }

    /// Release every item under one order reference.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] for the first failing item; earlier items stay
    /// released.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn release_batch(
        &self,
        items: &[BatchItem],
        reference: &str,
    ) -> Result<Vec<StockSnapshot>, BatchError> {
        self.run_batch(BatchKind::Release, items, reference).await
    }

    /// Deduct every item under one order reference.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] for the first failing item; earlier items stay
    /// deducted.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn deduct_batch(
        &self,
        items: &[BatchItem],
        reference: &str,
    ) -> Result<Vec<StockSnapshot>, BatchError> {
        self.run_batch(BatchKind::Deduct, items, reference).await
    }

    async fn run_batch(
        &self,
        kind: BatchKind,
        items: &[BatchItem],
        reference: &str,
    ) -> Result<Vec<StockSnapshot>, BatchError> {
        let changes: Vec<StockChange> = items
            .iter()
            .map(|item| kind.change(item.quantity, reference))
            .collect();

        // A malformed line fails the batch before anything is committed.
        for (index, (item, change)) in items.iter().zip(&changes).enumerate() {
            if let Err(source) = change.validate() {
                return Err(BatchError {
                    index,
                    key: item.key.clone(),
                    completed: Vec::new(),
                    source,
                });
            }
        }

        let mut snapshots = Vec::with_capacity(items.len());
        for (index, (item, change)) in items.iter().zip(&changes).enumerate() {
            match self.apply(&item.key, change).await {
                Ok(committed) => snapshots.push(committed.record.snapshot()),
                Err(source) => {
                    let completed: Vec<StockKey> =
                        items[..index].iter().map(|done| done.key.clone()).collect();
                    tracing::warn!(
                        index,
                        key = %item.key,
                        completed = completed.len(),
                        error = %source,
                        "Batch stopped at first failure"
                    );
                    return Err(BatchError {
                        index,
                        key: item.key.clone(),
                        completed,
                        source,
                    });
                }
            }
        }

        Ok(snapshots)
    }
}
