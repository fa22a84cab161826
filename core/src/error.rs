//! Error taxonomy for stock operations.

use crate::model::{StockKey, WarehouseId};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for stock operations.
pub type Result<T> = std::result::Result<T, StockError>;

/// Every way a stock operation can fail.
///
/// Validation errors are raised before any lock or transaction is taken.
/// Errors raised after the lock is acquired still guarantee that nothing was
/// written and that the lock was released.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    // ═══════════════════════════════════════════════════════════
    // Caller Errors
    // ═══════════════════════════════════════════════════════════

    /// Zero or negative quantity, zero adjustment, or a quantity that would
    /// overflow the stored counters.
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity {
        /// The rejected quantity or delta
        quantity: i64,
    },

    /// No stock record exists for the key.
    #[error("Stock not found: {0}")]
    StockNotFound(StockKey),

    /// Stock intake referenced a warehouse that does not exist.
    #[error("Warehouse not found: {0}")]
    WarehouseNotFound(WarehouseId),

    // ═══════════════════════════════════════════════════════════
    // Business Rule Rejections
    // ═══════════════════════════════════════════════════════════

    /// Not enough stock to satisfy the request.
    ///
    /// Reservations and negative adjustments are limited by `available`,
    /// deductions by `reserved`. Both are reported as read under the row lock.
    #[error(
        "Insufficient stock for {key}: requested {requested}, available {available}, reserved {reserved}"
    )]
    InsufficientStock {
        /// Position that was short
        key: StockKey,
        /// Quantity the caller asked for
        requested: i64,
        /// Sellable quantity at the time of the check
        available: i64,
        /// Reserved quantity at the time of the check
        reserved: i64,
    },

    /// Release of more units than are currently reserved.
    #[error("Reserved underflow for {key}: release of {requested}, reserved {reserved}")]
    ReservedUnderflow {
        /// Position that was short
        key: StockKey,
        /// Quantity the caller tried to release
        requested: i64,
        /// Quantity currently reserved
        reserved: i64,
    },

    // ═══════════════════════════════════════════════════════════
    // Coordination Errors (retryable)
    // ═══════════════════════════════════════════════════════════

    /// The lock for a key could not be obtained within the wait bound.
    #[error("Lock timeout for {key} after {waited:?}")]
    LockTimeout {
        /// Contended position
        key: StockKey,
        /// How long the caller waited
        waited: Duration,
    },

    /// The lock coordinator is unavailable.
    #[error("Lock acquisition failed: {0}")]
    LockAcquisitionFailed(String),

    /// The store transaction exceeded its time bound and was rolled back.
    #[error("Transaction timeout for {key} after {timeout:?}")]
    TransactionTimeout {
        /// Position being mutated
        key: StockKey,
        /// Configured bound
        timeout: Duration,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// The store did not answer within the commit bound after the
    /// transaction bound had passed.
    ///
    /// The change may or may not have been committed, so it is never retried
    /// automatically; inspect the movement ledger before repeating it.
    #[error("Commit unconfirmed for {key} after {waited:?}")]
    CommitUnconfirmed {
        /// Position being mutated
        key: StockKey,
        /// Total time waited for the store
        waited: Duration,
    },

    /// Underlying store error; no partial write occurred.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// A stored record breaks `available = on_hand - reserved`.
    #[error("Stock invariant violated for {key}: {detail}")]
    InvariantViolation {
        /// Affected position
        key: StockKey,
        /// Offending values
        detail: String,
    },

    /// Cache backend error. Never escapes the engine.
    #[error("Cache error: {0}")]
    CacheError(String),
}

impl StockError {
    /// Returns `true` if the caller may retry the same request with backoff.
    ///
    /// # Examples
    ///
    /// ```
    /// use stock_control_core::error::StockError;
    /// use stock_control_core::model::StockKey;
    ///
    /// let contended = StockError::LockTimeout {
    ///     key: StockKey::new("SKU-1", "WH-1"),
    ///     waited: std::time::Duration::from_millis(500),
    /// };
    /// assert!(contended.is_retryable());
    /// assert!(!StockError::InvalidQuantity { quantity: 0 }.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. }
                | Self::LockAcquisitionFailed(_)
                | Self::TransactionTimeout { .. }
        )
    }

    /// Returns `true` if the operation was rejected by a stock rule rather
    /// than failing for infrastructure reasons.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuantity { .. }
                | Self::StockNotFound(_)
                | Self::WarehouseNotFound(_)
                | Self::InsufficientStock { .. }
                | Self::ReservedUnderflow { .. }
        )
    }

    /// Short label used for metrics and structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::StockNotFound(_) => "stock_not_found",
            Self::WarehouseNotFound(_) => "warehouse_not_found",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::ReservedUnderflow { .. } => "reserved_underflow",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::LockAcquisitionFailed(_) => "lock_acquisition_failed",
            Self::TransactionTimeout { .. } => "transaction_timeout",
            Self::CommitUnconfirmed { .. } => "commit_unconfirmed",
            Self::TransactionFailed(_) => "transaction_failed",
            Self::InvariantViolation { .. } => "invariant_violation",
            Self::CacheError(_) => "cache_error",
        }
    }
}
