//! # Stock Control Runtime
//!
//! The [`StockEngine`] and everything it needs to run stock operations safely
//! under concurrency.
//!
//! ## Core Components
//!
//! - **Engine**: validates, locks, delegates the transaction to the store,
//!   releases and invalidates the cache, with every backend call bounded
//! - **Lock acquisition**: bounded polling with backoff and guaranteed release
//! - **Batches**: per-key sequential application with partial-failure reports
//! - **Retry**: exponential backoff for retryable errors
//!
//! ## Example
//!
//! ```ignore
//! use stock_control_runtime::{EngineConfig, StockEngine};
//!
//! let engine = StockEngine::new(store, locks, cache, EngineConfig::default());
//!
//! engine.receive(&key, 10, "po-1").await?;
//! engine.reserve(&key, 5, "order-1").await?;
//! engine.deduct(&key, 5, "order-1").await?;
//!
//! let snapshot = engine.get_stock(&key).await?;
//! assert_eq!(snapshot.on_hand(), 5);
//! ```

/// Multi-key batch operations
pub mod batch;

/// Engine timing configuration
pub mod config;

/// The stock engine
pub mod engine;

/// Distributed lock acquisition with bounded wait
pub mod lock;

/// Metric names and descriptions
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

pub use batch::{BatchError, BatchItem};
pub use config::{ConfigError, EngineConfig};
pub use engine::StockEngine;
pub use retry::{RetryPolicy, retry_with_predicate};
