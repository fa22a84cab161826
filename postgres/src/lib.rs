//! `PostgreSQL` stock store for the stock control engine.
//!
//! This crate implements the `StockStore` trait from `stock-control-core` on
//! top of sqlx. It provides:
//!
//! - One row per (SKU, warehouse) with `CHECK` constraints mirroring the stock invariant
//! - Row-level locking (`SELECT ... FOR UPDATE`) bounded by `lock_timeout`
//! - An append-only movement ledger written in the same transaction
//! - Embedded migrations (`PostgresStockStore::migrate`)
//!
//! # Example
//!
//! ```no_run
//! use stock_control_postgres::PostgresStockStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStockStore::connect("postgres://localhost/stock", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod store;

pub use store::{DEFAULT_ROW_LOCK_TIMEOUT, PostgresStockStore};
