//! # Stock Control App
//!
//! Wires the stock control engine to its production backends.
//!
//! - [`AppConfig`]: settings loaded from the environment
//! - [`bootstrap`]: connects `PostgreSQL` and Redis and builds a
//!   [`StockEngine`](stock_control_runtime::StockEngine)
//! - [`reconcile_all`]: paged ledger reconciliation over every record
//! - `stock-reconcile` binary: runs that sweep

#![forbid(unsafe_code)]

pub mod bootstrap;
pub mod config;
pub mod sweep;

pub use bootstrap::{BootstrapError, StockControl, bootstrap};
pub use config::AppConfig;
pub use sweep::{SWEEP_PAGE_SIZE, SweepSummary, reconcile_all};
