//! Metric names recorded by the engine.
//!
//! The engine records through the `metrics` facade and installs no exporter;
//! binaries that want to scrape these values install a recorder and may call
//! [`register_metrics`] to attach descriptions.

use metrics::{Unit, describe_counter, describe_histogram};

/// Counter of finished operations, labelled `operation` and `outcome`.
pub const OPERATIONS: &str = "stock.operations";

/// Histogram of time spent waiting for the distributed lock.
pub const LOCK_WAIT_MS: &str = "stock.lock.wait_ms";

/// Counter of snapshot reads served by the cache.
pub const CACHE_HITS: &str = "stock.cache.hits";

/// Counter of snapshot reads that fell through to the store.
pub const CACHE_MISSES: &str = "stock.cache.misses";

/// Counter of cache backend failures absorbed by the engine.
pub const CACHE_ERRORS: &str = "stock.cache.errors";

/// Outcome label for committed operations.
pub const OUTCOME_OK: &str = "ok";

/// Register descriptions for every engine metric.
pub fn register_metrics() {
    describe_counter!(OPERATIONS, "Stock operations by operation and outcome");
    describe_histogram!(
        LOCK_WAIT_MS,
        Unit::Milliseconds,
        "Time spent waiting for the per-key distributed lock"
    );
    describe_counter!(CACHE_HITS, "Snapshot reads served from the cache");
    describe_counter!(CACHE_MISSES, "Snapshot reads that went to the store");
    describe_counter!(CACHE_ERRORS, "Cache failures degraded to store reads");
}

pub(crate) fn record_operation(operation: &'static str, outcome: &'static str) {
    metrics::counter!(OPERATIONS, "operation" => operation, "outcome" => outcome).increment(1);
}
