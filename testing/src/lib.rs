//! # Stock Control Testing
//!
//! Test doubles and helpers for the stock control engine.
//!
//! This crate provides:
//! - In-memory implementations of every seam: [`InMemoryStockStore`],
//!   [`InMemoryLockCoordinator`], [`InMemoryStockCache`]
//! - Failure injection (store, lock and cache outages, slow or unlocked stores)
//! - A [`TestHarness`] wiring them into a `StockEngine`
//! - proptest strategies for stock changes
//!
//! ## Example
//!
//! ```
//! use stock_control_testing::{TestHarness, helpers::key};
//!
//! # async fn example() -> stock_control_core::Result<()> {
//! let harness = TestHarness::new();
//! let sku = key("SKU-1");
//! harness.store.seed(&sku, 10);
//!
//! let snapshot = harness.engine.reserve(&sku, 5, "order-1").await?;
//! assert_eq!(snapshot.available(), 5);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use stock_control_core::environment::Clock;

pub mod cache;
pub mod lock;
pub mod store;

pub use cache::InMemoryStockCache;
pub use helpers::TestHarness;
pub use lock::{InMemoryLockCoordinator, PassThroughLockCoordinator};
pub use store::InMemoryStockStore;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making record timestamps reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use stock_control_testing::mocks::FixedClock;
    /// use stock_control_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Engine wiring and assertion helpers.
pub mod helpers {
    use crate::{InMemoryLockCoordinator, InMemoryStockCache, InMemoryStockStore, test_clock};
    use std::sync::Arc;
    use std::time::Duration;
    use stock_control_core::{StockKey, StockLevels, StockSnapshot};
    use stock_control_runtime::{EngineConfig, StockEngine};

    /// Key in the default test warehouse `WH-1`.
    #[must_use]
    pub fn key(sku: &str) -> StockKey {
        StockKey::new(sku, "WH-1")
    }

    /// Levels from the `{on_hand, reserved, available}` triple.
    #[must_use]
    pub const fn levels(on_hand: i64, reserved: i64, available: i64) -> StockLevels {
        StockLevels {
            on_hand,
            reserved,
            available,
        }
    }

    /// Short timings so contention tests finish quickly.
    #[must_use]
    pub fn fast_config() -> EngineConfig {
        EngineConfig::default()
            .with_lock_ttl(Duration::from_secs(2))
            .with_lock_wait(Duration::from_millis(500))
            .with_transaction_timeout(Duration::from_secs(1))
            .with_commit_timeout(Duration::from_millis(500))
    }

    /// Assert the stock invariant on a snapshot.
    ///
    /// # Panics
    ///
    /// Panics if `available != on_hand - reserved` or any quantity is negative.
    #[allow(clippy::panic)]
    pub fn assert_invariant(snapshot: &StockSnapshot) {
        let l = snapshot.levels;
        if !l.is_consistent() {
            panic!(
                "invariant broken for {}: on_hand={} reserved={} available={}",
                snapshot.key, l.on_hand, l.reserved, l.available
            );
        }
    }

    /// Install a test subscriber once; later calls are no-ops.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }

    /// An engine over in-memory dependencies, with handles to each of them.
    #[derive(Clone)]
    pub struct TestHarness {
        /// Engine under test.
        pub engine: StockEngine,
        /// Its store.
        pub store: InMemoryStockStore,
        /// Its lock coordinator.
        pub locks: InMemoryLockCoordinator,
        /// Its cache.
        pub cache: InMemoryStockCache,
    }

    impl TestHarness {
        /// Default harness with [`fast_config`] and a fixed clock.
        #[must_use]
        pub fn new() -> Self {
            Self::with_store(InMemoryStockStore::with_clock(Arc::new(test_clock())))
        }

        /// Harness around a preconfigured store.
        #[must_use]
        pub fn with_store(store: InMemoryStockStore) -> Self {
            Self::build(store, fast_config())
        }

        /// Harness with a custom configuration.
        #[must_use]
        pub fn with_config(config: EngineConfig) -> Self {
            Self::build(
                InMemoryStockStore::with_clock(Arc::new(test_clock())),
                config,
            )
        }

        fn build(store: InMemoryStockStore, config: EngineConfig) -> Self {
            let locks = InMemoryLockCoordinator::new();
            let cache = InMemoryStockCache::new();
            let engine = StockEngine::new(
                Arc::new(store.clone()),
                Arc::new(locks.clone()),
                Arc::new(cache.clone()),
                config,
            );
            Self {
                engine,
                store,
                locks,
                cache,
            }
        }
    }

    impl Default for TestHarness {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// proptest strategies for stock operations.
pub mod properties {
    use proptest::prelude::*;
    use stock_control_core::StockChange;

    /// Any single-key change with small quantities, valid or not.
    pub fn any_change() -> impl Strategy<Value = StockChange> {
        let reference = "[a-z]{1,6}-[0-9]{1,3}";
        prop_oneof![
            (-2i64..20, reference).prop_map(|(quantity, reference)| StockChange::Reserve {
                quantity,
                reference
            }),
            (-2i64..20, reference).prop_map(|(quantity, reference)| StockChange::Release {
                quantity,
                reference
            }),
            (-2i64..20, reference).prop_map(|(quantity, reference)| StockChange::Deduct {
                quantity,
                reference
            }),
            (-2i64..20, reference).prop_map(|(quantity, reference)| StockChange::Restore {
                quantity,
                reference
            }),
            (-2i64..20, reference).prop_map(|(quantity, reference)| StockChange::Receive {
                quantity,
                reference
            }),
            (-20i64..20, "[a-z ]{0,12}", "[a-z]{1,8}").prop_map(|(delta, reason, operator)| {
                StockChange::Adjust {
                    delta,
                    reason,
                    operator,
                }
            }),
        ]
    }

    /// A sequence of up to `max_len` changes.
    pub fn change_sequence(max_len: usize) -> impl Strategy<Value = Vec<StockChange>> {
        proptest::collection::vec(any_change(), 0..max_len)
    }
}

pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }
}
