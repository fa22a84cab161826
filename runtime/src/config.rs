//! Engine timing configuration.

use crate::retry::RetryPolicy;
use std::time::Duration;
use thiserror::Error;

/// Rejected [`EngineConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration that must be positive is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The lock could expire while its holder is still waiting on the store.
    #[error(
        "lock TTL ({lock_ttl:?}) must exceed the transaction timeout ({transaction_timeout:?}) plus the commit timeout ({commit_timeout:?})"
    )]
    LockTtlTooShort {
        /// Configured lock TTL
        lock_ttl: Duration,
        /// Configured transaction bound
        transaction_timeout: Duration,
        /// Configured commit bound
        commit_timeout: Duration,
    },
}

/// Bounds on every blocking point of a stock mutation.
///
/// # Default Values
///
/// - `lock_ttl`: 10 seconds
/// - `lock_wait`: 3 seconds
/// - `transaction_timeout`: 5 seconds
/// - `commit_timeout`: 2 seconds
/// - `row_lock_timeout`: 2 seconds
/// - `release_timeout`: 1 second
/// - `cache_ttl`: 5 minutes
/// - `cache_timeout`: 250 milliseconds
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How long a distributed lock lives before it expires on its own.
    pub lock_ttl: Duration,
    /// How long an operation waits for a contended lock.
    pub lock_wait: Duration,
    /// Bound on the store transaction up to, but not including, its commit.
    ///
    /// Enforced by the store, which rolls back and reports
    /// `TransactionTimeout` when it passes.
    pub transaction_timeout: Duration,
    /// Extra time the engine waits for the store after `transaction_timeout`
    /// before giving up with `CommitUnconfirmed`.
    pub commit_timeout: Duration,
    /// Bound on waiting for the row lock inside the transaction.
    ///
    /// Applied by the store, not the engine.
    pub row_lock_timeout: Duration,
    /// Bound on one lock release call.
    pub release_timeout: Duration,
    /// Lifetime of cached snapshots.
    pub cache_ttl: Duration,
    /// Bound on one cache call; slower calls count as cache errors.
    pub cache_timeout: Duration,
    /// Backoff between lock acquisition attempts.
    pub lock_backoff: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            lock_wait: Duration::from_secs(3),
            transaction_timeout: Duration::from_secs(5),
            commit_timeout: Duration::from_secs(2),
            row_lock_timeout: Duration::from_secs(2),
            release_timeout: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(300),
            cache_timeout: Duration::from_millis(250),
            lock_backoff: RetryPolicy::lock_polling(),
        }
    }
}

impl EngineConfig {
    /// Set the distributed lock TTL.
    #[must_use]
    pub const fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the lock wait bound.
    #[must_use]
    pub const fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Set the transaction bound.
    #[must_use]
    pub const fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Set the commit bound.
    #[must_use]
    pub const fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Set the lock release bound.
    #[must_use]
    pub const fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Set the cache call bound.
    #[must_use]
    pub const fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    /// Set the row lock bound.
    #[must_use]
    pub const fn with_row_lock_timeout(mut self, timeout: Duration) -> Self {
        self.row_lock_timeout = timeout;
        self
    }

    /// Set the cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the lock polling backoff.
    #[must_use]
    pub fn with_lock_backoff(mut self, policy: RetryPolicy) -> Self {
        self.lock_backoff = policy;
        self
    }

    /// Longest time the engine waits on one `apply_change` call.
    #[must_use]
    pub fn store_wait(&self) -> Duration {
        self.transaction_timeout.saturating_add(self.commit_timeout)
    }

    /// Check that every bound is positive and that a lock outlives the
    /// transaction it protects.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("lock_ttl", self.lock_ttl),
            ("lock_wait", self.lock_wait),
            ("transaction_timeout", self.transaction_timeout),
            ("commit_timeout", self.commit_timeout),
            ("row_lock_timeout", self.row_lock_timeout),
            ("release_timeout", self.release_timeout),
            ("cache_ttl", self.cache_ttl),
            ("cache_timeout", self.cache_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }

        if self.lock_ttl <= self.store_wait() {
            return Err(ConfigError::LockTtlTooShort {
                lock_ttl: self.lock_ttl,
                transaction_timeout: self.transaction_timeout,
                commit_timeout: self.commit_timeout,
            });
        }

        Ok(())
    }
}
