//! Distributed lock coordinator trait.
//!
//! The lock serializes every mutation of one [`StockKey`] across process
//! instances before the store transaction is opened. Locks carry a TTL so a
//! crashed holder cannot block a key forever.

use crate::StockFuture;
use crate::model::StockKey;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Proof of ownership of a lock, unique per acquisition.
///
/// Tokens are random UUID v4 values. Release compares the stored token before
/// deleting, so a holder whose lock expired cannot release a successor's lock.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Token value as stored by the coordinator.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of releasing a lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The token matched and the lock was deleted.
    Released,
    /// The lock had expired or belongs to another token; nothing was deleted.
    NotHeld,
}

/// Mutual exclusion per stock key with bounded lifetime.
///
/// Implementations provide single-attempt acquisition; bounded waiting with
/// backoff is layered on top by the engine.
pub trait LockCoordinator: Send + Sync {
    /// Try once to take the lock for `key` with `token`, expiring after `ttl`.
    ///
    /// Returns `Ok(true)` if the lock was taken, `Ok(false)` if another token
    /// holds it.
    ///
    /// # Errors
    ///
    /// - `LockAcquisitionFailed`: the coordinator is unavailable
    fn try_acquire<'a>(
        &'a self,
        key: &'a StockKey,
        token: &'a LockToken,
        ttl: Duration,
    ) -> StockFuture<'a, bool>;

    /// Release the lock for `key` if it is still held by `token`.
    ///
    /// Safe to call after expiry.
    ///
    /// # Errors
    ///
    /// - `LockAcquisitionFailed`: the coordinator is unavailable
    fn release<'a>(
        &'a self,
        key: &'a StockKey,
        token: &'a LockToken,
    ) -> StockFuture<'a, ReleaseOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_unique() {
        let tokens: HashSet<LockToken> = (0..1000).map(|_| LockToken::generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }
}
