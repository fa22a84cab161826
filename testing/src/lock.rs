//! In-memory lock coordinators.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned mutex

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stock_control_core::{
    LockCoordinator, LockToken, ReleaseOutcome, StockError, StockFuture, StockKey,
};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Held {
    token: LockToken,
    expires_at: Instant,
}

/// TTL-aware lock coordinator backed by a `HashMap`.
///
/// Expiry uses `tokio::time::Instant`, so tests running with paused time can
/// advance past a TTL deterministically.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLockCoordinator {
    held: Arc<Mutex<HashMap<String, Held>>>,
    unavailable: Arc<AtomicBool>,
    hanging: Arc<AtomicBool>,
    acquisitions: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
}

impl InMemoryLockCoordinator {
    /// Create a coordinator with no locks held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every call wait forever, as a backend that accepted the
    /// connection but never answers would.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Whether an unexpired lock exists for `key`.
    #[must_use]
    pub fn is_locked(&self, key: &StockKey) -> bool {
        let now = Instant::now();
        self.held
            .lock()
            .unwrap()
            .get(&key.lock_key())
            .is_some_and(|held| held.expires_at > now)
    }

    /// Number of unexpired locks.
    #[must_use]
    pub fn held_count(&self) -> usize {
        let now = Instant::now();
        self.held
            .lock()
            .unwrap()
            .values()
            .filter(|held| held.expires_at > now)
            .count()
    }

    /// Successful acquisitions so far.
    #[must_use]
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Highest number of locks held at the same time.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Take the lock for `key` under a foreign token, as another process would.
    pub fn hold(&self, key: &StockKey, ttl: Duration) -> LockToken {
        let token = LockToken::generate();
        self.held.lock().unwrap().insert(
            key.lock_key(),
            Held {
                token: token.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        token
    }

    async fn stall_if_hanging(&self) {
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn check_available(&self) -> Result<(), StockError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StockError::LockAcquisitionFailed(
                "lock coordinator unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl LockCoordinator for InMemoryLockCoordinator {
    fn try_acquire<'a>(
        &'a self,
        key: &'a StockKey,
        token: &'a LockToken,
        ttl: Duration,
    ) -> StockFuture<'a, bool> {
        Box::pin(async move {
            self.stall_if_hanging().await;
            self.check_available()?;

            let now = Instant::now();
            let mut held = self.held.lock().unwrap();
            let lock_key = key.lock_key();

            if held.get(&lock_key).is_some_and(|h| h.expires_at > now) {
                return Ok(false);
            }

            held.insert(
                lock_key,
                Held {
                    token: token.clone(),
                    expires_at: now + ttl,
                },
            );
            let concurrent = held.values().filter(|h| h.expires_at > now).count();
            self.max_concurrent.fetch_max(concurrent, Ordering::SeqCst);
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    }

    fn release<'a>(
        &'a self,
        key: &'a StockKey,
        token: &'a LockToken,
    ) -> StockFuture<'a, ReleaseOutcome> {
        Box::pin(async move {
            self.stall_if_hanging().await;
            self.check_available()?;

            let now = Instant::now();
            let mut held = self.held.lock().unwrap();
            let lock_key = key.lock_key();

            match held.get(&lock_key) {
                Some(h) if h.token == *token && h.expires_at > now => {
                    held.remove(&lock_key);
                    Ok(ReleaseOutcome::Released)
                }
                _ => Ok(ReleaseOutcome::NotHeld),
            }
        })
    }
}

/// Coordinator that grants every request, i.e. no distributed lock at all.
///
/// Paired with a store that has no row lock it reproduces the lost updates
/// the real locks prevent.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughLockCoordinator;

impl LockCoordinator for PassThroughLockCoordinator {
    fn try_acquire<'a>(
        &'a self,
        _key: &'a StockKey,
        _token: &'a LockToken,
        _ttl: Duration,
    ) -> StockFuture<'a, bool> {
        Box::pin(async { Ok(true) })
    }

    fn release<'a>(
        &'a self,
        _key: &'a StockKey,
        _token: &'a LockToken,
    ) -> StockFuture<'a, ReleaseOutcome> {
        Box::pin(async { Ok(ReleaseOutcome::Released) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StockKey {
        StockKey::new("SKU-1", "WH-1")
    }

    #[tokio::test]
    async fn second_token_is_refused_while_held() {
        let locks = InMemoryLockCoordinator::new();
        let first = LockToken::generate();
        let second = LockToken::generate();
        let ttl = Duration::from_secs(5);

        assert!(locks.try_acquire(&key(), &first, ttl).await.unwrap());
        assert!(!locks.try_acquire(&key(), &second, ttl).await.unwrap());

        assert_eq!(
            locks.release(&key(), &first).await.unwrap(),
            ReleaseOutcome::Released
        );
        assert!(locks.try_acquire(&key(), &second, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn foreign_token_cannot_release() {
        let locks = InMemoryLockCoordinator::new();
        let owner = locks.hold(&key(), Duration::from_secs(5));

        let outcome = locks.release(&key(), &LockToken::generate()).await.unwrap();

        assert_eq!(outcome, ReleaseOutcome::NotHeld);
        assert!(locks.is_locked(&key()));
        assert_eq!(
            locks.release(&key(), &owner).await.unwrap(),
            ReleaseOutcome::Released
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_can_be_taken_and_release_is_idempotent() {
        let locks = InMemoryLockCoordinator::new();
        let stale = locks.hold(&key(), Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(150)).await;

        let fresh = LockToken::generate();
        assert!(
            locks
                .try_acquire(&key(), &fresh, Duration::from_secs(1))
                .await
                .unwrap()
        );
        assert_eq!(
            locks.release(&key(), &stale).await.unwrap(),
            ReleaseOutcome::NotHeld
        );
        assert_eq!(
            locks.release(&key(), &fresh).await.unwrap(),
            ReleaseOutcome::Released
        );
        assert_eq!(
            locks.release(&key(), &fresh).await.unwrap(),
            ReleaseOutcome::NotHeld
        );
    }
}
