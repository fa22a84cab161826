//! Bounded lock acquisition and guaranteed release.
//!
//! [`acquire`] polls a [`LockCoordinator`] until the lock is granted or the
//! wait bound expires. Every coordinator call counts against that bound, so a
//! hung backend ends in `LockTimeout` rather than a stuck caller. The returned
//! [`LockGuard`] must be released with [`LockGuard::release`]; if it is
//! dropped instead (the operation future was cancelled) a background task
//! releases it, and the TTL covers the case where no runtime is left to run
//! that task.

use crate::config::EngineConfig;
use crate::metrics::LOCK_WAIT_MS;
use std::sync::Arc;
use std::time::Duration;
use stock_control_core::{LockCoordinator, LockToken, ReleaseOutcome, Result, StockError, StockKey};
use tokio::time::Instant;

/// A held distributed lock.
#[must_use = "a lock guard must be released"]
pub struct LockGuard {
    locks: Arc<dyn LockCoordinator>,
    key: StockKey,
    token: LockToken,
    release_timeout: Duration,
    released: bool,
}

impl LockGuard {
    /// Token this guard holds.
    #[must_use]
    pub const fn token(&self) -> &LockToken {
        &self.token
    }

    /// Release the lock.
    ///
    /// Coordinator errors and `NotHeld` outcomes are logged, never returned:
    /// the operation protected by the lock has already finished.
    pub async fn release(mut self) {
        self.released = true;
        release_logged(
            self.locks.as_ref(),
            &self.key,
            &self.token,
            self.release_timeout,
        )
        .await;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %self.key, "Lock guard dropped outside a runtime; relying on TTL");
            return;
        };

        spawn_release(
            &handle,
            Arc::clone(&self.locks),
            self.key.clone(),
            self.token.clone(),
            self.release_timeout,
        );
    }
}

fn spawn_release(
    handle: &tokio::runtime::Handle,
    locks: Arc<dyn LockCoordinator>,
    key: StockKey,
    token: LockToken,
    timeout: Duration,
) {
    handle.spawn(async move {
        release_logged(locks.as_ref(), &key, &token, timeout).await;
    });
}

async fn release_logged(
    locks: &dyn LockCoordinator,
    key: &StockKey,
    token: &LockToken,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, locks.release(key, token)).await {
        Ok(Ok(ReleaseOutcome::Released)) => {
            tracing::trace!(key = %key, "Lock released");
        }
        Ok(Ok(ReleaseOutcome::NotHeld)) => {
            tracing::warn!(key = %key, token = %token, "Lock expired before release");
        }
        Ok(Err(error)) => {
            tracing::warn!(key = %key, error = %error, "Lock release failed; lock will expire");
        }
        Err(_elapsed) => {
            tracing::warn!(key = %key, ?timeout, "Lock release timed out; lock will expire");
        }
    }
}

/// Acquire the lock for `key`, waiting at most `config.lock_wait` in total.
///
/// # Errors
///
/// - [`StockError::LockTimeout`]: still contended, or the coordinator did not
///   answer, within `lock_wait`
/// - [`StockError::LockAcquisitionFailed`]: the coordinator is unavailable
pub async fn acquire(
    locks: &Arc<dyn LockCoordinator>,
    key: &StockKey,
    config: &EngineConfig,
) -> Result<LockGuard> {
    let token = LockToken::generate();
    let started = Instant::now();
    let deadline = started + config.lock_wait;
    let mut attempt = 0;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Ok(granted) =
            tokio::time::timeout(remaining, locks.try_acquire(key, &token, config.lock_ttl)).await
        else {
            // The SET may have landed after all; free it under our token.
            spawn_release(
                &tokio::runtime::Handle::current(),
                Arc::clone(locks),
                key.clone(),
                token.clone(),
                config.release_timeout,
            );
            let waited = started.elapsed();
            tracing::warn!(key = %key, waited_ms = waited.as_millis(), "Lock coordinator did not answer in time");
            return Err(StockError::LockTimeout {
                key: key.clone(),
                waited,
            });
        };

        if granted? {
            let waited = started.elapsed();
            metrics::histogram!(LOCK_WAIT_MS).record(waited.as_secs_f64() * 1000.0);
            tracing::trace!(key = %key, attempts = attempt + 1, "Lock acquired");

            return Ok(LockGuard {
                locks: Arc::clone(locks),
                key: key.clone(),
                token,
                release_timeout: config.release_timeout,
                released: false,
            });
        }

        let now = Instant::now();
        if now >= deadline {
            let waited = now - started;
            tracing::warn!(key = %key, waited_ms = waited.as_millis(), "Lock wait timed out");
            return Err(StockError::LockTimeout {
                key: key.clone(),
                waited,
            });
        }

        let delay = config
            .lock_backoff
            .delay_for_attempt(attempt)
            .min(deadline - now);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
