//! TTL-based mutual exclusion keyed by string.
//!
//! Locks bound how long a crashed holder can block others; they do not make
//! writes correct on their own. Submissions stay single-row through the
//! store's uniqueness constraints and phase changes through versioned game
//! writes, so an expired lock degrades to a `Busy`/`Conflict` error rather than
//! duplicated data.

pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::{error::Error, fmt, future::Future, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServiceError;

pub use self::memory::MemoryLockService;

/// Result alias for lock backend operations.
pub type LockResult<T> = Result<T, LockError>;

/// Failure talking to the lock backend (contention is not an error).
#[derive(Debug, Error)]
#[error("lock backend failed for `{key}`")]
pub struct LockError {
    key: String,
    #[source]
    source: Box<dyn Error + Send + Sync>,
}

impl LockError {
    pub fn backend(key: &str, source: impl Error + Send + Sync + 'static) -> Self {
        Self {
            key: key.to_owned(),
            source: Box::new(source),
        }
    }
}

/// Proof of ownership returned by a successful acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockToken(Uuid);

impl LockToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.simple().fmt(f)
    }
}

/// Shared mutual-exclusion primitive with automatic expiry.
pub trait LockService: Send + Sync {
    /// Take `key` for at most `ttl`. Returns `None` immediately when someone else holds it.
    fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'static, LockResult<Option<LockToken>>>;

    /// Release `key` if it is still owned by `token`.
    fn release(&self, key: &str, token: LockToken) -> BoxFuture<'static, LockResult<()>>;
}

/// Well-known lock names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockKey(String);

impl LockKey {
    /// Serialises submissions of one author within a game.
    pub fn answer(game_id: Uuid, author_id: &str) -> Self {
        Self(format!("answer:{game_id}:{author_id}"))
    }

    /// Guards every write to a game's phase, round and target fields.
    pub fn phase_transition(game_id: Uuid) -> Self {
        Self(format!("game:{game_id}:phase_transition"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bounded retry used by internal, threshold-driven acquisitions.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

/// Held lock. Call [`LockGuard::release`]; dropping an unreleased guard
/// releases it from a background task.
pub struct LockGuard {
    locks: Arc<dyn LockService>,
    key: LockKey,
    token: LockToken,
    released: bool,
}

impl LockGuard {
    /// Acquire `key` or fail with [`ServiceError::Busy`] without waiting.
    pub async fn acquire(
        locks: &Arc<dyn LockService>,
        key: LockKey,
        ttl: Duration,
    ) -> Result<Self, ServiceError> {
        match locks.try_acquire(key.as_str(), ttl).await? {
            Some(token) => Ok(Self::held(locks, key, token)),
            None => {
                debug!(lock = %key, "lock contended");
                Err(ServiceError::Busy(key.to_string()))
            }
        }
    }

    /// Acquire `key`, retrying while contended. `Ok(None)` once attempts are exhausted.
    pub async fn acquire_with_retry(
        locks: &Arc<dyn LockService>,
        key: LockKey,
        ttl: Duration,
        policy: RetryPolicy,
    ) -> Result<Option<Self>, ServiceError> {
        for attempt in 0..policy.attempts.max(1) {
            if attempt > 0 {
                sleep(policy.delay).await;
            }
            if let Some(token) = locks.try_acquire(key.as_str(), ttl).await? {
                return Ok(Some(Self::held(locks, key, token)));
            }
        }
        debug!(lock = %key, attempts = policy.attempts, "lock still contended after retries");
        Ok(None)
    }

    fn held(locks: &Arc<dyn LockService>, key: LockKey, token: LockToken) -> Self {
        Self {
            locks: Arc::clone(locks),
            key,
            token,
            released: false,
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Release the lock, logging (not propagating) backend failures: the TTL
    /// reclaims the key either way.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(err) = self.locks.release(self.key.as_str(), self.token).await {
            warn!(lock = %self.key, error = %err, "failed to release lock");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(lock = %self.key, "lock dropped outside a runtime; waiting for ttl expiry");
            return;
        };

        let release = self.locks.release(self.key.as_str(), self.token);
        let key = self.key.clone();
        handle.spawn(async move {
            if let Err(err) = release.await {
                warn!(lock = %key, error = %err, "failed to release dropped lock");
            }
        });
    }
}

/// Run `work` while holding `key`, failing fast with `Busy` when contended.
/// The lock is released whatever the outcome of `work`.
pub async fn with_lock<F, Fut, T>(
    locks: &Arc<dyn LockService>,
    key: LockKey,
    ttl: Duration,
    work: F,
) -> Result<T, ServiceError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let guard = LockGuard::acquire(locks, key, ttl).await?;
    let outcome = work().await;
    guard.release().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locks() -> Arc<dyn LockService> {
        Arc::new(MemoryLockService::new())
    }

    #[test]
    fn keys_follow_naming_scheme() {
        let game = Uuid::nil();
        assert_eq!(
            LockKey::answer(game, "p2").as_str(),
            "answer:00000000-0000-0000-0000-000000000000:p2"
        );
        assert_eq!(
            LockKey::phase_transition(game).as_str(),
            "game:00000000-0000-0000-0000-000000000000:phase_transition"
        );
    }

    #[tokio::test]
    async fn contended_acquire_fails_fast_with_busy() {
        let locks = locks();
        let key = LockKey::phase_transition(Uuid::new_v4());
        let held = LockGuard::acquire(&locks, key.clone(), Duration::from_secs(5))
            .await
            .unwrap();

        let err = LockGuard::acquire(&locks, key.clone(), Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::Busy(_)));

        held.release().await;
        assert!(
            LockGuard::acquire(&locks, key, Duration::from_secs(5))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn with_lock_releases_after_error() {
        let locks = locks();
        let key = LockKey::answer(Uuid::new_v4(), "p3");

        let result: Result<(), _> = with_lock(&locks, key.clone(), Duration::from_secs(5), || async {
            Err(ServiceError::EmptyContent)
        })
        .await;
        assert!(matches!(result, Err(ServiceError::EmptyContent)));

        let again = with_lock(&locks, key, Duration::from_secs(5), || async { Ok(7) }).await;
        assert_eq!(again.unwrap(), 7);
    }

    #[tokio::test]
    async fn dropped_guard_is_released_in_background() {
        let locks = locks();
        let key = LockKey::answer(Uuid::new_v4(), "p4");
        let guard = LockGuard::acquire(&locks, key.clone(), Duration::from_secs(30))
            .await
            .unwrap();
        drop(guard);
        tokio::task::yield_now().await;

        assert!(
            LockGuard::acquire(&locks, key, Duration::from_secs(5))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn retry_gives_up_after_attempts() {
        let locks = locks();
        let key = LockKey::phase_transition(Uuid::new_v4());
        let _held = LockGuard::acquire(&locks, key.clone(), Duration::from_secs(30))
            .await
            .unwrap();

        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let outcome = LockGuard::acquire_with_retry(&locks, key, Duration::from_secs(5), policy)
            .await
            .unwrap();
        assert!(outcome.is_none());
    }
}
