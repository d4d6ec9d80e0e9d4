//! Reentrant mutual exclusion keyed by an explicit caller identity.
//!
//! An [`IdentityLock`] is owned by whoever presents the [`LockToken`] that
//! first acquired it, not by the task or thread that happens to be running.
//! The same token may re-enter any number of times; other tokens wait until
//! the depth returns to zero. Waiting is notification based, never a spin.
//!
//! ```rust
//! use gridmud::lock::{IdentityLock, LockToken};
//!
//! # tokio_test::block_on(async {
//! let lock = IdentityLock::new();
//! let token = LockToken::generate();
//! let outer = lock.acquire(&token).await;
//! let inner = lock.acquire(&token).await; // reentrant, does not block
//! assert_eq!(lock.depth(), 2);
//! drop(inner);
//! drop(outer);
//! assert!(lock.holder().is_none());
//! # });
//! ```
//!
//! There is no timeout on [`IdentityLock::acquire`]: a holder that never
//! releases starves every other token. Callers that cannot accept that use
//! [`IdentityLock::acquire_timeout`].

use log::error;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

/// Identity presented to an [`IdentityLock`]. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(Arc<str>);

impl LockToken {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Fresh random token (UUID v4).
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Release attempted by a token that does not hold the lock. Always a caller bug.
    #[error("lock released by {token} but held by {holder:?}")]
    NotHolder {
        token: String,
        holder: Option<String>,
    },

    #[error("timed out after {0:?} waiting for lock")]
    Timeout(Duration),
}

#[derive(Debug, Default)]
struct LockState {
    holder: Option<LockToken>,
    depth: u32,
}

#[derive(Debug, Default)]
pub struct IdentityLock {
    state: Mutex<LockState>,
    released: Notify,
}

impl IdentityLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        // The state is two plain fields; a panic elsewhere cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_enter(&self, token: &LockToken) -> bool {
        let mut state = self.state();
        match &state.holder {
            None => {
                state.holder = Some(token.clone());
                state.depth = 1;
                true
            }
            Some(holder) if holder == token => {
                state.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Acquire without waiting. Returns `None` if another token holds the lock.
    pub fn try_acquire(&self, token: &LockToken) -> Option<IdentityGuard<'_>> {
        self.try_enter(token).then(|| IdentityGuard {
            lock: self,
            token: token.clone(),
        })
    }

    /// Acquire, waiting for as long as it takes.
    pub async fn acquire(&self, token: &LockToken) -> IdentityGuard<'_> {
        loop {
            // Register interest before checking so a release between the
            // check and the await is not lost.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_enter(token) {
                return IdentityGuard {
                    lock: self,
                    token: token.clone(),
                };
            }
            notified.await;
        }
    }

    /// Bounded variant of [`acquire`](Self::acquire).
    pub async fn acquire_timeout(
        &self,
        token: &LockToken,
        wait: Duration,
    ) -> Result<IdentityGuard<'_>, LockError> {
        tokio::time::timeout(wait, self.acquire(token))
            .await
            .map_err(|_| LockError::Timeout(wait))
    }

    /// Decrement the depth held by `token`, freeing the lock at zero.
    ///
    /// Prefer the guard returned by `acquire`; this exists for callers that
    /// track depth by hand.
    pub fn release(&self, token: &LockToken) -> Result<(), LockError> {
        let mut state = self.state();
        match &state.holder {
            Some(holder) if holder == token => {}
            other => {
                let err = LockError::NotHolder {
                    token: token.to_string(),
                    holder: other.as_ref().map(|h| h.to_string()),
                };
                error!("identity lock violation: {}", err);
                return Err(err);
            }
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.holder = None;
            drop(state);
            self.released.notify_waiters();
        }
        Ok(())
    }

    /// Run `body` with the lock held by `token`; released on every exit path.
    pub async fn with_lock<F, Fut, T>(&self, token: &LockToken, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(token).await;
        body().await
    }

    pub fn holder(&self) -> Option<LockToken> {
        self.state().holder.clone()
    }

    pub fn depth(&self) -> u32 {
        self.state().depth
    }

    pub fn is_held_by(&self, token: &LockToken) -> bool {
        self.state().holder.as_ref() == Some(token)
    }
}

/// Releases one level of an [`IdentityLock`] when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct IdentityGuard<'a> {
    lock: &'a IdentityLock,
    token: LockToken,
}

impl IdentityGuard<'_> {
    pub fn token(&self) -> &LockToken {
        &self.token
    }
}

impl fmt::Debug for IdentityGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityGuard")
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(&self.token) {
            if !std::thread::panicking() {
                panic!("identity guard released a lock it did not hold: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn same_token_reenters_without_blocking() {
        let lock = IdentityLock::new();
        let token = LockToken::new("a");
        let g1 = lock.acquire(&token).await;
        let g2 = tokio::time::timeout(Duration::from_millis(100), lock.acquire(&token))
            .await
            .expect("reentrant acquire must not block");
        assert_eq!(lock.depth(), 2);
        drop(g2);
        assert_eq!(lock.depth(), 1);
        assert!(lock.is_held_by(&token));
        drop(g1);
        assert!(lock.holder().is_none());
    }

    #[tokio::test]
    async fn other_token_waits_until_depth_returns_to_zero() {
        let lock = Arc::new(IdentityLock::new());
        let a = LockToken::new("a");
        let b = LockToken::new("b");

        let g1 = lock.acquire(&a).await;
        let g2 = lock.acquire(&a).await;
        assert!(lock.try_acquire(&b).is_none());

        let waiter = {
            let lock = lock.clone();
            let b = b.clone();
            tokio::spawn(async move {
                let _g = lock.acquire(&b).await;
                lock.holder()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(g2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "depth 1 must still exclude b");
        drop(g1);

        let seen = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(seen, Some(b));
        assert!(lock.holder().is_none());
    }

    #[test]
    fn release_by_non_holder_is_rejected() {
        let lock = IdentityLock::new();
        let a = LockToken::new("a");
        let b = LockToken::new("b");
        assert!(matches!(
            lock.release(&a),
            Err(LockError::NotHolder { holder: None, .. })
        ));

        let guard = lock.try_acquire(&a).unwrap();
        let err = lock.release(&b).unwrap_err();
        assert_eq!(
            err,
            LockError::NotHolder {
                token: "b".into(),
                holder: Some("a".into())
            }
        );
        assert_eq!(lock.depth(), 1);
        drop(guard);
    }

    #[tokio::test]
    async fn with_lock_releases_on_early_error() {
        let lock = IdentityLock::new();
        let token = LockToken::new("a");
        let res: Result<(), &str> = lock
            .with_lock(&token, || async {
                assert!(lock.is_held_by(&token));
                Err("boom")
            })
            .await;
        assert!(res.is_err());
        assert!(lock.holder().is_none());
    }

    #[tokio::test]
    async fn bounded_acquire_times_out_against_stuck_holder() {
        let lock = IdentityLock::new();
        let _stuck = lock.acquire(&LockToken::new("stuck")).await;
        let err = lock
            .acquire_timeout(&LockToken::new("b"), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert_eq!(err, LockError::Timeout(Duration::from_millis(30)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stress_many_tokens_keep_exclusion() {
        let lock = Arc::new(IdentityLock::new());
        let inside = Arc::new(AtomicU32::new(0));
        let total = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for i in 0..32 {
            let lock = lock.clone();
            let inside = inside.clone();
            let total = total.clone();
            tasks.push(tokio::spawn(async move {
                let token = LockToken::new(format!("t{}", i));
                for _ in 0..50 {
                    let _outer = lock.acquire(&token).await;
                    let _inner = lock.acquire(&token).await;
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    total.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(total.load(Ordering::SeqCst), 32 * 50);
        assert!(lock.holder().is_none());
        assert_eq!(lock.depth(), 0);
    }
}
