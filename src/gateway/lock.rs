//! # Session Lock
//!
//! The codec and engine carry streaming state for exactly one conversation,
//! so at most one chat session may be active per process. `SessionLock` is an
//! async mutex created once at startup and handed to the gateway; each session
//! holds its `SessionGuard` for its whole lifetime.
//!
//! ## Rust Concepts:
//! - **OwnedMutexGuard**: a guard that owns an `Arc` of the mutex, so it can be
//!   stored inside an actor instead of borrowing from a local
//! - **Drop**: releasing the lock is just dropping the guard

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct SessionLock {
    inner: Arc<Mutex<()>>,
}

/// Proof of exclusive access; the lock is released when this is dropped.
#[derive(Debug)]
pub struct SessionGuard {
    _guard: OwnedMutexGuard<()>,
    acquired_at: Instant,
}

impl SessionGuard {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other session holds the lock. Waiters are served in
    /// arrival order.
    pub async fn acquire(&self) -> SessionGuard {
        let guard = self.inner.clone().lock_owned().await;
        SessionGuard {
            _guard: guard,
            acquired_at: Instant::now(),
        }
    }

    /// Whether some session currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A second acquire waits until the first guard is dropped.
    #[tokio::test]
    async fn test_second_acquire_blocks_until_release() {
        let lock = SessionLock::new();
        let first = lock.acquire().await;
        assert!(lock.is_held());

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("second session never got the lock")
            .unwrap();
        assert!(lock.is_held());
        drop(second);
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_guard_tracks_hold_time() {
        let lock = SessionLock::new();
        let guard = lock.acquire().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(guard.held_for() >= Duration::from_millis(5));
    }
}
