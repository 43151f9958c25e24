//! Shutdown coordination: a one-shot quit broadcast plus a live-session
//! counter that callers can wait on until it drains to zero.
//!
//! The quit signal is a [`CancellationToken`]. Every observer (the accept loop
//! and each session) holds a clone and checks it without blocking. Sessions
//! are counted through [`SessionGuard`], which decrements on drop so every
//! exit path (including unwinding) is accounted for.

use crate::error::ServerError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Inner {
    quit: CancellationToken,
    stop_requested: AtomicBool,
    live: AtomicUsize,
    drained: Notify,
}

/// Cloneable handle to the quit signal and the live-session counter.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                quit: CancellationToken::new(),
                stop_requested: AtomicBool::new(false),
                live: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Broadcast the quit signal to the accept loop and every live session.
    ///
    /// Only the first call has an effect; later calls fail with
    /// [`ServerError::AlreadyStopped`] and leave the state untouched.
    pub fn request_stop(&self) -> Result<(), ServerError> {
        if self.inner.stop_requested.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyStopped);
        }
        info!(live = self.live(), "Stop requested");
        self.inner.quit.cancel();
        Ok(())
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.inner.quit.is_cancelled()
    }

    /// A clone of the quit token for an observer.
    pub fn token(&self) -> CancellationToken {
        self.inner.quit.clone()
    }

    /// Number of sessions currently open.
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Count a new session. Must be called before the session starts handling.
    pub fn enter(&self) -> SessionGuard {
        self.inner.live.fetch_add(1, Ordering::AcqRel);
        SessionGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Wait until the live-session counter reaches zero.
    pub async fn drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            // Register before checking the counter so a decrement between the
            // check and the await still wakes us.
            notified.as_mut().enable();

            if self.live() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Block until all sessions have exited, or until `timeout` elapses.
    pub async fn drain(&self, timeout: Option<Duration>) -> Result<(), ServerError> {
        match timeout {
            None => {
                self.drained().await;
                Ok(())
            }
            Some(limit) => match tokio::time::timeout(limit, self.drained()).await {
                Ok(()) => Ok(()),
                Err(_) => Err(ServerError::DrainTimeout { live: self.live() }),
            },
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("stopping", &self.is_stopping())
            .field("live", &self.live())
            .finish()
    }
}

/// Holds one unit of the live-session count for as long as it is alive.
pub struct SessionGuard {
    inner: Arc<Inner>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let prev = self.inner.live.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "live-session counter underflow");
        if prev == 1 {
            debug!("All sessions drained");
            self.inner.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_stop_is_once() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_stopping());

        assert_ok!(shutdown.request_stop());
        assert!(shutdown.is_stopping());

        let err = assert_err!(shutdown.request_stop());
        assert!(matches!(err, ServerError::AlreadyStopped));
        assert!(shutdown.is_stopping());
    }

    #[test]
    fn test_clone_shares_signal() {
        let shutdown = Shutdown::new();
        let token = shutdown.token();
        let cloned = shutdown.clone();

        cloned.request_stop().unwrap();
        assert!(token.is_cancelled());
        assert!(shutdown.is_stopping());
    }

    #[test]
    fn test_guard_counts() {
        let shutdown = Shutdown::new();
        let a = shutdown.enter();
        let b = shutdown.enter();
        assert_eq!(shutdown.live(), 2);

        drop(a);
        assert_eq!(shutdown.live(), 1);
        drop(b);
        assert_eq!(shutdown.live(), 0);
    }

    #[tokio::test]
    async fn test_drain_with_no_sessions_returns_immediately() {
        let shutdown = Shutdown::new();
        assert_ok!(shutdown.drain(Some(Duration::from_millis(10))).await);
        assert_ok!(shutdown.drain(None).await);
    }

    #[tokio::test]
    async fn test_drain_waits_for_guards() {
        let shutdown = Shutdown::new();
        let guards: Vec<_> = (0..8).map(|_| shutdown.enter()).collect();

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.drain(Some(Duration::from_secs(5))).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        for guard in guards {
            drop(guard);
            tokio::task::yield_now().await;
        }

        assert_ok!(waiter.await.unwrap());
        assert_eq!(shutdown.live(), 0);
    }

    #[tokio::test]
    async fn test_drain_timeout_reports_live_count() {
        let shutdown = Shutdown::new();
        let _guard = shutdown.enter();

        let err = assert_err!(shutdown.drain(Some(Duration::from_millis(20))).await);
        assert!(matches!(err, ServerError::DrainTimeout { live: 1 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_guards_drain_to_zero() {
        let shutdown = Shutdown::new();
        let mut tasks = Vec::new();

        for _ in 0..200 {
            let guard = shutdown.enter();
            tasks.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                drop(guard);
            }));
        }

        assert_ok!(shutdown.drain(Some(Duration::from_secs(5))).await);
        assert_eq!(shutdown.live(), 0);
        for task in tasks {
            task.await.unwrap();
        }
    }
}
