//! Cancellation token shared by every public async entry point.
//!
//! Retry backoff waits select on [`CancellationToken::cancelled`], so a
//! cancel request aborts a pending wait immediately instead of letting it run
//! out. Cloned tokens share state.

use crate::error::CovpagesError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cancellation token for cooperative cancellation of async operations.
///
/// # Example
///
/// ```
/// use covpages_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every task waiting in [`Self::cancelled`].
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation has been requested.
    ///
    /// Returns immediately for an already-cancelled token.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel() is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Check cancellation and return an error if cancelled.
    pub fn check(&self) -> Result<(), CovpagesError> {
        if self.is_cancelled() {
            Err(CovpagesError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: std::time::Duration) -> Result<(), CovpagesError> {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(CovpagesError::Cancelled),
        }
    }
}
