// Cooperative cancellation for device operations.
//
// A `CancelToken` is a cloneable atomic flag with optional parent linkage.
// Async code awaits `cancelled()`; blocking serial loops poll `is_cancelled()`
// between reads. Child scopes let the retry executor bound a single attempt
// without tearing down the caller's signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll interval for the async `cancelled()` future.
const CANCEL_POLL: Duration = Duration::from_millis(25);

#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    flag: AtomicBool,
    parent: Option<CancelToken>,
}

impl CancelToken {
    /// A fresh, uncancelled root token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Derive a subordinate scope: cancelling the parent cancels the child,
    /// cancelling the child leaves the parent live.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::Release);
    }

    /// True when this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.flag.load(Ordering::Acquire) {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// Completes once the token is cancelled. Polls the flag so it composes
    /// with blocking work running off-runtime.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            tokio::time::sleep(CANCEL_POLL).await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
