// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A minimal cancellation token, since none of the workspace's other crates ship one and the
//! distilled spec treats cancellation tokens as an assumed-standard primitive (§1) rather than
//! part of the core design.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

struct Inner {
    cancelled: AtomicBool,
    on_cancel: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

/// A cooperative cancellation signal shareable across threads.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Signals cancellation, running every callback registered via [`Self::on_cancel`] that has
    /// not already run.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.on_cancel.lock());
        for callback in callbacks {
            callback();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Registers `callback` to run when cancellation is signalled, or immediately if it has
    /// already happened.
    pub(crate) fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        if self.is_cancelled() {
            callback();
            return;
        }
        let mut callbacks = self.inner.on_cancel.lock();
        if self.is_cancelled() {
            drop(callbacks);
            callback();
            return;
        }
        callbacks.push(Box::new(callback));
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_runs_registered_callback() {
        let token = CancellationToken::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        token.on_cancel(move || ran2.store(true, Ordering::SeqCst));
        assert!(!ran.load(Ordering::SeqCst));
        token.cancel();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn callback_registered_after_cancel_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        token.on_cancel(move || ran2.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }
}
