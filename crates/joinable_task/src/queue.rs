// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The single-execution queue (C1): a FIFO of pending continuations, drainable one at a time
//! under a gate.
//!
//! This is deliberately the simplest piece of the system. Each [`crate::task::JoinableTask`]
//! owns two of these: one for continuations that must run on the main thread, one for
//! continuations that may run on any worker (kept mostly for accounting, per the data model).
//! There is no wake-up signal attached to the queue itself: a push only calls
//! [`crate::context::HostDispatcher::wake_main_thread`], a best-effort nudge for a host with its
//! own idle notification. [`crate::pump::run_pump_on_main`]'s own re-check of every admitted
//! queue is driven by its short `IDLE_WAIT` poll interval, not by any per-push event, so a host
//! using [`crate::context::NoopHostDispatcher`] still makes progress, just on that interval.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// A boxed unit of work posted to a [`ContinuationQueue`].
pub(crate) type Continuation = Box<dyn FnOnce() + Send>;

/// FIFO of continuations belonging to a single task.
///
/// Closing the queue (invariant 1 of the data model: a continuation is either run or discarded
/// because the owner completed) drops every remaining entry and rejects further pushes.
pub(crate) struct ContinuationQueue {
    items: Mutex<VecDeque<Continuation>>,
    closed: AtomicBool,
}

impl ContinuationQueue {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends `continuation` to the back of the queue. Returns `false`, dropping `continuation`,
    /// if the queue has already been closed.
    pub(crate) fn push(&self, continuation: Continuation) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut items = self.items.lock();
        // Re-check under the lock: a close() may have raced us between the load above and
        // acquiring the lock.
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        items.push_back(continuation);
        true
    }

    /// Removes and returns the front of the queue, if any, without blocking.
    pub(crate) fn try_pop(&self) -> Option<Continuation> {
        self.items.lock().pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Marks the queue closed and drops every pending continuation (invariant 1, case b).
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.items.lock().clear();
    }
}

impl std::fmt::Debug for ContinuationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationQueue")
            .field("len", &self.items.lock().len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = ContinuationQueue::new();
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            assert!(queue.push(Box::new(move || log.lock().push(i))));
        }
        while let Some(c) = queue.try_pop() {
            c();
        }
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn close_drops_pending_and_rejects_new() {
        let queue = ContinuationQueue::new();
        let ran = std::sync::Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        assert!(queue.push(Box::new(move || ran2.store(true, Ordering::SeqCst))));
        queue.close();
        assert!(queue.try_pop().is_none());
        assert!(!ran.load(Ordering::SeqCst));
        assert!(!queue.push(Box::new(|| {})));
    }
}
