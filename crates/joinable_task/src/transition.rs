// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Transition event hooks (C7): extensible notifications fired around main-thread
//! (re)acquisition, balanced one-for-one per actual thread hop (§4.7).

use crate::ids::TaskId;

/// Observes a [`crate::task::JoinableTask`] moving onto, and back off, the main thread.
///
/// `on_transitioning_to_main_thread` fires immediately before a continuation that had previously
/// run on another thread is dispatched on the main thread; `on_transitioned_to_main_thread` fires
/// after that dispatch returns (or resolves to cancelled). No transition fires when a
/// continuation merely stays on, or leaves, the main thread.
///
/// # Panics
///
/// Implementations that panic are not swallowed (§7): a panicking hook propagates to whichever
/// call triggered the transition, since hooks run inline on the main thread during dispatch.
pub trait TransitionHooks: Send + Sync + std::fmt::Debug {
    fn on_transitioning_to_main_thread(&self, task: TaskId);
    fn on_transitioned_to_main_thread(&self, task: TaskId, cancelled: bool);
}

/// A [`TransitionHooks`] implementation that counts firings, for tests asserting property 6
/// (transition balance) and scenario S5.
#[derive(Debug, Default)]
pub struct CountingTransitionHooks {
    transitioning: std::sync::atomic::AtomicUsize,
    transitioned: std::sync::atomic::AtomicUsize,
}

impl CountingTransitionHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn transitioning_count(&self) -> usize {
        self.transitioning.load(std::sync::atomic::Ordering::SeqCst)
    }

    #[must_use]
    pub fn transitioned_count(&self) -> usize {
        self.transitioned.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl TransitionHooks for CountingTransitionHooks {
    fn on_transitioning_to_main_thread(&self, _task: TaskId) {
        self.transitioning.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn on_transitioned_to_main_thread(&self, _task: TaskId, _cancelled: bool) {
        self.transitioned.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}
