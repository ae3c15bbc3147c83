// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`JoinableTaskContext`] (C4): the process-/instance-wide anchor identifying the main thread,
//! the host's post sink, and owning the task arena that the join graph is built on top of.

use crate::ambient::RelevanceSuppressionScope;
use crate::collection::JoinableTaskCollection;
use crate::factory::JoinableTaskFactory;
use crate::ids::CollectionId;
use crate::task::TaskArena;
use anyspawn::Spawner;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

/// The host-provided main-thread post sink (§1, "out of scope: the underlying main-thread
/// message pump"). Its only job is to nudge an idle main thread that new admitted work may be
/// waiting; it never carries the continuation itself, which always travels through a task's own
/// queue (see [`crate::queue::ContinuationQueue`]) so that filtering stays intact.
pub trait HostDispatcher: Send + Sync + std::fmt::Debug {
    /// Wakes the main thread if it is idle, so it re-checks its admitted queues.
    fn wake_main_thread(&self);
}

/// A [`HostDispatcher`] for hosts and tests that have no wake-up mechanism beyond the pump's own
/// polling: the pump already re-checks its queues on a short interval, so this is correctly a
/// no-op rather than a missing feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHostDispatcher;

impl HostDispatcher for NoopHostDispatcher {
    fn wake_main_thread(&self) {}
}

pub(crate) struct ContextInner {
    pub(crate) main_thread: Option<ThreadId>,
    pub(crate) dispatcher: Arc<dyn HostDispatcher>,
    pub(crate) spawner: Spawner,
    pub(crate) arena: TaskArena,
    always_yield: AtomicBool,
}

/// Process-/instance-wide anchor for one main-thread/worker-pool coordination domain.
///
/// Cheaply cloneable; every clone refers to the same underlying task arena and main-thread
/// identity, matching the data model's "one `Ctx` per application domain, instantiated
/// explicitly" (§5, reentrancy discipline) rather than a hidden process-global singleton.
#[derive(Clone)]
pub struct JoinableTaskContext {
    pub(crate) inner: Arc<ContextInner>,
}

impl JoinableTaskContext {
    /// Creates a context with a distinguished main thread, a host dispatcher, and a spawner for
    /// the underlying worker pool.
    #[must_use]
    pub fn new(main_thread: ThreadId, dispatcher: Arc<dyn HostDispatcher>, spawner: Spawner) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                main_thread: Some(main_thread),
                dispatcher,
                spawner,
                arena: DashMap::new(),
                always_yield: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a context for a host with no main thread at all (property 7: "all entry points
    /// work when no main-thread sync context is installed; main-thread switch is a no-op").
    #[must_use]
    pub fn without_main_thread(spawner: Spawner) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                main_thread: None,
                dispatcher: Arc::new(NoopHostDispatcher),
                spawner,
                arena: DashMap::new(),
                always_yield: AtomicBool::new(false),
            }),
        }
    }

    /// `true` iff the calling thread is the designated main thread and "always yield" test mode
    /// is not engaged (§4.1's `is-ready` check for `SwitchToMainThreadAsync`).
    #[must_use]
    pub fn is_main_thread_now(&self) -> bool {
        if self.inner.always_yield.load(Ordering::Relaxed) {
            return false;
        }
        match self.inner.main_thread {
            Some(main) => std::thread::current().id() == main,
            // No main thread sync context installed: treated as a no-op, i.e. always "ready".
            None => true,
        }
    }

    #[must_use]
    pub(crate) fn has_main_thread(&self) -> bool {
        self.inner.main_thread.is_some()
    }

    /// Like [`Self::is_main_thread_now`] but ignores the "always yield" test override: used by
    /// [`crate::pump`] to decide which blocking strategy to use, which must not be perturbed by a
    /// test forcing `SwitchToMainThreadAsync` to always suspend.
    #[must_use]
    pub(crate) fn is_structurally_main_thread(&self) -> bool {
        match self.inner.main_thread {
            Some(main) => std::thread::current().id() == main,
            None => true,
        }
    }

    pub(crate) fn wake_main_thread(&self) {
        self.inner.dispatcher.wake_main_thread();
    }

    pub(crate) fn arena(&self) -> &TaskArena {
        &self.inner.arena
    }

    pub(crate) fn spawner(&self) -> &Spawner {
        &self.inner.spawner
    }

    /// Forces `SwitchToMainThreadAsync`'s `is-ready` check to always report "not ready", even
    /// when already on the main thread. Used by tests that need to force an explicit hop through
    /// the pump instead of observing the (also valid) same-thread fast path.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_always_yield_for_test(&self, yes: bool) {
        self.inner.always_yield.store(yes, Ordering::Relaxed);
    }

    /// Creates a new, empty [`JoinableTaskCollection`] anchored to this context.
    #[must_use]
    pub fn create_collection(&self) -> JoinableTaskCollection {
        JoinableTaskCollection::new(self.clone(), CollectionId::next())
    }

    /// Creates a [`JoinableTaskFactory`] whose tasks are registered into `collection`.
    #[must_use]
    pub fn create_factory(&self, collection: JoinableTaskCollection) -> JoinableTaskFactory {
        JoinableTaskFactory::new(self.clone(), collection)
    }

    /// Opens a scope during which newly created tasks do not attach to the ambient task as
    /// children (§4.4, C8).
    #[must_use]
    pub fn suppress_relevance(&self) -> RelevanceSuppressionScope {
        RelevanceSuppressionScope::enter()
    }
}

impl std::fmt::Debug for JoinableTaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinableTaskContext")
            .field("main_thread", &self.inner.main_thread)
            .field("tasks", &self.inner.arena.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_main_thread_is_always_ready() {
        let ctx = JoinableTaskContext::without_main_thread(Spawner::new_custom(|fut| {
            std::thread::spawn(move || futures::executor::block_on(fut));
        }));
        assert!(ctx.is_main_thread_now());
    }

    #[test]
    fn always_yield_overrides_same_thread_check() {
        let ctx = JoinableTaskContext::new(
            std::thread::current().id(),
            Arc::new(NoopHostDispatcher),
            Spawner::new_custom(|fut| {
                std::thread::spawn(move || futures::executor::block_on(fut));
            }),
        );
        assert!(ctx.is_main_thread_now());
        ctx.set_always_yield_for_test(true);
        assert!(!ctx.is_main_thread_now());
    }
}
