// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`MainThreadScheduler`] and [`ThreadPoolScheduler`]: plain-closure scheduling handles usable
//! wherever user code wants an explicit "run this on main"/"run this on the pool" primitive
//! without awaiting [`crate::switch_to_main::SwitchToMainThreadAsync`] — e.g. from a callback
//! registered with some other library's own executor abstraction (§9, "the `Factory` exposes
//! explicit `spawn_on_main`, `spawn_on_pool`").

use crate::factory::JoinableTaskFactory;

/// Schedules closures to run on the factory's main thread, going through the ambient (or
/// free-floating) task's main-thread queue exactly as `SwitchToMainThreadAsync` does, so the
/// scheduled work participates in the same dependency-closure filtering while the main thread is
/// blocked inside a `Run`.
#[derive(Clone, Debug)]
pub struct MainThreadScheduler {
    factory: JoinableTaskFactory,
}

impl MainThreadScheduler {
    pub(crate) fn new(factory: JoinableTaskFactory) -> Self {
        Self { factory }
    }

    /// Schedules `job` to run on the main thread. Always goes through the ambient (or
    /// free-floating) task's main-thread queue and nudges the host dispatcher, even if the
    /// calling thread already is the main thread — there is no inline fast path, since `job` must
    /// still be admitted by whatever `Run`/`Join` pump is (or later becomes) responsible for
    /// draining this task's queue, exactly like [`JoinableTaskFactory::switch_to_main_thread_async`].
    /// If nothing is currently pumping that queue, `job` simply waits until something does.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        let task = self.factory.ambient_or_free_floating_task();
        let factory = self.factory.clone();
        crate::factory::schedule_main_reentry(&factory, &task, job);
    }
}

/// Schedules closures to run on the underlying thread pool via the context's [`anyspawn::Spawner`].
#[derive(Clone, Debug)]
pub struct ThreadPoolScheduler {
    factory: JoinableTaskFactory,
}

impl ThreadPoolScheduler {
    pub(crate) fn new(factory: JoinableTaskFactory) -> Self {
        Self { factory }
    }

    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.factory.context().spawner().spawn(async move { job() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{JoinableTaskContext, NoopHostDispatcher};
    use anyspawn::Spawner;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ctx() -> JoinableTaskContext {
        JoinableTaskContext::new(
            std::thread::current().id(),
            Arc::new(NoopHostDispatcher),
            Spawner::new_custom(|fut| {
                std::thread::spawn(move || futures::executor::block_on(fut));
            }),
        )
    }

    #[test]
    fn thread_pool_scheduler_runs_job() {
        let ctx = ctx();
        let collection = ctx.create_collection();
        let factory = ctx.create_factory(collection);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        factory.thread_pool_scheduler().schedule(move || ran2.store(true, Ordering::SeqCst));
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(ran.load(Ordering::SeqCst));
    }
}
