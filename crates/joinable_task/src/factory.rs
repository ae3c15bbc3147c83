// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`JoinableTaskFactory`] (C5): creates [`crate::task::JoinableTask`]s, drives their futures, and
//! implements the re-entrant blocking loop (`Run`) together with [`crate::pump`].

use crate::ambient;
use crate::cancellation::CancellationToken;
use crate::collection::JoinableTaskCollection;
use crate::completion;
use crate::context::JoinableTaskContext;
use crate::error::Error;
use crate::handle::JoinableHandle;
use crate::ids::{TaskId, next_task_id};
use crate::pump;
use crate::scheduler::{MainThreadScheduler, ThreadPoolScheduler};
use crate::switch_to_main::SwitchToMainThreadAsync;
use crate::task::TaskInner;
use crate::transition::TransitionHooks;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context, Poll, Waker};

pub(crate) struct FactoryInner {
    ctx: JoinableTaskContext,
    collection: JoinableTaskCollection,
    hooks: Mutex<Vec<Arc<dyn TransitionHooks>>>,
}

/// Creates and drives [`crate::task::JoinableTask`]s belonging to a single
/// [`JoinableTaskCollection`], anchored to one [`JoinableTaskContext`].
///
/// Cheaply cloneable; every clone shares the same collection and hook list.
#[derive(Clone)]
pub struct JoinableTaskFactory {
    inner: Arc<FactoryInner>,
}

impl JoinableTaskFactory {
    pub(crate) fn new(ctx: JoinableTaskContext, collection: JoinableTaskCollection) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                ctx,
                collection,
                hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn context(&self) -> &JoinableTaskContext {
        &self.inner.ctx
    }

    #[must_use]
    pub fn collection(&self) -> &JoinableTaskCollection {
        &self.inner.collection
    }

    /// Registers a [`TransitionHooks`] observer. Hooks are fired in registration order.
    pub fn add_transition_hook(&self, hook: Arc<dyn TransitionHooks>) {
        self.inner.hooks.lock().push(hook);
    }

    #[must_use]
    pub fn main_thread_scheduler(&self) -> MainThreadScheduler {
        MainThreadScheduler::new(self.clone())
    }

    #[must_use]
    pub fn thread_pool_scheduler(&self) -> ThreadPoolScheduler {
        ThreadPoolScheduler::new(self.clone())
    }

    fn new_task(&self) -> Arc<TaskInner> {
        let id = next_task_id();
        let started_on_main = self.inner.ctx.is_main_thread_now();
        let task = TaskInner::with_initial_thread_affinity(id, std::thread::current().id(), started_on_main);
        self.inner.ctx.arena().insert(id, task.clone());
        task.set_collection(self.inner.collection.clone());
        self.inner.collection.add_member(id);
        if let Some(parent) = ambient::parent_for_new_task() {
            if let Some(parent_task) = self.inner.ctx.arena().get(&parent) {
                parent_task.add_child(id);
            }
        }
        task
    }

    /// `SwitchToMainThreadAsync`'s task: the ambient task if one exists, otherwise a transient
    /// free-floating task bound to this factory's collection (§4.1).
    pub(crate) fn ambient_or_free_floating_task(&self) -> Arc<TaskInner> {
        if let Some(id) = ambient::current() {
            if let Some(task) = self.inner.ctx.arena().get(&id) {
                return task.clone();
            }
        }
        tracing::trace!("switch_to_main_thread_async with no ambient task; creating a free-floating task");
        self.new_task()
    }

    /// `RunAsync(f)`: creates the task, runs `f`'s synchronous prefix under the new ambient task,
    /// and drives the resulting future's first poll before returning the handle.
    pub fn run_async<F, Fut, T>(&self, body: F) -> JoinableHandle<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let task = self.new_task();
        let (tx, rx) = completion::channel::<Result<T, Error>>();
        let slot: Arc<Mutex<Option<completion::Sender<Result<T, Error>>>>> = Arc::new(Mutex::new(Some(tx)));

        let panic_slot = slot.clone();
        *task.on_panic.lock() = Some(Box::new(move |payload| {
            if let Some(sender) = panic_slot.lock().take() {
                sender.set(Err(Error::Panicked(panic_message(&payload))));
            }
        }));

        // `body()` only constructs the future; it does not run any of its code. The ambient task
        // for the actual synchronous prefix (and every later resumption) is established by
        // `AmbientScope` below, around every poll rather than around this construction step.
        let user_future = body();
        let complete_slot = slot.clone();
        let inner = async move {
            let value = user_future.await;
            if let Some(sender) = complete_slot.lock().take() {
                sender.set(Ok(value));
            }
        };
        let boxed: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(ambient::AmbientScope::new(task.id, inner));

        let handle = JoinableHandle::new(task.clone(), self.inner.ctx.clone(), rx);
        poll_task(&self.inner.ctx, &task, Some(boxed));
        handle
    }

    /// `Run(f)`: `RunAsync` followed immediately by a blocking `Join`.
    pub fn run<F, Fut, T>(&self, body: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_async(body).join()
    }

    /// `CompleteSynchronously(collection, future)`: equivalent to
    /// `Run(async || future.await)`, with `collection` already acting as the ambient task's
    /// join-set for the duration (§4.1), so main-thread work posted by `future` that was
    /// registered against `collection` is admitted without a separate explicit `Join()`.
    pub fn complete_synchronously<Fut, T>(&self, collection: &JoinableTaskCollection, future: Fut) -> Result<T, Error>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let collection = collection.clone();
        self.run(move || async move {
            let _scope = collection.join().expect("complete_synchronously's own run() body is always ambient");
            future.await
        })
    }

    /// Returns the awaitable described in §4.1: ready immediately if already on the main thread
    /// (and not in "always yield" test mode), otherwise suspends until the pump dispatches this
    /// continuation on the main thread.
    #[must_use]
    pub fn switch_to_main_thread_async(&self, cancel: Option<CancellationToken>) -> SwitchToMainThreadAsync {
        let task = self.ambient_or_free_floating_task();
        SwitchToMainThreadAsync::new(self.clone(), task, cancel)
    }

    fn fire_transitioning(&self, task: TaskId) {
        let hooks = self.inner.hooks.lock().clone();
        for hook in &hooks {
            hook.on_transitioning_to_main_thread(task);
        }
    }

    fn fire_transitioned(&self, task: TaskId, cancelled: bool) {
        let hooks = self.inner.hooks.lock().clone();
        for hook in &hooks {
            hook.on_transitioned_to_main_thread(task, cancelled);
        }
    }
}

impl std::fmt::Debug for JoinableTaskFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinableTaskFactory").field("collection", &self.inner.collection).finish_non_exhaustive()
    }
}

pub(crate) fn context_of(factory: &JoinableTaskFactory) -> &JoinableTaskContext {
    &factory.inner.ctx
}

/// Pushes `job` onto `task`'s main-thread queue and nudges the host dispatcher. Used by
/// [`crate::switch_to_main::SwitchToMainThreadAsync`] to schedule its own resumption instead of
/// relying on the ambient `Waker` (see that module's doc comment).
pub(crate) fn schedule_main_reentry(factory: &JoinableTaskFactory, task: &Arc<TaskInner>, job: impl FnOnce() + Send + 'static) {
    if task.main_queue.push(Box::new(job)) {
        factory.inner.ctx.wake_main_thread();
    }
}

/// Resumes `task`'s driver future on the main thread, firing transition hooks around a genuine
/// thread hop (§4.7).
pub(crate) fn resume_task_on_main(factory: &JoinableTaskFactory, task: &Arc<TaskInner>) {
    if task.is_completed() {
        return;
    }
    let was_main = task.was_last_segment_on_main();
    if !was_main {
        factory.fire_transitioning(task.id);
    }
    poll_task(&factory.inner.ctx, task, None);
    task.note_segment_ran_on_main(true);
    if !was_main {
        factory.fire_transitioned(task.id, false);
    }
}

/// Re-polls `task` on a pool thread without ever touching the main thread: the redirection target
/// for a `SwitchToMainThreadAsync` whose cancellation raced its own dispatch (§4.1, "cancellation
/// ... must NOT land on the main thread").
pub(crate) fn redirect_cancelled_resumption(factory: &JoinableTaskFactory, task: &Arc<TaskInner>) {
    let ctx = factory.inner.ctx.clone();
    let task = task.clone();
    let _ = ctx.spawner().spawn(async move {
        poll_task(&ctx, &task, None);
    });
}

/// Reschedules `task` for a pool-thread continuation: pushed into `task.pool_queue` for a worker
/// thread that is already inline-draining its own queue (§4.2, "worker-thread sync block"), and
/// additionally handed to the ambient spawner as a fire-and-forget job — whichever drains the
/// queue entry first wins; `try_pop` makes the race safe.
pub(crate) fn schedule_pool_reentry(ctx: &JoinableTaskContext, task: &Arc<TaskInner>) {
    let ctx_for_job = ctx.clone();
    let task_for_job = task.clone();
    let pushed = task.pool_queue.push(Box::new(move || {
        poll_task(&ctx_for_job, &task_for_job, None);
    }));
    if !pushed {
        return;
    }
    let ctx = ctx.clone();
    let task = task.clone();
    let _ = ctx.spawner().spawn(async move {
        if let Some(job) = task.pool_queue.try_pop() {
            job();
        }
    });
}

struct PoolWaker {
    ctx: JoinableTaskContext,
    task: Arc<TaskInner>,
}

impl std::task::Wake for PoolWaker {
    fn wake(self: Arc<Self>) {
        Self::wake_by_ref(&self)
    }

    fn wake_by_ref(self: &Arc<Self>) {
        schedule_pool_reentry(&self.ctx, &self.task);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "joined task panicked with a non-string payload".to_string()
    }
}

/// Drives one poll cycle of `task`'s future, either the freshly constructed one (`fresh`,
/// supplied only by [`JoinableTaskFactory::run_async`]'s initial synchronous poll) or whatever was
/// left in `task.future_slot` by a previous suspension.
///
/// A no-op if the task already completed, or if nothing is available to poll (already being
/// driven elsewhere, or the continuation that scheduled this call lost a race).
pub(crate) fn poll_task(ctx: &JoinableTaskContext, task: &Arc<TaskInner>, fresh: Option<Pin<Box<dyn Future<Output = ()> + Send>>>) {
    if task.is_completed() {
        return;
    }
    let mut future = match fresh {
        Some(future) => future,
        None => match task.future_slot.lock().take() {
            Some(future) => future,
            None => return,
        },
    };

    let waker: Waker = Arc::new(PoolWaker {
        ctx: ctx.clone(),
        task: task.clone(),
    })
    .into();
    let mut cx = Context::from_waker(&waker);

    let poll_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

    match poll_result {
        Ok(Poll::Ready(())) => {
            let synchronous = !task.ever_pended.load(Ordering::Acquire);
            tracing::trace!(task = %task.id, synchronous, "task completed");
            task.mark_completed(synchronous);
            crate::task::maybe_dispose(ctx.arena(), task.id);
        }
        Ok(Poll::Pending) => {
            task.ever_pended.store(true, Ordering::Release);
            *task.future_slot.lock() = Some(future);
        }
        Err(payload) => {
            tracing::debug!(task = %task.id, "task future panicked while polling");
            drop(future);
            if let Some(hook) = task.on_panic.lock().take() {
                hook(payload);
            }
            task.mark_completed(false);
            crate::task::maybe_dispose(ctx.arena(), task.id);
        }
    }
}
