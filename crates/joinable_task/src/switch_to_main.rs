// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `SwitchToMainThreadAsync` (C6): the awaitable that resumes the rest of its caller's `async fn`
//! on the main thread.
//!
//! Its `poll` deliberately never relies on `cx.waker()` for the main-thread-bound case. Instead it
//! pushes a continuation directly onto the owning task's `main_queue` that re-polls the task's own
//! top-level driver future; since that driver future's `.await` chain ordinarily forwards whatever
//! `Context` it was polled with straight down to this leaf (the normal behavior of Rust's
//! async/await desugaring), re-polling the *task* from the pump is equivalent to, and replaces,
//! waking this future specifically. This is what makes the resumption land inside the pump's own
//! continuation-execution step rather than wherever an arbitrary waker happened to be registered.

use crate::cancellation::CancellationToken;
use crate::context::JoinableTaskContext;
use crate::error::Error;
use crate::factory::{self, JoinableTaskFactory};
use crate::ids::TaskId;
use crate::task::TaskInner;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

enum State {
    Start,
    Scheduled { redirected_to_pool: Arc<AtomicBool> },
    Done,
}

/// The `Future` returned by [`crate::factory::JoinableTaskFactory::switch_to_main_thread_async`].
pub struct SwitchToMainThreadAsync {
    factory: JoinableTaskFactory,
    task: Arc<TaskInner>,
    cancel: Option<CancellationToken>,
    state: State,
}

impl SwitchToMainThreadAsync {
    pub(crate) fn new(factory: JoinableTaskFactory, task: Arc<TaskInner>, cancel: Option<CancellationToken>) -> Self {
        Self {
            factory,
            task,
            cancel,
            state: State::Start,
        }
    }

    fn ctx(&self) -> &JoinableTaskContext {
        factory::context_of(&self.factory)
    }

    fn task_id(&self) -> TaskId {
        self.task.id
    }
}

impl Future for SwitchToMainThreadAsync {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: no field is ever pinned/projected; every field is itself `Unpin`.
        let this = unsafe { self.get_unchecked_mut() };
        loop {
            if let Some(token) = &this.cancel {
                if token.is_cancelled() {
                    this.state = State::Done;
                    return Poll::Ready(Err(Error::Cancelled));
                }
            }

            match &this.state {
                State::Start => {
                    if this.ctx().is_main_thread_now() {
                        this.state = State::Done;
                        return Poll::Ready(Ok(()));
                    }

                    let redirected_to_pool = Arc::new(AtomicBool::new(false));
                    if let Some(token) = &this.cancel {
                        let flag = redirected_to_pool.clone();
                        token.on_cancel(move || flag.store(true, Ordering::Release));
                    }

                    let factory = this.factory.clone();
                    let task = this.task.clone();
                    let task_id = this.task_id();
                    let redirected = redirected_to_pool.clone();
                    factory::schedule_main_reentry(&factory, &task, move || {
                        if redirected.load(Ordering::Acquire) {
                            tracing::trace!(task = %task_id, "switch-to-main cancelled before dispatch, redirecting to pool");
                            factory::redirect_cancelled_resumption(&factory, &task);
                        } else {
                            factory::resume_task_on_main(&factory, &task);
                        }
                    });

                    this.state = State::Scheduled { redirected_to_pool };
                    return Poll::Pending;
                }
                State::Scheduled { redirected_to_pool } => {
                    // Unlike the `Start` arm's synchronous check, this does not consult the
                    // "always yield" test override: once the pump has genuinely dispatched this
                    // continuation on the main thread, it must complete, regardless of whether the
                    // override is forcing the *next* `SwitchToMainThreadAsync` to suspend again.
                    if this.ctx().is_structurally_main_thread() {
                        this.state = State::Done;
                        return Poll::Ready(Ok(()));
                    }
                    if redirected_to_pool.load(Ordering::Acquire) {
                        // Cancellation raced the dispatch; the loop head above already checked
                        // `self.cancel` and will report it next time round. Re-poll the ready check
                        // defensively in case cancellation is reported through some other path.
                        return Poll::Pending;
                    }
                    // Spurious re-entry while still queued: nothing to do but keep waiting.
                    return Poll::Pending;
                }
                State::Done => {
                    panic!("SwitchToMainThreadAsync polled after completion");
                }
            }
        }
    }
}

impl std::fmt::Debug for SwitchToMainThreadAsync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchToMainThreadAsync").field("task", &self.task.id).finish_non_exhaustive()
    }
}
