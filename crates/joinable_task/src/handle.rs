// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`JoinableHandle`]: the result of [`crate::factory::JoinableTaskFactory::run_async`].
//!
//! Grounded in the shape of `oxidizer_rt`'s `LocalJoinHandle` (construct-then-await, single
//! consumption), but `Send + Sync` rather than thread-confined, since a joinable task's result
//! must be retrievable from whichever thread ends up calling `Join`/`JoinAsync` — that is the
//! entire point of the system.

use crate::completion;
use crate::error::Error;
use crate::ids::TaskId;
use crate::pump;
use crate::task::TaskInner;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A handle to a task created by [`crate::factory::JoinableTaskFactory::run_async`].
///
/// `Join()` (blocking) and `JoinAsync()` (`Future`, via [`Self::join_async`] or by awaiting the
/// handle directly) both retrieve the task's result, propagating cancellation or a panic as an
/// [`Error`], and are themselves synchronous blockers over this task's dependency closure if
/// called on the main thread (scenario S4): joining your own handle is just as re-entrant as
/// `Run`.
pub struct JoinableHandle<T> {
    pub(crate) task: Arc<TaskInner>,
    pub(crate) ctx: crate::context::JoinableTaskContext,
    pub(crate) receiver: completion::Receiver<std::result::Result<T, Error>>,
}

impl<T: Send + 'static> JoinableHandle<T> {
    pub(crate) fn new(
        task: Arc<TaskInner>,
        ctx: crate::context::JoinableTaskContext,
        receiver: completion::Receiver<std::result::Result<T, Error>>,
    ) -> Self {
        Self { task, ctx, receiver }
    }

    pub(crate) fn task_id(&self) -> TaskId {
        self.task.id
    }

    /// Blocks the calling thread until the task completes, pumping the main thread's re-entrant
    /// message loop if called from it (just like [`crate::factory::JoinableTaskFactory::run`]).
    pub fn join(self) -> std::result::Result<T, Error> {
        pump::block_on(&self.ctx, self.task.id, self.receiver)
    }

    /// The `Future` form of [`Self::join`].
    pub fn join_async(self) -> impl Future<Output = std::result::Result<T, Error>> {
        self.receiver
    }
}

impl<T: Send + 'static> Future for JoinableHandle<T> {
    type Output = std::result::Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: `receiver` is the only field ever polled and is itself `Unpin`.
        let receiver = unsafe { &mut self.get_unchecked_mut().receiver };
        Pin::new(receiver).poll(cx)
    }
}

impl<T> std::fmt::Debug for JoinableHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinableHandle").field("task", &self.task.id).finish_non_exhaustive()
    }
}
