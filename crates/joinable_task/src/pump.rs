// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The re-entrant blocking loop behind `Run`/`Join` (§4.2).
//!
//! On the main thread this is a literal pump: recompute `D(root)` (unioned with every outer,
//! currently-paused `Run` frame on this same thread, for nested-`Run` cooperation), try the
//! blocked task's own main-thread queue first, then scan the rest of the closure, and fall back
//! to a short timed wait when nothing is ready. On a worker thread there is no pump to run —
//! instead we wait on the completion channel while still inline-draining the blocked task's own
//! thread-pool queue, so a worker thread that holds `T` can never deadlock against `T`'s own
//! non-main-thread continuations (§4.2, "worker-thread sync block").

use crate::completion::Receiver;
use crate::context::JoinableTaskContext;
use crate::graph::dependency_closure;
use crate::ids::TaskId;
use std::cell::RefCell;
use std::time::Duration;

thread_local! {
    /// Roots of `Run` frames currently paused on this thread, outermost first. A nested `Run`
    /// invoked from within a continuation that an outer frame's loop is executing pushes its own
    /// root here so the outer frame's dependency closure is honored by the inner pump too.
    static ACTIVE_BLOCKERS: RefCell<Vec<TaskId>> = const { RefCell::new(Vec::new()) };
}

const IDLE_WAIT: Duration = Duration::from_millis(2);

struct StackGuard;

impl StackGuard {
    fn push(root: TaskId) -> Self {
        ACTIVE_BLOCKERS.with(|stack| stack.borrow_mut().push(root));
        Self
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        ACTIVE_BLOCKERS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

fn outer_roots() -> Vec<TaskId> {
    ACTIVE_BLOCKERS.with(|stack| stack.borrow().clone())
}

/// Blocks the calling thread until `receiver` resolves, pumping the main thread's re-entrant
/// message loop if called from it, or inline-draining `root`'s own thread-pool queue otherwise.
pub(crate) fn block_on<T>(ctx: &JoinableTaskContext, root: TaskId, receiver: Receiver<T>) -> T {
    if ctx.is_structurally_main_thread() {
        run_pump_on_main(ctx, root, receiver)
    } else {
        run_wait_on_worker(ctx, root, receiver)
    }
}

fn run_pump_on_main<T>(ctx: &JoinableTaskContext, root: TaskId, receiver: Receiver<T>) -> T {
    let outer = outer_roots();
    let _guard = StackGuard::push(root);

    loop {
        if let Some(value) = receiver.try_take() {
            return value;
        }

        if let Some(task) = ctx.arena().get(&root) {
            if let Some(job) = task.main_queue.try_pop() {
                job();
                continue;
            }
        }

        let closure = dependency_closure(ctx.arena(), root, &outer);
        let mut ran_something = false;
        for member in &closure {
            if *member == root {
                continue;
            }
            let Some(task) = ctx.arena().get(member) else { continue };
            if let Some(job) = task.main_queue.try_pop() {
                drop(task);
                job();
                ran_something = true;
                break;
            }
        }
        if ran_something {
            continue;
        }

        if let Some(value) = receiver.try_take() {
            return value;
        }
        receiver_as_timed_wait(&receiver);
    }
}

fn run_wait_on_worker<T>(ctx: &JoinableTaskContext, root: TaskId, receiver: Receiver<T>) -> T {
    loop {
        if let Some(value) = receiver.try_take() {
            return value;
        }
        if let Some(task) = ctx.arena().get(&root) {
            if let Some(job) = task.pool_queue.try_pop() {
                drop(task);
                job();
                continue;
            }
        }
        receiver_as_timed_wait(&receiver);
    }
}

fn receiver_as_timed_wait<T>(receiver: &Receiver<T>) {
    receiver.wait_timeout(IDLE_WAIT);
}

/// Our own in-process analog of the external host's nested dispatcher-loop primitive (§9, "a
/// nested-loop-push primitive with a predicate-controlled exit"): runs main-thread continuations
/// of every member of `collection` until `should_exit` reports true. Used to model scenario S3,
/// where a captured sync-context post from a worker thread must run on the main thread before a
/// host-owned nested loop frame exits, without depending on a real GUI event loop.
pub fn run_nested_frame_on_main(ctx: &JoinableTaskContext, collection: &crate::collection::JoinableTaskCollection, should_exit: impl Fn() -> bool) {
    while !should_exit() {
        let mut ran_something = false;
        for member in collection.members_snapshot() {
            let Some(task) = ctx.arena().get(&member) else { continue };
            if let Some(job) = task.main_queue.try_pop() {
                drop(task);
                job();
                ran_something = true;
            }
        }
        if !ran_something {
            std::thread::sleep(IDLE_WAIT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion;
    use crate::context::JoinableTaskContext;

    #[test]
    fn block_on_returns_immediately_when_already_ready() {
        let ctx = JoinableTaskContext::without_main_thread(anyspawn::Spawner::new_custom(|fut| {
            std::thread::spawn(move || futures::executor::block_on(fut));
        }));
        let (tx, rx) = completion::channel::<u32>();
        tx.set(9);
        let root = crate::ids::next_task_id();
        assert_eq!(block_on(&ctx, root, rx), 9);
    }
}
