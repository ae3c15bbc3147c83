// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`JoinableTask`] (C2): a running, possibly-completed async operation, together with its
//! main-thread and thread-pool continuation queues and its position in the join graph.

use crate::ids::TaskId;
use crate::queue::{Continuation, ContinuationQueue};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::thread::ThreadId;

/// The lifecycle state of a [`JoinableTask`], monotonic toward completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// The task's future has not yet resolved.
    Running,
    /// The task's future resolved during the initial, synchronous call to `RunAsync`/`Run`,
    /// before returning to the caller.
    CompletedSynchronously,
    /// The task's future resolved after at least one suspension.
    CompletedAsynchronously,
}

const STATE_RUNNING: u8 = 0;
const STATE_COMPLETED_SYNC: u8 = 1;
const STATE_COMPLETED_ASYNC: u8 = 2;

/// The internal, shared state of a joinable task. Kept behind an `Arc` so the graph, the queues,
/// and any outstanding handles can all observe the same task without owning pointers crossing the
/// (possibly cyclic) join graph — see the id/arena note in [`crate::graph`].
pub(crate) struct TaskInner {
    pub(crate) id: TaskId,
    pub(crate) owner_thread: ThreadId,
    state: AtomicU8,
    /// `true` once the future has been polled to completion and ready for pump purposes; kept
    /// separate from `state` so a reader doesn't need to match on the enum for a hot-path check.
    completed: AtomicBool,
    pub(crate) main_queue: ContinuationQueue,
    pub(crate) pool_queue: ContinuationQueue,
    pub(crate) child_tasks: Mutex<Vec<TaskId>>,
    /// Outgoing join edges: tasks this task currently admits into its own dependency closure,
    /// edge-counted to support nested `Join()` scopes on the same collection. Stored as outgoing
    /// edges (rather than the data model's `joinedBy`, which is the same graph viewed from the
    /// other side) because the pump only ever needs a forward BFS from a blocker's root.
    pub(crate) joins: Mutex<std::collections::HashMap<TaskId, usize>>,
    pub(crate) synchronously_blocking: AtomicBool,
    /// The boxed driver future. Taken out while being polled so the poll itself does not hold
    /// the lock (the future may, transitively, try to touch this same task through the ambient
    /// slot, e.g. to push onto its own queue).
    pub(crate) future_slot: Mutex<Option<Pin<Box<dyn Future<Output = ()> + Send>>>>,
    /// Whether the most recently executed segment of this task's work ran on the main thread.
    /// Used to decide whether dispatching the *next* main-thread segment is a real transition
    /// (§4.7: hooks fire only on an actual thread hop, never when staying put).
    pub(crate) last_segment_was_main: AtomicBool,
    /// Set the first time a poll of this task's future returns `Pending`; used to distinguish
    /// `CompletedSynchronously` from `CompletedAsynchronously` at completion time.
    pub(crate) ever_pended: AtomicBool,
    /// Type-erased hook run by the driver when a poll of this task's future panics, so the
    /// (generically typed) completion channel captured in the future itself can still be
    /// resolved even though the future is abandoned mid-panic rather than run to its own
    /// completion line. `None` for tasks with no completion consumer (e.g. the transient
    /// free-floating tasks `SwitchToMainThreadAsync` creates when there is no ambient task).
    #[allow(clippy::type_complexity)]
    pub(crate) on_panic: Mutex<Option<Box<dyn FnOnce(Box<dyn std::any::Any + Send>) + Send>>>,
    /// Count of currently-open `Join()` scopes elsewhere that admit this task into their
    /// dependency closure. A completed task with no dependents left is disposed (removed from
    /// the arena and its owning collection) rather than padding every future BFS forever (§3,
    /// "removed from collections after its last dependent releases").
    dependents: AtomicUsize,
    /// The collection this task was registered into at creation, used only to prune it from
    /// that collection's membership set once disposed. `None` for tasks created without ever
    /// going through `JoinableTaskFactory::new_task` (e.g. unit-test fixtures).
    collection: Mutex<Option<crate::collection::JoinableTaskCollection>>,
}

impl TaskInner {
    pub(crate) fn new(id: TaskId, owner_thread: ThreadId) -> Arc<Self> {
        Self::with_initial_thread_affinity(id, owner_thread, false)
    }

    pub(crate) fn with_initial_thread_affinity(id: TaskId, owner_thread: ThreadId, started_on_main: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            owner_thread,
            state: AtomicU8::new(STATE_RUNNING),
            completed: AtomicBool::new(false),
            main_queue: ContinuationQueue::new(),
            pool_queue: ContinuationQueue::new(),
            child_tasks: Mutex::new(Vec::new()),
            joins: Mutex::new(std::collections::HashMap::new()),
            synchronously_blocking: AtomicBool::new(false),
            future_slot: Mutex::new(None),
            last_segment_was_main: AtomicBool::new(started_on_main),
            ever_pended: AtomicBool::new(false),
            on_panic: Mutex::new(None),
            dependents: AtomicUsize::new(0),
            collection: Mutex::new(None),
        })
    }

    /// Records the collection this task was registered into, so it can be pruned from that
    /// collection's membership set once disposed.
    pub(crate) fn set_collection(&self, collection: crate::collection::JoinableTaskCollection) {
        *self.collection.lock() = Some(collection);
    }

    pub(crate) fn inc_dependents(&self) {
        self.dependents.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dec_dependents(&self) {
        self.dependents.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn note_segment_ran_on_main(&self, is_main: bool) {
        self.last_segment_was_main.store(is_main, Ordering::Release);
    }

    pub(crate) fn was_last_segment_on_main(&self) -> bool {
        self.last_segment_was_main.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> TaskState {
        match self.state.load(Ordering::Acquire) {
            STATE_COMPLETED_SYNC => TaskState::CompletedSynchronously,
            STATE_COMPLETED_ASYNC => TaskState::CompletedAsynchronously,
            _ => TaskState::Running,
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Transitions to a completed state and closes both queues (invariant 1). `synchronous` is
    /// true iff the future resolved before the task's creator observed a single suspension.
    pub(crate) fn mark_completed(&self, synchronous: bool) {
        let target = if synchronous { STATE_COMPLETED_SYNC } else { STATE_COMPLETED_ASYNC };
        self.state.store(target, Ordering::Release);
        self.completed.store(true, Ordering::Release);
        self.main_queue.close();
        self.pool_queue.close();
    }

    pub(crate) fn add_child(&self, child: TaskId) {
        self.child_tasks.lock().push(child);
    }

    /// Opens (or re-counts) a join edge from this task to `target`.
    pub(crate) fn join_edge_open(&self, target: TaskId) {
        *self.joins.lock().entry(target).or_insert(0) += 1;
    }

    /// Closes one instance of a join edge from this task to `target`, removing it entirely once
    /// its count reaches zero.
    pub(crate) fn join_edge_close(&self, target: TaskId) {
        let mut joins = self.joins.lock();
        if let std::collections::hash_map::Entry::Occupied(mut entry) = joins.entry(target) {
            let count = entry.get_mut();
            *count -= 1;
            if *count == 0 {
                entry.remove();
            }
        }
    }

    pub(crate) fn outgoing_edges(&self, out: &mut Vec<TaskId>) {
        out.extend(self.joins.lock().keys().copied());
        out.extend(self.child_tasks.lock().iter().copied());
    }
}

impl std::fmt::Debug for TaskInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInner")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("synchronously_blocking", &self.synchronously_blocking.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Shared arena of every live task, keyed by id. A `DashMap` rather than a single `Mutex<HashMap>`
/// so that unrelated tasks' bookkeeping (queue pushes, edge changes) does not serialize against
/// each other; graph traversals (see [`crate::graph`]) still observe a consistent-enough snapshot
/// because each node's own edge set is read under its own lock.
pub(crate) type TaskArena = DashMap<TaskId, Arc<TaskInner>>;

/// Pushes `continuation` onto `task`'s main-thread queue, returning whether it was accepted
/// (i.e. the task had not already completed).
pub(crate) fn push_main(task: &Arc<TaskInner>, continuation: Continuation) -> bool {
    task.main_queue.push(continuation)
}

/// Removes `id` from `arena` (and from the collection it was registered into) once it has
/// completed and nothing still admits it into a dependency closure. Safe to call speculatively:
/// a task with live dependents, an unfinished future, or a still-live child is left untouched,
/// since the BFS in [`crate::graph`] may still need to reach it or something beyond it.
pub(crate) fn maybe_dispose(arena: &TaskArena, id: TaskId) {
    let Some(task) = arena.get(&id) else { return };
    if !task.is_completed() || task.dependents.load(Ordering::Acquire) != 0 {
        return;
    }
    if task.child_tasks.lock().iter().any(|child| arena.contains_key(child)) {
        return;
    }
    let owning_collection = task.collection.lock().clone();
    drop(task);
    arena.remove(&id);
    if let Some(collection) = owning_collection {
        collection.remove_member(id);
    }
}

/// Collects every id reachable from `roots` by following join and child-creation edges,
/// deduplicated (invariant 4: cycles must not cause an infinite walk).
pub(crate) fn reachable(arena: &TaskArena, roots: impl IntoIterator<Item = TaskId>) -> HashSet<TaskId> {
    let mut seen = HashSet::new();
    let mut stack: Vec<TaskId> = roots.into_iter().collect();
    let mut edges = Vec::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(task) = arena.get(&id) {
            edges.clear();
            task.outgoing_edges(&mut edges);
            stack.extend(edges.iter().copied());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_inner() -> Arc<TaskInner> {
        TaskInner::new(crate::ids::next_task_id(), std::thread::current().id())
    }

    #[test]
    fn mark_completed_closes_queues() {
        let task = new_inner();
        assert!(task.main_queue.push(Box::new(|| {})));
        task.mark_completed(true);
        assert_eq!(task.state(), TaskState::CompletedSynchronously);
        assert!(task.is_completed());
        assert!(task.main_queue.try_pop().is_none());
        assert!(!task.main_queue.push(Box::new(|| {})));
    }

    #[test]
    fn join_edges_are_counted() {
        let a = new_inner();
        let b = new_inner();
        a.join_edge_open(b.id);
        a.join_edge_open(b.id);
        assert_eq!(a.joins.lock().get(&b.id).copied(), Some(2));
        a.join_edge_close(b.id);
        assert_eq!(a.joins.lock().get(&b.id).copied(), Some(1));
        a.join_edge_close(b.id);
        assert!(!a.joins.lock().contains_key(&b.id));
    }

    #[test]
    fn reachable_handles_cycles() {
        let arena: TaskArena = DashMap::new();
        let a = new_inner();
        let b = new_inner();
        arena.insert(a.id, a.clone());
        arena.insert(b.id, b.clone());
        a.join_edge_open(b.id);
        b.join_edge_open(a.id);
        let set = reachable(&arena, [a.id]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a.id) && set.contains(&b.id));
    }
}
