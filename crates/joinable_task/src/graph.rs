// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The dependency closure `D(T)` (invariant 3): a BFS over the join graph's arena, re-derived on
//! demand rather than cached, since the graph mutates from arbitrary threads at arbitrary times
//! (§4.3: closures are "recomputed lazily on next pump cycle").
//!
//! Per the re-architecture notes (§9), this graph is represented as an id-indexed arena with a
//! shared edge table rather than owning pointers, precisely because joins may form cycles
//! (invariant 4) and an owning-pointer representation cannot express that without leaking or
//! requiring `Weak` gymnastics at every edge.

use crate::ids::TaskId;
use crate::task::{TaskArena, reachable};
use std::collections::HashSet;

/// Computes the effective dependency set of a synchronously-blocking task rooted at `root`,
/// additionally unioned with the closures of `cooperating_roots` — the roots of any outer,
/// currently-paused pump frames on the same thread (§4.2, "Nested Run": "the inner pump
/// cooperates with the outer's admission set so that a task relevant to the outer pump remains
/// relevant in the inner").
pub(crate) fn dependency_closure(
    arena: &TaskArena,
    root: TaskId,
    cooperating_roots: &[TaskId],
) -> HashSet<TaskId> {
    let mut roots = Vec::with_capacity(1 + cooperating_roots.len());
    roots.push(root);
    roots.extend_from_slice(cooperating_roots);
    reachable(arena, roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskInner;
    use dashmap::DashMap;

    fn task() -> std::sync::Arc<TaskInner> {
        TaskInner::new(crate::ids::next_task_id(), std::thread::current().id())
    }

    #[test]
    fn union_with_cooperating_roots() {
        let arena: TaskArena = DashMap::new();
        let outer = task();
        let inner = task();
        let unrelated = task();
        for t in [&outer, &inner, &unrelated] {
            arena.insert(t.id, t.clone());
        }
        let set = dependency_closure(&arena, inner.id, &[outer.id]);
        assert!(set.contains(&inner.id));
        assert!(set.contains(&outer.id));
        assert!(!set.contains(&unrelated.id));
    }
}
