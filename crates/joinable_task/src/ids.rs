// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Stable identifiers for tasks and collections.
//!
//! The join graph is cyclic by design (invariant 4 of the data model), so it is kept as an
//! arena of nodes keyed by these ids rather than as owning pointers between tasks.

use std::sync::atomic::{AtomicU64, Ordering};

/// A stable identifier for a [`crate::task::JoinableTask`].
///
/// Ids are process-wide monotonically increasing and never reused, so a dangling reference to a
/// completed task's id is harmless: arena lookups simply miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// A stable identifier for a [`crate::collection::JoinableTaskCollection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(u64);

impl CollectionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "collection#{}", self.0)
    }
}

pub(crate) fn next_task_id() -> TaskId {
    TaskId::next()
}
