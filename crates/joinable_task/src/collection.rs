// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`JoinableTaskCollection`] (C3): a named set of tasks over which callers may establish joins.

use crate::ambient;
use crate::context::JoinableTaskContext;
use crate::ids::{CollectionId, TaskId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::hash_map::Entry;
use std::sync::Arc;

struct CollectionInner {
    ctx: JoinableTaskContext,
    id: CollectionId,
    members: Mutex<HashSet<TaskId>>,
    /// Open `Join()` scopes: joiner task -> how many concurrently-open scopes it holds (property
    /// 10, self-join idempotence). Used so a *new* member added while scopes are open gets edges
    /// retroactively (§4.3).
    active_joins: Mutex<HashMap<TaskId, usize>>,
}

/// A named set of [`crate::task::JoinableTask`]s. Tasks created by a
/// [`crate::factory::JoinableTaskFactory`] are automatically members of that factory's
/// collection; a collection may also be joined directly by unrelated code.
#[derive(Clone)]
pub struct JoinableTaskCollection {
    inner: Arc<CollectionInner>,
}

/// A disposable scope opened by [`JoinableTaskCollection::join`]. While held, the task that was
/// ambient when `join` was called admits every member of the collection (and any member added
/// later, while the scope is still open) into its dependency closure. Dropping the scope removes
/// those edges.
#[must_use = "dropping this immediately closes the join; bind it to a variable for the duration of the dependency"]
pub struct JoinScope {
    collection: JoinableTaskCollection,
    joiner: TaskId,
    members_at_open: Vec<TaskId>,
}

impl JoinableTaskCollection {
    pub(crate) fn new(ctx: JoinableTaskContext, id: CollectionId) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                ctx,
                id,
                members: Mutex::new(HashSet::new()),
                active_joins: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn id(&self) -> CollectionId {
        self.inner.id
    }

    /// Registers `task` as a member, retroactively opening edges from every currently-open
    /// joiner into it (§4.3: "adding a new task to K while a scope is open must propagate").
    pub(crate) fn add_member(&self, task: TaskId) {
        self.inner.members.lock().insert(task);
        let active = self.inner.active_joins.lock();
        for joiner in active.keys() {
            if let Some(joiner_task) = self.inner.ctx.arena().get(joiner) {
                joiner_task.join_edge_open(task);
                if let Some(new_member_task) = self.inner.ctx.arena().get(&task) {
                    new_member_task.inc_dependents();
                }
            }
        }
    }

    /// Removes `task` from this collection's membership set. Called once a task has been
    /// disposed from the arena (see [`crate::task::maybe_dispose`]); harmless if `task` was
    /// never a member or already removed.
    pub(crate) fn remove_member(&self, task: TaskId) {
        self.inner.members.lock().remove(&task);
    }

    /// Explicitly disposes this collection: clears its membership set and any still-open join
    /// bookkeeping. Per the data model, collections are not disposed implicitly — an
    /// application that creates one and is done with it should call this so that no lingering
    /// membership set keeps padding [`crate::graph::dependency_closure`] traversals.
    ///
    /// Any [`JoinScope`]s already open against this collection remain valid; they still close
    /// their own edges normally on drop.
    pub fn dispose(&self) {
        self.inner.members.lock().clear();
        self.inner.active_joins.lock().clear();
    }

    pub(crate) fn members_snapshot(&self) -> Vec<TaskId> {
        self.inner.members.lock().iter().copied().collect()
    }

    /// Opens a join scope on behalf of the ambient task, admitting every current (and
    /// subsequently added) member of this collection into that task's dependency closure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misuse`](crate::error::Error::Misuse) if called outside of any
    /// `JoinableTaskFactory::run`/`run_async` body (there is no ambient task for the edge to
    /// originate from) — see §7, "misuse" error kind.
    pub fn join(&self) -> crate::error::Result<JoinScope> {
        let Some(joiner) = ambient::current() else {
            return Err(crate::error::Error::misuse(
                "JoinableTaskCollection::join() called outside of an ambient JoinableTask",
            ));
        };
        *self.inner.active_joins.lock().entry(joiner).or_insert(0) += 1;

        let members = self.members_snapshot();
        if let Some(joiner_task) = self.inner.ctx.arena().get(&joiner) {
            for member in &members {
                joiner_task.join_edge_open(*member);
                if let Some(member_task) = self.inner.ctx.arena().get(member) {
                    member_task.inc_dependents();
                }
            }
        }

        tracing::trace!(joiner = %joiner, collection = %self.inner.id, members = members.len(), "join scope opened");
        Ok(JoinScope {
            collection: self.clone(),
            joiner,
            members_at_open: members,
        })
    }
}

impl std::fmt::Debug for JoinableTaskCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinableTaskCollection")
            .field("id", &self.inner.id)
            .field("members", &self.inner.members.lock().len())
            .finish_non_exhaustive()
    }
}

impl Drop for JoinScope {
    fn drop(&mut self) {
        let arena = self.collection.inner.ctx.arena();
        if let Some(joiner_task) = arena.get(&self.joiner) {
            for member in &self.members_at_open {
                joiner_task.join_edge_close(*member);
            }
        }
        for member in &self.members_at_open {
            if let Some(member_task) = arena.get(member) {
                member_task.dec_dependents();
                drop(member_task);
            }
            crate::task::maybe_dispose(arena, *member);
        }
        let mut active = self.collection.inner.active_joins.lock();
        if let Entry::Occupied(mut entry) = active.entry(self.joiner) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
        tracing::trace!(joiner = %self.joiner, collection = %self.collection.inner.id, "join scope closed");
    }
}

impl std::fmt::Debug for JoinScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinScope").field("joiner", &self.joiner).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoopHostDispatcher;
    use anyspawn::Spawner;

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
    fn double_join_is_idempotent_at_baseline() {
        let ctx = ctx();
        let collection = ctx.create_collection();
        let joiner = crate::ids::next_task_id();
        let joiner_task = crate::task::TaskInner::new(joiner, std::thread::current().id());
        ctx.arena().insert(joiner, joiner_task.clone());
        let member = crate::ids::next_task_id();
        collection.add_member(member);

        ambient::with_ambient(joiner, || {
            let scope1 = collection.join().unwrap();
            let scope2 = collection.join().unwrap();
            assert_eq!(joiner_task.joins.lock().get(&member).copied(), Some(2));
            drop(scope1);
            assert_eq!(joiner_task.joins.lock().get(&member).copied(), Some(1));
            drop(scope2);
            assert!(!joiner_task.joins.lock().contains_key(&member));
        });
    }

    #[test]
    fn member_added_while_joined_gets_retroactive_edge() {
        let ctx = ctx();
        let collection = ctx.create_collection();
        let joiner = crate::ids::next_task_id();
        let joiner_task = crate::task::TaskInner::new(joiner, std::thread::current().id());
        ctx.arena().insert(joiner, joiner_task.clone());

        ambient::with_ambient(joiner, || {
            let _scope = collection.join().unwrap();
            let late_member = crate::ids::next_task_id();
            collection.add_member(late_member);
            assert!(joiner_task.joins.lock().contains_key(&late_member));
        });
    }

    #[test]
    fn join_outside_ambient_task_is_a_misuse_error() {
        let ctx = ctx();
        let collection = ctx.create_collection();
        let err = collection.join().unwrap_err();
        assert!(matches!(err, crate::error::Error::Misuse(_)));
    }

    #[test]
    fn completed_member_with_no_dependents_is_disposed_on_scope_close() {
        let ctx = ctx();
        let collection = ctx.create_collection();
        let joiner = crate::ids::next_task_id();
        let joiner_task = crate::task::TaskInner::new(joiner, std::thread::current().id());
        ctx.arena().insert(joiner, joiner_task);
        let member = crate::ids::next_task_id();
        let member_task = crate::task::TaskInner::new(member, std::thread::current().id());
        member_task.set_collection(collection.clone());
        ctx.arena().insert(member, member_task.clone());
        collection.add_member(member);

        ambient::with_ambient(joiner, || {
            let scope = collection.join().unwrap();
            member_task.mark_completed(true);
            drop(scope);
        });

        assert!(ctx.arena().get(&member).is_none());
        assert!(!collection.inner.members.lock().contains(&member));
    }
}
