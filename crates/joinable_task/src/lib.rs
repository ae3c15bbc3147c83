// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cooperative coordination between a main-thread-affinitized caller and a multithreaded worker
//! pool, modeled on the `JoinableTaskFactory`/`JoinableTask` pattern: a task created off the main
//! thread can still ask to resume on it, and a caller blocked on the main thread can still make
//! progress on foreign async work, as long as it has explicitly admitted that work into its join
//! graph.
//!
//! The entry points are [`JoinableTaskContext`], which anchors one main-thread/worker-pool
//! coordination domain, and [`JoinableTaskFactory`], created from it, which creates and drives
//! [`JoinableTask`](task)s:
//!
//! ```no_run
//! use anyspawn::Spawner;
//! use joinable_task::{JoinableTaskContext, NoopHostDispatcher};
//! use std::sync::Arc;
//!
//! let ctx = JoinableTaskContext::new(std::thread::current().id(), Arc::new(NoopHostDispatcher), Spawner::new_tokio());
//! let collection = ctx.create_collection();
//! let factory = ctx.create_factory(collection);
//!
//! let inner = factory.clone();
//! let result = factory.run(move || async move {
//!     inner.switch_to_main_thread_async(None).await.unwrap();
//!     42
//! });
//! ```

mod ambient;
mod cancellation;
mod collection;
mod completion;
mod context;
mod error;
mod factory;
mod graph;
mod handle;
mod ids;
mod pump;
mod queue;
mod scheduler;
mod switch_to_main;
mod task;
mod transition;

pub use cancellation::CancellationToken;
pub use collection::{JoinScope, JoinableTaskCollection};
pub use context::{HostDispatcher, JoinableTaskContext, NoopHostDispatcher};
pub use error::{Error, Result};
pub use factory::JoinableTaskFactory;
pub use handle::JoinableHandle;
pub use ids::{CollectionId, TaskId};
pub use pump::run_nested_frame_on_main;
pub use scheduler::{MainThreadScheduler, ThreadPoolScheduler};
pub use switch_to_main::SwitchToMainThreadAsync;
pub use task::TaskState;
pub use transition::{CountingTransitionHooks, TransitionHooks};
pub use ambient::RelevanceSuppressionScope;
