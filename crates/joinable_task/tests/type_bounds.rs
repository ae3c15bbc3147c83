// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Compile-time `Send`/`Sync` bounds on the handles user code is expected to move across threads
//! and hold from both the main thread and worker-pool tasks.

use joinable_task::{JoinableHandle, JoinableTaskCollection, JoinableTaskContext, JoinableTaskFactory};
use static_assertions::assert_impl_all;

assert_impl_all!(JoinableTaskContext: Send, Sync);
assert_impl_all!(JoinableTaskFactory: Send, Sync);
assert_impl_all!(JoinableTaskCollection: Send, Sync);
assert_impl_all!(JoinableHandle<u32>: Send);
