// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// A specialized `Result` type for `joinable_task` operations that return an [`Error`] on
/// failure.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the `joinable_task` coordinator.
///
/// This is an umbrella type covering programming errors (e.g. misuse of the API from outside
/// the expected scope) as well as the terminal outcomes of a joined task's completion.
///
/// Specific enum variants may provide additional detail. Future versions may add additional enum
/// variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller made a mistake: an operation that requires an ambient task, a joined
    /// collection, or some other precondition was invoked outside of it.
    #[error("{0}")]
    Misuse(String),

    /// The awaited task was cancelled before it produced a value.
    #[error("the task was cancelled")]
    Cancelled,

    /// The awaited task's future panicked while being polled.
    #[error("the task panicked: {0}")]
    Panicked(String),

    /// We are re-packaging a join failure from the underlying spawner without adding further
    /// detail in this layer.
    #[error(transparent)]
    Spawner(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub(crate) fn misuse(message: impl Into<String>) -> Self {
        Self::Misuse(message.into())
    }
}
