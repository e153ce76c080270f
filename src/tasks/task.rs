//! # Task abstraction.
//!
//! This module defines the [`Task`] trait (async, with a cancel notification hook).
//! The common handle type is [`TaskRef`], an `Arc<dyn Task<I, O>>` suitable for sharing
//! between task groups and the detached execution units the engine spawns.
//!
//! A task receives a [`CancellationToken`] derived from the run context. The engine only
//! checks cancellation *before* a task starts; once `process` is running, observing the
//! token is up to the task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Stable identifier of a task or stage; keys result storage.
pub type Name = Arc<str>;

/// Shared handle to a task.
pub type TaskRef<I, O> = Arc<dyn Task<I, O>>;

/// # Atomic unit of work.
///
/// A `Task` has a stable [`name`](Task::name), an async [`process`](Task::process) method and a
/// [`cancel`](Task::cancel) hook. Input and output are opaque to the engine.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use async_trait::async_trait;
/// use stagevisor::{Task, TaskError};
///
/// struct Multiplier {
///     factor: i64,
/// }
///
/// #[async_trait]
/// impl Task<i64, i64> for Multiplier {
///     fn name(&self) -> &str { "multiplier" }
///
///     async fn process(&self, _ctx: CancellationToken, input: i64) -> Result<i64, TaskError> {
///         Ok(input * self.factor)
///     }
/// }
/// ```
#[async_trait]
pub trait Task<I, O>: Send + Sync + 'static
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Returns a stable, human-readable task name (unique within its stage).
    fn name(&self) -> &str;

    /// Performs the work.
    ///
    /// Long-running implementations should watch `ctx` (it fires on external cancellation,
    /// pipeline deadline, and on timeout under [`TimeoutPolicy::CancelOnTimeout`](crate::TimeoutPolicy)).
    async fn process(&self, ctx: CancellationToken, input: I) -> Result<O, TaskError>;

    /// Notification that the task did not complete successfully.
    ///
    /// Receives the original input and the triggering error. Not a compensating action:
    /// panics raised here are caught and logged, never surfaced.
    fn cancel(&self, _input: &I, _err: &TaskError) {}
}
