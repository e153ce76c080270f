//! # Task abstractions.
//!
//! This module provides the core task-related types:
//! - [`Task`] - trait for implementing async units of work with a cancel hook
//! - [`TaskFn`] - function-backed task implementation
//! - [`TaskRef`] - shared reference to a task (`Arc<dyn Task<I, O>>`)
//! - [`Name`] - stable task/stage identifier used as result key

mod task;
mod task_fn;

pub use task::{Name, Task, TaskRef};
pub use task_fn::TaskFn;
