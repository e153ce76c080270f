//! # Execution engine: task groups, stages and pipelines.
//!
//! ```text
//! Pipeline ──► Stage 1 ──► Stage 2 ──► ...        (ascending sequence_id, halt on failure)
//!                │
//!                ├─► TaskGroup 1 (Parallel)       fan out, join in completion order
//!                └─► TaskGroup 2 (Sequential)     one by one, stop at first failure
//!                        │
//!                        └─► runner::run_task     spawn + race against the stage timeout
//! ```
//!
//! Every object is assembled first (`register`), validated when `run` is called, and runs
//! exactly once. Results are inspected afterwards through accessors.

mod group;
mod outcome;
mod pipeline;
mod runner;
mod stage;

pub use group::{Dispatch, TaskGroup};
pub use outcome::{Outcome, StageResult, TaskResult};
pub use pipeline::Pipeline;
pub use runner::TimeoutPolicy;
pub use stage::Stage;
