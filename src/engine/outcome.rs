//! Run outcomes and result records.

use crate::error::{StageError, TaskError};
use crate::tasks::Name;

/// Result of one task: the value on success, the error otherwise (never both).
pub type TaskResult<O> = Result<O, TaskError>;

/// Result recorded by a pipeline for one stage: a summary on success, the failure record otherwise.
pub type StageResult = Result<String, StageError>;

/// Structured outcome of [`Stage::run`](crate::Stage::run) and [`Pipeline::run`](crate::Pipeline::run).
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Everything ran and succeeded.
    Succeeded,
    /// Execution halted.
    ///
    /// `at` is the first failed task for a stage, or the failed stage for a pipeline.
    Failed {
        /// Where execution halted.
        at: Name,
    },
}

impl Outcome {
    /// True for [`Outcome::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    /// Name of the failing task or stage, if any.
    pub fn failed_at(&self) -> Option<&str> {
        match self {
            Outcome::Succeeded => None,
            Outcome::Failed { at } => Some(at),
        }
    }
}
