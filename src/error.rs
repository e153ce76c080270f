//! Error types used by the stagevisor engine and tasks.
//!
//! This module defines the error enums surfaced by the engine:
//!
//! - [`TaskError`]: outcome of a single failed task (own failure, timeout, cancellation, panic).
//! - [`ConfigError`]: invalid assembly or construction (fatal, never retried).
//! - [`LimiterError`]: admission/wait failures of the [`ConcurrencyLimiter`](crate::ConcurrencyLimiter).
//! - [`StageError`]: textual failure record stored by a pipeline for a failed stage.
//! - [`HookError`]: failure reported by a stage completion hook.
//!
//! All error types provide `as_label` (stable snake_case label) for logs.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::tasks::Name;

/// # Errors produced by task execution.
///
/// Every variant marks the task as failed; the engine never retries.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task's own `process` call reported a failure (recorded verbatim).
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The task did not finish within the owning stage timeout.
    #[error("task {task} timed out after {timeout:?}")]
    Timeout {
        /// Name of the task that timed out.
        task: Name,
        /// The stage timeout that was exceeded.
        timeout: Duration,
    },

    /// The run context was already cancelled before the task started.
    #[error("task {task} cancelled before start")]
    Canceled {
        /// Name of the task that was never started.
        task: Name,
    },

    /// The task's execution unit panicked.
    #[error("task {task} panicked: {info}")]
    Panicked {
        /// Name of the task.
        task: Name,
        /// Panic payload, if it was a string.
        info: String,
    },
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    ///
    /// # Example
    /// ```
    /// use stagevisor::TaskError;
    ///
    /// let err = TaskError::fail("boom");
    /// assert_eq!(err.as_label(), "task_failed");
    /// assert_eq!(err.to_string(), "execution failed: boom");
    /// ```
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Canceled { .. } => "task_canceled",
            TaskError::Panicked { .. } => "task_panicked",
        }
    }

    /// True for engine-synthesized timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }

    /// True when the task never started because the context was cancelled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled { .. })
    }
}

/// # Assembly and construction errors.
///
/// These are fatal: the offending object is rejected and nothing runs.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A concurrency limiter was constructed with zero capacity.
    #[error("the capacity of a concurrency limiter must be greater than 0")]
    ZeroCapacity,

    /// Sequence ids start at 1.
    #[error("{scope} sequence id must be >= 1, got {id}")]
    InvalidSequence {
        /// What was being registered (`"task group"` or `"stage"`).
        scope: &'static str,
        /// The rejected id.
        id: u32,
    },

    /// Two registrations claimed the same position.
    #[error("{scope} sequence id {id} already registered")]
    DuplicateSequence {
        /// What was being registered.
        scope: &'static str,
        /// The duplicated id.
        id: u32,
    },

    /// Positions are not dense (1..=N); detected before anything runs.
    #[error("{scope} sequence ids must be dense: expected {expected}, found {found}")]
    SequenceGap {
        /// What was being validated.
        scope: &'static str,
        /// The id that should have come next.
        expected: u32,
        /// The id actually found at that position.
        found: u32,
    },

    /// Names key results, so they must be unique in their owner.
    #[error("duplicate {scope} name {name:?}")]
    DuplicateName {
        /// `"task"` or `"stage"`.
        scope: &'static str,
        /// The duplicated name.
        name: Name,
    },

    /// Stages and pipelines execute exactly once.
    #[error("{scope} {name:?} has already run")]
    AlreadyRun {
        /// `"stage"` or `"pipeline"`.
        scope: &'static str,
        /// Name of the stage or pipeline.
        name: Name,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::ZeroCapacity => "config_zero_capacity",
            ConfigError::InvalidSequence { .. } => "config_invalid_sequence",
            ConfigError::DuplicateSequence { .. } => "config_duplicate_sequence",
            ConfigError::SequenceGap { .. } => "config_sequence_gap",
            ConfigError::DuplicateName { .. } => "config_duplicate_name",
            ConfigError::AlreadyRun { .. } => "config_already_run",
        }
    }
}

/// # Errors returned by [`ConcurrencyLimiter`](crate::ConcurrencyLimiter).
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterError {
    /// The caller's context was cancelled before a slot was granted (or before all work finished).
    #[error("context cancelled")]
    Canceled,

    /// The limiter no longer admits work.
    #[error("limiter closed")]
    Closed,
}

impl LimiterError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LimiterError::Canceled => "limiter_canceled",
            LimiterError::Closed => "limiter_closed",
        }
    }
}

/// Failure record kept by a pipeline for a stage that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageError {
    /// Name of the failed stage.
    pub stage: Name,
    /// Tasks that completed successfully before the stage halted.
    pub success_tasks: Vec<Name>,
    /// Tasks that failed (own error, timeout, cancellation, panic).
    pub failed_tasks: Vec<Name>,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stage executed failed, success tasks: {:?}, failed tasks: {:?}",
            self.stage, self.success_tasks, self.failed_tasks
        )
    }
}

impl std::error::Error for StageError {}

impl StageError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        "stage_failed"
    }
}

/// Error returned by a stage completion hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("completion hook failed: {0}")]
pub struct HookError(pub String);

impl HookError {
    /// Wraps any displayable message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        "hook_failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_message_lists_tasks() {
        let err = StageError {
            stage: "Stage1".into(),
            success_tasks: vec!["TaskA".into()],
            failed_tasks: vec!["TaskB".into()],
        };
        assert_eq!(
            err.to_string(),
            r#"Stage1 stage executed failed, success tasks: ["TaskA"], failed tasks: ["TaskB"]"#
        );
    }

    #[test]
    fn test_labels_are_stable() {
        let timeout = TaskError::Timeout {
            task: "slow".into(),
            timeout: Duration::from_millis(50),
        };
        assert_eq!(timeout.as_label(), "task_timeout");
        assert!(timeout.is_timeout());
        assert!(!timeout.is_canceled());

        assert_eq!(ConfigError::ZeroCapacity.as_label(), "config_zero_capacity");
        assert_eq!(LimiterError::Canceled.as_label(), "limiter_canceled");
        assert_eq!(HookError::new("nope").as_label(), "hook_failed");

        let stage = StageError {
            stage: "Stage1".into(),
            success_tasks: vec![],
            failed_tasks: vec!["TaskB".into()],
        };
        assert_eq!(stage.as_label(), "stage_failed");
    }
}
