//! # Runtime events emitted by the engine.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Task events**: per-task execution flow (starting, completed, failed, timeout, cancelled)
//! - **Structure events**: stage/pipeline/group progress
//! - **Admission events**: concurrency limiter admissions and completions
//! - **Subscriber events**: overflow and panic reports from subscriber workers
//!
//! The [`Event`] struct carries additional metadata such as timestamps, task and stage names,
//! reasons, and timeouts.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use stagevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TimeoutHit)
//!     .with_stage("Stage1")
//!     .with_task("TaskA")
//!     .with_timeout(Duration::from_millis(50));
//!
//! assert_eq!(ev.kind, EventKind::TimeoutHit);
//! assert_eq!(ev.task.as_deref(), Some("TaskA"));
//! assert_eq!(ev.timeout_ms, Some(50));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `task` (subscriber name) and `reason` (panic info).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `task` (subscriber name) and `reason`.
    SubscriberOverflow,

    // === Pipeline events ===
    /// Pipeline run started.
    ///
    /// Sets `pipeline`.
    PipelineStarting,

    /// Every stage succeeded.
    ///
    /// Sets `pipeline`.
    PipelineCompleted,

    /// A stage failed and the pipeline halted.
    ///
    /// Sets `pipeline`, `stage` (the failed stage) and `reason`.
    PipelineFailed,

    // === Stage events ===
    /// Stage run started.
    ///
    /// Sets `stage`.
    StageStarting,

    /// All groups of the stage succeeded.
    ///
    /// Sets `stage`.
    StageCompleted,

    /// A task of the stage failed; remaining groups were skipped.
    ///
    /// Sets `stage` and `reason` (failed task names).
    StageFailed,

    /// The stage completion hook returned an error.
    ///
    /// Sets `stage` and `reason`.
    StageHookFailed,

    /// A task group was dispatched.
    ///
    /// Sets `stage`, `group` (sequence id) and `reason` (`"parallel"`/`"sequential"`).
    GroupDispatched,

    // === Task events ===
    /// Task is about to run `process`.
    ///
    /// Sets `stage` and `task`.
    TaskStarting,

    /// Task returned a value.
    TaskCompleted,

    /// Task failed (own error or panic).
    ///
    /// Sets `stage`, `task` and `reason`.
    TaskFailed,

    /// Task exceeded its stage timeout; its execution unit is detached.
    ///
    /// Sets `stage`, `task` and `timeout_ms`.
    TimeoutHit,

    /// Task was not started because the context was already cancelled.
    TaskCanceled,

    /// A task cancel hook panicked (the panic is swallowed).
    ///
    /// Sets `task` and `reason`.
    CancelHookPanicked,

    // === Admission events ===
    /// The limiter admitted a unit of work.
    ///
    /// Sets `in_flight` (count after admission).
    UnitAdmitted,

    /// A submission was rejected (context cancelled or limiter closed).
    ///
    /// Sets `reason`.
    UnitRejected,

    /// An admitted unit finished and released its slot.
    ///
    /// Sets `in_flight` (count after release).
    UnitFinished,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the pipeline, if applicable.
    pub pipeline: Option<Arc<str>>,
    /// Name of the task (or subscriber), if applicable.
    pub task: Option<Arc<str>>,
    /// Name of the stage, if applicable.
    pub stage: Option<Arc<str>>,
    /// Sequence id of the task group, if applicable.
    pub group: Option<u32>,
    /// Stage timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Units in flight in the limiter.
    pub in_flight: Option<usize>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            pipeline: None,
            task: None,
            stage: None,
            group: None,
            timeout_ms: None,
            in_flight: None,
            reason: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a task name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a pipeline name.
    #[inline]
    pub fn with_pipeline(mut self, pipeline: impl Into<Arc<str>>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    /// Attaches a stage name.
    #[inline]
    pub fn with_stage(mut self, stage: impl Into<Arc<str>>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Attaches a task group sequence id.
    #[inline]
    pub fn with_group(mut self, sequence_id: u32) -> Self {
        self.group = Some(sequence_id);
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches the limiter's in-flight count.
    #[inline]
    pub fn with_in_flight(mut self, n: usize) -> Self {
        self.in_flight = Some(n);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::StageStarting);
        let b = Event::new(EventKind::StageCompleted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_timeout_is_clamped_to_u32() {
        let ev = Event::new(EventKind::TimeoutHit).with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }
}
