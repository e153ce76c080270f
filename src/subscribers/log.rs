//! # LogWriter: event renderer on top of `tracing`
//!
//! A subscriber that turns incoming [`Event`]s into `tracing` records under the
//! `stagevisor` target. Failures and timeouts are `warn`, progress is `info`,
//! per-task chatter and admissions are `debug`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  stagevisor: stage starting stage="Stage1"
//! DEBUG stagevisor: task completed stage="Stage1" task="TaskA"
//! WARN  stagevisor: task timed out stage="Stage1" task="TaskC" timeout_ms=50
//! WARN  stagevisor: stage failed stage="Stage1" failed="TaskC"
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let pipeline = e.pipeline.as_deref().unwrap_or("-");
        let stage = e.stage.as_deref().unwrap_or("-");
        let task = e.task.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::PipelineStarting => info!(target: "stagevisor", pipeline, "pipeline starting"),
            EventKind::PipelineCompleted => info!(target: "stagevisor", pipeline, "pipeline completed"),
            EventKind::PipelineFailed => {
                warn!(target: "stagevisor", pipeline, stage, reason, "pipeline halted");
            }
            EventKind::StageStarting => info!(target: "stagevisor", stage, "stage starting"),
            EventKind::StageCompleted => info!(target: "stagevisor", stage, "stage completed"),
            EventKind::StageFailed => {
                warn!(target: "stagevisor", stage, failed = reason, "stage failed");
            }
            EventKind::StageHookFailed => {
                warn!(target: "stagevisor", stage, reason, "completion hook failed");
            }
            EventKind::GroupDispatched => {
                debug!(target: "stagevisor", stage, group = ?e.group, mode = reason, "group dispatched");
            }
            EventKind::TaskStarting => debug!(target: "stagevisor", stage, task, "task starting"),
            EventKind::TaskCompleted => debug!(target: "stagevisor", stage, task, "task completed"),
            EventKind::TaskFailed => warn!(target: "stagevisor", stage, task, reason, "task failed"),
            EventKind::TimeoutHit => {
                warn!(target: "stagevisor", stage, task, timeout_ms = ?e.timeout_ms, "task timed out");
            }
            EventKind::TaskCanceled => {
                warn!(target: "stagevisor", stage, task, "task cancelled before start");
            }
            EventKind::CancelHookPanicked => {
                warn!(target: "stagevisor", task, reason, "cancel hook panicked");
            }
            EventKind::UnitAdmitted => {
                debug!(target: "stagevisor", in_flight = ?e.in_flight, "unit admitted");
            }
            EventKind::UnitRejected => debug!(target: "stagevisor", reason, "unit rejected"),
            EventKind::UnitFinished => {
                debug!(target: "stagevisor", in_flight = ?e.in_flight, "unit finished");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "stagevisor", subscriber = task, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                warn!(target: "stagevisor", subscriber = task, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
