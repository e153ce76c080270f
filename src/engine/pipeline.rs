//! # Pipeline: ordered stages under one deadline.
//!
//! A [`Pipeline`] owns its [`Stage`]s and runs them in ascending `sequence_id` order with the
//! same input. After each stage it records a [`StageResult`] keyed by stage name; the first
//! failed stage halts the run and later stages are never started.
//!
//! The pipeline timeout is a deadline for the whole run, not a per-stage timeout. When it
//! elapses the run token is cancelled: tasks that have not started yet record
//! [`TaskError::Canceled`](crate::TaskError::Canceled), running tasks only see it through
//! their own token.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{
        outcome::{Outcome, StageResult},
        stage::{Stage, dense},
    },
    error::ConfigError,
    events::{Bus, Event, EventKind},
    tasks::Name,
};

/// Aborts the deadline timer when the run ends first.
struct DeadlineGuard(JoinHandle<()>);

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Ordered sequence of stages sharing one overall deadline.
pub struct Pipeline<I, O> {
    name: Name,
    timeout: Duration,
    stages: BTreeMap<u32, Stage<I, O>>,
    state: bool,
    results: HashMap<Name, StageResult>,
    success_stages: Vec<Name>,
    failed_stages: Vec<Name>,
    ran: bool,
    bus: Bus,
}

impl<I, O> Pipeline<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    /// Creates an empty pipeline; `Duration::ZERO` means no deadline.
    pub fn new(timeout: Duration) -> Self {
        Self {
            name: Name::from("pipeline"),
            timeout,
            stages: BTreeMap::new(),
            state: true,
            results: HashMap::new(),
            success_stages: Vec::new(),
            failed_stages: Vec::new(),
            ran: false,
            bus: Bus::default(),
        }
    }

    /// Names the pipeline in events and errors.
    pub fn with_name(mut self, name: impl Into<Name>) -> Self {
        self.name = name.into();
        self
    }

    /// Publishes pipeline, stage and task events to `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        for stage in self.stages.values_mut() {
            stage.attach_bus(&bus);
        }
        self.bus = bus;
        self
    }

    /// Adds a stage at its `sequence_id`.
    ///
    /// # Errors
    /// - [`ConfigError::InvalidSequence`] for id 0,
    /// - [`ConfigError::DuplicateSequence`] when the position is taken,
    /// - [`ConfigError::DuplicateName`] when another stage has the same name,
    /// - [`ConfigError::AlreadyRun`] for a stage that was run on its own.
    pub fn register(&mut self, mut stage: Stage<I, O>) -> Result<&mut Self, ConfigError> {
        let id = stage.sequence_id();
        if id == 0 {
            return Err(ConfigError::InvalidSequence { scope: "stage", id });
        }
        if self.stages.contains_key(&id) {
            return Err(ConfigError::DuplicateSequence { scope: "stage", id });
        }
        if self.stages.values().any(|s| s.name() == stage.name()) {
            return Err(ConfigError::DuplicateName {
                scope: "stage",
                name: Arc::clone(stage.name()),
            });
        }
        if stage.has_run() {
            return Err(ConfigError::AlreadyRun {
                scope: "stage",
                name: Arc::clone(stage.name()),
            });
        }
        stage.attach_bus(&self.bus);
        self.stages.insert(id, stage);
        Ok(self)
    }

    /// Checks stage positions and every stage's group positions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        dense("stage", self.stages.keys())?;
        self.stages.values().try_for_each(Stage::validate)
    }

    /// Runs the stages in order until one fails.
    ///
    /// `Err` is reserved for assembly problems, detected before any stage starts.
    pub async fn run(&mut self, ctx: &CancellationToken, input: I) -> Result<Outcome, ConfigError> {
        if self.ran {
            return Err(ConfigError::AlreadyRun {
                scope: "pipeline",
                name: Arc::clone(&self.name),
            });
        }
        self.validate()?;
        self.ran = true;

        self.bus
            .publish(Event::new(EventKind::PipelineStarting).with_pipeline(Arc::clone(&self.name)));

        let run_ctx = ctx.child_token();
        let _deadline = self.arm_deadline(&run_ctx);

        for stage in self.stages.values_mut() {
            let name = Arc::clone(stage.name());
            match stage.run(&run_ctx, input.clone()).await? {
                Outcome::Succeeded => {
                    self.results
                        .insert(Arc::clone(&name), Ok(format!("{name} stage executed success")));
                    self.success_stages.push(name);
                }
                Outcome::Failed { .. } => {
                    let err = stage.failure_record();
                    self.bus.publish(
                        Event::new(EventKind::PipelineFailed)
                            .with_pipeline(Arc::clone(&self.name))
                            .with_stage(Arc::clone(&name))
                            .with_reason(err.to_string()),
                    );
                    self.results.insert(Arc::clone(&name), Err(err));
                    self.failed_stages.push(Arc::clone(&name));
                    self.state = false;
                    return Ok(Outcome::Failed { at: name });
                }
            }
        }

        self.bus
            .publish(Event::new(EventKind::PipelineCompleted).with_pipeline(Arc::clone(&self.name)));
        Ok(Outcome::Succeeded)
    }

    fn arm_deadline(&self, run_ctx: &CancellationToken) -> Option<DeadlineGuard> {
        if self.timeout.is_zero() {
            return None;
        }
        let token = run_ctx.clone();
        let deadline = self.timeout;
        Some(DeadlineGuard(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => token.cancel(),
                _ = token.cancelled() => {}
            }
        })))
    }
}

impl<I, O> Pipeline<I, O> {
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `true` until any stage fails.
    pub fn state(&self) -> bool {
        self.state
    }

    pub fn has_run(&self) -> bool {
        self.ran
    }

    /// Stage results by stage name; stages that never ran are absent.
    pub fn results(&self) -> &HashMap<Name, StageResult> {
        &self.results
    }

    pub fn result(&self, stage: &str) -> Option<&StageResult> {
        self.results.get(stage)
    }

    pub fn success_stages(&self) -> &[Name] {
        &self.success_stages
    }

    pub fn failed_stages(&self) -> &[Name] {
        &self.failed_stages
    }

    /// Looks up a registered stage by name.
    pub fn stage(&self, name: &str) -> Option<&Stage<I, O>> {
        self.stages.values().find(|s| &**s.name() == name)
    }

    /// Registered stages in execution order.
    pub fn stages(&self) -> impl Iterator<Item = &Stage<I, O>> {
        self.stages.values()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl<I, O> fmt::Debug for Pipeline<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("stages", &self.stages.values().map(Stage::name).collect::<Vec<_>>())
            .field("state", &self.state)
            .field("success_stages", &self.success_stages)
            .field("failed_stages", &self.failed_stages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::group::TaskGroup;
    use crate::error::TaskError;
    use crate::tasks::{TaskFn, TaskRef};

    fn multiplier(name: &'static str, factor: i64) -> TaskRef<i64, i64> {
        TaskFn::arc(name, move |_ctx: CancellationToken, n: i64| async move {
            Ok::<_, TaskError>(n * factor)
        })
    }

    fn failing(name: &'static str) -> TaskRef<i64, i64> {
        TaskFn::arc(name, move |_ctx: CancellationToken, _n: i64| async move {
            Err::<i64, _>(TaskError::fail(format!("{name} error")))
        })
    }

    fn stage(name: &'static str, seq: u32, tasks: Vec<TaskRef<i64, i64>>) -> Stage<i64, i64> {
        let mut s = Stage::new(name, seq, Duration::from_secs(5));
        s.register(TaskGroup::parallel(1, tasks)).unwrap();
        s
    }

    #[tokio::test]
    async fn test_all_stages_succeed() {
        let mut p = Pipeline::new(Duration::ZERO);
        p.register(stage("Stage2", 2, vec![multiplier("B", 3)]))
            .unwrap()
            .register(stage("Stage1", 1, vec![multiplier("A", 2)]))
            .unwrap();

        assert_eq!(p.run(&CancellationToken::new(), 7).await, Ok(Outcome::Succeeded));
        assert!(p.state());
        assert_eq!(p.success_stages(), &[Name::from("Stage1"), Name::from("Stage2")]);
        assert_eq!(
            p.result("Stage1"),
            Some(&Ok("Stage1 stage executed success".to_string()))
        );
        assert_eq!(p.stage("Stage2").unwrap().result("B"), Some(&Ok(21)));
    }

    #[tokio::test]
    async fn test_first_failure_halts_later_stages() {
        let mut p = Pipeline::new(Duration::ZERO);
        p.register(stage("Stage1", 1, vec![multiplier("A", 2), failing("B")]))
            .unwrap()
            .register(stage("Stage2", 2, vec![multiplier("C", 3)]))
            .unwrap();

        let outcome = p.run(&CancellationToken::new(), 1).await.unwrap();
        assert_eq!(outcome.failed_at(), Some("Stage1"));
        assert!(!p.state());
        assert_eq!(p.failed_stages(), &[Name::from("Stage1")]);

        let err = p.result("Stage1").unwrap().as_ref().unwrap_err();
        assert_eq!(err.failed_tasks, vec![Name::from("B")]);
        assert_eq!(err.success_tasks, vec![Name::from("A")]);

        assert!(p.result("Stage2").is_none());
        let later = p.stage("Stage2").unwrap();
        assert!(!later.has_run());
        assert!(later.results().is_empty());
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut p = Pipeline::new(Duration::ZERO);
        p.register(stage("Stage1", 1, vec![multiplier("A", 2)])).unwrap();

        assert!(matches!(
            p.register(stage("Other", 1, vec![])),
            Err(ConfigError::DuplicateSequence { scope: "stage", id: 1 })
        ));
        assert!(matches!(
            p.register(stage("Stage1", 2, vec![])),
            Err(ConfigError::DuplicateName { scope: "stage", .. })
        ));
        assert!(matches!(
            p.register(stage("Zero", 0, vec![])),
            Err(ConfigError::InvalidSequence { scope: "stage", id: 0 })
        ));
    }

    #[tokio::test]
    async fn test_stage_gap_is_rejected() {
        let mut p = Pipeline::new(Duration::ZERO);
        p.register(stage("Stage2", 2, vec![multiplier("A", 2)])).unwrap();

        let err = p.run(&CancellationToken::new(), 1).await.unwrap_err();
        assert_eq!(
            err,
            ConfigError::SequenceGap {
                scope: "stage",
                expected: 1,
                found: 2
            }
        );
        assert!(!p.has_run());
    }

    #[tokio::test]
    async fn test_deadline_cancels_tasks_not_yet_started() {
        let slow: TaskRef<i64, i64> = TaskFn::arc("slow", |_ctx: CancellationToken, n: i64| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, TaskError>(n)
        });
        let mut s = Stage::new("Stage1", 1, Duration::ZERO);
        s.register(TaskGroup::sequential(1, vec![slow, multiplier("after", 2)]))
            .unwrap();

        let mut p = Pipeline::new(Duration::from_millis(30));
        p.register(s).unwrap();

        let outcome = p.run(&CancellationToken::new(), 1).await.unwrap();
        assert_eq!(outcome.failed_at(), Some("Stage1"));

        let s = p.stage("Stage1").unwrap();
        assert_eq!(s.result("slow"), Some(&Ok(1)));
        assert!(s.result("after").unwrap().as_ref().unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn test_events_carry_pipeline_name() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let mut p = Pipeline::new(Duration::ZERO).with_name("orders").with_bus(bus);
        p.register(stage("Stage1", 1, vec![multiplier("A", 2)])).unwrap();

        p.run(&CancellationToken::new(), 1).await.unwrap();

        let mut pipeline_events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if ev.pipeline.as_deref() == Some("orders") {
                pipeline_events.push(ev.kind);
            }
        }
        assert_eq!(
            pipeline_events,
            vec![EventKind::PipelineStarting, EventKind::PipelineCompleted]
        );
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let mut p = Pipeline::new(Duration::ZERO);
        p.register(stage("Stage1", 1, vec![multiplier("A", 2)])).unwrap();

        p.run(&CancellationToken::new(), 1).await.unwrap();
        assert!(matches!(
            p.run(&CancellationToken::new(), 1).await,
            Err(ConfigError::AlreadyRun { scope: "pipeline", .. })
        ));
    }
}
