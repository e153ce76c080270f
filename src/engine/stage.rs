//! # Stage: ordered task groups under one timeout.
//!
//! A [`Stage`] runs its [`TaskGroup`]s in ascending `sequence_id` order, applying the same
//! timeout to every task and broadcasting the same input to all of them.
//!
//! ```text
//! register(G1) register(G2) ... register(Gm)      (ids must end up dense: 1..=m)
//!         │
//! run(ctx, input)
//!   ├─► validate positions
//!   ├─► publish StageStarting
//!   ├─► for G in G1..Gm:
//!   │     ├─ state == false ─► stop (later groups never start)
//!   │     └─ G.run() ─► Ledger::record() per task
//!   ├─► on_complete(input)  (errors are logged, published, kept; state untouched)
//!   └─► publish StageCompleted / StageFailed ─► Outcome
//! ```
//!
//! ## Rules
//! - `state` starts `true` and only ever goes `false`.
//! - A stage runs once; a second `run` is a [`ConfigError::AlreadyRun`].
//! - Task names are unique across the whole stage (they key `results`).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    engine::{
        group::TaskGroup,
        outcome::{Outcome, TaskResult},
        runner::{RunParams, TimeoutPolicy},
    },
    error::{ConfigError, HookError, StageError},
    events::{Bus, Event, EventKind},
    tasks::Name,
};

type CompletionHook<I> = Box<dyn Fn(&I) -> Result<(), HookError> + Send + Sync>;

/// Success/failure bookkeeping of one stage run.
///
/// Only the dispatch loop writes to it, one terminal outcome at a time.
#[derive(Debug)]
pub(crate) struct Ledger<O> {
    state: bool,
    success_tasks: Vec<Name>,
    failed_tasks: Vec<Name>,
    results: HashMap<Name, TaskResult<O>>,
}

impl<O> Default for Ledger<O> {
    fn default() -> Self {
        Self {
            state: true,
            success_tasks: Vec::new(),
            failed_tasks: Vec::new(),
            results: HashMap::new(),
        }
    }
}

impl<O> Ledger<O> {
    pub(crate) fn record(&mut self, name: Name, res: TaskResult<O>) {
        if res.is_ok() {
            self.success_tasks.push(Arc::clone(&name));
        } else {
            self.state = false;
            self.failed_tasks.push(Arc::clone(&name));
        }
        self.results.insert(name, res);
    }

    pub(crate) fn state(&self) -> bool {
        self.state
    }

    pub(crate) fn success_tasks(&self) -> &[Name] {
        &self.success_tasks
    }

    pub(crate) fn failed_tasks(&self) -> &[Name] {
        &self.failed_tasks
    }

    pub(crate) fn result(&self, name: &str) -> Option<&TaskResult<O>> {
        self.results.get(name)
    }
}

/// Ordered sequence of task groups sharing one per-task timeout.
pub struct Stage<I, O> {
    name: Name,
    sequence_id: u32,
    timeout: Duration,
    policy: TimeoutPolicy,
    groups: BTreeMap<u32, TaskGroup<I, O>>,
    on_complete: Option<CompletionHook<I>>,
    ledger: Ledger<O>,
    hook_error: Option<HookError>,
    ran: bool,
    bus: Bus,
}

impl<I, O> Stage<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    /// Creates an empty stage at position `sequence_id` (1-based) of its pipeline.
    ///
    /// `timeout` applies to every task the stage runs; `Duration::ZERO` disables it.
    pub fn new(name: impl Into<Name>, sequence_id: u32, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            sequence_id,
            timeout,
            policy: TimeoutPolicy::default(),
            groups: BTreeMap::new(),
            on_complete: None,
            ledger: Ledger::default(),
            hook_error: None,
            ran: false,
            bus: Bus::default(),
        }
    }

    /// Sets what happens to a task's execution unit on timeout.
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the hook invoked once with the input after the groups finish.
    pub fn with_on_complete(
        mut self,
        hook: impl Fn(&I) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }

    /// Publishes this stage's events to `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = bus;
        self
    }

    pub(crate) fn attach_bus(&mut self, bus: &Bus) {
        self.bus = bus.clone();
    }

    /// Adds a group at its `sequence_id`.
    ///
    /// # Errors
    /// - [`ConfigError::InvalidSequence`] for id 0,
    /// - [`ConfigError::DuplicateSequence`] when the position is taken,
    /// - [`ConfigError::DuplicateName`] when a task name is already used in this stage.
    pub fn register(&mut self, group: TaskGroup<I, O>) -> Result<&mut Self, ConfigError> {
        let id = group.sequence_id();
        if id == 0 {
            return Err(ConfigError::InvalidSequence {
                scope: "task group",
                id,
            });
        }
        if self.groups.contains_key(&id) {
            return Err(ConfigError::DuplicateSequence {
                scope: "task group",
                id,
            });
        }
        group.check_names()?;
        if let Some(dup) = group
            .names()
            .find(|name| self.groups.values().any(|g| g.names().any(|n| n == *name)))
        {
            return Err(ConfigError::DuplicateName {
                scope: "task",
                name: dup.into(),
            });
        }
        self.groups.insert(id, group);
        Ok(self)
    }

    /// Checks that group positions are exactly `1..=N`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        dense("task group", self.groups.keys())
    }

    /// Runs every group in order until one fails.
    ///
    /// Task failures never surface as `Err`: they flip [`state`](Self::state) and are listed in
    /// [`failed_tasks`](Self::failed_tasks). `Err` is reserved for assembly problems, detected
    /// before any task starts.
    pub async fn run(&mut self, ctx: &CancellationToken, input: I) -> Result<Outcome, ConfigError> {
        if self.ran {
            return Err(ConfigError::AlreadyRun {
                scope: "stage",
                name: Arc::clone(&self.name),
            });
        }
        self.validate()?;
        self.ran = true;

        self.bus
            .publish(Event::new(EventKind::StageStarting).with_stage(Arc::clone(&self.name)));

        let params = RunParams {
            stage: &self.name,
            timeout: Some(self.timeout).filter(|d| *d > Duration::ZERO),
            policy: self.policy,
            bus: &self.bus,
        };
        for group in self.groups.values() {
            if !self.ledger.state() {
                break;
            }
            params.bus.publish(
                Event::new(EventKind::GroupDispatched)
                    .with_stage(Arc::clone(&self.name))
                    .with_group(group.sequence_id())
                    .with_reason(group.dispatch().as_label()),
            );
            group.run(ctx, &input, &params, &mut self.ledger).await;
        }

        self.complete(&input);
        Ok(self.finish())
    }

    fn complete(&mut self, input: &I) {
        let Some(hook) = &self.on_complete else {
            return;
        };
        if let Err(err) = hook(input) {
            tracing::warn!(target: "stagevisor", stage = %self.name, error = %err, "completion hook failed");
            self.bus.publish(
                Event::new(EventKind::StageHookFailed)
                    .with_stage(Arc::clone(&self.name))
                    .with_reason(err.to_string()),
            );
            self.hook_error = Some(err);
        }
    }

    fn finish(&self) -> Outcome {
        let ev = |kind| Event::new(kind).with_stage(Arc::clone(&self.name));
        match self.ledger.failed_tasks.first() {
            None => {
                self.bus.publish(ev(EventKind::StageCompleted));
                Outcome::Succeeded
            }
            Some(first) => {
                self.bus
                    .publish(ev(EventKind::StageFailed).with_reason(self.ledger.failed_tasks.join(",")));
                Outcome::Failed {
                    at: Arc::clone(first),
                }
            }
        }
    }
}

impl<I, O> Stage<I, O> {
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn sequence_id(&self) -> u32 {
        self.sequence_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `true` until any task of this stage fails.
    pub fn state(&self) -> bool {
        self.ledger.state()
    }

    /// Whether [`run`](Self::run) has been called.
    pub fn has_run(&self) -> bool {
        self.ran
    }

    /// Tasks that succeeded, in completion order.
    pub fn success_tasks(&self) -> &[Name] {
        self.ledger.success_tasks()
    }

    /// Tasks that failed, in completion order.
    pub fn failed_tasks(&self) -> &[Name] {
        self.ledger.failed_tasks()
    }

    /// All recorded task results by name.
    pub fn results(&self) -> &HashMap<Name, TaskResult<O>> {
        &self.ledger.results
    }

    pub fn result(&self, task: &str) -> Option<&TaskResult<O>> {
        self.ledger.result(task)
    }

    /// Error returned by the completion hook, if it failed.
    pub fn hook_error(&self) -> Option<&HookError> {
        self.hook_error.as_ref()
    }

    /// Failure record for the pipeline, `None` while the stage is healthy.
    pub fn error(&self) -> Option<StageError> {
        (!self.ledger.state).then(|| self.failure_record())
    }

    pub(crate) fn failure_record(&self) -> StageError {
        StageError {
            stage: Arc::clone(&self.name),
            success_tasks: self.ledger.success_tasks.clone(),
            failed_tasks: self.ledger.failed_tasks.clone(),
        }
    }
}

impl<I, O> fmt::Debug for Stage<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("sequence_id", &self.sequence_id)
            .field("timeout", &self.timeout)
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .field("state", &self.ledger.state)
            .field("success_tasks", &self.ledger.success_tasks)
            .field("failed_tasks", &self.ledger.failed_tasks)
            .finish()
    }
}

/// Checks that sorted positions are exactly `1..=N`.
pub(crate) fn dense<'a>(
    scope: &'static str,
    ids: impl Iterator<Item = &'a u32>,
) -> Result<(), ConfigError> {
    for (expected, &found) in (1u32..).zip(ids) {
        if found != expected {
            return Err(ConfigError::SequenceGap {
                scope,
                expected,
                found,
            });
        }
    }
    Ok(())
}
