//! # Task groups and their dispatch modes.
//!
//! A [`TaskGroup`] is an ordered set of tasks sharing one [`Dispatch`] mode:
//!
//! ```text
//! Parallel:    start T1, T2, ..., Tk        (group order)
//!              join in completion order     (FuturesUnordered)
//!              a failure never cancels siblings already started
//!
//! Sequential:  T1 ─► T2 ─► ... ─► Tk        (each awaited before the next)
//!              stop at the first failure; later tasks never start
//! ```
//!
//! Results flow back through the dispatch loop, which is the only writer of the stage ledger.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{
        runner::{RunParams, run_task},
        stage::Ledger,
    },
    error::ConfigError,
    tasks::TaskRef,
};

/// How the tasks of a group are dispatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Fan out every task, then join all of them.
    Parallel,
    /// One task at a time, in group order; stop at the first failure.
    Sequential,
}

impl Dispatch {
    /// Short label used in events.
    pub fn as_label(&self) -> &'static str {
        match self {
            Dispatch::Parallel => "parallel",
            Dispatch::Sequential => "sequential",
        }
    }
}

/// Ordered set of tasks with one dispatch mode, positioned in a stage by `sequence_id`.
pub struct TaskGroup<I, O> {
    sequence_id: u32,
    dispatch: Dispatch,
    tasks: Vec<TaskRef<I, O>>,
}

impl<I, O> TaskGroup<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a group at position `sequence_id` (1-based) of its stage.
    pub fn new(sequence_id: u32, dispatch: Dispatch, tasks: Vec<TaskRef<I, O>>) -> Self {
        Self {
            sequence_id,
            dispatch,
            tasks,
        }
    }

    /// Shorthand for a [`Dispatch::Parallel`] group.
    pub fn parallel(sequence_id: u32, tasks: Vec<TaskRef<I, O>>) -> Self {
        Self::new(sequence_id, Dispatch::Parallel, tasks)
    }

    /// Shorthand for a [`Dispatch::Sequential`] group.
    pub fn sequential(sequence_id: u32, tasks: Vec<TaskRef<I, O>>) -> Self {
        Self::new(sequence_id, Dispatch::Sequential, tasks)
    }

    /// Position of the group inside its stage.
    pub fn sequence_id(&self) -> u32 {
        self.sequence_id
    }

    /// How the tasks are dispatched.
    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    /// True for [`Dispatch::Parallel`].
    pub fn is_parallel(&self) -> bool {
        self.dispatch == Dispatch::Parallel
    }

    /// Tasks in group order.
    pub fn tasks(&self) -> &[TaskRef<I, O>] {
        &self.tasks
    }

    /// Number of tasks in the group.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the group has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task names in group order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name())
    }

    /// Rejects duplicate task names inside the group.
    pub(crate) fn check_names(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::with_capacity(self.tasks.len());
        for name in self.names() {
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateName {
                    scope: "task",
                    name: name.into(),
                });
            }
        }
        Ok(())
    }
}

impl<I, O> TaskGroup<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    /// Runs the group and records every terminal outcome into `ledger`.
    pub(crate) async fn run(
        &self,
        ctx: &CancellationToken,
        input: &I,
        params: &RunParams<'_>,
        ledger: &mut Ledger<O>,
    ) {
        match self.dispatch {
            Dispatch::Parallel => {
                let mut running: FuturesUnordered<_> = self
                    .tasks
                    .iter()
                    .map(|task| run_task(Arc::clone(task), ctx, input.clone(), params))
                    .collect();
                while let Some((name, res)) = running.next().await {
                    ledger.record(name, res);
                }
            }
            Dispatch::Sequential => {
                for task in &self.tasks {
                    if !ledger.state() {
                        break;
                    }
                    let (name, res) = run_task(Arc::clone(task), ctx, input.clone(), params).await;
                    ledger.record(name, res);
                }
            }
        }
    }
}

impl<I, O> fmt::Debug for TaskGroup<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("sequence_id", &self.sequence_id)
            .field("dispatch", &self.dispatch)
            .field("tasks", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
