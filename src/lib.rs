//! # stagevisor
//!
//! **Stagevisor** is a bounded-concurrency execution engine for Rust.
//!
//! It runs a hierarchy of **pipelines → stages → task groups → tasks**. Every task is a unit of
//! user work subject to cancellation and a timeout; a global [`ConcurrencyLimiter`] bounds how
//! many pipeline runs execute at once.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   submit(ctx, pipeline, input)
//!            │
//!            ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Orchestrator                                                     │
//! │  - ConcurrencyLimiter (capacity gate + wait)                      │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        ▼
//!   Pipeline ──► Stage 1 ──► Stage 2 ──► ...     halt at the first failed stage
//!                  │
//!                  ├─► TaskGroup 1 (Parallel)     fan out, join all
//!                  └─► TaskGroup 2 (Sequential)   one by one, stop at first failure
//!                          │
//!                          └─► Task::process      raced against the stage timeout
//!
//! Runner / Stage / Pipeline / Limiter ── publish(Event) ──► Bus ──► listener
//!                                                                    │
//!                                                       SubscriberSet (per-sub queues)
//!                                                        ┌───────────┼───────────┐
//!                                                        ▼           ▼           ▼
//!                                                    LogWriter    metrics     custom
//! ```
//!
//! ### Failure propagation
//! ```text
//! task fails / times out / is cancelled
//!   └─► stage.state = false, task listed in failed_tasks
//!         └─► no further group of that stage is dispatched
//!               └─► pipeline records StageError, later stages never start
//! ```
//!
//! A timed-out task is not joined: its execution unit is detached and its late result is
//! discarded. With [`TimeoutPolicy::CancelOnTimeout`] the unit's token is also cancelled.
//!
//! ## Features
//! | Area              | Description                                                          | Key types / traits                     |
//! |-------------------|----------------------------------------------------------------------|----------------------------------------|
//! | **Tasks**         | Define units of work with a name, `process` and a cancel hook.       | [`Task`], [`TaskFn`], [`TaskRef`]      |
//! | **Engine**        | Ordered groups and stages, parallel or sequential dispatch.          | [`TaskGroup`], [`Stage`], [`Pipeline`] |
//! | **Admission**     | Bound concurrent runs and wait for all of them.                      | [`ConcurrencyLimiter`]                 |
//! | **Orchestration** | Wire limiter, bus and subscribers from one [`Config`].               | [`Orchestrator`]                       |
//! | **Subscriber API**| Observe lifecycle events through your own subscribers.               | [`Subscribe`], [`LogWriter`]           |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use stagevisor::{Outcome, Pipeline, Stage, TaskError, TaskFn, TaskGroup, TaskRef};
//!
//! fn multiplier(name: &'static str, factor: i64) -> TaskRef<i64, i64> {
//!     TaskFn::arc(name, move |_ctx: CancellationToken, n: i64| async move {
//!         Ok::<_, TaskError>(n * factor)
//!     })
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut stage = Stage::new("Stage1", 1, Duration::from_secs(1));
//!     stage
//!         .register(TaskGroup::sequential(1, vec![multiplier("TaskA", 10), multiplier("TaskB", 444)]))?
//!         .register(TaskGroup::parallel(2, vec![multiplier("TaskC", 555), multiplier("TaskD", 666)]))?;
//!
//!     let mut pipeline = Pipeline::new(Duration::ZERO);
//!     pipeline.register(stage)?;
//!
//!     let outcome = pipeline.run(&CancellationToken::new(), 2).await?;
//!     assert_eq!(outcome, Outcome::Succeeded);
//!
//!     let stage = pipeline.stage("Stage1").unwrap();
//!     assert_eq!(stage.result("TaskD"), Some(&Ok(1332)));
//!     Ok(())
//! }
//! ```

mod core;
mod engine;
mod error;
mod events;
mod limiter;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use self::core::{Config, Orchestrator, OrchestratorBuilder, PipelineRun};
pub use engine::{
    Dispatch, Outcome, Pipeline, Stage, StageResult, TaskGroup, TaskResult, TimeoutPolicy,
};
pub use error::{ConfigError, HookError, LimiterError, StageError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use limiter::ConcurrencyLimiter;
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use tasks::{Name, Task, TaskFn, TaskRef};
