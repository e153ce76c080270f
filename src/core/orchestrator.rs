//! # Orchestrator: runs pipelines under the global limiter and feeds subscribers.
//!
//! The [`Orchestrator`] owns the event bus, the [`ConcurrencyLimiter`] and a listener task
//! that fans events out to a [`SubscriberSet`].
//!
//! ## High-level architecture
//! ```text
//! submit(ctx, pipeline, input)
//!   └─► limiter.go(ctx, ...)            waits for a slot (cancellable)
//!          └─► pipeline.run(ctx, input)  on its own tokio task
//!                 └─► oneshot ──► PipelineRun { pipeline, outcome }
//!
//! Event flow:
//!   runner / Stage / Pipeline / Limiter ── publish(Event) ──► Bus ──► listener
//!                                                                       │
//!                                                    SubscriberSet::emit(Event)
//!                                                          ┌────────────┼────────────┐
//!                                                          ▼            ▼            ▼
//!                                                     [queue S1]   [queue S2]   [queue SN]
//!
//! Shutdown path:
//!   shutdown(ctx)
//!     ├─► limiter.close()        no new submissions
//!     ├─► limiter.wait(ctx)      running pipelines finish (or ctx gives up)
//!     └─► listener stop          drains the bus, then SubscriberSet::shutdown
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use stagevisor::{Config, Orchestrator, TaskError, TaskFn, TaskGroup, TaskRef};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orch = Orchestrator::builder(Config::default()).build()?;
//!
//!     let double: TaskRef<i64, i64> = TaskFn::arc("double", |_ctx: CancellationToken, n: i64| async move {
//!         Ok::<_, TaskError>(n * 2)
//!     });
//!
//!     let mut stage = orch.stage("Stage1", 1);
//!     stage.register(TaskGroup::parallel(1, vec![double]))?;
//!     let mut pipeline = orch.pipeline();
//!     pipeline.register(stage)?;
//!
//!     let ctx = CancellationToken::new();
//!     let done = orch.submit(&ctx, pipeline, 21).await?;
//!     let run = done.await?;
//!
//!     assert!(run.outcome?.is_success());
//!     assert_eq!(run.pipeline.stage("Stage1").unwrap().result("double"), Some(&Ok(42)));
//!
//!     orch.shutdown(&ctx).await?;
//!     Ok(())
//! }
//! ```

use std::sync::{Mutex, PoisonError};

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{Config, builder::OrchestratorBuilder},
    engine::{Outcome, Pipeline, Stage},
    error::{ConfigError, LimiterError},
    events::{Bus, Event},
    limiter::ConcurrencyLimiter,
    subscribers::SubscriberSet,
    tasks::Name,
};

/// A finished pipeline run, handed back by [`Orchestrator::submit`].
#[derive(Debug)]
pub struct PipelineRun<I, O> {
    /// The pipeline after its run; inspect results through its accessors.
    pub pipeline: Pipeline<I, O>,
    /// What [`Pipeline::run`] returned.
    pub outcome: Result<Outcome, ConfigError>,
}

struct Listener {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs pipelines under one [`ConcurrencyLimiter`] and delivers their events to subscribers.
pub struct Orchestrator {
    cfg: Config,
    bus: Bus,
    limiter: ConcurrencyLimiter,
    listener: Mutex<Option<Listener>>,
}

impl Orchestrator {
    /// Starts building an orchestrator from `cfg`.
    pub fn builder(cfg: Config) -> OrchestratorBuilder {
        OrchestratorBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: Config,
        bus: Bus,
        limiter: ConcurrencyLimiter,
        subs: SubscriberSet,
    ) -> Self {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(listen(bus.subscribe(), subs, stop.clone()));
        Self {
            cfg,
            bus,
            limiter,
            listener: Mutex::new(Some(Listener { stop, handle })),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The bus every orchestrated pipeline publishes to.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The limiter gating [`submit`](Self::submit).
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Creates an empty pipeline with the configured deadline, wired to this bus.
    pub fn pipeline<I, O>(&self) -> Pipeline<I, O>
    where
        I: Clone + Send + Sync + 'static,
        O: Send + 'static,
    {
        Pipeline::new(self.cfg.pipeline_timeout).with_bus(self.bus.clone())
    }

    /// Creates an empty stage with the configured timeout and timeout policy.
    pub fn stage<I, O>(&self, name: impl Into<Name>, sequence_id: u32) -> Stage<I, O>
    where
        I: Clone + Send + Sync + 'static,
        O: Send + 'static,
    {
        Stage::new(name, sequence_id, self.cfg.stage_timeout)
            .with_timeout_policy(self.cfg.timeout_policy)
            .with_bus(self.bus.clone())
    }

    /// Runs `pipeline` once a limiter slot is free.
    ///
    /// Returns when the run is admitted; the receiver yields the finished pipeline. The run
    /// uses `ctx`, so cancelling it also cancels tasks that have not started yet.
    ///
    /// # Errors
    /// [`LimiterError`] when admission fails; the pipeline is dropped without running.
    pub async fn submit<I, O>(
        &self,
        ctx: &CancellationToken,
        pipeline: Pipeline<I, O>,
        input: I,
    ) -> Result<oneshot::Receiver<PipelineRun<I, O>>, LimiterError>
    where
        I: Clone + Send + Sync + 'static,
        O: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut pipeline = pipeline.with_bus(self.bus.clone());
        let run_ctx = ctx.clone();

        self.limiter
            .go(ctx, async move {
                let outcome = pipeline.run(&run_ctx, input).await;
                let _ = tx.send(PipelineRun { pipeline, outcome });
            })
            .await?;
        Ok(rx)
    }

    /// Waits until every submitted pipeline has finished.
    pub async fn wait(&self, ctx: &CancellationToken) -> Result<(), LimiterError> {
        self.limiter.wait(ctx).await
    }

    /// Stops admissions, waits for running pipelines, then drains subscribers.
    ///
    /// Subscribers are drained even when `ctx` gives up first; the error is returned afterwards.
    pub async fn shutdown(&self, ctx: &CancellationToken) -> Result<(), LimiterError> {
        self.limiter.close();
        let waited = self.limiter.wait(ctx).await;

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Listener { stop, handle }) = listener {
            stop.cancel();
            if let Err(err) = handle.await {
                tracing::warn!(target: "stagevisor", error = %err, "event listener stopped abnormally");
            }
        }
        waited
    }
}

/// Forwards bus events to the subscriber set until stopped, then drains it.
async fn listen(mut rx: broadcast::Receiver<Event>, set: SubscriberSet, stop: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Ok(ev) => set.emit(ev),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "stagevisor", skipped, "event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = stop.cancelled() => break,
        }
    }
    set.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TaskGroup;
    use crate::error::TaskError;
    use crate::events::EventKind;
    use crate::subscribers::Subscribe;
    use crate::tasks::{TaskFn, TaskRef};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.seen.lock().unwrap().push(event.kind);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    fn cfg(max_concurrent: usize) -> Config {
        Config {
            max_concurrent,
            ..Config::default()
        }
    }

    fn doubling_pipeline(orch: &Orchestrator) -> Pipeline<i64, i64> {
        let double: TaskRef<i64, i64> = TaskFn::arc("double", |_ctx: CancellationToken, n: i64| async move {
            Ok::<_, TaskError>(n * 2)
        });
        let mut stage = orch.stage("Stage1", 1);
        stage.register(TaskGroup::parallel(1, vec![double])).unwrap();
        let mut pipeline = orch.pipeline();
        pipeline.register(stage).unwrap();
        pipeline
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_rejected() {
        assert!(matches!(
            Orchestrator::builder(cfg(0)).build(),
            Err(ConfigError::ZeroCapacity)
        ));
    }

    #[tokio::test]
    async fn test_factories_apply_config() {
        let orch = Orchestrator::builder(Config {
            stage_timeout: Duration::from_millis(75),
            pipeline_timeout: Duration::from_secs(3),
            ..cfg(1)
        })
        .build()
        .unwrap();

        let stage: Stage<i64, i64> = orch.stage("s", 1);
        let pipeline: Pipeline<i64, i64> = orch.pipeline();
        assert_eq!(stage.timeout(), Duration::from_millis(75));
        assert_eq!(pipeline.timeout(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_submit_runs_and_subscribers_see_events() {
        let rec = Arc::new(Recorder::default());
        let orch = Orchestrator::builder(cfg(2))
            .with_subscribers(vec![rec.clone() as Arc<dyn Subscribe>])
            .build()
            .unwrap();
        let ctx = CancellationToken::new();

        let runs = [
            orch.submit(&ctx, doubling_pipeline(&orch), 1).await.unwrap(),
            orch.submit(&ctx, doubling_pipeline(&orch), 2).await.unwrap(),
        ];
        let mut values = Vec::new();
        for rx in runs {
            let run = rx.await.unwrap();
            assert_eq!(run.outcome, Ok(Outcome::Succeeded));
            values.push(run.pipeline.stage("Stage1").unwrap().result("double").cloned());
        }
        assert_eq!(values, vec![Some(Ok(2)), Some(Ok(4))]);

        orch.shutdown(&ctx).await.unwrap();
        assert_eq!(orch.limiter().processed(), 2);

        let seen = rec.seen.lock().unwrap();
        assert_eq!(
            seen.iter().filter(|k| **k == EventKind::PipelineCompleted).count(),
            2
        );
        assert!(seen.contains(&EventKind::UnitAdmitted));
        assert_eq!(
            seen.iter().filter(|k| **k == EventKind::UnitFinished).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let orch = Orchestrator::builder(cfg(1)).build().unwrap();
        let ctx = CancellationToken::new();
        orch.shutdown(&ctx).await.unwrap();

        let res = orch.submit(&ctx, doubling_pipeline(&orch), 1).await;
        assert_eq!(res.err(), Some(LimiterError::Closed));
    }
}
