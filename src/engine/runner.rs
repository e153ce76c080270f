//! # Run a single task.
//!
//! Executes one [`Task`] under the per-task protocol shared by both dispatch modes,
//! and publishes lifecycle events to [`Bus`].
//!
//! ## Flow
//! ```text
//! parent cancelled? ── yes ──► cancel hook, publish TaskCanceled ──► Err(Canceled)
//!        │ no
//!        ▼
//! publish TaskStarting
//! tokio::spawn(task.process(child, input))      (detached execution unit)
//!        │
//! race JoinHandle vs stage timeout
//!   ├─ Ok(value)   ──► publish TaskCompleted            ──► Ok(value)
//!   ├─ Err(e)      ──► cancel hook, publish TaskFailed   ──► Err(e)
//!   ├─ panic       ──► cancel hook, publish TaskFailed   ──► Err(Panicked)
//!   └─ timeout     ──► [CancelOnTimeout: child.cancel()]
//!                      cancel hook, publish TimeoutHit   ──► Err(Timeout)
//! ```
//!
//! ## Rules
//! - `process` is never called when the parent token is already cancelled.
//! - The `JoinHandle` is the only result slot: the spawned unit writes it once and never
//!   blocks, even when the caller has stopped waiting.
//! - A timed-out unit is **detached**, not joined and not aborted; its late result is discarded.
//!   Only tasks that watch their token can exit early, and only under
//!   [`TimeoutPolicy::CancelOnTimeout`].
//! - The cancel hook runs on every failure; its panics are caught and reported, never surfaced.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::{
    engine::outcome::TaskResult,
    error::TaskError,
    events::{Bus, Event, EventKind},
    subscribers::panic_message,
    tasks::{Name, Task, TaskRef},
};

/// What happens to a task's execution unit when it loses the race against the stage timeout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Leave the unit running in the background; its result is discarded (default).
    #[default]
    Detach,
    /// Cancel the unit's token so cooperative tasks can exit promptly.
    ///
    /// Tasks that never look at their token keep running regardless.
    CancelOnTimeout,
}

/// Per-stage parameters shared by every task the stage runs.
pub(crate) struct RunParams<'a> {
    pub stage: &'a Name,
    pub timeout: Option<Duration>,
    pub policy: TimeoutPolicy,
    pub bus: &'a Bus,
}

impl RunParams<'_> {
    fn event(&self, kind: EventKind, task: &Name) -> Event {
        Event::new(kind)
            .with_stage(Arc::clone(self.stage))
            .with_task(Arc::clone(task))
    }
}

/// Executes `task` once against `input` and returns its name with the result.
pub(crate) async fn run_task<I, O>(
    task: TaskRef<I, O>,
    parent: &CancellationToken,
    input: I,
    params: &RunParams<'_>,
) -> (Name, TaskResult<O>)
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    let name: Name = Arc::from(task.name());

    if parent.is_cancelled() {
        let err = TaskError::Canceled {
            task: Arc::clone(&name),
        };
        params
            .bus
            .publish(params.event(EventKind::TaskCanceled, &name));
        notify_cancel(task.as_ref(), &input, &err, params.bus);
        return (name, Err(err));
    }

    params
        .bus
        .publish(params.event(EventKind::TaskStarting, &name));

    let child = parent.child_token();
    let unit = {
        let task = Arc::clone(&task);
        let ctx = child.clone();
        let input = input.clone();
        tokio::spawn(async move { task.process(ctx, input).await })
    };

    let joined = match params.timeout {
        Some(dur) => match time::timeout(dur, unit).await {
            Ok(joined) => joined,
            Err(_elapsed) => {
                if params.policy == TimeoutPolicy::CancelOnTimeout {
                    child.cancel();
                }
                let err = TaskError::Timeout {
                    task: Arc::clone(&name),
                    timeout: dur,
                };
                params
                    .bus
                    .publish(params.event(EventKind::TimeoutHit, &name).with_timeout(dur));
                notify_cancel(task.as_ref(), &input, &err, params.bus);
                return (name, Err(err));
            }
        },
        None => unit.await,
    };

    let res = joined.unwrap_or_else(|join_err| {
        let info = match join_err.try_into_panic() {
            Ok(payload) => panic_message(payload.as_ref()),
            Err(_) => "execution unit aborted".to_string(),
        };
        Err(TaskError::Panicked {
            task: Arc::clone(&name),
            info,
        })
    });

    match &res {
        Ok(_) => params
            .bus
            .publish(params.event(EventKind::TaskCompleted, &name)),
        Err(e) => {
            params.bus.publish(
                params
                    .event(EventKind::TaskFailed, &name)
                    .with_reason(e.to_string()),
            );
            notify_cancel(task.as_ref(), &input, e, params.bus);
        }
    }
    (name, res)
}

/// Invokes the task's cancel hook, swallowing (but reporting) a panic.
fn notify_cancel<I, O>(task: &dyn Task<I, O>, input: &I, err: &TaskError, bus: &Bus)
where
    I: Send + 'static,
    O: Send + 'static,
{
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.cancel(input, err))) {
        let info = panic_message(payload.as_ref());
        tracing::warn!(target: "stagevisor", task = task.name(), info = %info, "cancel hook panicked");
        bus.publish(
            Event::new(EventKind::CancelHookPanicked)
                .with_task(task.name())
                .with_reason(info),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskFn;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn params<'a>(stage: &'a Name, bus: &'a Bus, timeout: Option<Duration>) -> RunParams<'a> {
        RunParams {
            stage,
            timeout,
            policy: TimeoutPolicy::Detach,
            bus,
        }
    }

    #[tokio::test]
    async fn test_success_returns_value() {
        let stage: Name = "s".into();
        let bus = Bus::default();
        let t: TaskRef<i64, i64> = TaskFn::arc("x10", |_ctx: CancellationToken, n: i64| async move {
            Ok::<_, TaskError>(n * 10)
        });

        let (name, res) = run_task(t, &CancellationToken::new(), 2, &params(&stage, &bus, None)).await;
        assert_eq!(&*name, "x10");
        assert_eq!(res, Ok(20));
    }

    #[tokio::test]
    async fn test_cancelled_parent_skips_process_and_calls_hook() {
        let stage: Name = "s".into();
        let bus = Bus::default();
        let called = Arc::new(AtomicBool::new(false));
        let hooked: Arc<Mutex<Option<TaskError>>> = Arc::default();

        let flag = Arc::clone(&called);
        let sink = Arc::clone(&hooked);
        let t: TaskRef<i64, i64> = TaskFn::new("never", move |_ctx: CancellationToken, n: i64| {
            flag.store(true, Ordering::SeqCst);
            async move { Ok::<_, TaskError>(n) }
        })
        .with_cancel(move |_n: &i64, e: &TaskError| {
            *sink.lock().unwrap() = Some(e.clone());
        })
        .into_ref();

        let parent = CancellationToken::new();
        parent.cancel();
        let (_, res) = run_task(t, &parent, 1, &params(&stage, &bus, None)).await;

        assert!(res.unwrap_err().is_canceled());
        assert!(!called.load(Ordering::SeqCst));
        assert!(hooked.lock().unwrap().as_ref().unwrap().is_canceled());
    }

    #[tokio::test]
    async fn test_timeout_wins_race_and_detaches_unit() {
        let stage: Name = "s".into();
        let bus = Bus::default();
        let t: TaskRef<i64, i64> = TaskFn::arc("sleepy", |_ctx: CancellationToken, n: i64| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, TaskError>(n)
        });

        let started = Instant::now();
        let (_, res) = run_task(
            t,
            &CancellationToken::new(),
            1,
            &params(&stage, &bus, Some(Duration::from_millis(50))),
        )
        .await;

        assert!(res.unwrap_err().is_timeout());
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_cancel_on_timeout_signals_unit() {
        let stage: Name = "s".into();
        let bus = Bus::default();
        let observed = Arc::new(tokio::sync::Notify::new());
        let notify = Arc::clone(&observed);
        let t: TaskRef<i64, i64> = TaskFn::arc("coop", move |ctx: CancellationToken, n: i64| {
            let notify = Arc::clone(&notify);
            async move {
                ctx.cancelled().await;
                notify.notify_one();
                Ok::<_, TaskError>(n)
            }
        });

        let p = RunParams {
            policy: TimeoutPolicy::CancelOnTimeout,
            ..params(&stage, &bus, Some(Duration::from_millis(20)))
        };
        let (_, res) = run_task(t, &CancellationToken::new(), 1, &p).await;
        assert!(res.unwrap_err().is_timeout());

        tokio::time::timeout(Duration::from_secs(1), observed.notified())
            .await
            .expect("unit should observe cancellation");
    }

    #[tokio::test]
    async fn test_panics_are_recorded_and_hook_panic_is_swallowed() {
        let stage: Name = "s".into();
        let bus = Bus::default();
        let mut rx = bus.subscribe();
        let t: TaskRef<i64, i64> = TaskFn::new("bad", |_ctx: CancellationToken, _n: i64| async move {
            if true {
                panic!("process exploded");
            }
            Ok::<i64, TaskError>(0)
        })
        .with_cancel(|_n: &i64, _e: &TaskError| panic!("hook exploded"))
        .into_ref();

        let (_, res) = run_task(t, &CancellationToken::new(), 1, &params(&stage, &bus, None)).await;
        assert!(matches!(res, Err(TaskError::Panicked { ref info, .. }) if info == "process exploded"));

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::TaskStarting,
                EventKind::TaskFailed,
                EventKind::CancelHookPanicked
            ]
        );
    }
}
