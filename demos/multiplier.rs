//! # Multiplier pipelines
//!
//! Demonstrates:
//! - Sequential and parallel task groups inside one stage
//! - A failing task halting its stage and the rest of the pipeline
//! - A per-task timeout racing a slow task
//! - Several pipelines sharing one concurrency limiter
//!
//! Run with `RUST_LOG=stagevisor=debug` to see every event.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use stagevisor::{
    Config, HookError, LogWriter, Orchestrator, Pipeline, Subscribe, TaskError, TaskFn, TaskGroup,
    TaskRef,
};

/// Multiplies its input by `factor`.
fn multiplier(name: &'static str, factor: i64) -> TaskRef<i64, i64> {
    TaskFn::new(name, move |_ctx: CancellationToken, n: i64| async move {
        Ok::<_, TaskError>(n * factor)
    })
    .with_cancel(move |n: &i64, err: &TaskError| {
        println!("  ↩ {name}: giving up on {n} ({})", err.as_label());
    })
    .into_ref()
}

/// Always fails.
fn broken(name: &'static str) -> TaskRef<i64, i64> {
    TaskFn::arc(name, move |_ctx: CancellationToken, _n: i64| async move {
        Err::<i64, _>(TaskError::fail(format!("{name} error")))
    })
}

/// Sleeps longer than any sane stage timeout.
fn sleeper(name: &'static str, nap: Duration) -> TaskRef<i64, i64> {
    TaskFn::arc(name, move |_ctx: CancellationToken, n: i64| async move {
        tokio::time::sleep(nap).await;
        Ok::<_, TaskError>(n)
    })
}

fn build(orch: &Orchestrator, label: &str, second: TaskRef<i64, i64>) -> anyhow::Result<Pipeline<i64, i64>> {
    let mut stage1 = orch.stage("Stage1", 1).with_on_complete(|n: &i64| {
        if *n < 0 {
            return Err(HookError::new("negative input"));
        }
        Ok(())
    });
    stage1
        .register(TaskGroup::sequential(1, vec![multiplier("TaskA", 10), second]))?
        .register(TaskGroup::parallel(
            2,
            vec![multiplier("TaskC", 555), multiplier("TaskD", 666)],
        ))?;

    let mut stage2 = orch.stage("Stage2", 2);
    stage2.register(TaskGroup::parallel(1, vec![multiplier("TaskE", 2)]))?;

    let mut pipeline = orch.pipeline().with_name(label.to_string());
    pipeline.register(stage1)?.register(stage2)?;
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "stagevisor=info".into()))
        .init();

    println!("🚀 Multiplier pipelines demo\n");

    let config = Config {
        max_concurrent: 2,
        stage_timeout: Duration::from_millis(50),
        ..Config::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let orch = Orchestrator::builder(config).with_subscribers(subs).build()?;
    let ctx = CancellationToken::new();

    let runs = vec![
        orch.submit(&ctx, build(&orch, "healthy", multiplier("TaskB", 444))?, 2).await?,
        orch.submit(&ctx, build(&orch, "broken", broken("TaskB"))?, 2).await?,
        orch.submit(&ctx, build(&orch, "slow", sleeper("TaskB", Duration::from_millis(500)))?, 2).await?,
    ];

    for rx in runs {
        let run = rx.await?;
        let pipeline = run.pipeline;
        println!("\n📦 pipeline {:?}: {:?}", pipeline.name(), run.outcome?);

        for stage in pipeline.stages() {
            let mut names: Vec<_> = stage.results().keys().cloned().collect();
            names.sort();
            for name in names {
                match stage.result(&name) {
                    Some(Ok(v)) => println!("   {} / {name}: {v}", stage.name()),
                    Some(Err(e)) => println!("   {} / {name}: ✗ {e}", stage.name()),
                    None => {}
                }
            }
        }
        for (stage, res) in pipeline.results() {
            match res {
                Ok(summary) => println!("   ✅ {summary}"),
                Err(err) => println!("   ⚠️  {stage}: {err}"),
            }
        }
    }

    orch.shutdown(&ctx).await?;
    println!("\n🏁 processed {} pipelines", orch.limiter().processed());
    Ok(())
}
