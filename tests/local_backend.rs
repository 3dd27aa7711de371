// tests/local_backend.rs
#![cfg(unix)]

mod common;
use crate::common::builders::PlanBuilder;
use crate::common::init_tracing;

use std::error::Error;

use tokio::sync::mpsc;

use rundag::dag::DagPlan;
use rundag::engine::{CoreRuntime, DagStatus, EngineConfig, Runtime, RuntimeOptions};
use rundag::exec::LocalBackend;
use rundag::state::{DagState, FailureKind, VertexState};
use rundag_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

async fn run_locally(plan: DagPlan) -> Result<DagStatus, Box<dyn Error>> {
    init_tracing();
    let mut core = CoreRuntime::new(EngineConfig::default());
    let dag = core.submit_dag(plan)?;
    let (tx, rx) = mpsc::channel(64);
    let backend = LocalBackend::new(tx.clone());
    let options = RuntimeOptions {
        exit_when_idle: true,
    };
    let mut statuses = with_timeout(Runtime::new(core, tx, rx, backend, options).run()).await?;
    Ok(statuses.remove(&dag).ok_or("DAG missing from the final statuses")?)
}

#[tokio::test]
async fn producer_announces_partitions_for_its_consumer() -> TestResult {
    let plan = PlanBuilder::new("local")
        .vertex("produce", 1)
        .command("echo 'RUNDAG_PROGRESS 0.5'; echo 'RUNDAG_COUNTER OUTPUT_PARTITIONS=3'")
        .derived_vertex("consume")
        .command("test -n \"$RUNDAG_TASK_INDEX\"")
        .shuffle("produce", "consume")
        .build();

    let status = run_locally(plan).await?;
    assert_eq!(status.state, DagState::Succeeded);
    let consume = status.vertex("consume").ok_or("no consume vertex")?;
    assert_eq!(consume.parallelism, Some(3));
    assert_eq!(consume.succeeded_tasks, 3);
    Ok(())
}

#[tokio::test]
async fn failing_command_reports_its_exit_code() -> TestResult {
    let plan = PlanBuilder::new("local")
        .vertex("broken", 1)
        .command("echo 'disk full' >&2; exit 1")
        .max_failed_attempts(0)
        .build();

    let status = run_locally(plan).await?;
    assert_eq!(status.state, DagState::Failed);
    let deepest = status.deepest_diagnostic().ok_or("no diagnostic")?;
    assert_eq!(deepest.kind, FailureKind::WorkerExecution);
    assert_eq!(deepest.message, "exit code 1: disk full");
    Ok(())
}

#[tokio::test]
async fn commit_command_runs_after_tasks() -> TestResult {
    let dir = tempfile::tempdir()?;
    let marker = dir.path().join("committed");
    let plan = PlanBuilder::new("local")
        .vertex("write", 2)
        .command("true")
        .commit(&format!("touch '{}'", marker.display()))
        .build();

    let status = run_locally(plan).await?;
    assert_eq!(status.state, DagState::Succeeded);
    assert!(marker.exists());
    Ok(())
}

#[tokio::test]
async fn failing_commit_fails_the_vertex() -> TestResult {
    let plan = PlanBuilder::new("local")
        .vertex("write", 1)
        .command("true")
        .commit("exit 3")
        .build();

    let status = run_locally(plan).await?;
    assert_eq!(status.vertex("write").ok_or("no vertex")?.state, VertexState::Failed);
    let deepest = status.deepest_diagnostic().ok_or("no diagnostic")?;
    assert_eq!(deepest.kind, FailureKind::Commit);
    assert!(deepest.message.contains("code 3"), "{}", deepest.message);
    Ok(())
}

#[tokio::test]
async fn binary_output_does_not_cut_off_status_lines() -> TestResult {
    // Enough output after the invalid byte to fill the pipe if nobody reads it.
    let plan = PlanBuilder::new("local")
        .vertex("produce", 1)
        .command(
            "printf '\\377\\n'; printf '\\376\\n' >&2; sleep 0.3; \
             head -c 400000 /dev/zero; echo; \
             echo 'RUNDAG_COUNTER OUTPUT_PARTITIONS=3'",
        )
        .derived_vertex("consume")
        .command("true")
        .shuffle("produce", "consume")
        .build();

    let status = run_locally(plan).await?;
    assert_eq!(status.state, DagState::Succeeded);
    let consume = status.vertex("consume").ok_or("no consume vertex")?;
    assert_eq!(consume.parallelism, Some(3));
    Ok(())
}
