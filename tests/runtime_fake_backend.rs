// tests/runtime_fake_backend.rs

mod common;
use crate::common::builders::{chain_plan, PlanBuilder};
use crate::common::init_tracing;

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use rundag::dag::DagPlan;
use rundag::engine::{CoreRuntime, EngineConfig, Runtime, RuntimeEvent, RuntimeOptions};
use rundag::state::{DagState, VertexState};
use rundag_test_utils::fake_backend::{BackendCall, FakeBackend};
use rundag_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

fn runtime_for(
    plan: DagPlan,
    config: EngineConfig,
    configure: impl FnOnce(FakeBackend) -> FakeBackend,
) -> (Runtime<FakeBackend>, Arc<Mutex<Vec<BackendCall>>>) {
    let mut core = CoreRuntime::new(config);
    core.submit_dag(plan).unwrap();

    let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let backend = configure(FakeBackend::new(tx.clone(), Arc::clone(&calls)));
    let options = RuntimeOptions {
        exit_when_idle: true,
    };
    (Runtime::new(core, tx, rx, backend, options), calls)
}

fn launches(calls: &[BackendCall]) -> Vec<(String, u32, u32)> {
    calls
        .iter()
        .filter_map(|c| match c {
            BackendCall::Launch {
                vertex,
                task_index,
                attempt_number,
            } => Some((vertex.clone(), *task_index, *attempt_number)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn chain_runs_in_dependency_order() -> TestResult {
    init_tracing();
    let (runtime, calls) = runtime_for(chain_plan(3, 2, 1), EngineConfig::default(), |b| b);

    let statuses = with_timeout(runtime.run()).await?;
    let status = statuses.values().next().expect("one DAG");
    assert_eq!(status.state, DagState::Succeeded);

    let launched = launches(&calls.lock().unwrap());
    assert_eq!(launched.len(), 6);
    let position = |name: &str| {
        launched
            .iter()
            .rposition(|(v, _, _)| v == name)
            .unwrap()
    };
    let first = |name: &str| launched.iter().position(|(v, _, _)| v == name).unwrap();
    assert!(position("v1") < first("v2"));
    assert!(position("v2") < first("v3"));
    Ok(())
}

#[tokio::test]
async fn injected_failure_is_retried() -> TestResult {
    let (runtime, calls) = runtime_for(chain_plan(3, 2, 1), EngineConfig::default(), |b| {
        b.fail_attempt("v2", 0, 0)
    });

    let statuses = with_timeout(runtime.run()).await?;
    let status = statuses.values().next().expect("one DAG");
    assert_eq!(status.state, DagState::Succeeded);
    assert_eq!(status.vertex("v2").unwrap().failed_attempts, 1);

    let launched = launches(&calls.lock().unwrap());
    assert!(launched.contains(&("v2".to_string(), 0, 1)));
    assert_eq!(launched.len(), 7);
    Ok(())
}

#[tokio::test]
async fn exhausted_attempts_fail_the_dag() -> TestResult {
    let (runtime, calls) = runtime_for(chain_plan(3, 2, 1), EngineConfig::default(), |b| {
        b.fail_attempt("v1", 0, 0).fail_attempt("v1", 0, 1)
    });

    let statuses = with_timeout(runtime.run()).await?;
    let status = statuses.values().next().expect("one DAG");
    assert_eq!(status.state, DagState::Failed);
    assert_eq!(status.state.exit_code(), 1);
    assert_eq!(status.vertex("v3").unwrap().state, VertexState::Killed);

    let launched = launches(&calls.lock().unwrap());
    assert!(launched.iter().all(|(v, _, _)| v == "v1"));
    Ok(())
}

#[tokio::test]
async fn commits_go_through_the_backend() -> TestResult {
    let plan = PlanBuilder::new("commit")
        .vertex("ok", 1)
        .commit("true")
        .vertex("bad", 1)
        .commit("false")
        .failure_policy(rundag::types::FailurePolicy::FailSlow)
        .build();
    let (runtime, calls) = runtime_for(plan, EngineConfig::default(), |b| b.fail_commit("bad"));

    let statuses = with_timeout(runtime.run()).await?;
    let status = statuses.values().next().expect("one DAG");
    assert_eq!(status.vertex("ok").unwrap().state, VertexState::Succeeded);
    assert_eq!(status.vertex("bad").unwrap().state, VertexState::Failed);
    assert_eq!(status.state, DagState::Failed);

    let calls = calls.lock().unwrap();
    assert!(calls.contains(&BackendCall::Commit("ok".to_string())));
    assert!(calls.contains(&BackendCall::Commit("bad".to_string())));
    Ok(())
}

#[tokio::test]
async fn worker_cap_is_respected_end_to_end() -> TestResult {
    let config = EngineConfig {
        max_concurrent_workers: Some(1),
        ..EngineConfig::default()
    };
    let plan = PlanBuilder::new("wide").vertex("v", 4).build();
    let (runtime, calls) = runtime_for(plan, config, |b| b);

    let statuses = with_timeout(runtime.run()).await?;
    assert_eq!(statuses.values().next().unwrap().state, DagState::Succeeded);

    // With one worker, every request follows the release of the previous one.
    let calls = calls.lock().unwrap();
    let mut in_use = 0i32;
    for call in calls.iter() {
        match call {
            BackendCall::Request(_) => in_use += 1,
            BackendCall::Release(_) | BackendCall::CancelRequest(_) => in_use -= 1,
            _ => {}
        }
        assert!(in_use <= 1, "calls: {calls:?}");
    }
    Ok(())
}

#[tokio::test]
async fn scheduling_timer_fires_when_no_worker_arrives() -> TestResult {
    init_tracing();

    /// Backend that never grants a worker.
    struct Starved;
    impl rundag::exec::ClusterBackend for Starved {
        fn request_worker(
            &mut self,
            _attempt: rundag::ids::AttemptId,
            _resource: rundag::types::ResourceSpec,
            _priority: u32,
        ) -> rundag::exec::BackendFuture<'_> {
            Box::pin(async { Ok(()) })
        }
        fn cancel_worker_request(
            &mut self,
            _attempt: rundag::ids::AttemptId,
        ) -> rundag::exec::BackendFuture<'_> {
            Box::pin(async { Ok(()) })
        }
        fn release_worker(&mut self, _worker: rundag::ids::WorkerRef) -> rundag::exec::BackendFuture<'_> {
            Box::pin(async { Ok(()) })
        }
        fn launch_attempt(
            &mut self,
            _attempt: rundag::ids::AttemptId,
            _worker: rundag::ids::WorkerRef,
            _launch: rundag::engine::LaunchSpec,
        ) -> rundag::exec::BackendFuture<'_> {
            Box::pin(async { Ok(()) })
        }
        fn cancel_attempt(
            &mut self,
            _attempt: rundag::ids::AttemptId,
            _worker: rundag::ids::WorkerRef,
        ) -> rundag::exec::BackendFuture<'_> {
            Box::pin(async { Ok(()) })
        }
        fn commit_vertex(
            &mut self,
            _vertex: rundag::ids::VertexId,
            _vertex_name: String,
            _commit: rundag::dag::CommitSpec,
        ) -> rundag::exec::BackendFuture<'_> {
            Box::pin(async { Ok(()) })
        }
    }

    let config = EngineConfig {
        scheduling_timeout: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let mut core = CoreRuntime::new(config);
    core.submit_dag(PlanBuilder::new("starved").vertex("v", 1).max_failed_attempts(1).build())?;
    let (tx, rx) = mpsc::channel(16);
    let options = RuntimeOptions {
        exit_when_idle: true,
    };
    let statuses = with_timeout(Runtime::new(core, tx, rx, Starved, options).run()).await?;

    let status = statuses.values().next().unwrap();
    assert_eq!(status.state, DagState::Failed);
    assert_eq!(
        status.deepest_diagnostic().unwrap().kind,
        rundag::state::FailureKind::SchedulingTimeout
    );
    Ok(())
}

#[tokio::test]
async fn kill_event_stops_a_running_dag() -> TestResult {
    /// Grants workers and confirms launches but never completes.
    struct Hanging {
        tx: mpsc::Sender<RuntimeEvent>,
    }
    impl rundag::exec::ClusterBackend for Hanging {
        fn request_worker(
            &mut self,
            attempt: rundag::ids::AttemptId,
            _resource: rundag::types::ResourceSpec,
            _priority: u32,
        ) -> rundag::exec::BackendFuture<'_> {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let worker = rundag::ids::WorkerRef::new(format!("w-{attempt}"));
                let _ = tx.send(RuntimeEvent::WorkerAllocated { attempt, worker }).await;
            });
            Box::pin(async { Ok(()) })
        }
        fn cancel_worker_request(
            &mut self,
            _attempt: rundag::ids::AttemptId,
        ) -> rundag::exec::BackendFuture<'_> {
            Box::pin(async { Ok(()) })
        }
        fn release_worker(&mut self, _worker: rundag::ids::WorkerRef) -> rundag::exec::BackendFuture<'_> {
            Box::pin(async { Ok(()) })
        }
        fn launch_attempt(
            &mut self,
            attempt: rundag::ids::AttemptId,
            _worker: rundag::ids::WorkerRef,
            _launch: rundag::engine::LaunchSpec,
        ) -> rundag::exec::BackendFuture<'_> {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(RuntimeEvent::LaunchConfirmed { attempt }).await;
            });
            Box::pin(async { Ok(()) })
        }
        fn cancel_attempt(
            &mut self,
            _attempt: rundag::ids::AttemptId,
            _worker: rundag::ids::WorkerRef,
        ) -> rundag::exec::BackendFuture<'_> {
            Box::pin(async { Ok(()) })
        }
        fn commit_vertex(
            &mut self,
            _vertex: rundag::ids::VertexId,
            _vertex_name: String,
            _commit: rundag::dag::CommitSpec,
        ) -> rundag::exec::BackendFuture<'_> {
            Box::pin(async { Ok(()) })
        }
    }

    let mut core = CoreRuntime::new(EngineConfig::default());
    let dag = core.submit_dag(chain_plan(2, 2, 0))?;
    let (tx, rx) = mpsc::channel(16);
    let backend = Hanging { tx: tx.clone() };
    let options = RuntimeOptions {
        exit_when_idle: true,
    };
    let runtime = Runtime::new(core, tx.clone(), rx, backend, options);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(RuntimeEvent::KillDag { dag }).await;
    });
    let statuses = with_timeout(runtime.run()).await?;
    assert_eq!(statuses[&dag].state, DagState::Killed);
    assert_eq!(statuses[&dag].state.exit_code(), 3);
    Ok(())
}

#[tokio::test]
async fn launch_errors_count_as_failed_attempts() -> TestResult {
    let plan = PlanBuilder::new("unreachable")
        .vertex("v", 1)
        .max_failed_attempts(1)
        .build();
    let (runtime, calls) = runtime_for(plan, EngineConfig::default(), |b| {
        b.reject_launches("v")
    });

    let statuses = with_timeout(runtime.run()).await?;
    let status = statuses.values().next().expect("one DAG");
    assert_eq!(status.state, DagState::Failed);
    assert_eq!(status.vertex("v").unwrap().failed_attempts, 2);
    let deepest = status.deepest_diagnostic().unwrap();
    assert!(deepest.message.starts_with("launch failed"), "{}", deepest.message);

    // Both workers were handed back.
    let calls = calls.lock().unwrap();
    let released = calls
        .iter()
        .filter(|c| matches!(c, BackendCall::Release(_)))
        .count();
    assert_eq!(released, 2);
    Ok(())
}

#[tokio::test]
async fn lost_worker_does_not_use_up_attempts() -> TestResult {
    let plan = PlanBuilder::new("lost")
        .vertex("v", 1)
        .max_failed_attempts(0)
        .build();
    let (runtime, calls) = runtime_for(plan, EngineConfig::default(), |b| b.lose_worker("v", 0, 0));

    let statuses = with_timeout(runtime.run()).await?;
    let status = statuses.values().next().expect("one DAG");
    assert_eq!(status.state, DagState::Succeeded);
    assert_eq!(status.vertex("v").unwrap().failed_attempts, 0);
    assert_eq!(status.vertex("v").unwrap().killed_attempts, 1);

    let launched = launches(&calls.lock().unwrap());
    assert_eq!(launched, vec![("v".to_string(), 0, 0), ("v".to_string(), 0, 1)]);
    Ok(())
}
