// tests/chain_scenarios.rs

mod common;
use crate::common::builders::{chain_plan, PlanBuilder};
use crate::common::{cancelled_in, count_states, init_tracing, Harness};

use rundag::engine::CoreCommand;
use rundag::state::{AttemptState, DagState, FailureKind, TaskState, VertexState};
use rundag::types::FailurePolicy;

#[test]
fn chain_retry_after_one_attempt_failure_succeeds() {
    init_tracing();
    let mut h = Harness::with_defaults();
    h.submit(chain_plan(3, 2, 1));

    // Only v1 is schedulable behind sequential edges.
    let first = h.start_all();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|a| a.vertex() == h.vertex_id("v1")));
    for a in first {
        h.succeed(a);
    }
    assert_eq!(h.vertex_state("v1"), VertexState::Succeeded);

    let v2 = h.start_all();
    assert_eq!(v2.len(), 2);
    let failing = h.attempt_id("v2", 0, 0);
    h.fail(failing, "exit code 1");

    // The retry is requested straight away.
    let retry = h.attempt_id("v2", 0, 1);
    assert_eq!(h.requested(), vec![retry]);
    h.start(retry);
    h.succeed(retry);
    h.succeed(h.attempt_id("v2", 1, 0));

    h.run_to_completion();

    assert_eq!(h.dag_state(), DagState::Succeeded);
    let attempts = h.attempts_of("v2", 0);
    assert_eq!(attempts.len(), 2);
    assert_eq!(count_states(&attempts, AttemptState::Failed), 1);
    assert_eq!(count_states(&attempts, AttemptState::Succeeded), 1);
    assert_eq!(attempts[1], (retry, AttemptState::Succeeded));

    let status = h.status();
    assert_eq!(status.vertex("v2").unwrap().failed_attempts, 1);
    assert_eq!(status.state.exit_code(), 0);
    assert_eq!(
        h.finished(),
        &[(h.dag(), DagState::Succeeded)],
        "exactly one DagFinished"
    );
}

#[test]
fn exhausting_attempts_on_a_root_kills_the_rest_of_the_chain() {
    init_tracing();
    let mut h = Harness::with_defaults();
    h.submit(chain_plan(3, 2, 1));
    h.start_all();

    h.fail(h.attempt_id("v1", 0, 0), "boom");
    let retry = h.attempt_id("v1", 0, 1);
    h.start(retry);
    h.fail(retry, "boom again");

    assert_eq!(h.task_state("v1", 0), TaskState::Failed);
    assert_eq!(h.vertex_state("v1"), VertexState::Failed);
    assert_eq!(h.dag_state(), DagState::Failed);
    for name in ["v2", "v3"] {
        assert_eq!(h.vertex_state(name), VertexState::Killed, "{name}");
        assert_eq!(h.scheduled_tasks(name), 0, "{name}");
    }

    // The sibling on v1 was still running and gets cancelled.
    let sibling = h.attempt_id("v1", 1, 0);
    assert_eq!(h.attempt_state(sibling), AttemptState::Killed);
    assert!(cancelled_in(h.commands()).contains(&sibling));

    let status = h.status();
    assert_eq!(status.state.exit_code(), 1);
    let deepest = status.deepest_diagnostic().unwrap();
    assert_eq!(deepest.kind, FailureKind::WorkerExecution);
    assert_eq!(deepest.message, "boom again");
    assert_eq!(status.diagnostics[0].kind, FailureKind::WorkerExecution);
}

#[test]
fn late_events_after_failure_change_nothing() {
    let mut h = Harness::with_defaults();
    h.submit(chain_plan(2, 1, 0));
    let a = h.start_all()[0];
    h.fail(a, "nope");
    assert_eq!(h.dag_state(), DagState::Failed);

    let before = h.snapshot();
    let commands = h.succeed(a);
    assert!(commands.is_empty());
    h.kill();
    assert_eq!(h.snapshot(), before);
    assert!(h.run().dropped_events() >= 2);
}

#[test]
fn fail_fast_kills_independent_branches() {
    let mut h = Harness::with_defaults();
    h.submit(
        PlanBuilder::new("pair")
            .vertex("a", 1)
            .max_failed_attempts(0)
            .vertex("b", 1)
            .build(),
    );
    h.start_all();
    h.fail(h.attempt_id("a", 0, 0), "bad input");

    assert_eq!(h.vertex_state("b"), VertexState::Killed);
    assert_eq!(h.dag_state(), DagState::Failed);
}

#[test]
fn fail_slow_lets_independent_branches_finish() {
    let mut h = Harness::with_defaults();
    h.submit(
        PlanBuilder::new("pair")
            .failure_policy(FailurePolicy::FailSlow)
            .vertex("a", 1)
            .max_failed_attempts(0)
            .vertex("b", 1)
            .build(),
    );
    h.start_all();
    h.fail(h.attempt_id("a", 0, 0), "bad input");

    assert_eq!(h.vertex_state("a"), VertexState::Failed);
    assert_eq!(h.vertex_state("b"), VertexState::Running);
    assert_eq!(h.dag_state(), DagState::Running);

    h.succeed(h.attempt_id("b", 0, 0));
    assert_eq!(h.vertex_state("b"), VertexState::Succeeded);
    assert_eq!(h.dag_state(), DagState::Failed);
}

#[test]
fn tolerated_task_failures_do_not_fail_the_vertex() {
    let mut h = Harness::with_defaults();
    h.submit(
        PlanBuilder::new("tolerant")
            .vertex("v", 3)
            .max_failed_attempts(0)
            .max_failed_tasks(1)
            .build(),
    );
    h.start_all();
    h.fail(h.attempt_id("v", 0, 0), "flaky");
    assert_eq!(h.vertex_state("v"), VertexState::Running);

    h.run_to_completion();
    assert_eq!(h.vertex_state("v"), VertexState::Succeeded);
    assert_eq!(h.status().vertex("v").unwrap().failed_tasks, 1);
    assert_eq!(h.dag_state(), DagState::Succeeded);
}

#[test]
fn kill_cancels_running_and_pending_work() {
    init_tracing();
    let mut h = Harness::with_defaults();
    h.submit(chain_plan(3, 2, 1));
    let running = h.attempt_id("v1", 0, 0);
    let pending = h.attempt_id("v1", 1, 0);
    h.start(running);

    let commands = h.kill();

    assert!(commands.iter().any(
        |c| matches!(c, CoreCommand::CancelAttempt { attempt, .. } if *attempt == running)
    ));
    assert!(commands.iter().any(
        |c| matches!(c, CoreCommand::CancelWorkerRequest { attempt } if *attempt == pending)
    ));
    assert!(commands.iter().any(
        |c| matches!(c, CoreCommand::ReleaseWorker { .. })
    ));
    assert!(h.requested().is_empty());

    assert_eq!(h.dag_state(), DagState::Killed);
    for name in ["v1", "v2", "v3"] {
        assert_eq!(h.vertex_state(name), VertexState::Killed, "{name}");
    }
    assert_eq!(h.attempt_state(running), AttemptState::Killed);
    assert_eq!(h.status().state.exit_code(), 3);

    // Killed attempts are not retried.
    assert_eq!(h.attempts_of("v1", 0).len(), 1);
}

#[test]
fn every_entity_is_terminal_after_a_run() {
    let mut h = Harness::with_defaults();
    h.submit(chain_plan(4, 3, 2));
    h.run_to_completion();

    let run = h.run();
    assert!(run.vertices().all(|v| v.state.is_terminal()));
    assert!(run.tasks().all(|t| t.state.is_terminal()));
    assert!(run.attempts().all(|a| a.state.is_terminal()));
    assert_eq!(run.tasks().count(), 12);
    assert_eq!(run.scheduler().held_len(), 0);
    assert_eq!(run.scheduler().requested_len(), 0);
}

#[test]
fn lost_worker_is_replaced_without_charging_the_budget() {
    let mut h = Harness::with_defaults();
    h.submit(
        PlanBuilder::new("lost")
            .vertex("v", 1)
            .max_failed_attempts(0)
            .build(),
    );
    let first = h.start_all();
    assert_eq!(first.len(), 1);

    let commands = h.lose_worker(first[0]);
    assert!(commands
        .iter()
        .any(|c| matches!(c, CoreCommand::CancelAttempt { attempt, .. } if *attempt == first[0])));
    assert_eq!(h.attempts_of("v", 0)[0].1, AttemptState::Killed);
    assert_eq!(h.task_state("v", 0), TaskState::Running);
    assert_eq!(h.requested().len(), 1);

    h.run_to_completion();
    assert_eq!(h.dag_state(), DagState::Succeeded);
    let status = h.status();
    let v = status.vertex("v").unwrap();
    assert_eq!(v.failed_attempts, 0);
    assert_eq!(v.killed_attempts, 1);
}
