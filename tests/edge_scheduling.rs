// tests/edge_scheduling.rs

mod common;
use crate::common::builders::PlanBuilder;
use crate::common::{init_tracing, requested_in, Harness};

use rundag::engine::{CoreCommand, EngineConfig};
use rundag::state::{DagState, FailureKind, VertexState};
use rundag::types::{Counters, DataMovement, SchedulingPolicy, OUTPUT_PARTITIONS_COUNTER};

fn two_vertex(movement: DataMovement, scheduling: SchedulingPolicy) -> rundag::dag::DagPlan {
    PlanBuilder::new("pair")
        .vertex("src", 2)
        .vertex("dst", 2)
        .edge("src", "dst", movement, scheduling)
        .build()
}

#[test]
fn sequential_edge_waits_for_the_source_to_succeed() {
    init_tracing();
    let mut h = Harness::with_defaults();
    h.submit(two_vertex(DataMovement::ScatterGather, SchedulingPolicy::Sequential));

    assert_eq!(h.vertex_state("dst"), VertexState::Inited);
    let src = h.vertex_id("src");
    assert!(h.requested().iter().all(|a| a.vertex() == src));

    let first = h.start_all();
    h.succeed(first[0]);
    assert_eq!(h.vertex_state("dst"), VertexState::Inited);

    let commands = h.succeed(first[1]);
    assert_eq!(h.vertex_state("dst"), VertexState::Running);
    let dst = h.vertex_id("dst");
    let requested = requested_in(&commands);
    assert_eq!(requested.len(), 2);
    assert!(requested.iter().all(|a| a.vertex() == dst));
}

#[test]
fn concurrent_edge_starts_with_the_source() {
    let mut h = Harness::with_defaults();
    h.submit(two_vertex(DataMovement::Broadcast, SchedulingPolicy::Concurrent));

    assert_eq!(h.vertex_state("src"), VertexState::Running);
    assert_eq!(h.vertex_state("dst"), VertexState::Running);
    assert_eq!(h.requested().len(), 4);

    h.run_to_completion();
    assert_eq!(h.dag_state(), DagState::Succeeded);
}

#[test]
fn deeper_vertices_get_lower_priority() {
    let mut h = Harness::with_defaults();
    h.submit(two_vertex(DataMovement::Broadcast, SchedulingPolicy::Concurrent));

    let src = h.vertex_id("src");
    for command in h.commands() {
        if let CoreCommand::RequestWorker {
            attempt, priority, ..
        } = command
        {
            let expected = if attempt.vertex() == src { 0 } else { 1 };
            assert_eq!(*priority, expected, "{attempt}");
        }
    }
}

#[test]
fn one_to_one_destination_copies_source_parallelism() {
    let mut h = Harness::with_defaults();
    h.submit(
        PlanBuilder::new("mirror")
            .vertex("src", 4)
            .derived_vertex("dst")
            .edge("src", "dst", DataMovement::OneToOne, SchedulingPolicy::Sequential)
            .build(),
    );

    let dst = h.run().vertex_by_name("dst").unwrap();
    assert_eq!(dst.parallelism, Some(4));
    assert_eq!(dst.tasks.len(), 4);

    h.run_to_completion();
    assert_eq!(h.status().vertex("dst").unwrap().succeeded_tasks, 4);
}

#[test]
fn scatter_gather_destination_is_sized_by_reported_partitions() {
    init_tracing();
    let mut h = Harness::with_defaults();
    h.submit(
        PlanBuilder::new("shuffle")
            .vertex("map", 3)
            .derived_vertex("reduce")
            .shuffle("map", "reduce")
            .build(),
    );
    assert_eq!(h.vertex_state("reduce"), VertexState::Initializing);
    assert_eq!(h.run().vertex_by_name("reduce").unwrap().parallelism, None);

    let maps = h.start_all();
    let mut counters = Counters::new();
    counters.insert(OUTPUT_PARTITIONS_COUNTER.to_string(), 5);
    h.succeed_with(maps[0], counters);

    // The first finished task is enough at the default threshold.
    let reduce = h.run().vertex_by_name("reduce").unwrap();
    assert_eq!(reduce.parallelism, Some(5));
    assert_eq!(reduce.state, VertexState::Inited);

    h.run_to_completion();
    assert_eq!(h.dag_state(), DagState::Succeeded);
    assert_eq!(h.status().vertex("reduce").unwrap().succeeded_tasks, 5);
}

#[test]
fn threshold_delays_sizing_until_enough_source_tasks_finished() {
    let config = EngineConfig {
        dynamic_parallelism_threshold: 1.0,
        ..EngineConfig::default()
    };
    let mut h = Harness::new(config);
    h.submit(
        PlanBuilder::new("shuffle")
            .vertex("map", 2)
            .output_partitions(7)
            .derived_vertex("reduce")
            .shuffle("map", "reduce")
            .build(),
    );

    let maps = h.start_all();
    h.succeed(maps[0]);
    assert_eq!(h.vertex_state("reduce"), VertexState::Initializing);

    h.succeed(maps[1]);
    let reduce = h.run().vertex_by_name("reduce").unwrap();
    assert_eq!(reduce.parallelism, Some(7));
    assert_eq!(reduce.state, VertexState::Running);
}

#[test]
fn zero_task_source_still_sizes_its_destination() {
    let mut h = Harness::with_defaults();
    h.submit(
        PlanBuilder::new("empty")
            .vertex("src", 0)
            .derived_vertex("dst")
            .shuffle("src", "dst")
            .build(),
    );

    // Nothing ran: the source succeeded at init and sized dst with 0.
    assert_eq!(h.vertex_state("src"), VertexState::Succeeded);
    assert_eq!(h.vertex_state("dst"), VertexState::Succeeded);
    assert_eq!(h.dag_state(), DagState::Succeeded);
    assert!(h.requested().is_empty());
}

#[test]
fn worker_cap_bounds_outstanding_and_held_workers() {
    let config = EngineConfig {
        max_concurrent_workers: Some(2),
        ..EngineConfig::default()
    };
    let mut h = Harness::new(config);
    h.submit(PlanBuilder::new("wide").vertex("v", 5).build());
    assert_eq!(h.requested().len(), 2);

    let mut completed = 0;
    while h.dag_state() == DagState::Running {
        h.start_all();
        let in_use = h.requested().len() + h.launched().len();
        assert!(in_use <= 2, "{in_use} workers in use");
        // Finish one attempt at a time so the cap is exercised.
        let next = h.launched()[0];
        h.succeed(next);
        completed += 1;
    }
    assert_eq!(completed, 5);
    assert_eq!(h.dag_state(), DagState::Succeeded);
}

#[test]
fn diamond_waits_for_every_source() {
    let mut h = Harness::with_defaults();
    h.submit(
        PlanBuilder::new("diamond")
            .vertex("a", 1)
            .vertex("b", 1)
            .vertex("c", 1)
            .vertex("d", 1)
            .shuffle("a", "b")
            .shuffle("a", "c")
            .shuffle("b", "d")
            .shuffle("c", "d")
            .build(),
    );

    h.start_all();
    h.succeed(h.attempt_id("a", 0, 0));
    h.start_all();
    h.succeed(h.attempt_id("b", 0, 0));
    assert_eq!(h.vertex_state("d"), VertexState::Inited);

    h.succeed(h.attempt_id("c", 0, 0));
    assert_eq!(h.vertex_state("d"), VertexState::Running);
    h.run_to_completion();
    assert_eq!(h.dag_state(), DagState::Succeeded);
}

#[test]
fn one_to_one_mismatch_at_runtime_is_an_internal_error() {
    init_tracing();
    // `mid` is sized by the shuffle at runtime, so only the engine can see
    // that it disagrees with `out`.
    let plan = PlanBuilder::new("mismatch")
        .vertex("in", 1)
        .derived_vertex("mid")
        .vertex("out", 2)
        .shuffle("in", "mid")
        .edge("mid", "out", DataMovement::OneToOne, SchedulingPolicy::Sequential)
        .build();

    let mut h = Harness::with_defaults();
    h.submit(plan);
    h.run_to_completion();

    assert_eq!(h.vertex_state("out"), VertexState::Error);
    assert_eq!(h.dag_state(), DagState::Error);
    let status = h.status();
    let out = status.vertex("out").unwrap();
    assert_eq!(out.parallelism, None);
    let deepest = status.deepest_diagnostic().unwrap();
    assert_eq!(deepest.kind, FailureKind::InternalInvariant);
    assert!(deepest.message.contains("ONE_TO_ONE"), "{}", deepest.message);
}
