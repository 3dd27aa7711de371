// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod history;
pub mod ids;
pub mod logging;
pub mod state;
pub mod types;

use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::dag::{DagGraph, DagPlan, Parallelism};
use crate::engine::{CoreRuntime, DagStatus, Runtime, RuntimeEvent, RuntimeOptions};
use crate::exec::LocalBackend;
use crate::history::{read_history, JsonLinesHistory};
use crate::state::DagState;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - DAG description loading
/// - the engine core (fresh submission or recovery from history)
/// - the local backend
/// - Ctrl-C handling
///
/// Returns the process exit code mirroring the DAG's final state.
pub async fn run(args: CliArgs) -> Result<i32> {
    let dag_path = PathBuf::from(&args.dag);
    let file = load_and_validate(&dag_path)?;

    let mut plan = file.to_plan();
    if let Some(policy) = args.failure_policy {
        plan.failure_policy = policy;
    }

    if args.dry_run {
        print_dry_run(&plan);
        return Ok(0);
    }

    // Read before the sink opens: both flags may name the same file.
    let recovered = match &args.recover {
        Some(path) => Some(read_history(path, None)?),
        None => None,
    };

    let mut core = CoreRuntime::new(file.engine_config());
    if let Some(path) = &args.history {
        core = core.with_history(JsonLinesHistory::open(path)?);
    }

    let dag = match recovered {
        Some(records) => {
            let dag = core.recover(plan, &records)?;
            core.resume(dag)?;
            dag
        }
        None => core.submit_dag(plan)?,
    };
    info!(%dag, "DAG running");

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);

    let backend = LocalBackend::new(rt_tx.clone());

    // Ctrl-C → kill the DAG; the runtime stops once it is terminal.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!(%dag, "interrupted; killing DAG");
            let _ = tx.send(RuntimeEvent::KillDag { dag }).await;
        });
    }

    let options = RuntimeOptions {
        exit_when_idle: true,
    };
    let runtime = Runtime::new(core, rt_tx, rt_rx, backend, options);
    let statuses = runtime.run().await?;

    let code = match statuses.get(&dag) {
        Some(status) => {
            print_summary(status);
            status.state.exit_code()
        }
        None => DagState::Running.exit_code(),
    };
    Ok(code)
}

fn print_summary(status: &DagStatus) {
    println!("{} ({}): {}", status.name, status.dag, status.state);
    for v in &status.vertices {
        println!(
            "  {:<20} {:<12} tasks {}/{} succeeded, {} failed, {} killed",
            v.name,
            v.state.to_string(),
            v.succeeded_tasks,
            v.parallelism.unwrap_or(0),
            v.failed_tasks,
            v.killed_tasks
        );
    }
    if let Some(d) = status.deepest_diagnostic() {
        println!("  cause: {d}");
    }
}

/// Simple dry-run output: print vertices, edges and roots.
fn print_dry_run(plan: &DagPlan) {
    let graph = DagGraph::from_plan(plan);

    println!("rundag dry-run");
    println!("  dag.name = {}", plan.name);
    println!("  dag.failure_policy = {:?}", plan.failure_policy);
    println!();

    println!("vertices ({}):", plan.vertices.len());
    for (idx, v) in plan.vertices.iter().enumerate() {
        println!("  - {}", v.name);
        match v.parallelism {
            Parallelism::Fixed(n) => println!("      parallelism: {n}"),
            Parallelism::FromSource => println!("      parallelism: from source"),
        }
        if let Some(ref cmd) = v.command {
            println!("      cmd: {cmd}");
        }
        println!("      depth: {}", graph.depth_of(idx));
        println!("      max_failed_attempts: {}", v.max_failed_attempts);
        if v.max_failed_tasks > 0 {
            println!("      max_failed_tasks: {}", v.max_failed_tasks);
        }
        if v.speculation {
            println!("      speculation: true");
        }
        if let Some(ref commit) = v.commit {
            println!("      commit: {}", commit.command);
        }
    }
    println!();

    println!("edges ({}):", plan.edges.len());
    for e in &plan.edges {
        println!("  - {} -> {} ({}, {})", e.from, e.to, e.data_movement, e.scheduling);
    }
    println!();

    let roots: Vec<&str> = graph
        .roots()
        .into_iter()
        .filter_map(|i| plan.vertices.get(i).map(|v| v.name.as_str()))
        .collect();
    println!("roots: {}", roots.join(", "));

    debug!("dry-run complete (no execution)");
}
