// src/exec/executor_loop.rs

//! Main executor loop that manages running attempt processes.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::engine::{LaunchSpec, RuntimeEvent};
use crate::exec::task_runner::run_attempt;
use crate::ids::{AttemptId, WorkerRef};

/// Requests the local backend forwards to the executor loop.
#[derive(Debug)]
pub enum ExecutorCommand {
    Launch {
        attempt: AttemptId,
        worker: WorkerRef,
        launch: LaunchSpec,
    },
    Cancel {
        attempt: AttemptId,
    },
}

/// Internal handle for a currently-running attempt process.
///
/// - `cancel` asks the runner to kill the process without reporting a
///   completion (the engine already considers the attempt KILLED).
/// - `handle` is the Tokio task that is actually running the command.
struct ActiveAttempt {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Each launched attempt runs in its own Tokio task. Attempt ids are never
/// reused, so a second launch for an id that is still running is ignored.
pub fn spawn_executor(runtime_tx: mpsc::Sender<RuntimeEvent>) -> mpsc::Sender<ExecutorCommand> {
    let (tx, mut rx) = mpsc::channel::<ExecutorCommand>(64);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<AttemptId, ActiveAttempt> = HashMap::new();

        while let Some(command) = rx.recv().await {
            active.retain(|_, a| !a.handle.is_finished());
            match command {
                ExecutorCommand::Launch {
                    attempt,
                    worker,
                    launch,
                } => launch_attempt(attempt, worker, launch, &mut active, &runtime_tx),
                ExecutorCommand::Cancel { attempt } => cancel_attempt(attempt, &mut active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn launch_attempt(
    attempt: AttemptId,
    worker: WorkerRef,
    launch: LaunchSpec,
    active: &mut HashMap<AttemptId, ActiveAttempt>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    if active.contains_key(&attempt) {
        debug!(%attempt, "attempt already running; duplicate launch ignored");
        return;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();

    let handle = tokio::spawn(async move {
        run_attempt(attempt, worker, launch, rt_tx, cancel_rx).await;
        debug!(%attempt, "attempt runner future finished");
    });

    active.insert(
        attempt,
        ActiveAttempt {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn cancel_attempt(attempt: AttemptId, active: &mut HashMap<AttemptId, ActiveAttempt>) {
    let Some(mut existing) = active.remove(&attempt) else {
        debug!(%attempt, "cancel for attempt that is not running");
        return;
    };

    info!(%attempt, "cancelling attempt process");
    if let Some(cancel) = existing.cancel.take() {
        if cancel.send(()).is_err() {
            debug!(%attempt, "attempt process already finished while cancelling");
        }
    }
}
