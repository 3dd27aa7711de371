// src/exec/task_runner.rs

//! Individual attempt process runner.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::{LaunchSpec, RuntimeEvent};
use crate::exec::status_lines::{next_lossy_line, spawn_stdout_monitor};
use crate::ids::{AttemptId, WorkerRef};
use crate::types::Counters;

/// How long to wait for output readers once the process has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a single attempt process.
///
/// Reports `LaunchConfirmed` once the process is spawned, `StatusUpdate`
/// for status lines on stdout, and `Completed` when it exits.
///
/// - If the cancel channel fires, the child process is killed and **no**
///   `Completed` event is sent: the engine has already marked the attempt
///   KILLED and would drop it anyway.
/// - An attempt without a command succeeds immediately.
pub async fn run_attempt(
    attempt: AttemptId,
    worker: WorkerRef,
    launch: LaunchSpec,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
) {
    if let Err(err) = run_attempt_inner(attempt, &worker, &launch, &runtime_tx, cancel_rx).await {
        error!(%attempt, error = %err, "attempt execution error");
        let _ = runtime_tx
            .send(RuntimeEvent::Completed {
                attempt,
                success: false,
                diagnostic: Some(format!("{err:#}")),
                counters: Counters::new(),
            })
            .await;
    }
}

fn shell_command(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

async fn run_attempt_inner(
    attempt: AttemptId,
    worker: &WorkerRef,
    launch: &LaunchSpec,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<()> {
    let Some(cmd_line) = launch.command.as_deref() else {
        debug!(%attempt, "attempt has no command; completing immediately");
        runtime_tx
            .send(RuntimeEvent::LaunchConfirmed { attempt })
            .await
            .context("sending LaunchConfirmed to runtime")?;
        runtime_tx
            .send(RuntimeEvent::Completed {
                attempt,
                success: true,
                diagnostic: None,
                counters: Counters::new(),
            })
            .await
            .context("sending Completed to runtime")?;
        return Ok(());
    };

    info!(
        %attempt,
        %worker,
        vertex = %launch.vertex_name,
        task_index = launch.task_index,
        speculative = launch.speculative,
        cmd = %cmd_line,
        "starting attempt process"
    );

    let mut cmd = shell_command(cmd_line);
    cmd.env("RUNDAG_DAG", &launch.dag_name)
        .env("RUNDAG_VERTEX", &launch.vertex_name)
        .env("RUNDAG_TASK_INDEX", launch.task_index.to_string())
        .env("RUNDAG_ATTEMPT", launch.attempt_number.to_string())
        .env("RUNDAG_ATTEMPT_ID", attempt.to_string())
        .env("RUNDAG_WORKER", &worker.0)
        .env("RUNDAG_SPECULATIVE", if launch.speculative { "1" } else { "0" })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for attempt {attempt}"))?;

    runtime_tx
        .send(RuntimeEvent::LaunchConfirmed { attempt })
        .await
        .context("sending LaunchConfirmed to runtime")?;

    let stdout_monitor = child
        .stdout
        .take()
        .map(|stdout| spawn_stdout_monitor(attempt, stdout, runtime_tx.clone()));

    // Keep the last stderr line for the failure diagnostic.
    let stderr_tail = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            let mut last = None;
            while let Some(line) = next_lossy_line(&mut reader, &mut buf).await {
                debug!(%attempt, "stderr: {}", line);
                if !line.trim().is_empty() {
                    last = Some(line);
                }
            }
            last
        })
    });

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of attempt {attempt}"))?;
            let code = status.code().unwrap_or(-1);

            // Status updates must reach the runtime before the completion.
            if let Some(monitor) = stdout_monitor {
                if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, monitor).await.is_err() {
                    warn!(%attempt, "stdout still open after exit; status lines may be lost");
                }
            }
            let tail = match stderr_tail {
                Some(handle) => tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, handle)
                    .await
                    .ok()
                    .and_then(|joined| joined.ok())
                    .flatten(),
                None => None,
            };

            info!(%attempt, exit_code = code, success = status.success(), "attempt process exited");

            let diagnostic = (!status.success()).then(|| match tail {
                Some(line) => format!("exit code {code}: {line}"),
                None => format!("exit code {code}"),
            });
            runtime_tx
                .send(RuntimeEvent::Completed {
                    attempt,
                    success: status.success(),
                    diagnostic,
                    counters: Counters::new(),
                })
                .await
                .with_context(|| format!("sending Completed for attempt {attempt} to runtime"))?;
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(%attempt, "cancellation requested; killing attempt process");
                    if let Err(e) = child.kill().await {
                        warn!(%attempt, error = %e, "failed to kill child process on cancellation");
                    }
                }
                Err(e) => {
                    debug!(%attempt, error = %e, "cancel channel closed without explicit cancellation");
                    // Child will be killed on drop due to kill_on_drop(true).
                }
            }
        }
    }

    Ok(())
}

/// Run a vertex's commit command and report the result.
pub async fn run_commit(
    vertex_name: &str,
    command: &str,
) -> std::result::Result<(), String> {
    info!(vertex = %vertex_name, cmd = %command, "running commit command");
    let output = shell_command(command)
        .env("RUNDAG_VERTEX", vertex_name)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("spawning commit command: {e}"))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
        Err(format!(
            "commit command exited with code {}{}{}",
            output.status.code().unwrap_or(-1),
            if tail.is_empty() { "" } else { ": " },
            tail
        ))
    }
}
