// src/engine/runtime.rs

use std::collections::BTreeMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::ClusterBackend;
use crate::ids::DagId;

use super::core::CoreRuntime;
use super::options::RuntimeOptions;
use super::status::DagStatus;
use super::{CoreCommand, RuntimeEvent};

/// Drives the engine core in response to `RuntimeEvent`s and delegates
/// worker allocation, attempt execution and commits to a `ClusterBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, running timers and talking to the backend.
pub struct Runtime<B: ClusterBackend> {
    core: CoreRuntime,
    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    backend: B,
    options: RuntimeOptions,
}

impl<B: ClusterBackend> fmt::Debug for Runtime<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<B: ClusterBackend> Runtime<B> {
    /// `event_tx` must feed `event_rx`; timers post through it.
    pub fn new(
        core: CoreRuntime,
        event_tx: mpsc::Sender<RuntimeEvent>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        backend: B,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            core,
            event_tx,
            event_rx,
            backend,
            options,
        }
    }

    pub fn core(&self) -> &CoreRuntime {
        &self.core
    }

    /// Main event loop.
    ///
    /// - Executes commands the core buffered before the loop started
    ///   (submission, recovery).
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them into the
    ///   core.
    /// - Executes the commands returned by the core.
    ///
    /// Returns the status of every DAG when the loop stops.
    pub async fn run(mut self) -> Result<BTreeMap<DagId, DagStatus>> {
        info!("rundag runtime started");

        let pending = self.core.take_commands();
        self.execute_commands(pending).await;

        let speculation = self.core.config().speculation.clone();
        if speculation.enabled {
            spawn_speculation_ticker(self.event_tx.clone(), speculation.interval);
        }

        loop {
            if self.options.exit_when_idle && self.core.all_finished() {
                info!("every DAG is finished; stopping runtime");
                break;
            }

            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);
            self.execute_commands(step.commands).await;

            if !step.keep_running {
                info!("shutdown requested; stopping runtime");
                break;
            }
        }

        self.core.flush_history();
        let states = self
            .core
            .dag_ids()
            .filter_map(|id| self.core.run(id).map(|run| (id, run.status())))
            .collect();
        info!("runtime exiting");
        Ok(states)
    }

    async fn execute_commands(&mut self, commands: Vec<CoreCommand>) {
        for command in commands {
            self.execute_command(command).await;
        }
    }

    /// Execute a single command from the core.
    ///
    /// Backend failures are turned back into events where the engine has a
    /// way to react to them, and logged otherwise.
    async fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::RequestWorker {
                attempt,
                resource,
                priority,
            } => {
                if let Err(err) = self.backend.request_worker(attempt, resource, priority).await {
                    warn!(%attempt, error = %err, "worker request failed; waiting for scheduling timeout");
                }
            }
            CoreCommand::CancelWorkerRequest { attempt } => {
                if let Err(err) = self.backend.cancel_worker_request(attempt).await {
                    warn!(%attempt, error = %err, "failed to cancel worker request");
                }
            }
            CoreCommand::LaunchAttempt {
                attempt,
                worker,
                launch,
            } => {
                if let Err(err) = self.backend.launch_attempt(attempt, worker, launch).await {
                    warn!(%attempt, error = %err, "attempt launch failed");
                    self.post(RuntimeEvent::Completed {
                        attempt,
                        success: false,
                        diagnostic: Some(format!("launch failed: {err}")),
                        counters: Default::default(),
                    });
                }
            }
            CoreCommand::CancelAttempt { attempt, worker } => {
                if let Err(err) = self.backend.cancel_attempt(attempt, worker).await {
                    warn!(%attempt, error = %err, "failed to cancel attempt");
                }
            }
            CoreCommand::ReleaseWorker { worker } => {
                if let Err(err) = self.backend.release_worker(worker.clone()).await {
                    warn!(%worker, error = %err, "failed to release worker");
                }
            }
            CoreCommand::StartSchedulingTimer { attempt, after } => {
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(RuntimeEvent::SchedulingTimeout { attempt }).await;
                });
            }
            CoreCommand::CommitVertexOutput {
                vertex,
                vertex_name,
                commit,
            } => {
                if let Err(err) = self.backend.commit_vertex(vertex, vertex_name, commit).await {
                    warn!(%vertex, error = %err, "commit could not be started");
                    self.post(RuntimeEvent::CommitFinished {
                        vertex,
                        result: Err(err.to_string()),
                    });
                }
            }
            CoreCommand::DagFinished { dag, state } => {
                info!(%dag, %state, exit_code = state.exit_code(), "DAG finished");
            }
        }
    }

    /// Queue an event for a later iteration of the loop.
    fn post(&self, event: RuntimeEvent) {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(event).await;
        });
    }
}

fn spawn_speculation_ticker(tx: mpsc::Sender<RuntimeEvent>, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(RuntimeEvent::SpeculationTick).await.is_err() {
                debug!("runtime gone; speculation ticker stopped");
                break;
            }
        }
    });
}
