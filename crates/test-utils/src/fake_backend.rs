use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use rundag::dag::CommitSpec;
use rundag::engine::{LaunchSpec, RuntimeEvent};
use rundag::exec::{BackendFuture, ClusterBackend};
use rundag::ids::{AttemptId, VertexId, WorkerRef};
use rundag::types::{Counters, ResourceSpec};

/// What the fake backend was asked to do, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Request(AttemptId),
    CancelRequest(AttemptId),
    Release(WorkerRef),
    Launch {
        vertex: String,
        task_index: u32,
        attempt_number: u32,
    },
    Cancel(AttemptId),
    Commit(String),
}

/// A fake cluster that:
/// - grants every worker request immediately
/// - records every call
/// - reports each launched attempt as confirmed and completed, failing the
///   `(vertex, task_index, attempt_number)` triples it was told to fail
///   and losing the workers of those it was told to lose.
pub struct FakeBackend {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    calls: Arc<Mutex<Vec<BackendCall>>>,
    failing: BTreeSet<(String, u32, u32)>,
    failing_commits: BTreeSet<String>,
    rejecting: BTreeSet<String>,
    losing: BTreeSet<(String, u32, u32)>,
    next_worker: u64,
}

impl FakeBackend {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, calls: Arc<Mutex<Vec<BackendCall>>>) -> Self {
        Self {
            runtime_tx,
            calls,
            failing: BTreeSet::new(),
            failing_commits: BTreeSet::new(),
            rejecting: BTreeSet::new(),
            losing: BTreeSet::new(),
            next_worker: 1,
        }
    }

    /// Fail the given attempt of a task instead of succeeding it.
    pub fn fail_attempt(mut self, vertex: &str, task_index: u32, attempt_number: u32) -> Self {
        self.failing
            .insert((vertex.to_string(), task_index, attempt_number));
        self
    }

    pub fn fail_commit(mut self, vertex: &str) -> Self {
        self.failing_commits.insert(vertex.to_string());
        self
    }

    /// Refuse to launch any attempt of `vertex`, as an unreachable worker
    /// would.
    pub fn reject_launches(mut self, vertex: &str) -> Self {
        self.rejecting.insert(vertex.to_string());
        self
    }

    /// Lose the worker of the given attempt right after it starts.
    pub fn lose_worker(mut self, vertex: &str, task_index: u32, attempt_number: u32) -> Self {
        self.losing
            .insert((vertex.to_string(), task_index, attempt_number));
        self
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Events are sent from a spawned task: the runtime is awaiting this
    /// backend call and is not reading its channel meanwhile.
    fn post(&self, events: Vec<RuntimeEvent>) {
        let tx = self.runtime_tx.clone();
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
    }
}

impl ClusterBackend for FakeBackend {
    fn request_worker(
        &mut self,
        attempt: AttemptId,
        _resource: ResourceSpec,
        _priority: u32,
    ) -> BackendFuture<'_> {
        self.record(BackendCall::Request(attempt));
        let worker = WorkerRef::new(format!("fake-worker-{}", self.next_worker));
        self.next_worker += 1;
        self.post(vec![RuntimeEvent::WorkerAllocated { attempt, worker }]);
        Box::pin(async { Ok(()) })
    }

    fn cancel_worker_request(&mut self, attempt: AttemptId) -> BackendFuture<'_> {
        self.record(BackendCall::CancelRequest(attempt));
        Box::pin(async { Ok(()) })
    }

    fn release_worker(&mut self, worker: WorkerRef) -> BackendFuture<'_> {
        self.record(BackendCall::Release(worker));
        Box::pin(async { Ok(()) })
    }

    fn launch_attempt(
        &mut self,
        attempt: AttemptId,
        _worker: WorkerRef,
        launch: LaunchSpec,
    ) -> BackendFuture<'_> {
        self.record(BackendCall::Launch {
            vertex: launch.vertex_name.clone(),
            task_index: launch.task_index,
            attempt_number: launch.attempt_number,
        });

        if self.rejecting.contains(&launch.vertex_name) {
            let vertex = launch.vertex_name;
            return Box::pin(async move {
                Err(anyhow::anyhow!("worker for {vertex} is unreachable").into())
            });
        }

        let key = (
            launch.vertex_name.clone(),
            launch.task_index,
            launch.attempt_number,
        );
        if self.losing.contains(&key) {
            self.post(vec![
                RuntimeEvent::LaunchConfirmed { attempt },
                RuntimeEvent::WorkerLost { attempt },
            ]);
            return Box::pin(async { Ok(()) });
        }

        let fails = self.failing.contains(&key);
        let diagnostic = fails.then(|| format!("injected failure for {attempt}"));
        // One task for both events keeps them in order.
        self.post(vec![
            RuntimeEvent::LaunchConfirmed { attempt },
            RuntimeEvent::Completed {
                attempt,
                success: !fails,
                diagnostic,
                counters: Counters::new(),
            },
        ]);
        Box::pin(async { Ok(()) })
    }

    fn cancel_attempt(&mut self, attempt: AttemptId, _worker: WorkerRef) -> BackendFuture<'_> {
        self.record(BackendCall::Cancel(attempt));
        Box::pin(async { Ok(()) })
    }

    fn commit_vertex(
        &mut self,
        vertex: VertexId,
        vertex_name: String,
        _commit: CommitSpec,
    ) -> BackendFuture<'_> {
        let result = if self.failing_commits.contains(&vertex_name) {
            Err(format!("injected commit failure for {vertex_name}"))
        } else {
            Ok(())
        };
        self.record(BackendCall::Commit(vertex_name));
        self.post(vec![RuntimeEvent::CommitFinished { vertex, result }]);
        Box::pin(async { Ok(()) })
    }
}
