//! Owns every in-flight [`Run`], handling `Submit`, cancellation, manual
//! batch reruns, and cross-run progress aggregation.
//!
//! A single submit with `queue_size = N` spins up N independent
//! [`RunCoordinator`]s, each with its own run id, running the same
//! [`RunRequest`] concurrently — grounded on the teacher's
//! `tokio::spawn`-per-unit batch dispatch, lifted one level to spawn runs
//! instead of batches.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::schema::HarnessConfig;
use crate::config::{ConfigError, RunRequest};
use crate::eventbus::{run_topic, Event, EventBus, EventKind, GLOBAL_TOPIC};
use crate::executor::BatchStatus;
use crate::modelclient::ModelClient;
use crate::orchestrator::coordinator::RerunError;
use crate::orchestrator::{Batch, PartitionError, Run, RunCoordinator, RunStatus};
use crate::store::{Artifact, ArtifactId, ArtifactMetadata, Store};
use crate::suite::TestSuite;

/// Errors surfaced by the Queue Manager's surfaces.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error("no run with id {0}")]
    UnknownRun(String),
    #[error(transparent)]
    Rerun(#[from] RerunError),
}

/// A read-only snapshot of one run's state, for `GetRunStatus`.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: Option<RunStatus>,
    pub batches: Vec<Batch>,
}

/// The cross-run aggregate `QueueManager::global_status` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    Running,
    Evaluating,
    Completed,
    Failed,
}

/// A point-in-time rollup across every run the Queue Manager has ever
/// submitted: total/completed batch counts and the derived overall status.
#[derive(Debug, Clone)]
pub struct GlobalStatus {
    pub total_batches: usize,
    pub completed_batches: usize,
    pub overall: OverallStatus,
}

/// Handles `Submit`, `CancelRun`, `CancelAll`, `RerunBatch`, and
/// `GetRunStatus`, and derives the global status across every run it owns.
pub struct QueueManager {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    model_client: Arc<dyn ModelClient>,
    harness: HarnessConfig,
    coordinators: Mutex<HashMap<String, Arc<RunCoordinator>>>,
    terminal: Mutex<HashMap<String, RunStatus>>,
    evaluating: Mutex<HashSet<String>>,
}

impl QueueManager {
    /// Builds a queue manager and starts its background watcher, which
    /// tracks `evaluation.started`/`evaluation.completed`/`evaluation.failed`
    /// events so [`QueueManager::global_status`] can fold evaluation
    /// progress into the overall status without polling the Store.
    pub fn new(
        store: Arc<dyn Store>,
        events: Arc<EventBus>,
        model_client: Arc<dyn ModelClient>,
        harness: HarnessConfig,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            store,
            events,
            model_client,
            harness,
            coordinators: Mutex::new(HashMap::new()),
            terminal: Mutex::new(HashMap::new()),
            evaluating: Mutex::new(HashSet::new()),
        });
        Arc::clone(&manager).spawn_evaluation_watcher();
        manager
    }

    fn spawn_evaluation_watcher(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut sub = self.events.subscribe(GLOBAL_TOPIC, None);
            loop {
                let event = sub.recv().await;
                match event.kind {
                    EventKind::EvaluationStarted => {
                        self.evaluating.lock().await.insert(event.run_id.clone());
                    }
                    EventKind::EvaluationCompleted | EventKind::EvaluationFailed => {
                        self.evaluating.lock().await.remove(&event.run_id);
                    }
                    _ => {}
                }
            }
        });
    }

    /// Spins up `request.queue_size` independent runs of `suite` against
    /// `request`, returning their run ids. Each run executes in the
    /// background; progress is observed through `Subscribe`/`GetRunStatus`.
    pub async fn submit(
        self: &Arc<Self>,
        suite: Arc<TestSuite>,
        request: RunRequest,
    ) -> Result<Vec<String>, QueueError> {
        request.validate()?;

        let suite = Arc::new(request.apply_suite_filter(&suite));

        let mut run_ids = Vec::with_capacity(request.queue_size);
        for _ in 0..request.queue_size {
            let run_id = crate::clock::IdGenerator::run_id();
            let coordinator = Arc::new(RunCoordinator::new(
                run_id.clone(),
                Arc::clone(&suite),
                &request,
                Arc::clone(&self.model_client),
                Arc::clone(&self.events),
                &self.harness,
            )?);

            self.coordinators
                .lock()
                .await
                .insert(run_id.clone(), Arc::clone(&coordinator));
            run_ids.push(run_id.clone());

            let manager = Arc::clone(self);
            tokio::spawn(async move {
                let run = coordinator.run().await;
                manager.finalize(run).await;
            });
        }

        Ok(run_ids)
    }

    /// Persists an artifact and publishes the run's terminal event. A run
    /// only produces an artifact when it completes; failed and cancelled
    /// runs publish their terminal event with no artifact.
    async fn finalize(&self, run: Run) {
        let run_id = run.run_id.clone();

        match run.status {
            RunStatus::Completed => {
                let created_at = run.completed_at.unwrap_or_else(Utc::now);
                let id = ArtifactId::new(&run.model, &run.variant, created_at);
                let artifact = Artifact {
                    id: id.clone(),
                    run_id: run_id.clone(),
                    responses: run.merged_responses(),
                    metadata: ArtifactMetadata {
                        model: run.model.clone(),
                        variant: run.variant.clone(),
                        temperature: run.temperature,
                        created_at,
                        run_id: run_id.clone(),
                        suite_name: run.suite_name.clone(),
                        total_tests: run.total_tests,
                        batch_sizing: run.batch_sizing.clone(),
                    },
                };

                match self.store.write_artifact(&artifact).await {
                    Ok(()) => {
                        info!(run_id = %run_id, artifact_id = %id, "run completed");
                        self.publish(
                            &run_id,
                            EventKind::RunCompleted,
                            serde_json::json!({ "artifact_id": id.as_str() }),
                        );
                        self.terminal.lock().await.insert(run_id, RunStatus::Completed);
                    }
                    Err(err) => {
                        warn!(run_id = %run_id, error = %err, "failed to persist artifact, run fails");
                        self.publish(
                            &run_id,
                            EventKind::RunFailed,
                            serde_json::json!({ "error": err.to_string() }),
                        );
                        self.terminal.lock().await.insert(run_id, RunStatus::Failed);
                    }
                }
            }
            RunStatus::Failed => {
                self.publish(&run_id, EventKind::RunFailed, serde_json::json!({}));
                self.terminal.lock().await.insert(run_id, RunStatus::Failed);
            }
            RunStatus::Cancelled => {
                self.publish(&run_id, EventKind::RunCancelled, serde_json::json!({}));
                self.terminal.lock().await.insert(run_id, RunStatus::Cancelled);
            }
            RunStatus::Pending | RunStatus::Running => unreachable!("run() only returns terminal statuses"),
        }
    }

    fn publish(&self, run_id: &str, kind: EventKind, payload: serde_json::Value) {
        self.events.publish(
            &run_topic(run_id),
            Event {
                kind,
                run_id: run_id.to_string(),
                batch_number: None,
                sequence: 0,
                payload,
            },
        );
    }

    /// Cancels a single run by id. Returns `false` if no such run exists.
    pub async fn cancel_run(&self, run_id: &str) -> bool {
        match self.coordinators.lock().await.get(run_id) {
            Some(coordinator) => {
                coordinator.cancellation_token().cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every run this queue manager owns, including ones not yet
    /// terminal.
    pub async fn cancel_all(&self) {
        for coordinator in self.coordinators.lock().await.values() {
            coordinator.cancellation_token().cancel();
        }
    }

    /// A snapshot of one run's batches and, if terminal, its final status.
    pub async fn run_status(&self, run_id: &str) -> Option<RunSnapshot> {
        let coordinator = self.coordinators.lock().await.get(run_id).cloned()?;
        let status = self.terminal.lock().await.get(run_id).copied();
        Some(RunSnapshot {
            run_id: run_id.to_string(),
            status,
            batches: coordinator.snapshot().await,
        })
    }

    /// Re-executes one batch of an already-submitted run, outside of the
    /// run's normal completion flow.
    pub async fn rerun_batch(&self, run_id: &str, batch_number: u32) -> Result<Batch, QueueError> {
        let coordinator = self
            .coordinators
            .lock()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| QueueError::UnknownRun(run_id.to_string()))?;
        Ok(coordinator.rerun_batch(batch_number).await?)
    }

    /// Cross-run progress and the derived overall status (see module docs
    /// on `QueueManager::submit` for how runs are tracked).
    pub async fn global_status(&self) -> GlobalStatus {
        let coordinators = self.coordinators.lock().await;
        let terminal = self.terminal.lock().await;
        let evaluating = self.evaluating.lock().await;

        let mut total_batches = 0usize;
        let mut completed_batches = 0usize;
        for coordinator in coordinators.values() {
            let batches = coordinator.snapshot().await;
            total_batches += batches.len();
            completed_batches += batches
                .iter()
                .filter(|b| b.status == BatchStatus::Completed)
                .count();
        }

        let run_ids: Vec<&String> = coordinators.keys().collect();
        let all_terminal = run_ids.iter().all(|id| terminal.contains_key(id.as_str()));
        let any_evaluating = run_ids.iter().any(|id| evaluating.contains(id.as_str()));
        let any_failed = run_ids
            .iter()
            .any(|id| terminal.get(id.as_str()) == Some(&RunStatus::Failed));
        let any_active = run_ids
            .iter()
            .any(|id| !terminal.contains_key(id.as_str()) || evaluating.contains(id.as_str()));
        let all_completed = run_ids
            .iter()
            .all(|id| terminal.get(id.as_str()) == Some(&RunStatus::Completed));

        let overall = if !all_terminal {
            OverallStatus::Running
        } else if any_evaluating {
            OverallStatus::Evaluating
        } else if all_completed {
            OverallStatus::Completed
        } else if any_failed && !any_active {
            OverallStatus::Failed
        } else {
            OverallStatus::Completed
        };

        GlobalStatus {
            total_batches,
            completed_batches,
            overall,
        }
    }
}
