//! Drives one run's batches to completion, bounded by a per-run
//! concurrency cap and racing a soft wall timeout and cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RunRequest;
use crate::config::schema::HarnessConfig;
use crate::eventbus::{batch_rerun_topic, EventBus};
use crate::executor::{BatchExecutor, BatchStatus, ExecutorConfig};
use crate::modelclient::ModelClient;
use crate::orchestrator::scheduler::{partition, BatchPlan, BatchSizing, PartitionError};
use crate::orchestrator::{derive_status, Batch, Run, RunStatus};
use crate::suite::TestSuite;

/// Coordinates one run: partitions its suite, dispatches batches with
/// bounded concurrency, merges their outcomes, and derives the final
/// [`RunStatus`].
pub struct RunCoordinator {
    run_id: String,
    model: String,
    variant: String,
    suite: Arc<TestSuite>,
    temperature: f64,
    batch_sizing: BatchSizing,
    batch_concurrency: usize,
    executor_config: ExecutorConfig,
    soft_timeout: Duration,
    model_client: Arc<dyn ModelClient>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
    state: Mutex<Vec<Batch>>,
}

impl RunCoordinator {
    /// Builds a coordinator for `request` against `suite`, partitioning the
    /// suite up front so a bad `batch_sizing` is rejected before any model
    /// calls are made.
    pub fn new(
        run_id: String,
        suite: Arc<TestSuite>,
        request: &RunRequest,
        model_client: Arc<dyn ModelClient>,
        events: Arc<EventBus>,
        harness: &HarnessConfig,
    ) -> Result<Self, PartitionError> {
        let plans: Vec<BatchPlan> = partition(&suite, &request.batch_sizing)?;
        let batches = plans.into_iter().map(Batch::pending).collect();

        let executor_config = ExecutorConfig {
            temperature: request.temperature,
            timeout: Duration::from_secs(harness.batch_timeout_secs),
            max_retries: harness.max_retries,
            backoff: Default::default(),
        };

        Ok(Self {
            run_id,
            model: request.model.clone(),
            variant: request.variant.clone(),
            suite,
            temperature: request.temperature,
            batch_sizing: request.batch_sizing.clone(),
            batch_concurrency: harness.batch_concurrency.max(1),
            executor_config,
            soft_timeout: Duration::from_secs(harness.run_soft_timeout_secs),
            model_client,
            events,
            cancel: CancellationToken::new(),
            state: Mutex::new(batches),
        })
    }

    /// A token callers can use to cancel this run from the outside
    /// (`CancelRun`/`CancelAll`).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A point-in-time copy of the run's batches, for `GetRunStatus`.
    pub async fn snapshot(&self) -> Vec<Batch> {
        self.state.lock().await.clone()
    }

    /// Runs every batch to completion (or until cancelled/timed out) and
    /// returns the finished [`Run`].
    pub async fn run(self: Arc<Self>) -> Run {
        let started_at = Utc::now();
        info!(run_id = %self.run_id, "run started");

        let batch_count = self.state.lock().await.len();
        let concurrency = self.batch_concurrency;

        let work = stream::iter(0..batch_count).map(|idx| {
            let this = Arc::clone(&self);
            async move { this.execute_one(idx).await }
        });

        let execution = work.buffer_unordered(concurrency).collect::<Vec<()>>();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(run_id = %self.run_id, "run cancelled");
            }
            _ = tokio::time::sleep(self.soft_timeout) => {
                warn!(run_id = %self.run_id, "run exceeded soft timeout, cancelling");
                self.cancel.cancel();
            }
            _ = execution => {}
        }

        let batches = self.state.lock().await.clone();
        let status = if self.cancel.is_cancelled() && !batches.iter().all(|b| b.status == BatchStatus::Completed) {
            RunStatus::Cancelled
        } else {
            derive_status(&batches)
        };

        let completed_at = Utc::now();

        // Terminal run events (run.completed/failed/cancelled) are published
        // by the caller once it has finished any artifact persistence that
        // must happen before the Evaluator Scheduler can act on them.

        Run {
            run_id: self.run_id.clone(),
            model: self.model.clone(),
            variant: self.variant.clone(),
            status,
            batches,
            temperature: self.temperature,
            suite_name: self.suite.name.clone(),
            total_tests: self.suite.len(),
            batch_sizing: self.batch_sizing.clone(),
            started_at,
            completed_at: Some(completed_at),
            duration: (completed_at - started_at).to_std().unwrap_or_default(),
        }
    }

    async fn execute_one(&self, idx: usize) {
        let (number, test_ids) = {
            let batches = self.state.lock().await;
            (batches[idx].number, batches[idx].test_ids.clone())
        };

        let cases: Vec<_> = test_ids
            .iter()
            .filter_map(|id| self.suite.get(id).cloned())
            .collect();

        let executor = BatchExecutor::new(
            Arc::clone(&self.model_client),
            Arc::clone(&self.events),
            self.run_id.clone(),
            number,
            self.executor_config.clone(),
        );
        let outcome = executor.run(&cases, self.cancel.clone()).await;

        let mut batches = self.state.lock().await;
        batches[idx].status = outcome.status;
        batches[idx].retry_count = outcome.retry_count;
        batches[idx].last_error = outcome.last_error;
        batches[idx].responses = outcome.responses;
    }

    /// Re-executes a single already-numbered batch outside the normal run
    /// flow (`RerunBatch`), publishing its progress on
    /// `batch_rerun/<run_id>` instead of `run/<run_id>`. Resets that
    /// batch's retry count, since a manual rerun is a fresh attempt.
    pub async fn rerun_batch(&self, batch_number: u32) -> Result<Batch, RerunError> {
        let idx = {
            let batches = self.state.lock().await;
            batches
                .iter()
                .position(|b| b.number == batch_number)
                .ok_or(RerunError::UnknownBatch(batch_number))?
        };

        let test_ids = self.state.lock().await[idx].test_ids.clone();
        let cases: Vec<_> = test_ids
            .iter()
            .filter_map(|id| self.suite.get(id).cloned())
            .collect();

        let executor = BatchExecutor::new(
            Arc::clone(&self.model_client),
            Arc::clone(&self.events),
            self.run_id.clone(),
            batch_number,
            self.executor_config.clone(),
        )
        .with_topic(batch_rerun_topic(&self.run_id));

        let outcome = executor.run(&cases, CancellationToken::new()).await;

        let mut batches = self.state.lock().await;
        batches[idx].status = outcome.status;
        batches[idx].retry_count = outcome.retry_count;
        batches[idx].last_error = outcome.last_error;
        batches[idx].responses = outcome.responses.clone();

        Ok(batches[idx].clone())
    }

    /// The temperature this coordinator's batches are run at, exposed for
    /// callers building an [`crate::store::ArtifactMetadata`].
    pub fn temperature(&self) -> f64 {
        self.temperature
    }
}

/// Errors rerunning a single batch manually.
#[derive(Debug, thiserror::Error)]
pub enum RerunError {
    #[error("run has no batch numbered {0}")]
    UnknownBatch(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunRequest;
    use crate::modelclient::mock::{MockModelClient, ScriptedOutcome};
    use crate::modelclient::ModelError;
    use crate::orchestrator::BatchSizing;
    use crate::suite::TestCase;

    fn suite() -> Arc<TestSuite> {
        let cases = (0..4)
            .map(|i| TestCase {
                id: format!("t{i}"),
                category: "general".to_string(),
                level: 1,
                points: 10,
                task: "write a function".to_string(),
                required_patterns: vec![],
                forbidden_patterns: vec![],
                hints: vec![],
            })
            .collect();
        Arc::new(TestSuite::new("s", cases).unwrap())
    }

    #[tokio::test]
    async fn completes_when_every_batch_succeeds() {
        let mut request = RunRequest::new("mock-model", "baseline");
        request.batch_sizing = BatchSizing::Uniform(2);
        let harness = HarnessConfig {
            batch_concurrency: 2,
            run_soft_timeout_secs: 30,
            ..Default::default()
        };
        let client = Arc::new(MockModelClient::always_respond("fn a() {}"));
        let coordinator = Arc::new(
            RunCoordinator::new(
                "run1".to_string(),
                suite(),
                &request,
                client,
                Arc::new(EventBus::new()),
                &harness,
            )
            .unwrap(),
        );
        let run = coordinator.run().await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.batches.len(), 2);
        assert_eq!(run.merged_responses().len(), 4);
    }

    // Scenario 5 (retry exhaustion / non-retryable failure): a batch that
    // never produces a response still leaves every one of its test ids in
    // the merged map, filled with an empty string, rather than missing.
    #[tokio::test]
    async fn failed_batch_ids_are_present_with_empty_responses() {
        let mut request = RunRequest::new("mock-model", "baseline");
        request.batch_sizing = BatchSizing::Uniform(2);
        let harness = HarnessConfig {
            batch_concurrency: 1,
            run_soft_timeout_secs: 30,
            ..Default::default()
        };
        let client = Arc::new(MockModelClient::scripted(vec![ScriptedOutcome::Fail(
            ModelError::BadRequest("malformed prompt".into()),
        )]));
        let coordinator = Arc::new(
            RunCoordinator::new(
                "run4".to_string(),
                suite(),
                &request,
                client,
                Arc::new(EventBus::new()),
                &harness,
            )
            .unwrap(),
        );
        let run = coordinator.run().await;
        // batch 1 failed outright (non-retryable); batch 2 used the
        // fallback response, so the run still completes overall.
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.batches[0].status, BatchStatus::Failed);
        assert_eq!(run.batches[1].status, BatchStatus::Completed);

        let responses = run.merged_responses();
        assert_eq!(responses.len(), 4);
        assert_eq!(responses["t0"], "");
        assert_eq!(responses["t1"], "");
        assert!(!responses["t2"].is_empty());
        assert!(!responses["t3"].is_empty());
    }

    #[tokio::test]
    async fn cancel_before_run_yields_cancelled_status() {
        let request = RunRequest::new("mock-model", "baseline");
        let harness = HarnessConfig::default();
        let client = Arc::new(MockModelClient::always_respond("fn a() {}"));
        let coordinator = Arc::new(
            RunCoordinator::new(
                "run2".to_string(),
                suite(),
                &request,
                client,
                Arc::new(EventBus::new()),
                &harness,
            )
            .unwrap(),
        );
        coordinator.cancellation_token().cancel();
        let run = coordinator.run().await;
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn rerun_batch_replaces_its_outcome() {
        let mut request = RunRequest::new("mock-model", "baseline");
        request.batch_sizing = BatchSizing::Uniform(4);
        let harness = HarnessConfig::default();
        let client = Arc::new(MockModelClient::always_respond("fn a() {}"));
        let coordinator = Arc::new(
            RunCoordinator::new(
                "run3".to_string(),
                suite(),
                &request,
                client,
                Arc::new(EventBus::new()),
                &harness,
            )
            .unwrap(),
        );
        let _ = coordinator.clone().run().await;
        let batch = coordinator.rerun_batch(1).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
    }
}
