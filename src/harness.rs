//! The façade a caller (CLI or embedding application) drives: wires the
//! Queue Manager, Evaluator Scheduler, Collection Aggregator, Event Bus,
//! Store, and Variant Catalog together behind the operations described for
//! the system as a whole — `Submit`, `CancelRun`, `CancelAll`,
//! `RerunBatch`, `Subscribe`, `GetRunStatus`, `Evaluate`,
//! `PromoteToCollection`, and `Compare`.

use std::sync::Arc;

use crate::collection::{CollectionAggregator, CollectionError, CollectionStats, Comparison};
use crate::config::schema::Config;
use crate::config::{ConfigError, RunRequest};
use crate::eventbus::{run_topic, Cursor, Event, EventBus, Subscription};
use crate::evaluator::{EvaluatorError, EvaluatorScheduler};
use crate::modelclient::mock::MockModelClient;
use crate::modelclient::ModelClient;
use crate::queue::{GlobalStatus, QueueError, QueueManager, RunSnapshot};
use crate::scorer::EvalResult;
use crate::store::fs::FsStore;
use crate::store::{Artifact, ArtifactId, Store, StoreConfig, StoreError};
use crate::suite::{InMemoryVariantCatalog, TestSuite, VariantCatalog};
use crate::syntaxcheck::{HeuristicSyntaxChecker, SyntaxChecker};

/// Errors surfaced directly from [`Harness`] operations that don't already
/// have a narrower error type of their own.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to open store: {0}")]
    StoreInit(String),
}

/// The top-level entry point: owns every long-lived collaborator and
/// exposes the operations a caller submits runs and reads results through.
pub struct Harness {
    queue: Arc<QueueManager>,
    evaluator: Arc<EvaluatorScheduler>,
    collections: CollectionAggregator,
    events: Arc<EventBus>,
    store: Arc<dyn Store>,
    catalog: Arc<dyn VariantCatalog>,
    suite: Arc<TestSuite>,
}

impl Harness {
    /// Builds a harness from a loaded [`Config`] and a test suite, using the
    /// filesystem store and the in-process mock model client backends.
    pub async fn new(config: Config, suite: TestSuite) -> Result<Self, HarnessError> {
        let events = Arc::new(EventBus::with_capacities(
            config.harness.event_subscriber_capacity,
            config.harness.event_snapshot_log_len,
        ));

        let store: Arc<dyn Store> = match &config.store {
            StoreConfig::Fs(fs) => Arc::new(
                FsStore::open(fs.root.clone())
                    .await
                    .map_err(|e| HarnessError::StoreInit(e.to_string()))?,
            ),
        };

        let model_client: Arc<dyn ModelClient> = match &config.model_client {
            crate::config::schema::ModelClientConfig::Mock(mock) => {
                Arc::new(MockModelClient::always_respond(mock.fallback.clone()))
            }
        };

        let catalog: Arc<dyn VariantCatalog> = Arc::new(InMemoryVariantCatalog::new(config.variants.clone()));
        let suite = Arc::new(suite);

        let queue = QueueManager::new(
            Arc::clone(&store),
            Arc::clone(&events),
            model_client,
            config.harness.clone(),
        );

        let syntax_checker: Option<Arc<dyn SyntaxChecker>> = if config.scoring.enable_jac_check {
            Some(Arc::new(HeuristicSyntaxChecker))
        } else {
            None
        };

        let evaluator = EvaluatorScheduler::new(
            Arc::clone(&store),
            Arc::clone(&events),
            Arc::clone(&suite),
            syntax_checker,
            config.scoring,
            config.harness.evaluator_concurrency,
        );
        Arc::clone(&evaluator).spawn_watcher();

        Ok(Self {
            queue,
            evaluator,
            collections: CollectionAggregator::new(Arc::clone(&store)),
            events,
            store,
            catalog,
            suite,
        })
    }

    /// Submits a validated [`RunRequest`], returning the run ids of every
    /// run it spawned (`request.queue_size` of them).
    pub async fn submit(&self, request: RunRequest) -> Result<Vec<String>, HarnessError> {
        request.validate_against(self.catalog.as_ref()).await?;
        Ok(self.queue.submit(Arc::clone(&self.suite), request).await?)
    }

    /// Cancels a single run.
    pub async fn cancel_run(&self, run_id: &str) -> bool {
        self.queue.cancel_run(run_id).await
    }

    /// Cancels every run currently tracked by the queue.
    pub async fn cancel_all(&self) {
        self.queue.cancel_all().await
    }

    /// Re-executes one batch of an already-submitted run.
    pub async fn rerun_batch(&self, run_id: &str, batch_number: u32) -> Result<crate::orchestrator::Batch, HarnessError> {
        Ok(self.queue.rerun_batch(run_id, batch_number).await?)
    }

    /// A snapshot of a single run's batches and terminal status, if any.
    pub async fn run_status(&self, run_id: &str) -> Option<RunSnapshot> {
        self.queue.run_status(run_id).await
    }

    /// Cross-run progress and the derived overall status.
    pub async fn global_status(&self) -> GlobalStatus {
        self.queue.global_status().await
    }

    /// Subscribes to a run's event stream, optionally resuming from a
    /// cursor.
    pub fn subscribe(&self, run_id: &str, cursor: Option<Cursor>) -> Subscription {
        self.events.subscribe(&run_topic(run_id), cursor)
    }

    /// Subscribes to the global event stream, across every run.
    pub fn subscribe_global(&self, cursor: Option<Cursor>) -> Subscription {
        self.events.subscribe(crate::eventbus::GLOBAL_TOPIC, cursor)
    }

    /// Scores an artifact, returning the cached result if it was already
    /// evaluated.
    pub async fn evaluate(&self, artifact_id: &ArtifactId) -> Result<EvalResult, HarnessError> {
        Ok(self.evaluator.evaluate(artifact_id).await?)
    }

    /// Reads an artifact directly from the store.
    pub async fn read_artifact(&self, artifact_id: &ArtifactId) -> Result<Artifact, HarnessError> {
        Ok(self.store.read_artifact(artifact_id).await?)
    }

    /// Starts a new collection (or adds to an existing one if `name` is
    /// already a collection) from an artifact already present in the store.
    pub async fn promote_to_collection(&self, name: &str, artifact_id: &ArtifactId) -> Result<(), HarnessError> {
        let artifact = self.store.read_artifact(artifact_id).await?;
        match self.collections.create(name, &artifact).await {
            Ok(()) => Ok(()),
            Err(CollectionError::Store(StoreError::CollectionExists(_))) => {
                Ok(self.collections.add(name, artifact_id).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Removes an artifact from a collection.
    pub async fn remove_from_collection(&self, name: &str, artifact_id: &ArtifactId) -> Result<(), HarnessError> {
        Ok(self.collections.remove(name, artifact_id).await?)
    }

    /// Deletes a collection (members are untouched).
    pub async fn delete_collection(&self, name: &str) -> Result<(), HarnessError> {
        Ok(self.collections.delete(name).await?)
    }

    /// Lists every collection known to the store.
    pub async fn list_collections(&self) -> Result<Vec<String>, HarnessError> {
        Ok(self.collections.list().await?)
    }

    /// Summary statistics for one collection.
    pub async fn collection_stats(&self, name: &str) -> Result<CollectionStats, HarnessError> {
        Ok(self.collections.stats(name).await?)
    }

    /// Compares two collections.
    pub async fn compare(&self, first: &str, second: &str) -> Result<Comparison, HarnessError> {
        Ok(self.collections.compare(first, second).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::TestCase;

    fn suite() -> TestSuite {
        let cases = vec![TestCase {
            id: "t1".to_string(),
            category: "general".to_string(),
            level: 1,
            points: 10,
            task: "write a function".to_string(),
            required_patterns: vec![],
            forbidden_patterns: vec![],
            hints: vec![],
        }];
        TestSuite::new("s", cases).unwrap()
    }

    async fn harness() -> (Harness, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store = StoreConfig::Fs(crate::config::schema::FsStoreConfig {
            root: dir.path().to_path_buf(),
        });
        config.variants = vec![crate::suite::Variant {
            name: "baseline".to_string(),
            size_bytes: 100,
            reference: "docs/baseline.md".to_string(),
        }];
        (Harness::new(config, suite()).await.unwrap(), dir)
    }

    // Scenario: queue_size = 1 behaves as a single run end to end,
    // including evaluation triggered purely from the event bus.
    #[tokio::test]
    async fn submit_with_queue_size_one_eventually_produces_an_evaluated_artifact() {
        let (harness, _dir) = harness().await;
        let request = RunRequest::new("mock-model", "baseline");
        let run_ids = harness.submit(request).await.unwrap();
        assert_eq!(run_ids.len(), 1);

        let run_id = &run_ids[0];
        let mut sub = harness.subscribe(run_id, None);
        loop {
            let event = sub.recv().await;
            if event.kind == crate::eventbus::EventKind::RunCompleted {
                break;
            }
        }

        let status = harness.run_status(run_id).await.unwrap();
        assert_eq!(status.status, Some(crate::orchestrator::RunStatus::Completed));
    }

    #[tokio::test]
    async fn unknown_variant_is_rejected_before_any_run_is_submitted() {
        let (harness, _dir) = harness().await;
        let request = RunRequest::new("mock-model", "does-not-exist");
        let err = harness.submit(request).await.unwrap_err();
        assert!(matches!(err, HarnessError::Config(ConfigError::UnknownVariant(_))));
    }
}
