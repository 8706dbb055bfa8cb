//! Scores completed artifacts as they appear, bounded by its own
//! concurrency cap and decoupled from the Queue Manager through the event
//! bus: it learns about new artifacts purely by watching `RunCompleted`
//! events on [`GLOBAL_TOPIC`], the same subscribe-and-react idiom the
//! Batch Executor uses for progress reporting.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::eventbus::{run_topic, Event, EventBus, EventKind, GLOBAL_TOPIC};
use crate::scorer::{build_eval_result, score_artifact, EvalResult, ScoringConfig};
use crate::store::{ArtifactId, Store, StoreError};
use crate::suite::TestSuite;
use crate::syntaxcheck::SyntaxChecker;

/// Errors from [`EvaluatorScheduler::evaluate`].
#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Scores artifacts against a fixed suite and scoring configuration,
/// writing the result back to the store and publishing progress on the
/// artifact's originating run topic.
///
/// `evaluate` is idempotent: a second call for an artifact that already has
/// a stored [`EvalResult`] returns the cached result without re-scoring.
pub struct EvaluatorScheduler {
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    suite: Arc<TestSuite>,
    syntax_checker: Option<Arc<dyn SyntaxChecker>>,
    scoring: ScoringConfig,
    semaphore: Arc<Semaphore>,
}

impl EvaluatorScheduler {
    /// Builds a scheduler bounded to `concurrency` simultaneous evaluations.
    pub fn new(
        store: Arc<dyn Store>,
        events: Arc<EventBus>,
        suite: Arc<TestSuite>,
        syntax_checker: Option<Arc<dyn SyntaxChecker>>,
        scoring: ScoringConfig,
        concurrency: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            events,
            suite,
            syntax_checker,
            scoring,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        })
    }

    /// Scores `artifact_id`, persists the result, and returns it. Returns
    /// the cached result immediately if this artifact was already scored.
    pub async fn evaluate(&self, artifact_id: &ArtifactId) -> Result<EvalResult, EvaluatorError> {
        if let Ok(cached) = self.store.read_eval_result(artifact_id).await {
            return Ok(cached);
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("evaluator semaphore never closed");

        // Re-check under the permit: a racing caller may have finished
        // scoring this artifact while we waited.
        if let Ok(cached) = self.store.read_eval_result(artifact_id).await {
            return Ok(cached);
        }

        let artifact = self.store.read_artifact(artifact_id).await?;
        let topic = run_topic(&artifact.run_id);
        self.publish(&topic, &artifact.run_id, EventKind::EvaluationStarted, serde_json::json!({}));

        let per_test = score_artifact(
            &self.suite,
            &artifact.responses,
            self.syntax_checker.as_deref(),
            &self.scoring,
        )
        .await;
        let result = build_eval_result(artifact.id.clone(), artifact.metadata.clone(), per_test);

        match self.store.write_eval_result(&result).await {
            Ok(()) => {
                info!(artifact_id = %artifact_id, "evaluation completed");
                self.publish(
                    &topic,
                    &artifact.run_id,
                    EventKind::EvaluationCompleted,
                    serde_json::json!({ "overall_percent": result.summary.overall_percent }),
                );
                Ok(result)
            }
            Err(err) => {
                warn!(artifact_id = %artifact_id, error = %err, "failed to persist eval result");
                self.publish(
                    &topic,
                    &artifact.run_id,
                    EventKind::EvaluationFailed,
                    serde_json::json!({ "error": err.to_string() }),
                );
                Err(err.into())
            }
        }
    }

    fn publish(&self, topic: &str, run_id: &str, kind: EventKind, payload: serde_json::Value) {
        self.events.publish(
            topic,
            Event {
                kind,
                run_id: run_id.to_string(),
                batch_number: None,
                sequence: 0,
                payload,
            },
        );
    }

    /// Subscribes to [`GLOBAL_TOPIC`] and spawns a background evaluation for
    /// every `run.completed` event it observes, extracting `artifact_id`
    /// from the event payload the Queue Manager embeds there.
    pub fn spawn_watcher(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut sub = self.events.subscribe(GLOBAL_TOPIC, None);
            loop {
                let event = sub.recv().await;
                if event.kind != EventKind::RunCompleted {
                    continue;
                }
                let Some(raw) = event.payload.get("artifact_id").and_then(|v| v.as_str()) else {
                    continue;
                };
                let artifact_id = ArtifactId::from_raw(raw.to_string());
                let scheduler = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(err) = scheduler.evaluate(&artifact_id).await {
                        warn!(artifact_id = %artifact_id, error = %err, "background evaluation failed");
                    }
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fs::FsStore;
    use crate::store::{Artifact, ArtifactMetadata};
    use crate::suite::TestCase;
    use chrono::Utc;
    use std::collections::HashMap;

    fn suite() -> Arc<TestSuite> {
        let cases = vec![TestCase {
            id: "t1".to_string(),
            category: "general".to_string(),
            level: 1,
            points: 10,
            task: "write a function".to_string(),
            required_patterns: vec!["fn".to_string()],
            forbidden_patterns: vec![],
            hints: vec![],
        }];
        Arc::new(TestSuite::new("s", cases).unwrap())
    }

    async fn store_with_artifact() -> (Arc<dyn Store>, Artifact, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(FsStore::open(dir.path()).await.unwrap());
        let created_at = Utc::now();
        let artifact = Artifact {
            id: ArtifactId::new("model-a", "v1", created_at),
            run_id: "run1".to_string(),
            responses: HashMap::from([("t1".to_string(), "fn a() {}".to_string())]),
            metadata: ArtifactMetadata {
                model: "model-a".to_string(),
                variant: "v1".to_string(),
                temperature: 1.0,
                created_at,
                run_id: "run1".to_string(),
                suite_name: "s".to_string(),
                total_tests: 1,
                batch_sizing: crate::orchestrator::BatchSizing::Uniform(1),
            },
        };
        store.write_artifact(&artifact).await.unwrap();
        (store, artifact, dir)
    }

    #[tokio::test]
    async fn evaluate_scores_and_persists() {
        let (store, artifact, _dir) = store_with_artifact().await;
        let scheduler = EvaluatorScheduler::new(
            Arc::clone(&store),
            Arc::new(EventBus::new()),
            suite(),
            None,
            ScoringConfig::default(),
            2,
        );
        let result = scheduler.evaluate(&artifact.id).await.unwrap();
        assert_eq!(result.summary.overall_percent, 100.0);
        let persisted = store.read_eval_result(&artifact.id).await.unwrap();
        assert_eq!(persisted.summary.overall_percent, 100.0);
    }

    #[tokio::test]
    async fn evaluate_is_idempotent() {
        let (store, artifact, _dir) = store_with_artifact().await;
        let scheduler = EvaluatorScheduler::new(
            Arc::clone(&store),
            Arc::new(EventBus::new()),
            suite(),
            None,
            ScoringConfig::default(),
            2,
        );
        let first = scheduler.evaluate(&artifact.id).await.unwrap();
        let second = scheduler.evaluate(&artifact.id).await.unwrap();
        assert_eq!(first.summary.overall_percent, second.summary.overall_percent);
    }

    #[tokio::test]
    async fn watcher_evaluates_on_run_completed_event() {
        let (store, artifact, _dir) = store_with_artifact().await;
        let events = Arc::new(EventBus::new());
        let scheduler = EvaluatorScheduler::new(
            Arc::clone(&store),
            Arc::clone(&events),
            suite(),
            None,
            ScoringConfig::default(),
            2,
        );
        Arc::clone(&scheduler).spawn_watcher();

        events.publish(
            GLOBAL_TOPIC,
            Event {
                kind: EventKind::RunCompleted,
                run_id: artifact.run_id.clone(),
                batch_number: None,
                sequence: 0,
                payload: serde_json::json!({ "artifact_id": artifact.id.as_str() }),
            },
        );

        // Give the spawned tasks a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let persisted = store.read_eval_result(&artifact.id).await;
        assert!(persisted.is_ok());
    }
}
