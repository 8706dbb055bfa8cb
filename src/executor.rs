//! Batch execution: drives one [`Batch`](crate::orchestrator::Batch) through
//! its state machine against a [`ModelClient`].
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        BatchExecutor                           │
//! │  pending -> running -> completed                                │
//! │                     -> retrying -> running (if retries remain)  │
//! │                     -> failed   (retries exhausted or cancel)   │
//! │                                                                  │
//! │  each attempt: build_batch_prompt -> ModelClient::invoke         │
//! │                -> parse_batch_response                          │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! At most one model call is in flight per batch at any time; a retry
//! re-issues the full batch prompt rather than merging partial results
//! across attempts.

pub mod retry;
pub mod runner;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::eventbus::{run_topic, Event, EventBus, EventKind};
use crate::modelclient::{ModelClient, ModelError};
use crate::suite::TestCase;

pub use retry::BackoffPolicy;
pub use runner::{build_batch_prompt, parse_batch_response};

/// Default per-batch wall timeout.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(600);
/// Default number of retries a batch is allowed before it is marked failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Response token budget handed to the model client for a batch call.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Terminal/in-flight state of a batch's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Failed,
}

/// The result of driving a batch to completion (or exhaustion).
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// test id -> code, for every test case this batch attempted to answer.
    /// Empty on a failed batch.
    pub responses: HashMap<String, String>,
}

/// Configuration for one [`BatchExecutor`] run.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub temperature: f64,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            timeout: DEFAULT_BATCH_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Drives a single batch of test cases against a [`ModelClient`], handling
/// retries, timeouts, and cancellation, and publishing progress events.
pub struct BatchExecutor {
    model_client: Arc<dyn ModelClient>,
    events: Arc<EventBus>,
    topic: String,
    run_id: String,
    batch_number: u32,
    config: ExecutorConfig,
}

impl BatchExecutor {
    /// Builds an executor that publishes progress on `run/<run_id>`.
    pub fn new(
        model_client: Arc<dyn ModelClient>,
        events: Arc<EventBus>,
        run_id: String,
        batch_number: u32,
        config: ExecutorConfig,
    ) -> Self {
        let topic = run_topic(&run_id);
        Self {
            model_client,
            events,
            topic,
            run_id,
            batch_number,
            config,
        }
    }

    /// Overrides the publication topic, used for manual batch reruns which
    /// publish on `batch_rerun/<run_id>` instead of `run/<run_id>`.
    pub fn with_topic(mut self, topic: String) -> Self {
        self.topic = topic;
        self
    }

    fn publish(&self, kind: EventKind, payload: serde_json::Value) {
        self.events.publish(
            &self.topic,
            Event {
                kind,
                run_id: self.run_id.clone(),
                batch_number: Some(self.batch_number),
                sequence: 0,
                payload,
            },
        );
    }

    /// Runs `cases` to completion or exhaustion, respecting `cancel`.
    ///
    /// Cancellation is checked before every attempt and races the in-flight
    /// model call and any backoff sleep; a cancellation observed mid-call
    /// stops the batch at that suspension point rather than waiting for the
    /// call to finish.
    pub async fn run(&self, cases: &[TestCase], cancel: CancellationToken) -> BatchOutcome {
        let prompt = build_batch_prompt(cases);
        self.publish(EventKind::BatchStarted, serde_json::json!({}));

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                self.publish(EventKind::BatchFailed, serde_json::json!({ "reason": "cancelled" }));
                return BatchOutcome {
                    status: BatchStatus::Failed,
                    retry_count: attempt,
                    last_error: Some("cancelled".to_string()),
                    responses: HashMap::new(),
                };
            }

            let call = self.model_client.invoke(
                &prompt,
                self.config.temperature,
                DEFAULT_MAX_TOKENS,
                self.config.timeout,
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ModelError::Cancelled),
                result = tokio::time::timeout(self.config.timeout, call) => {
                    result.unwrap_or(Err(ModelError::Timeout(self.config.timeout)))
                }
            };

            match outcome {
                Ok(response) => {
                    let responses = parse_batch_response(cases, &response.text);
                    info!(run_id = %self.run_id, batch = self.batch_number, "batch completed");
                    self.publish(EventKind::BatchCompleted, serde_json::json!({ "attempt": attempt }));
                    return BatchOutcome {
                        status: BatchStatus::Completed,
                        retry_count: attempt,
                        last_error: None,
                        responses,
                    };
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    let retries_remain = attempt + 1 < self.config.max_retries;

                    if !retryable || !retries_remain {
                        warn!(
                            run_id = %self.run_id,
                            batch = self.batch_number,
                            error = %err,
                            "batch failed"
                        );
                        self.publish(
                            EventKind::BatchFailed,
                            serde_json::json!({ "attempt": attempt, "error": err.to_string() }),
                        );
                        return BatchOutcome {
                            status: BatchStatus::Failed,
                            retry_count: attempt,
                            last_error: Some(err.to_string()),
                            responses: HashMap::new(),
                        };
                    }

                    let delay = match &err {
                        ModelError::RateLimited(_) => {
                            self.config.backoff.delay_for_rate_limited_attempt(attempt)
                        }
                        _ => self.config.backoff.delay_for_attempt(attempt),
                    };

                    self.publish(
                        EventKind::BatchRetry,
                        serde_json::json!({ "attempt": attempt + 1, "reason": err.to_string() }),
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            self.publish(EventKind::BatchFailed, serde_json::json!({ "reason": "cancelled" }));
                            return BatchOutcome {
                                status: BatchStatus::Failed,
                                retry_count: attempt + 1,
                                last_error: Some("cancelled".to_string()),
                                responses: HashMap::new(),
                            };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }

                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modelclient::mock::{MockModelClient, ScriptedOutcome};
    use crate::suite::TestCase;

    fn case(id: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            category: "general".to_string(),
            level: 1,
            points: 10,
            task: "do it".to_string(),
            required_patterns: vec![],
            forbidden_patterns: vec![],
            hints: vec![],
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            temperature: 0.0,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff: BackoffPolicy {
                base: Duration::from_millis(1),
                factor: 2.0,
                cap: Duration::from_millis(10),
                jitter: 0.0,
            },
        }
    }

    // Scenario 4: retry convergence.
    #[tokio::test]
    async fn retries_then_succeeds() {
        let client = MockModelClient::scripted(vec![
            ScriptedOutcome::Fail(ModelError::Transport("down".into())),
            ScriptedOutcome::Fail(ModelError::Transport("down again".into())),
            ScriptedOutcome::Respond("=== TEST:t1 ===\nfn a() {}".into()),
        ]);
        let executor = BatchExecutor::new(
            Arc::new(client),
            Arc::new(EventBus::new()),
            "run1".to_string(),
            1,
            fast_config(),
        );
        let outcome = executor.run(&[case("t1")], CancellationToken::new()).await;
        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.retry_count, 2);
        assert_eq!(outcome.responses.get("t1").unwrap(), "fn a() {}");
    }

    // Scenario 5: retry exhaustion.
    #[tokio::test]
    async fn exhausts_retries_and_fails() {
        let client = MockModelClient::scripted(vec![
            ScriptedOutcome::Fail(ModelError::Transport("1".into())),
            ScriptedOutcome::Fail(ModelError::Transport("2".into())),
            ScriptedOutcome::Fail(ModelError::Transport("3".into())),
        ]);
        let executor = BatchExecutor::new(
            Arc::new(client),
            Arc::new(EventBus::new()),
            "run2".to_string(),
            1,
            fast_config(),
        );
        let outcome = executor.run(&[case("t1")], CancellationToken::new()).await;
        assert_eq!(outcome.status, BatchStatus::Failed);
        assert!(outcome.responses.is_empty());
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let client = MockModelClient::scripted(vec![ScriptedOutcome::Fail(ModelError::BadRequest(
            "nope".into(),
        ))]);
        let executor = BatchExecutor::new(
            Arc::new(client),
            Arc::new(EventBus::new()),
            "run3".to_string(),
            1,
            fast_config(),
        );
        let outcome = executor.run(&[case("t1")], CancellationToken::new()).await;
        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.retry_count, 0);
    }

    #[tokio::test]
    async fn cancellation_before_attempt_fails_as_cancelled() {
        let client = MockModelClient::always_respond("should not be called");
        let executor = BatchExecutor::new(
            Arc::new(client),
            Arc::new(EventBus::new()),
            "run4".to_string(),
            1,
            fast_config(),
        );
        let token = CancellationToken::new();
        token.cancel();
        let outcome = executor.run(&[case("t1")], token).await;
        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.last_error.as_deref(), Some("cancelled"));
    }
}
