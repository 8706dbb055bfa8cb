//! A deterministic, in-process [`ModelClient`](super::ModelClient), used for
//! local runs and for driving the Batch Executor's retry/timeout logic in
//! tests without a real network call.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ModelClient, ModelError, ModelResponse, Usage};

/// One scripted outcome for a call to [`MockModelClient::invoke`].
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Respond(String),
    Fail(ModelError),
}

/// A model client whose responses are fixed in advance.
///
/// Each call to `invoke` pops the next [`ScriptedOutcome`] off a per-client
/// queue; once the queue is empty, calls fall back to echoing a canned
/// response built from the prompt, so tests that don't care about exact
/// wording still get a deterministic, non-empty response.
pub struct MockModelClient {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: String,
}

impl MockModelClient {
    /// A client with no scripted outcomes: every call succeeds with
    /// `fallback`.
    pub fn always_respond(fallback: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
        }
    }

    /// A client that plays back `outcomes` in order, one per call, then
    /// falls back to a generic response once exhausted.
    pub fn scripted(outcomes: Vec<ScriptedOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            fallback: "mock response".to_string(),
        }
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn invoke(
        &self,
        _prompt: &str,
        _temperature: f64,
        _max_tokens: u32,
        _timeout: Duration,
    ) -> Result<ModelResponse, ModelError> {
        let next = self.script.lock().expect("mock client mutex poisoned").pop_front();
        match next {
            Some(ScriptedOutcome::Respond(text)) => Ok(ModelResponse {
                text,
                usage: Usage::default(),
            }),
            Some(ScriptedOutcome::Fail(err)) => Err(err),
            None => Ok(ModelResponse {
                text: self.fallback.clone(),
                usage: Usage::default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_respond_echoes_fallback_every_call() {
        let client = MockModelClient::always_respond("ok");
        for _ in 0..3 {
            let resp = client
                .invoke("p", 0.0, 100, Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(resp.text, "ok");
        }
    }

    #[tokio::test]
    async fn scripted_plays_back_in_order_then_falls_back() {
        let client = MockModelClient::scripted(vec![
            ScriptedOutcome::Fail(ModelError::Transport("boom".into())),
            ScriptedOutcome::Respond("second try".into()),
        ]);
        let first = client.invoke("p", 0.0, 100, Duration::from_secs(1)).await;
        assert!(matches!(first, Err(ModelError::Transport(_))));
        let second = client.invoke("p", 0.0, 100, Duration::from_secs(1)).await.unwrap();
        assert_eq!(second.text, "second try");
        let third = client.invoke("p", 0.0, 100, Duration::from_secs(1)).await.unwrap();
        assert_eq!(third.text, "mock response");
    }
}
