//! Abstract interface to the model under test.
//!
//! The harness never speaks an LLM's wire protocol directly: everything it
//! knows about invoking a model goes through [`ModelClient`]. This mirrors
//! the teacher's `SandboxProvider`/`Sandbox` split, where the orchestrator
//! is generic over a provider trait and ships one trivial in-process
//! implementation for local use (here, [`mock::MockModelClient`]).

use std::time::Duration;

use async_trait::async_trait;

pub mod mock;

/// Token/latency accounting returned alongside a model response. Not
/// scored on directly, but useful for reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A successful model invocation result.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub usage: Usage,
}

/// Errors a [`ModelClient`] can report. Variants map directly onto the
/// retryable/non-retryable classification the Batch Executor applies.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ModelError {
    /// Network-level failure reaching the model backend. Retryable.
    #[error("transport error: {0}")]
    Transport(String),
    /// Backend returned an HTTP 5xx or equivalent. Retryable.
    #[error("server error: {0}")]
    Server(String),
    /// Backend asked the caller to back off. Retryable, with backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Response body could not be parsed as expected. Retryable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The call did not complete within its timeout. Retryable.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The call was cancelled. Not retryable, terminal for the batch.
    #[error("cancelled")]
    Cancelled,
    /// Backend rejected the request outright (HTTP 4xx other than 429).
    /// Not retryable.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ModelError {
    /// True if the Batch Executor should attempt another try after seeing
    /// this error (assuming retries remain).
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Transport(_)
            | ModelError::Server(_)
            | ModelError::RateLimited(_)
            | ModelError::InvalidResponse(_)
            | ModelError::Timeout(_) => true,
            ModelError::Cancelled | ModelError::BadRequest(_) => false,
        }
    }
}

/// Invokes a model with a prompt and returns its response.
///
/// Implementations are expected to be idempotent from the caller's point of
/// view: the Batch Executor may call `invoke` again for the same batch
/// after a retryable failure, re-sending the full prompt.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Sends `prompt` to the model at the given `temperature`, capping the
    /// response at `max_tokens`, and returns within `timeout` or errors.
    async fn invoke(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<ModelResponse, ModelError>;
}
