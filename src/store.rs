//! Artifact and result persistence.
//!
//! The [`Store`] trait is the collaborator interface the core consumes for
//! durability; [`fs::FsStore`] is the reference implementation, producing
//! exactly the on-disk layout (`responses.json` + `eval.json` per artifact,
//! a manifest file per collection) called for by the data model.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestrator::BatchSizing;
use crate::scorer::EvalResult;

pub mod fs;

/// Identifier for an [`Artifact`]: `<model-slug>-<variant>-YYYYMMDD_HHMMSS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Builds an artifact id deterministically from model, variant, and
    /// creation timestamp.
    pub fn new(model: &str, variant: &str, created_at: DateTime<Utc>) -> Self {
        let slug = slugify(model);
        let stamp = created_at.format("%Y%m%d_%H%M%S");
        Self(format!("{slug}-{variant}-{stamp}"))
    }

    /// Wraps an already-formed id string (round-tripping from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn slugify(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

/// Denormalized metadata carried by an [`Artifact`] and, bit-identically,
/// by its [`crate::scorer::EvalResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub model: String,
    pub variant: String,
    pub temperature: f64,
    pub created_at: DateTime<Utc>,
    pub run_id: String,
    pub suite_name: String,
    pub total_tests: usize,
    pub batch_sizing: BatchSizing,
}

/// A completed run's aggregated response map, plus the metadata needed to
/// reproduce how it was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub run_id: String,
    /// test id -> submitted code. Ids with no response recorded (a batch
    /// that exhausted retries) are present with an empty string, per the
    /// "missing ids recorded as failures with empty code" invariant.
    pub responses: HashMap<String, String>,
    pub metadata: ArtifactMetadata,
}

/// A named, ordered group of artifacts sharing model+variant identity.
/// Holds references (ids) only; members are fetched from the `Store` on
/// demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub artifact_ids: Vec<ArtifactId>,
    pub created_at: DateTime<Utc>,
    /// Denormalized from the first member artifact at creation time.
    pub metadata: ArtifactMetadata,
}

/// Errors from the Store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("artifact not found: {0}")]
    ArtifactNotFound(ArtifactId),
    #[error("eval result not found for artifact: {0}")]
    EvalResultNotFound(ArtifactId),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("collection name already exists: {0}")]
    CollectionExists(String),
    #[error("cannot delete artifact {artifact} referenced by collection {collection}")]
    ReferencedByCollection { artifact: ArtifactId, collection: String },
    #[error("failed to persist to store: {0}")]
    Persist(String),
}

/// Durable storage for artifacts, evaluation results, and collections.
///
/// This is the only shared mutable resource in the system: writes are
/// serialized per artifact id, reads never observe a partially written
/// artifact (implementations must replace files atomically).
#[async_trait]
pub trait Store: Send + Sync {
    async fn write_artifact(&self, artifact: &Artifact) -> Result<(), StoreError>;
    async fn read_artifact(&self, id: &ArtifactId) -> Result<Artifact, StoreError>;
    async fn list_artifacts(&self) -> Result<Vec<ArtifactId>, StoreError>;

    async fn write_eval_result(&self, result: &EvalResult) -> Result<(), StoreError>;
    async fn read_eval_result(&self, artifact_id: &ArtifactId) -> Result<EvalResult, StoreError>;

    async fn create_collection(&self, name: &str, first_member: &Artifact) -> Result<(), StoreError>;
    async fn add_to_collection(&self, name: &str, artifact_id: &ArtifactId) -> Result<(), StoreError>;
    async fn remove_from_collection(&self, name: &str, artifact_id: &ArtifactId) -> Result<(), StoreError>;
    async fn delete_collection(&self, name: &str) -> Result<(), StoreError>;
    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;
    async fn read_collection(&self, name: &str) -> Result<Collection, StoreError>;

    /// Refused (returns [`StoreError::ReferencedByCollection`]) if any
    /// non-empty collection still references this artifact.
    async fn delete_artifact(&self, id: &ArtifactId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_id_format_is_model_variant_timestamp() {
        let created_at = DateTime::parse_from_rfc3339("2026-07-28T12:34:56Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = ArtifactId::new("GPT-4.Turbo", "v2", created_at);
        assert_eq!(id.as_str(), "gpt-4-turbo-v2-20260728_123456");
    }
}
