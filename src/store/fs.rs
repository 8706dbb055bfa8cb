//! Filesystem-backed [`Store`](super::Store) implementation.
//!
//! Each artifact gets its own directory under the store root, holding
//! `responses.json` (the [`Artifact`](super::Artifact)) and, once scored,
//! `eval.json` (the [`EvalResult`](crate::scorer::EvalResult)). Each
//! collection is a single manifest file. Writes land in a temp file and are
//! renamed into place so readers never observe a partially written file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::scorer::EvalResult;

use super::{Artifact, ArtifactId, Collection, Store, StoreError};

const RESPONSES_FILE: &str = "responses.json";
const EVAL_FILE: &str = "eval.json";
const COLLECTIONS_DIR: &str = "collections";
const ARTIFACTS_DIR: &str = "artifacts";

/// A [`Store`] rooted at a directory on local disk.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(ARTIFACTS_DIR))
            .await
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        fs::create_dir_all(root.join(COLLECTIONS_DIR))
            .await
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        Ok(Self { root })
    }

    fn artifact_dir(&self, id: &ArtifactId) -> PathBuf {
        self.root.join(ARTIFACTS_DIR).join(id.as_str())
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(COLLECTIONS_DIR).join(format!("{name}.json"))
    }

    async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Persist(e.to_string()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        Ok(())
    }

    async fn read_collection_file(&self, name: &str) -> Result<Collection, StoreError> {
        let path = self.collection_path(name);
        let content = fs::read(&path)
            .await
            .map_err(|_| StoreError::CollectionNotFound(name.to_string()))?;
        serde_json::from_slice(&content).map_err(|e| StoreError::Persist(e.to_string()))
    }
}

#[async_trait]
impl Store for FsStore {
    async fn write_artifact(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let path = self.artifact_dir(&artifact.id).join(RESPONSES_FILE);
        let content = serde_json::to_vec_pretty(artifact).map_err(|e| StoreError::Persist(e.to_string()))?;
        Self::write_atomic(&path, &content).await
    }

    async fn read_artifact(&self, id: &ArtifactId) -> Result<Artifact, StoreError> {
        let path = self.artifact_dir(id).join(RESPONSES_FILE);
        let content = fs::read(&path)
            .await
            .map_err(|_| StoreError::ArtifactNotFound(id.clone()))?;
        serde_json::from_slice(&content).map_err(|e| StoreError::Persist(e.to_string()))
    }

    async fn list_artifacts(&self) -> Result<Vec<ArtifactId>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.root.join(ARTIFACTS_DIR))
            .await
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Persist(e.to_string()))?
        {
            if let Some(name) = entry.file_name().to_str() {
                ids.push(ArtifactId::from_raw(name.to_string()));
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn write_eval_result(&self, result: &EvalResult) -> Result<(), StoreError> {
        let path = self.artifact_dir(&result.artifact_id).join(EVAL_FILE);
        let content = serde_json::to_vec_pretty(result).map_err(|e| StoreError::Persist(e.to_string()))?;
        Self::write_atomic(&path, &content).await
    }

    async fn read_eval_result(&self, artifact_id: &ArtifactId) -> Result<EvalResult, StoreError> {
        let path = self.artifact_dir(artifact_id).join(EVAL_FILE);
        let content = fs::read(&path)
            .await
            .map_err(|_| StoreError::EvalResultNotFound(artifact_id.clone()))?;
        serde_json::from_slice(&content).map_err(|e| StoreError::Persist(e.to_string()))
    }

    async fn create_collection(&self, name: &str, first_member: &Artifact) -> Result<(), StoreError> {
        let path = self.collection_path(name);
        if fs::metadata(&path).await.is_ok() {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        let collection = Collection {
            name: name.to_string(),
            artifact_ids: vec![first_member.id.clone()],
            created_at: first_member.metadata.created_at,
            metadata: first_member.metadata.clone(),
        };
        let content = serde_json::to_vec_pretty(&collection).map_err(|e| StoreError::Persist(e.to_string()))?;
        Self::write_atomic(&path, &content).await
    }

    async fn add_to_collection(&self, name: &str, artifact_id: &ArtifactId) -> Result<(), StoreError> {
        let mut collection = self.read_collection_file(name).await?;
        if !collection.artifact_ids.contains(artifact_id) {
            collection.artifact_ids.push(artifact_id.clone());
        }
        let path = self.collection_path(name);
        let content = serde_json::to_vec_pretty(&collection).map_err(|e| StoreError::Persist(e.to_string()))?;
        Self::write_atomic(&path, &content).await
    }

    async fn remove_from_collection(&self, name: &str, artifact_id: &ArtifactId) -> Result<(), StoreError> {
        let mut collection = self.read_collection_file(name).await?;
        collection.artifact_ids.retain(|id| id != artifact_id);
        let path = self.collection_path(name);
        let content = serde_json::to_vec_pretty(&collection).map_err(|e| StoreError::Persist(e.to_string()))?;
        Self::write_atomic(&path, &content).await
    }

    async fn delete_collection(&self, name: &str) -> Result<(), StoreError> {
        let path = self.collection_path(name);
        fs::remove_file(&path)
            .await
            .map_err(|_| StoreError::CollectionNotFound(name.to_string()))
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(self.root.join(COLLECTIONS_DIR))
            .await
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Persist(e.to_string()))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stripped) = name.strip_suffix(".json") {
                    names.push(stripped.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_collection(&self, name: &str) -> Result<Collection, StoreError> {
        self.read_collection_file(name).await
    }

    async fn delete_artifact(&self, id: &ArtifactId) -> Result<(), StoreError> {
        for name in self.list_collections().await? {
            let collection = self.read_collection_file(&name).await?;
            if collection.artifact_ids.contains(id) {
                return Err(StoreError::ReferencedByCollection {
                    artifact: id.clone(),
                    collection: name,
                });
            }
        }
        fs::remove_dir_all(self.artifact_dir(id))
            .await
            .map_err(|_| StoreError::ArtifactNotFound(id.clone()))
    }
}
