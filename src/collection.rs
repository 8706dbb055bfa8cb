//! Named groups of artifacts, and the summary statistics computed over
//! them.
//!
//! Grounded on the teacher's in-memory cache idiom (load the backing file,
//! mutate, save): a `Collection` is just a named list of artifact ids held
//! durably by the [`Store`]; this module adds the create/add/remove/delete
//! surface plus `stats`/`compare`, which fold each member's
//! [`EvalResult`](crate::scorer::EvalResult) on demand rather than caching
//! anything itself.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::scorer::EvalResult;
use crate::store::{Artifact, ArtifactId, Store, StoreError};

/// Errors from collection operations.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("collection '{0}' has no members to compute statistics over")]
    Empty(String),
}

/// Mean and population standard deviation of overall percentage across a
/// collection's artifacts, plus a per-category mean breakdown.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub name: String,
    pub file_count: usize,
    pub mean_percent: f64,
    pub stddev_percent: f64,
    pub mean_by_category: std::collections::BTreeMap<String, f64>,
}

/// Side-by-side comparison of two collections: their individual stats,
/// the union of categories either covers, and the per-category delta
/// (`c2 - c1`).
#[derive(Debug, Clone)]
pub struct Comparison {
    pub first: CollectionStats,
    pub second: CollectionStats,
    pub categories: Vec<String>,
    pub delta_by_category: std::collections::BTreeMap<String, f64>,
}

/// Creates, mutates, and summarizes [`Collection`](crate::store::Collection)s
/// backed by a [`Store`].
pub struct CollectionAggregator {
    store: Arc<dyn Store>,
}

impl CollectionAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Creates a new collection named `name` seeded with `first_member`.
    pub async fn create(&self, name: &str, first_member: &Artifact) -> Result<(), CollectionError> {
        Ok(self.store.create_collection(name, first_member).await?)
    }

    /// Adds an artifact to an existing collection. A no-op if it is already
    /// a member.
    pub async fn add(&self, name: &str, artifact_id: &ArtifactId) -> Result<(), CollectionError> {
        Ok(self.store.add_to_collection(name, artifact_id).await?)
    }

    /// Removes an artifact from a collection. A no-op if it was not a
    /// member.
    pub async fn remove(&self, name: &str, artifact_id: &ArtifactId) -> Result<(), CollectionError> {
        Ok(self.store.remove_from_collection(name, artifact_id).await?)
    }

    /// Deletes a collection outright. Member artifacts are untouched; only
    /// the grouping is removed.
    pub async fn delete(&self, name: &str) -> Result<(), CollectionError> {
        Ok(self.store.delete_collection(name).await?)
    }

    /// Names of every collection known to the store.
    pub async fn list(&self) -> Result<Vec<String>, CollectionError> {
        Ok(self.store.list_collections().await?)
    }

    async fn member_results(&self, name: &str) -> Result<Vec<EvalResult>, CollectionError> {
        let collection = self.store.read_collection(name).await?;
        let mut results = Vec::with_capacity(collection.artifact_ids.len());
        for id in &collection.artifact_ids {
            results.push(self.store.read_eval_result(id).await?);
        }
        Ok(results)
    }

    /// Computes [`CollectionStats`] over every member of `name`. Every
    /// member must already have a stored evaluation result. Fails with
    /// [`CollectionError::Empty`] if the collection has no members.
    pub async fn stats(&self, name: &str) -> Result<CollectionStats, CollectionError> {
        let results = self.member_results(name).await?;
        if results.is_empty() {
            return Err(CollectionError::Empty(name.to_string()));
        }
        Ok(summarize(name, &results))
    }

    /// Compares two collections: their individual stats, the union of
    /// categories either covers, and `second - first` per category.
    pub async fn compare(&self, first: &str, second: &str) -> Result<Comparison, CollectionError> {
        let first_stats = self.stats(first).await?;
        let second_stats = self.stats(second).await?;

        let categories: BTreeSet<String> = first_stats
            .mean_by_category
            .keys()
            .chain(second_stats.mean_by_category.keys())
            .cloned()
            .collect();

        let delta_by_category = categories
            .iter()
            .map(|category| {
                let a = first_stats.mean_by_category.get(category).copied().unwrap_or(0.0);
                let b = second_stats.mean_by_category.get(category).copied().unwrap_or(0.0);
                (category.clone(), round2(b - a))
            })
            .collect();

        Ok(Comparison {
            first: first_stats,
            second: second_stats,
            categories: categories.into_iter().collect(),
            delta_by_category,
        })
    }
}

/// Folds evaluation results into [`CollectionStats`]. Callers must ensure
/// `results` is non-empty; `stats` returns [`CollectionError::Empty`] before
/// reaching here otherwise.
fn summarize(name: &str, results: &[EvalResult]) -> CollectionStats {
    let file_count = results.len();
    let percents: Vec<f64> = results.iter().map(|r| r.summary.overall_percent).collect();
    let mean_percent = round2(mean(&percents));
    let stddev_percent = if file_count >= 2 {
        round2(population_stddev(&percents, mean_percent))
    } else {
        0.0
    };

    let mut by_category: std::collections::BTreeMap<String, Vec<f64>> = std::collections::BTreeMap::new();
    for result in results {
        for (category, breakdown) in &result.summary.by_category {
            by_category.entry(category.clone()).or_default().push(breakdown.percent());
        }
    }
    let mean_by_category = by_category
        .into_iter()
        .map(|(category, values)| (category, round2(mean(&values))))
        .collect();

    CollectionStats {
        name: name.to_string(),
        file_count,
        mean_percent,
        stddev_percent,
        mean_by_category,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_stddev(values: &[f64], mean_value: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
