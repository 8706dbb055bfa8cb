//! Test suite definitions and documentation variants.
//!
//! A [`TestSuite`] is the immutable input to a [`Run`](crate::orchestrator::Run):
//! an ordered list of [`TestCase`]s loaded once at process start and never
//! mutated afterward. A [`Variant`] is one version of the reference
//! documentation handed to the model; the harness only needs its name and
//! size, the documentation content itself is resolved through
//! [`VariantCatalog`].

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single task in the benchmark suite.
///
/// Loaded once from the suite definition and never mutated; cloned where
/// callers need an owned copy (the suite itself is typically held behind
/// an `Arc`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique identifier within the suite.
    pub id: String,
    /// Grouping used for the Scorer's category breakdown.
    pub category: String,
    /// Difficulty/curriculum level, >= 1.
    pub level: u32,
    /// Points available for this test, >= 1.
    pub points: u32,
    /// The task prompt text shown to the model.
    pub task: String,
    /// Substrings that must appear in the response, in the order a human
    /// would check them (order does not affect scoring, only readability).
    #[serde(default)]
    pub required_patterns: Vec<String>,
    /// Substrings that must not appear in the response.
    #[serde(default)]
    pub forbidden_patterns: Vec<String>,
    /// Optional hints surfaced to the model or to a human reviewer.
    #[serde(default)]
    pub hints: Vec<String>,
}

/// Errors that can occur while loading or validating a suite.
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    /// The suite file could not be read.
    #[error("failed to read suite file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The suite file was not valid JSON or did not match the schema.
    #[error("failed to parse suite file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// Two test cases shared the same id.
    #[error("duplicate test case id: {0}")]
    DuplicateId(String),
    /// A test case had an out-of-range field (level or points < 1).
    #[error("test case {id} has invalid {field}: {value}")]
    InvalidField {
        id: String,
        field: &'static str,
        value: i64,
    },
}

/// An ordered, immutable collection of [`TestCase`]s.
///
/// Construction validates uniqueness of ids and the level/points bounds
/// spec'd for every test case; a suite that fails validation is never
/// returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    /// Human-readable suite name.
    pub name: String,
    /// Test cases in suite order. Batch numbering and partitioning both
    /// respect this order.
    cases: Vec<TestCase>,
}

impl TestSuite {
    /// Builds a suite from already-loaded test cases, validating invariants.
    pub fn new(name: impl Into<String>, cases: Vec<TestCase>) -> Result<Self, SuiteError> {
        let mut seen = std::collections::HashSet::with_capacity(cases.len());
        for case in &cases {
            if !seen.insert(case.id.as_str()) {
                return Err(SuiteError::DuplicateId(case.id.clone()));
            }
            if case.level < 1 {
                return Err(SuiteError::InvalidField {
                    id: case.id.clone(),
                    field: "level",
                    value: i64::from(case.level),
                });
            }
            if case.points < 1 {
                return Err(SuiteError::InvalidField {
                    id: case.id.clone(),
                    field: "points",
                    value: i64::from(case.points),
                });
            }
        }
        Ok(Self {
            name: name.into(),
            cases,
        })
    }

    /// Loads a suite from a JSON file: `{"name": ..., "cases": [...]}`.
    ///
    /// Routes through [`TestSuite::new`], so a malformed suite file (a
    /// duplicate id, or a level/points below 1) is rejected the same as a
    /// suite built programmatically.
    pub fn load(path: &Path) -> Result<Self, SuiteError> {
        let content = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content, &path.display().to_string())
    }

    fn from_json(content: &str, path: &str) -> Result<Self, SuiteError> {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            cases: Vec<TestCase>,
        }
        let raw: Raw = serde_json::from_str(content).map_err(|source| SuiteError::Parse {
            path: path.to_string(),
            source,
        })?;
        Self::new(raw.name, raw.cases)
    }

    /// All test cases, in suite order.
    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Number of test cases in the suite.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// True if the suite has no test cases.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Sum of points across every test case.
    pub fn total_points(&self) -> u32 {
        self.cases.iter().map(|c| c.points).sum()
    }

    /// Looks up a test case by id.
    pub fn get(&self, id: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.id == id)
    }

    /// Returns a new suite containing only the test cases whose id is in
    /// `ids`, preserving suite order. Used for the "custom suite filter"
    /// on a [`RunRequest`](crate::config::RunRequest).
    pub fn filtered(&self, ids: &std::collections::HashSet<String>) -> TestSuite {
        TestSuite {
            name: self.name.clone(),
            cases: self
                .cases
                .iter()
                .filter(|c| ids.contains(&c.id))
                .cloned()
                .collect(),
        }
    }
}

/// One version of the reference documentation handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    /// Variant name, referenced by [`RunRequest::variant`](crate::config::RunRequest).
    pub name: String,
    /// Size of the documentation blob in bytes.
    pub size_bytes: u64,
    /// Opaque reference to the documentation content (a path, URL, or
    /// content hash — interpretation is left to the `VariantCatalog`
    /// implementation).
    pub reference: String,
}

/// Errors from variant lookup.
#[derive(Debug, thiserror::Error)]
pub enum VariantError {
    /// No variant with the given name is known to the catalog.
    #[error("unknown variant: {0}")]
    NotFound(String),
}

/// Resolves variant names to [`Variant`] metadata.
///
/// This is one of the collaborator interfaces the core consumes but does
/// not own the implementation of (documentation fetching is explicitly out
/// of scope); [`InMemoryVariantCatalog`] is the reference implementation
/// used for local runs and tests.
#[async_trait]
pub trait VariantCatalog: Send + Sync {
    /// Resolves a single variant by name.
    async fn get(&self, name: &str) -> Result<Variant, VariantError>;

    /// Lists every variant the catalog knows about.
    async fn list(&self) -> Vec<Variant>;
}

/// A variant catalog backed by a plain in-memory map, populated from
/// configuration at startup.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVariantCatalog {
    variants: HashMap<String, Variant>,
}

impl InMemoryVariantCatalog {
    /// Builds a catalog from a list of variants.
    pub fn new(variants: Vec<Variant>) -> Self {
        Self {
            variants: variants.into_iter().map(|v| (v.name.clone(), v)).collect(),
        }
    }
}

#[async_trait]
impl VariantCatalog for InMemoryVariantCatalog {
    async fn get(&self, name: &str) -> Result<Variant, VariantError> {
        self.variants
            .get(name)
            .cloned()
            .ok_or_else(|| VariantError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Vec<Variant> {
        self.variants.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str, points: u32) -> TestCase {
        TestCase {
            id: id.to_string(),
            category: "general".to_string(),
            level: 1,
            points,
            task: "do the thing".to_string(),
            required_patterns: vec![],
            forbidden_patterns: vec![],
            hints: vec![],
        }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = TestSuite::new("s", vec![case("t1", 10), case("t1", 20)]).unwrap_err();
        assert!(matches!(err, SuiteError::DuplicateId(id) if id == "t1"));
    }

    #[test]
    fn rejects_zero_points() {
        let err = TestSuite::new("s", vec![case("t1", 0)]).unwrap_err();
        assert!(matches!(err, SuiteError::InvalidField { field: "points", .. }));
    }

    #[test]
    fn total_points_sums_cases() {
        let suite = TestSuite::new("s", vec![case("t1", 10), case("t2", 20)]).unwrap();
        assert_eq!(suite.total_points(), 30);
    }

    #[tokio::test]
    async fn catalog_resolves_known_variant() {
        let catalog = InMemoryVariantCatalog::new(vec![Variant {
            name: "v1".to_string(),
            size_bytes: 1024,
            reference: "docs/v1.md".to_string(),
        }]);
        let v = catalog.get("v1").await.unwrap();
        assert_eq!(v.size_bytes, 1024);
        assert!(matches!(catalog.get("missing").await, Err(VariantError::NotFound(_))));
    }
}
