//! Configuration schema definitions for llmbench.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. The schema uses serde for serialization and
//! tagged enums for pluggable collaborator selection (model client backend,
//! store backend), the same pattern the teacher uses for provider/framework
//! selection.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── HarnessConfig       - concurrency caps, timeouts, retries
//! ├── ModelClientConfig   - tagged enum selecting the ModelClient backend
//! │   └── Mock            - deterministic in-process backend
//! ├── StoreConfig         - tagged enum selecting the Store backend
//! │   └── Fs              - filesystem-backed store
//! ├── ScoringConfig       - penalty fractions for the Scorer (see scorer.rs)
//! ├── variants            - the VariantCatalog's contents
//! └── ReportConfig        - console output settings
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::scorer::ScoringConfig;
use crate::suite::Variant;

/// Root configuration structure for llmbench.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Concurrency caps, timeouts, and retry defaults for the orchestration
    /// engine.
    #[serde(default)]
    pub harness: HarnessConfig,

    /// Selects and configures the `ModelClient` backend.
    #[serde(default)]
    pub model_client: ModelClientConfig,

    /// Selects and configures the `Store` backend.
    #[serde(default)]
    pub store: StoreConfig,

    /// Penalty fractions used by the Scorer.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Documentation variants known to the `VariantCatalog`.
    #[serde(default)]
    pub variants: Vec<Variant>,

    /// Console output settings (optional, has defaults).
    #[serde(default)]
    pub report: ReportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            harness: HarnessConfig::default(),
            model_client: ModelClientConfig::default(),
            store: StoreConfig::default(),
            scoring: ScoringConfig::default(),
            variants: Vec::new(),
            report: ReportConfig::default(),
        }
    }
}

/// Core harness execution settings.
///
/// These settings control the fundamental behavior of run execution: how
/// many batches run in parallel per run, how many evaluations run in
/// parallel across runs, and the timeout/retry defaults a `RunRequest`
/// inherits unless it overrides them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarnessConfig {
    /// Maximum number of Batch Executors running concurrently within one
    /// Run Coordinator.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Maximum number of evaluation jobs running concurrently across all
    /// runs, enforced by the Evaluator Scheduler's own semaphore.
    #[serde(default = "default_evaluator_concurrency")]
    pub evaluator_concurrency: usize,

    /// Per-batch wall timeout in seconds.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,

    /// Maximum retries a batch is allowed before it is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-run soft timeout in seconds; expiry triggers cancellation of the
    /// run.
    #[serde(default = "default_run_soft_timeout_secs")]
    pub run_soft_timeout_secs: u64,

    /// Bounded capacity of a subscriber's live event queue.
    #[serde(default = "default_event_subscriber_capacity")]
    pub event_subscriber_capacity: usize,

    /// Number of events retained per topic for late-joining subscribers.
    #[serde(default = "default_event_snapshot_log_len")]
    pub event_snapshot_log_len: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: default_batch_concurrency(),
            evaluator_concurrency: default_evaluator_concurrency(),
            batch_timeout_secs: default_batch_timeout_secs(),
            max_retries: default_max_retries(),
            run_soft_timeout_secs: default_run_soft_timeout_secs(),
            event_subscriber_capacity: default_event_subscriber_capacity(),
            event_snapshot_log_len: default_event_snapshot_log_len(),
        }
    }
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_evaluator_concurrency() -> usize {
    2
}

fn default_batch_timeout_secs() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_run_soft_timeout_secs() -> u64 {
    1800
}

fn default_event_subscriber_capacity() -> usize {
    crate::eventbus::DEFAULT_SUBSCRIBER_CAPACITY
}

fn default_event_snapshot_log_len() -> usize {
    crate::eventbus::DEFAULT_SNAPSHOT_LOG_LEN
}

/// `ModelClient` backend selection.
///
/// This is a tagged enum that selects the model client backend based on the
/// `type` field in TOML, the same idiom the teacher uses for
/// `ProviderConfig`. Real LLM transport is out of scope for the core (see
/// the crate's module docs); `Mock` is the only backend shipped.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModelClientConfig {
    /// Deterministic, in-process model client for local runs and tests.
    Mock(MockModelClientConfig),
}

impl Default for ModelClientConfig {
    fn default() -> Self {
        ModelClientConfig::Mock(MockModelClientConfig::default())
    }
}

/// Configuration for [`crate::modelclient::mock::MockModelClient`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MockModelClientConfig {
    /// Response returned once any scripted outcomes are exhausted.
    #[serde(default = "default_fallback_response")]
    pub fallback: String,
}

impl Default for MockModelClientConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback_response(),
        }
    }
}

fn default_fallback_response() -> String {
    "mock response".to_string()
}

/// `Store` backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Filesystem-backed store, rooted at `root`.
    Fs(FsStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Fs(FsStoreConfig::default())
    }
}

/// Configuration for [`crate::store::fs::FsStore`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FsStoreConfig {
    /// Directory artifacts and collections are persisted under.
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

impl Default for FsStoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("llmbench-store")
}

/// Console output settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Print every batch/evaluation event as it arrives, not just the final
    /// summary.
    #[serde(default)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_sections() {
        let toml = r#"
            [harness]
            [model_client]
            type = "mock"
            [store]
            type = "fs"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.harness.batch_concurrency, 4);
        assert_eq!(config.harness.evaluator_concurrency, 2);
        assert!(matches!(config.model_client, ModelClientConfig::Mock(_)));
        assert!(matches!(config.store, StoreConfig::Fs(_)));
    }

    #[test]
    fn store_root_overrides_default() {
        let toml = r#"
            [store]
            type = "fs"
            root = "/tmp/custom-store"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let StoreConfig::Fs(fs) = config.store;
        assert_eq!(fs.root, PathBuf::from("/tmp/custom-store"));
    }

    #[test]
    fn full_config_round_trips_through_default() {
        let config = Config::default();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.harness.batch_concurrency, config.harness.batch_concurrency);
    }
}
