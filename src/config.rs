//! Configuration loading and the request type that drives a single run.
//!
//! This module provides types and functions for loading llmbench
//! configuration from TOML files or strings, plus [`RunRequest`], the
//! validated request a caller hands to the harness to start a run.
//!
//! # The Configuration File Format
//!
//! See `llmbench.toml` produced by the `init` command for an annotated
//! example.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

use crate::orchestrator::scheduler::{BatchSizing, PartitionError};
use crate::suite::TestSuite;

/// Loads llmbench configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains invalid TOML, or
/// doesn't match the expected schema.
///
/// # Example
///
/// ```no_run
/// use llmbench::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("llmbench.toml"))?;
/// println!("batch concurrency: {}", config.harness.batch_concurrency);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    expand_store_env(&mut config.store)?;

    Ok(config)
}

/// Loads llmbench configuration from a TOML string.
///
/// Useful for testing, embedding configuration, or generating configuration
/// programmatically.
///
/// # Example
///
/// ```
/// use llmbench::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [harness]
///     batch_concurrency = 4
///
///     [model_client]
///     type = "mock"
///
///     [store]
///     type = "fs"
/// "#)?;
///
/// assert_eq!(config.harness.batch_concurrency, 4);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Failed to parse config")?;

    expand_store_env(&mut config.store)?;

    Ok(config)
}

/// Expands environment variable references in the store's path-bearing
/// fields, so a config can say `root = "${LLMBENCH_STORE:-./llmbench-store}"`.
fn expand_store_env(store: &mut StoreConfig) -> Result<()> {
    match store {
        StoreConfig::Fs(fs) => {
            if let Some(raw) = fs.root.to_str() {
                let expanded = expand_env_value(raw)
                    .map_err(|e| anyhow::anyhow!("Failed to expand store.root: {e}"))?;
                fs.root = std::path::PathBuf::from(expanded);
            }
            Ok(())
        }
    }
}

/// Expands environment variable references in a string value.
///
/// Syntax:
/// - `${VAR}` - required, fails if VAR is not set
/// - `${VAR:-default}` - optional, uses "default" if VAR not set
/// - `$$` - escaped dollar sign (becomes single `$`)
///
/// # Errors
/// Returns error if a required variable is not set.
fn expand_env_value(value: &str) -> Result<String, String> {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            match chars.peek() {
                Some('$') => {
                    // Escaped dollar sign: $$ -> $
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    // Variable reference: ${VAR} or ${VAR:-default}
                    chars.next(); // consume '{'

                    // Parse variable name and optional default
                    let mut var_content = String::new();
                    let mut found_close = false;

                    for c in chars.by_ref() {
                        if c == '}' {
                            found_close = true;
                            break;
                        }
                        var_content.push(c);
                    }

                    if !found_close {
                        return Err(format!("Unclosed variable reference: ${{{var_content}"));
                    }

                    // Check for default value syntax: VAR:-default
                    let (var_name, default_value) = if let Some(idx) = var_content.find(":-") {
                        let (name, rest) = var_content.split_at(idx);
                        (name, Some(&rest[2..])) // Skip ":-"
                    } else {
                        (var_content.as_str(), None)
                    };

                    if var_name.is_empty() {
                        return Err("Empty variable name in ${}".to_string());
                    }

                    // Look up the environment variable
                    match std::env::var(var_name) {
                        Ok(val) => result.push_str(&val),
                        Err(_) => {
                            if let Some(default) = default_value {
                                result.push_str(default);
                            } else {
                                return Err(format!(
                                    "Required environment variable not set: {var_name}"
                                ));
                            }
                        }
                    }
                }
                _ => {
                    // Lone $ without { or $, treat as literal
                    result.push('$');
                }
            }
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Errors validating a [`RunRequest`] before it is submitted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("temperature must be between 0.0 and 2.0, got {0}")]
    InvalidTemperature(f64),
    #[error("queue_size must be between 1 and 20, got {0}")]
    InvalidQueueSize(usize),
    #[error("variant '{0}' is not registered in the catalog")]
    UnknownVariant(String),
    #[error(transparent)]
    Partition(#[from] PartitionError),
}

/// A validated request to run a suite against a model/variant combination.
///
/// This is the input to `Harness::submit`. Constructing one via
/// [`RunRequest::new`] does not validate it; call [`RunRequest::validate`]
/// (or let `submit` call it for you) before it is accepted.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub model: String,
    pub variant: String,
    pub temperature: f64,
    pub batch_sizing: BatchSizing,
    /// Upper bound on concurrently in-flight runs sharing this request's
    /// queue; `1` makes the queue behave like a strictly serial run.
    pub queue_size: usize,
    /// Restricts the run to this subset of test case ids, preserving suite
    /// order. `None` runs the full suite.
    pub suite_filter: Option<std::collections::HashSet<String>>,
}

impl RunRequest {
    /// Builds a request with common defaults: temperature 1.0, a single
    /// test per batch, a queue size of 1, and no suite filter.
    pub fn new(model: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            variant: variant.into(),
            temperature: 1.0,
            batch_sizing: BatchSizing::Uniform(1),
            queue_size: 1,
            suite_filter: None,
        }
    }

    /// Validates the request's own fields. Does not check variant existence
    /// against a catalog or partition the suite — callers that have those
    /// available should call [`RunRequest::validate_against`] instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }
        if self.queue_size == 0 || self.queue_size > 20 {
            return Err(ConfigError::InvalidQueueSize(self.queue_size));
        }
        match &self.batch_sizing {
            BatchSizing::Uniform(0) => return Err(PartitionError::ZeroBatchSize.into()),
            BatchSizing::Explicit(sizes) if sizes.iter().any(|s| *s == 0) => {
                return Err(PartitionError::ZeroSizedBatch.into())
            }
            _ => {}
        }
        Ok(())
    }

    /// Validates the request and confirms `variant` is known to `catalog`.
    pub async fn validate_against(
        &self,
        catalog: &dyn crate::suite::VariantCatalog,
    ) -> Result<(), ConfigError> {
        self.validate()?;
        catalog
            .get(&self.variant)
            .await
            .map_err(|_| ConfigError::UnknownVariant(self.variant.clone()))?;
        Ok(())
    }

    /// Applies `suite_filter` (if set) to `suite`, returning the subset the
    /// run should actually partition and execute. A request with no filter
    /// runs the suite unchanged.
    pub fn apply_suite_filter(&self, suite: &TestSuite) -> TestSuite {
        match &self.suite_filter {
            Some(ids) => suite.filtered(ids),
            None => suite.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_value_no_variables() -> Result<(), String> {
        let result = expand_env_value("hello world")?;
        assert_eq!(result, "hello world");
        Ok(())
    }

    #[test]
    fn test_expand_env_value_escaped_dollar() -> Result<(), String> {
        let result = expand_env_value("price is $$100")?;
        assert_eq!(result, "price is $100");
        Ok(())
    }

    #[test]
    fn test_expand_env_value_multiple_escaped_dollars() -> Result<(), String> {
        let result = expand_env_value("$$$$")?;
        assert_eq!(result, "$$");
        Ok(())
    }

    #[test]
    fn test_expand_env_value_literal_dollar_no_brace() -> Result<(), String> {
        let result = expand_env_value("$x and $y")?;
        assert_eq!(result, "$x and $y");
        Ok(())
    }

    #[test]
    fn test_expand_env_value_empty_var_name() {
        let result = expand_env_value("${}");
        assert!(
            matches!(&result, Err(e) if e.contains("Empty variable name")),
            "expected error about empty variable name, got: {result:?}"
        );
    }

    #[test]
    fn test_expand_env_value_unclosed_brace() {
        let result = expand_env_value("${VAR");
        assert!(
            matches!(&result, Err(e) if e.contains("Unclosed variable reference")),
            "expected error about unclosed brace, got: {result:?}"
        );
    }

    // Tests using predictable environment variables (HOME exists, _LLMBENCH_TEST_* do not)

    #[test]
    fn test_expand_env_value_var_set() -> Result<(), String> {
        let result = expand_env_value("${HOME}")?;
        assert!(!result.is_empty(), "HOME should expand to non-empty value");
        Ok(())
    }

    #[test]
    fn test_expand_env_value_var_unset() {
        let result = expand_env_value("${_LLMBENCH_TEST_NONEXISTENT_VAR}");
        assert!(result.is_err(), "Unset var should return error");
    }

    #[test]
    fn test_expand_env_value_default_not_used_when_set() -> Result<(), String> {
        let result = expand_env_value("${HOME:-fallback}")?;
        assert_ne!(result, "fallback", "Should return HOME value, not fallback");
        assert!(!result.is_empty());
        Ok(())
    }

    #[test]
    fn test_expand_env_value_default_used_when_unset() -> Result<(), String> {
        let result = expand_env_value("${_LLMBENCH_TEST_MISSING:-fallback}")?;
        assert_eq!(result, "fallback");
        Ok(())
    }

    #[test]
    fn test_expand_env_value_just_escaped_dollar() -> Result<(), String> {
        let result = expand_env_value("$$")?;
        assert_eq!(result, "$");
        Ok(())
    }

    #[test]
    fn test_expand_env_value_mixed() -> Result<(), String> {
        let result = expand_env_value("prefix_${HOME}_suffix")?;
        assert!(result.starts_with("prefix_"), "Should start with prefix_");
        assert!(result.ends_with("_suffix"), "Should end with _suffix");
        assert!(
            result.len() > "prefix__suffix".len(),
            "Should contain HOME value"
        );
        Ok(())
    }

    #[test]
    fn test_expand_env_value_empty_default() -> Result<(), String> {
        let result = expand_env_value("${_LLMBENCH_TEST_MISSING:-}")?;
        assert_eq!(result, "");
        Ok(())
    }

    #[test]
    fn run_request_defaults_are_valid() {
        let req = RunRequest::new("gpt-x", "baseline");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn run_request_rejects_out_of_range_temperature() {
        let mut req = RunRequest::new("gpt-x", "baseline");
        req.temperature = 3.0;
        assert!(matches!(
            req.validate(),
            Err(ConfigError::InvalidTemperature(_))
        ));
    }

    #[test]
    fn run_request_rejects_zero_queue_size() {
        let mut req = RunRequest::new("gpt-x", "baseline");
        req.queue_size = 0;
        assert!(matches!(req.validate(), Err(ConfigError::InvalidQueueSize(0))));
    }

    #[test]
    fn run_request_rejects_queue_size_above_twenty() {
        let mut req = RunRequest::new("gpt-x", "baseline");
        req.queue_size = 21;
        assert!(matches!(req.validate(), Err(ConfigError::InvalidQueueSize(21))));
    }

    #[test]
    fn run_request_rejects_zero_batch_size() {
        let mut req = RunRequest::new("gpt-x", "baseline");
        req.batch_sizing = BatchSizing::Uniform(0);
        assert!(matches!(
            req.validate(),
            Err(ConfigError::Partition(PartitionError::ZeroBatchSize))
        ));
    }
}
