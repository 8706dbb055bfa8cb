//! # llmbench
//!
//! A deterministic benchmark harness: drives LLM providers against a suite
//! of coding tasks, scores their responses against fixed rules, and
//! aggregates results into comparable collections.
//!
//! ## Overview
//!
//! llmbench submits a [`config::RunRequest`] (model, documentation variant,
//! temperature, batch sizing, queue size), partitions the suite into
//! batches, and drives each batch through a [`modelclient::ModelClient`]
//! with retry and cancellation support. Completed runs are persisted as
//! [`store::Artifact`]s, scored deterministically by the [`scorer`], and can
//! be grouped into named [`store::Collection`]s for side-by-side comparison.
//!
//! - **Concurrent runs** via `queue_size`, each with its own run id
//! - **Bounded batch concurrency** per run, with exponential backoff on
//!   retryable model errors
//! - **Event-driven evaluation**: the Evaluator Scheduler reacts to
//!   `run.completed` events rather than polling the store
//! - **Deterministic scoring**: required/forbidden pattern matching, a soft
//!   heuristic syntax check, and an optional hard compile check, in a fixed
//!   penalty order
//!
//! ## Architecture
//!
//! The crate is organized around one façade, [`harness::Harness`], wiring
//! together the following subsystems:
//!
//! ### Orchestration
//!
//! - [`queue::QueueManager`] - fans a single request out into `queue_size`
//!   concurrent runs, and derives [`queue::GlobalStatus`] across all of them
//! - [`orchestrator::RunCoordinator`] - partitions one run's suite and
//!   drives its batches to completion, racing cancellation and a soft
//!   wall-clock timeout
//! - [`executor::BatchExecutor`] - drives one batch through its
//!   pending/running/retrying/completed/failed state machine
//! - [`modelclient::ModelClient`] - the abstract interface to the model
//!   under test; [`modelclient::mock::MockModelClient`] is the reference,
//!   in-process implementation
//!
//! ### Scoring and persistence
//!
//! - [`scorer`] - the pure, deterministic scoring function
//! - [`evaluator::EvaluatorScheduler`] - scores completed artifacts as they
//!   appear, reacting to events rather than polling
//! - [`store::Store`] - durable artifact/evaluation/collection persistence;
//!   [`store::fs::FsStore`] is the filesystem-backed reference
//!   implementation
//! - [`collection::CollectionAggregator`] - named groups of artifacts and
//!   the mean/stddev statistics computed over them
//!
//! ### Plumbing
//!
//! - [`clock`] - monotonic elapsed time and run id generation
//! - [`eventbus::EventBus`] - per-topic publish/subscribe with late-joiner
//!   snapshots and cursor-based resume
//! - [`suite::TestSuite`] - the immutable test case / documentation variant
//!   data model
//! - [`config`] - TOML configuration loading and [`config::RunRequest`]
//! - [`report`] - console progress and summary output
//! - [`profiling`] - lightweight wall-clock timing instrumentation
//!
//! ## Quick Start
//!
//! ```no_run
//! use llmbench::config::{load_config, RunRequest};
//! use llmbench::harness::Harness;
//! use llmbench::suite::TestSuite;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(Path::new("llmbench.toml"))?;
//!     let suite = TestSuite::load(Path::new("suite.json"))?;
//!     let harness = Harness::new(config, suite).await?;
//!
//!     let request = RunRequest::new("gpt-4-turbo", "baseline");
//!     let run_ids = harness.submit(request).await?;
//!     println!("submitted {} run(s)", run_ids.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! llmbench is configured via TOML files. See the [`config`] module, and
//! `llmbench.toml` produced by the `init` subcommand, for schema details.

pub mod clock;
pub mod collection;
pub mod config;
pub mod evaluator;
pub mod eventbus;
pub mod executor;
pub mod harness;
pub mod modelclient;
pub mod orchestrator;
pub mod profiling;
pub mod queue;
pub mod report;
pub mod scorer;
pub mod store;
pub mod suite;
pub mod syntaxcheck;

// Re-export the most commonly used types for convenience.

pub use config::{load_config, load_config_str, Config, RunRequest};
pub use harness::{Harness, HarnessError};
pub use suite::TestSuite;
