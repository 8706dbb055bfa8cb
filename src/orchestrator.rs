//! Run execution engine: turns one [`RunRequest`](crate::config::RunRequest)
//! into a completed [`Run`] by partitioning its suite into batches and
//! driving each through a [`BatchExecutor`](crate::executor::BatchExecutor).
//!
//! # Architecture
//!
//! ```text
//!   RunRequest                 Scheduler               BatchExecutor
//!       │                          │                        │
//!       │ + TestSuite              │                        │
//!       ▼                          │                        │
//!   partition() ──────────────────►│                        │
//!                          Vec<BatchPlan>                   │
//!                                  │                         │
//!                                  └──── one per plan ──────►│
//!                                                             │
//!                                                     BatchOutcome
//!                                                             │
//!                                                             ▼
//!                                                   RunCoordinator merges
//!                                                   into Run.batches and
//!                                                   derives RunStatus
//! ```
//!
//! # Execution Flow
//!
//! 1. **Partition**: split the suite into batches ([`scheduler::partition`])
//! 2. **Dispatch**: run up to `batch_concurrency` batches concurrently
//! 3. **Merge**: fold each [`BatchOutcome`](crate::executor::BatchOutcome)
//!    into the run's response map and batch records
//! 4. **Decide**: a run is `Completed` if any batch completed, `Failed` if
//!    every batch failed, `Cancelled` if cancellation won the race
//!
//! # Key Components
//!
//! - [`RunCoordinator`]: drives one run's batches to completion
//! - [`Run`] / [`Batch`] / [`RunStatus`]: the run's observable state
//! - [`scheduler`]: suite partitioning

pub mod coordinator;
pub mod scheduler;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::executor::BatchStatus;

pub use coordinator::RunCoordinator;
pub use scheduler::{BatchPlan, BatchSizing, PartitionError};

/// Lifecycle state of a [`Run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One batch's execution record within a run.
#[derive(Debug, Clone)]
pub struct Batch {
    pub number: u32,
    pub test_ids: Vec<String>,
    pub status: BatchStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub responses: HashMap<String, String>,
}

impl Batch {
    fn pending(plan: BatchPlan) -> Self {
        Self {
            number: plan.number,
            test_ids: plan.test_ids,
            status: BatchStatus::Pending,
            retry_count: 0,
            last_error: None,
            responses: HashMap::new(),
        }
    }
}

/// A single run of a suite against a model/variant, carried to completion
/// (or cancellation) by a [`RunCoordinator`].
#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub model: String,
    pub variant: String,
    pub status: RunStatus,
    pub batches: Vec<Batch>,
    pub temperature: f64,
    pub suite_name: String,
    pub total_tests: usize,
    pub batch_sizing: BatchSizing,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Duration,
}

impl Run {
    /// All per-test responses merged across every completed batch, keyed by
    /// test id. Every id assigned to any batch of this run is present: ids
    /// whose batch never produced a response (exhausted retries, a batch
    /// that failed outright) are filled in with an empty string rather than
    /// omitted, satisfying the "one entry per test id" invariant on the
    /// artifact this feeds into.
    pub fn merged_responses(&self) -> HashMap<String, String> {
        let mut merged = HashMap::new();
        for batch in &self.batches {
            for id in &batch.test_ids {
                merged.entry(id.clone()).or_insert_with(String::new);
            }
            for (id, code) in &batch.responses {
                merged.insert(id.clone(), code.clone());
            }
        }
        merged
    }

    /// `true` once every batch has reached a terminal
    /// ([`BatchStatus::Completed`] or [`BatchStatus::Failed`]) state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Derives the run-level status from a set of finished batches: completed
/// if at least one batch completed, failed if every batch failed. A run
/// with no batches at all (an empty suite) is considered completed.
pub(crate) fn derive_status(batches: &[Batch]) -> RunStatus {
    if batches.is_empty() {
        return RunStatus::Completed;
    }
    if batches.iter().any(|b| b.status == BatchStatus::Completed) {
        RunStatus::Completed
    } else {
        RunStatus::Failed
    }
}
