//! Monotonic time source and opaque identifier generation.
//!
//! Every run, batch, and artifact in the harness needs a stable, orderable
//! identity and a way to measure elapsed time that does not depend on the
//! wall clock. This module centralizes both concerns so the rest of the
//! crate never calls `Instant::now()` or `Uuid::new_v4()` directly.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// A monotonic clock, used for timeouts, durations, and backoff scheduling.
///
/// Wrapping `Instant` behind a trait-free struct keeps call sites
/// consistent and gives tests a single seam if a fake clock is ever needed.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    /// Creates a clock anchored to the current instant.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time since this clock was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// The current wall-clock time, for timestamps that must be human
    /// readable or persisted (artifact ids, creation times).
    pub fn now_utc() -> DateTime<Utc> {
        Utc::now()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::start()
    }
}

/// Generates opaque identifiers for runs, batches, and artifacts.
///
/// Run ids are 16-byte random values rendered as hex, matching the
/// "opaque 16-byte hex" identifier described for runs. Artifact ids are
/// derived deterministically from model, variant, and timestamp rather
/// than generated here (see [`crate::store::ArtifactId::new`]).
pub struct IdGenerator;

impl IdGenerator {
    /// Generates a fresh run id: a random 16-byte value as lowercase hex.
    pub fn run_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique_and_hex() {
        let a = IdGenerator::run_id();
        let b = IdGenerator::run_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn clock_elapsed_is_monotonic() {
        let clock = Clock::start();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.elapsed() >= Duration::from_millis(5));
    }
}
