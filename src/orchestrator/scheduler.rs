//! Partitions a [`TestSuite`] into batches.
//!
//! Batch sizing is either uniform (`batch_size`, chunked in suite order) or
//! an explicit list of sizes that must sum to the suite size. Either way,
//! every test case ends up in exactly one batch, batches are numbered from
//! 1, and suite order is preserved — grounded on the teacher's
//! `schedule_with_batch_size` (contiguous chunking), generalized to accept
//! a custom size list instead of only a single fixed size.

use serde::{Deserialize, Serialize};

use crate::suite::TestSuite;

/// How a [`RunRequest`](crate::config::RunRequest) wants its suite split
/// into batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchSizing {
    /// Chunk the suite into batches of `batch_size`, with the remainder (if
    /// any) forming one final, smaller batch.
    Uniform(usize),
    /// Explicit batch sizes, in order. Must sum to the suite size.
    Explicit(Vec<usize>),
}

/// Errors partitioning a suite can produce; surfaced as a `Config` error at
/// Submit time.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("batch_size must be >= 1")]
    ZeroBatchSize,
    #[error("explicit batch sizes sum to {sum}, expected {expected}")]
    SizeMismatch { sum: usize, expected: usize },
    #[error("explicit batch sizes must each be >= 1")]
    ZeroSizedBatch,
}

/// One partition of the suite: a batch number (1-indexed) and the test ids
/// assigned to it, in suite order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub number: u32,
    pub test_ids: Vec<String>,
}

/// Partitions `suite` according to `sizing`. Validates invariants I1/I2:
/// every test id appears in exactly one batch, and the batch sizes sum to
/// the suite size.
pub fn partition(suite: &TestSuite, sizing: &BatchSizing) -> Result<Vec<BatchPlan>, PartitionError> {
    let ids: Vec<String> = suite.cases().iter().map(|c| c.id.clone()).collect();

    let sizes = match sizing {
        BatchSizing::Uniform(batch_size) => {
            if *batch_size == 0 {
                return Err(PartitionError::ZeroBatchSize);
            }
            uniform_sizes(ids.len(), *batch_size)
        }
        BatchSizing::Explicit(sizes) => {
            if sizes.iter().any(|s| *s == 0) {
                return Err(PartitionError::ZeroSizedBatch);
            }
            let sum: usize = sizes.iter().sum();
            if sum != ids.len() {
                return Err(PartitionError::SizeMismatch {
                    sum,
                    expected: ids.len(),
                });
            }
            sizes.clone()
        }
    };

    let mut plans = Vec::with_capacity(sizes.len());
    let mut offset = 0;
    for (i, size) in sizes.into_iter().enumerate() {
        let chunk = ids[offset..offset + size].to_vec();
        offset += size;
        plans.push(BatchPlan {
            number: (i + 1) as u32,
            test_ids: chunk,
        });
    }
    Ok(plans)
}

fn uniform_sizes(total: usize, batch_size: usize) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }
    let full_batches = total / batch_size;
    let remainder = total % batch_size;
    let mut sizes = vec![batch_size; full_batches];
    if remainder > 0 {
        sizes.push(remainder);
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::TestCase;

    fn suite(n: usize) -> TestSuite {
        let cases = (0..n)
            .map(|i| TestCase {
                id: format!("t{i}"),
                category: "general".to_string(),
                level: 1,
                points: 10,
                task: "task".to_string(),
                required_patterns: vec![],
                forbidden_patterns: vec![],
                hints: vec![],
            })
            .collect();
        TestSuite::new("s", cases).unwrap()
    }

    #[test]
    fn batch_size_one_yields_one_batch_per_test() {
        let s = suite(5);
        let plans = partition(&s, &BatchSizing::Uniform(1)).unwrap();
        assert_eq!(plans.len(), 5);
        assert!(plans.iter().all(|p| p.test_ids.len() == 1));
    }

    #[test]
    fn batch_size_larger_than_suite_yields_one_batch() {
        let s = suite(5);
        let plans = partition(&s, &BatchSizing::Uniform(100)).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].test_ids.len(), 5);
    }

    #[test]
    fn uniform_chunking_preserves_suite_order_and_numbers_from_one() {
        let s = suite(7);
        let plans = partition(&s, &BatchSizing::Uniform(3)).unwrap();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].number, 1);
        assert_eq!(plans[0].test_ids, vec!["t0", "t1", "t2"]);
        assert_eq!(plans[1].test_ids, vec!["t3", "t4", "t5"]);
        assert_eq!(plans[2].test_ids, vec!["t6"]);
    }

    #[test]
    fn explicit_sizes_must_sum_to_suite_size() {
        let s = suite(5);
        let err = partition(&s, &BatchSizing::Explicit(vec![2, 2])).unwrap_err();
        assert_eq!(err, PartitionError::SizeMismatch { sum: 4, expected: 5 });
    }

    #[test]
    fn every_test_id_appears_in_exactly_one_batch() {
        let s = suite(10);
        let plans = partition(&s, &BatchSizing::Uniform(3)).unwrap();
        let mut all_ids: Vec<&String> = plans.iter().flat_map(|p| p.test_ids.iter()).collect();
        all_ids.sort();
        let mut expected: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        expected.sort();
        assert_eq!(all_ids, expected.iter().collect::<Vec<_>>());
    }
}
