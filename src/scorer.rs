//! Deterministic scoring: a pure function of an [`Artifact`](crate::store::Artifact)
//! and a [`TestSuite`](crate::suite::TestSuite).
//!
//! Nothing in this module performs I/O. The same inputs always produce the
//! same outputs, byte for byte, which is what lets the Evaluator Scheduler
//! treat [`Evaluate`](crate::harness::Harness::evaluate) as idempotent and
//! cacheable.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::store::{ArtifactId, ArtifactMetadata};
use crate::suite::{TestCase, TestSuite};
use crate::syntaxcheck::{heuristic_violations, SyntaxChecker};

/// Fraction of a test's points subtracted per forbidden-pattern match.
pub const DEFAULT_FORBIDDEN_PENALTY_FRACTION: f64 = 0.25;
/// Fraction of a test's points subtracted per soft syntax violation.
pub const DEFAULT_SYNTAX_PENALTY_FRACTION: f64 = 0.05;
/// Fraction of *remaining* score subtracted on a hard compile-check failure.
pub const DEFAULT_JAC_CHECK_PENALTY_FRACTION: f64 = 1.0;

/// Configurable penalty fractions, pulled out of the scoring function so
/// they can be tuned via [`crate::config::Config`] without touching the
/// scoring logic itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_forbidden_fraction")]
    pub forbidden_penalty_fraction: f64,
    #[serde(default = "default_syntax_fraction")]
    pub syntax_penalty_fraction: f64,
    #[serde(default = "default_jac_check_fraction")]
    pub jac_check_penalty_fraction: f64,
    /// Whether the Evaluator Scheduler wires up a `SyntaxChecker` at all.
    /// Off, `jac_check` never fires regardless of
    /// `jac_check_penalty_fraction`.
    #[serde(default = "default_enable_jac_check")]
    pub enable_jac_check: bool,
}

fn default_forbidden_fraction() -> f64 {
    DEFAULT_FORBIDDEN_PENALTY_FRACTION
}
fn default_syntax_fraction() -> f64 {
    DEFAULT_SYNTAX_PENALTY_FRACTION
}
fn default_jac_check_fraction() -> f64 {
    DEFAULT_JAC_CHECK_PENALTY_FRACTION
}
fn default_enable_jac_check() -> bool {
    true
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            forbidden_penalty_fraction: DEFAULT_FORBIDDEN_PENALTY_FRACTION,
            syntax_penalty_fraction: DEFAULT_SYNTAX_PENALTY_FRACTION,
            jac_check_penalty_fraction: DEFAULT_JAC_CHECK_PENALTY_FRACTION,
            enable_jac_check: true,
        }
    }
}

/// The amount subtracted from a test's score at each stage of the pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PenaltyBreakdown {
    pub missing: f64,
    pub required: f64,
    pub forbidden: f64,
    pub syntax: f64,
    pub jac_check: f64,
}

/// One test case's score record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestScore {
    pub test_id: String,
    pub category: String,
    pub level: u32,
    pub score: f64,
    pub max: f64,
    pub penalties: PenaltyBreakdown,
}

/// Sum of score/max/count over a set of test scores, for category and
/// level breakdowns.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Breakdown {
    pub score: f64,
    pub max: f64,
    pub count: u32,
}

impl Breakdown {
    /// Percentage score within this breakdown, 2-decimal rounded.
    pub fn percent(&self) -> f64 {
        round2(percent_of(self.score, self.max))
    }
}

/// The full summary produced for one artifact: overall percentage plus
/// category and level breakdowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total_score: f64,
    pub total_max: f64,
    pub overall_percent: f64,
    pub by_category: BTreeMap<String, Breakdown>,
    pub by_level: BTreeMap<u32, Breakdown>,
}

/// A full evaluation result for one artifact: per-test scores plus the
/// aggregated summary. Metadata is carried bit-identically from the
/// originating Run/Artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    pub artifact_id: ArtifactId,
    pub metadata: ArtifactMetadata,
    pub per_test: Vec<TestScore>,
    pub summary: ScoreSummary,
}

fn percent_of(score: f64, max: f64) -> f64 {
    if max <= 0.0 {
        0.0
    } else {
        (score / max) * 100.0
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Counts literal, case-sensitive occurrences of `pattern` as a substring
/// of `text`. Used for both required and forbidden pattern matching; no
/// regex, exactly the substrings the suite author wrote.
fn count_occurrences(text: &str, pattern: &str) -> usize {
    if pattern.is_empty() {
        return 0;
    }
    text.matches(pattern).count()
}

/// Scores a single test case's response against its rules. Order of
/// operations is fixed: required -> forbidden -> syntax -> jac_check.
fn score_test_case(
    case: &TestCase,
    response: Option<&str>,
    jac_check_failed: bool,
    config: &ScoringConfig,
) -> TestScore {
    let points = f64::from(case.points);

    let response = match response {
        None | Some("") => {
            return TestScore {
                test_id: case.id.clone(),
                category: case.category.clone(),
                level: case.level,
                score: 0.0,
                max: points,
                penalties: PenaltyBreakdown {
                    missing: points,
                    ..Default::default()
                },
            };
        }
        Some(text) => text,
    };

    // 1. required patterns: partial credit proportional to how many matched.
    let required_found = case
        .required_patterns
        .iter()
        .filter(|p| count_occurrences(response, p) > 0)
        .count();
    let partial = if case.required_patterns.is_empty() {
        points
    } else {
        points * (required_found as f64 / case.required_patterns.len() as f64)
    };
    let required_penalty = points - partial;

    // 2. forbidden patterns: fixed fraction per match, floored at 0.
    let forbidden_matches: usize = case
        .forbidden_patterns
        .iter()
        .map(|p| count_occurrences(response, p))
        .sum();
    let forbidden_penalty =
        (forbidden_matches as f64 * config.forbidden_penalty_fraction * points).min(partial.max(0.0));
    let after_forbidden = (partial - forbidden_penalty).max(0.0);

    // 3. soft syntax check: small fraction per violation.
    let syntax_violations = heuristic_violations(response).len();
    let syntax_penalty =
        (syntax_violations as f64 * config.syntax_penalty_fraction * points).min(after_forbidden.max(0.0));
    let after_syntax = (after_forbidden - syntax_penalty).max(0.0);

    // 4. hard compile check: configured fraction of whatever remains.
    let jac_check_penalty = if jac_check_failed {
        after_syntax * config.jac_check_penalty_fraction
    } else {
        0.0
    };
    let final_score = (after_syntax - jac_check_penalty).max(0.0);

    TestScore {
        test_id: case.id.clone(),
        category: case.category.clone(),
        level: case.level,
        score: final_score,
        max: points,
        penalties: PenaltyBreakdown {
            missing: 0.0,
            required: required_penalty,
            forbidden: forbidden_penalty,
            syntax: syntax_penalty,
            jac_check: jac_check_penalty,
        },
    }
}

fn aggregate(scores: &[TestScore]) -> ScoreSummary {
    let total_score: f64 = scores.iter().map(|s| s.score).sum();
    let total_max: f64 = scores.iter().map(|s| s.max).sum();

    let mut by_category: BTreeMap<String, Breakdown> = BTreeMap::new();
    let mut by_level: BTreeMap<u32, Breakdown> = BTreeMap::new();
    for s in scores {
        let cat = by_category.entry(s.category.clone()).or_default();
        cat.score += s.score;
        cat.max += s.max;
        cat.count += 1;

        let lvl = by_level.entry(s.level).or_default();
        lvl.score += s.score;
        lvl.max += s.max;
        lvl.count += 1;
    }

    ScoreSummary {
        total_score,
        total_max,
        overall_percent: round2(percent_of(total_score, total_max)),
        by_category,
        by_level,
    }
}

/// Scores every test case in `suite` against `responses` (test id -> code),
/// running the hard compile check (if provided) for each non-empty
/// response. Pure apart from the `SyntaxChecker` call, which is expected
/// to be fast and side-effect free from the caller's perspective.
pub async fn score_artifact(
    suite: &TestSuite,
    responses: &HashMap<String, String>,
    compile_checker: Option<&dyn SyntaxChecker>,
    config: &ScoringConfig,
) -> Vec<TestScore> {
    let mut scores = Vec::with_capacity(suite.len());
    for case in suite.cases() {
        let response = responses.get(&case.id).map(|s| s.as_str());
        let jac_check_failed = match (response, compile_checker) {
            (Some(text), Some(checker)) if !text.is_empty() => {
                !checker.check(text).await.map(|o| o.ok).unwrap_or(false)
            }
            _ => false,
        };
        scores.push(score_test_case(case, response, jac_check_failed, config));
    }
    scores
}

/// Builds a full [`EvalResult`] from per-test scores.
pub fn build_eval_result(
    artifact_id: ArtifactId,
    metadata: ArtifactMetadata,
    per_test: Vec<TestScore>,
) -> EvalResult {
    let summary = aggregate(&per_test);
    EvalResult {
        artifact_id,
        metadata,
        per_test,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntaxcheck::HeuristicSyntaxChecker;

    fn case(id: &str, points: u32, required: &[&str], forbidden: &[&str]) -> TestCase {
        TestCase {
            id: id.to_string(),
            category: "general".to_string(),
            level: 1,
            points,
            task: "task".to_string(),
            required_patterns: required.iter().map(|s| s.to_string()).collect(),
            forbidden_patterns: forbidden.iter().map(|s| s.to_string()).collect(),
            hints: vec![],
        }
    }

    fn responses(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    // Scenario 1: happy path, full credit.
    #[tokio::test]
    async fn scenario_happy_path_scores_100_percent() {
        let suite = TestSuite::new(
            "s",
            vec![
                case("t1", 10, &["A"], &[]),
                case("t2", 20, &["B", "C"], &[]),
                case("t3", 30, &["D"], &[]),
            ],
        )
        .unwrap();
        let resp = responses(&[("t1", "A"), ("t2", "B C"), ("t3", "D")]);
        let scores = score_artifact(&suite, &resp, None, &ScoringConfig::default()).await;
        let summary = aggregate(&scores);
        assert_eq!(summary.overall_percent, 100.0);
        assert_eq!(summary.total_score, 60.0);
    }

    // Scenario 2: partial required-pattern credit.
    #[tokio::test]
    async fn scenario_partial_required_credit() {
        let suite = TestSuite::new(
            "s",
            vec![
                case("t1", 10, &["A"], &[]),
                case("t2", 20, &["B", "C"], &[]),
                case("t3", 30, &["D"], &[]),
            ],
        )
        .unwrap();
        let resp = responses(&[("t1", "A"), ("t2", "B"), ("t3", "")]);
        let scores = score_artifact(&suite, &resp, None, &ScoringConfig::default()).await;
        assert_eq!(scores[0].score, 10.0);
        assert_eq!(scores[1].score, 10.0);
        assert_eq!(scores[2].score, 0.0);
        let summary = aggregate(&scores);
        assert_eq!(round2(summary.overall_percent), 33.33);
    }

    // Scenario 3: forbidden pattern penalty.
    #[tokio::test]
    async fn scenario_forbidden_penalty() {
        let suite = TestSuite::new("s", vec![case("t1", 10, &["A"], &["X"])]).unwrap();
        let resp = responses(&[("t1", "A X X")]);
        let scores = score_artifact(&suite, &resp, None, &ScoringConfig::default()).await;
        assert_eq!(scores[0].score, 5.0);
    }

    #[tokio::test]
    async fn missing_response_scores_zero_with_missing_penalty() {
        let suite = TestSuite::new("s", vec![case("t1", 10, &["A"], &[])]).unwrap();
        let resp = HashMap::new();
        let scores = score_artifact(&suite, &resp, None, &ScoringConfig::default()).await;
        assert_eq!(scores[0].score, 0.0);
        assert_eq!(scores[0].penalties.missing, 10.0);
    }

    #[tokio::test]
    async fn jac_check_failure_zeroes_remaining_score_at_default_fraction() {
        let checker = HeuristicSyntaxChecker;
        let suite = TestSuite::new("s", vec![case("t1", 10, &["A"], &[])]).unwrap();
        let resp = responses(&[("t1", "A but missing closing brace {")]);
        let scores = score_artifact(&suite, &resp, Some(&checker), &ScoringConfig::default()).await;
        assert_eq!(scores[0].score, 0.0);
        assert!(scores[0].penalties.jac_check > 0.0);
    }

    #[test]
    fn score_is_deterministic() {
        let case = case("t1", 10, &["A", "B"], &["X"]);
        let resp = Some("A B X");
        let a = score_test_case(&case, resp, false, &ScoringConfig::default());
        let b = score_test_case(&case, resp, false, &ScoringConfig::default());
        assert_eq!(a.score, b.score);
    }

    #[test]
    fn adding_a_required_pattern_never_increases_score() {
        let looser = case("t1", 10, &["A"], &[]);
        let stricter = case("t1", 10, &["A", "B"], &[]);
        let resp = Some("A");
        let looser_score = score_test_case(&looser, resp, false, &ScoringConfig::default());
        let stricter_score = score_test_case(&stricter, resp, false, &ScoringConfig::default());
        assert!(stricter_score.score <= looser_score.score);
    }

    #[test]
    fn score_stays_within_points_range() {
        let case = case("t1", 10, &["A"], &["A"]);
        let score = score_test_case(&case, Some("A A A A A"), false, &ScoringConfig::default());
        assert!(score.score >= 0.0 && score.score <= 10.0);
    }

    #[test]
    fn category_and_level_breakdowns_sum_to_total() {
        let scores = vec![
            score_test_case(&case("t1", 10, &[], &[]), Some(""), false, &ScoringConfig::default()),
            score_test_case(&case("t2", 20, &[], &[]), Some("x"), false, &ScoringConfig::default()),
        ];
        let summary = aggregate(&scores);
        let category_sum: f64 = summary.by_category.values().map(|b| b.score).sum();
        let level_sum: f64 = summary.by_level.values().map(|b| b.score).sum();
        assert_eq!(category_sum, summary.total_score);
        assert_eq!(level_sum, summary.total_score);
    }
}
