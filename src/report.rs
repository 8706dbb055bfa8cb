//! Console reporting: progress during a run, and summary output for
//! evaluation results, collection statistics, and comparisons.
//!
//! There is no machine-readable export format (JUnit XML and friends are
//! explicitly out of scope for this harness); everything here renders for a
//! human watching a terminal.

use console::style;

use crate::collection::{Comparison, CollectionStats};
use crate::eventbus::{Event, EventKind, Subscription};
use crate::queue::{GlobalStatus, OverallStatus, RunSnapshot};
use crate::scorer::EvalResult;

/// Terminal reporter with a progress bar for in-flight runs and colored
/// summary output once they finish.
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    /// Creates a new console reporter.
    ///
    /// If `verbose`, every batch event is printed as it arrives; otherwise
    /// only retries/failures are printed while the run is in flight.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Watches a run's event stream until it reaches a terminal event
    /// (`run.completed`/`run.failed`/`run.cancelled`), updating a progress
    /// bar sized to `total_batches` as batches complete or fail. Returns the
    /// terminal [`Event`] observed, whose payload carries `artifact_id` on
    /// completion.
    pub async fn watch_run(&self, run_id: &str, total_batches: usize, mut sub: Subscription) -> Event {
        let pb = indicatif::ProgressBar::new(total_batches as u64);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches")
                .unwrap()
                .progress_chars("#>-"),
        );

        for event in sub.snapshot.clone() {
            self.render_event(&pb, event.kind, run_id);
            if matches!(
                event.kind,
                EventKind::RunCompleted | EventKind::RunFailed | EventKind::RunCancelled
            ) {
                pb.finish_and_clear();
                return event;
            }
        }

        loop {
            let event = sub.recv().await;
            self.render_event(&pb, event.kind, run_id);
            if matches!(
                event.kind,
                EventKind::RunCompleted | EventKind::RunFailed | EventKind::RunCancelled
            ) {
                pb.finish_and_clear();
                return event;
            }
        }
    }

    fn render_event(&self, pb: &indicatif::ProgressBar, kind: EventKind, run_id: &str) {
        match kind {
            EventKind::BatchCompleted => {
                pb.inc(1);
                if self.verbose {
                    pb.println(format!("{} batch completed ({run_id})", style("OK").green()));
                }
            }
            EventKind::BatchFailed => {
                pb.inc(1);
                pb.println(format!("{} batch failed ({run_id})", style("FAIL").red()));
            }
            EventKind::BatchRetry => {
                pb.println(format!("{} retrying batch ({run_id})", style("RETRY").yellow()));
            }
            EventKind::Lag => {
                pb.println(format!("{} missed some events, view may be incomplete", style("LAG").yellow()));
            }
            _ => {}
        }
    }

    /// Prints a point-in-time run snapshot (`status` subcommand).
    pub fn print_run_snapshot(&self, snapshot: &RunSnapshot) {
        println!("run {}", snapshot.run_id);
        match snapshot.status {
            Some(status) => println!("  status: {status:?}"),
            None => println!("  status: {}", style("in progress").cyan()),
        }
        for batch in &snapshot.batches {
            println!(
                "  batch {:>3}: {:?} (retries: {})",
                batch.number, batch.status, batch.retry_count
            );
            if let Some(err) = &batch.last_error {
                println!("    {}", style(err).dim());
            }
        }
    }

    /// Prints an evaluation result: overall percent plus category/level
    /// breakdowns.
    pub fn print_eval_result(&self, result: &EvalResult) {
        println!();
        println!("evaluation for {}", result.artifact_id);
        let percent = result.summary.overall_percent;
        let styled = if percent >= 80.0 {
            style(format!("{percent:.2}%")).green()
        } else if percent >= 50.0 {
            style(format!("{percent:.2}%")).yellow()
        } else {
            style(format!("{percent:.2}%")).red()
        };
        println!(
            "  overall: {styled} ({}/{} points)",
            result.summary.total_score, result.summary.total_max
        );

        println!("  by category:");
        for (category, breakdown) in &result.summary.by_category {
            println!(
                "    {category:<16} {:>6.2}% ({} tests)",
                breakdown.percent(),
                breakdown.count
            );
        }

        println!("  by level:");
        for (level, breakdown) in &result.summary.by_level {
            println!("    level {level:<10} {:>6.2}% ({} tests)", breakdown.percent(), breakdown.count);
        }

        if self.verbose {
            println!("  per-test:");
            for test in &result.per_test {
                println!("    {:<16} {:>6.2}/{:.2}", test.test_id, test.score, test.max);
            }
        }
    }

    /// Prints cross-run progress and the derived overall status.
    pub fn print_global_status(&self, status: &GlobalStatus) {
        let overall = match status.overall {
            OverallStatus::Running => style("Running").cyan(),
            OverallStatus::Evaluating => style("Evaluating").cyan(),
            OverallStatus::Completed => style("Completed").green(),
            OverallStatus::Failed => style("Failed").red(),
        };
        println!(
            "{overall}: {}/{} batches complete",
            status.completed_batches, status.total_batches
        );
    }

    /// Prints a single collection's summary statistics.
    pub fn print_collection_stats(&self, stats: &CollectionStats) {
        println!("collection {} ({} members)", stats.name, stats.file_count);
        println!("  mean: {:.2}% (stddev {:.2})", stats.mean_percent, stats.stddev_percent);
        for (category, mean) in &stats.mean_by_category {
            println!("    {category:<16} {mean:>6.2}%");
        }
    }

    /// Prints a side-by-side comparison of two collections, with
    /// color-coded per-category deltas.
    pub fn print_comparison(&self, comparison: &Comparison) {
        println!(
            "{} ({:.2}%) vs {} ({:.2}%)",
            comparison.first.name, comparison.first.mean_percent, comparison.second.name, comparison.second.mean_percent
        );
        for category in &comparison.categories {
            let delta = comparison.delta_by_category.get(category).copied().unwrap_or(0.0);
            let rendered = if delta > 0.0 {
                style(format!("+{delta:.2}")).green()
            } else if delta < 0.0 {
                style(format!("{delta:.2}")).red()
            } else {
                style(format!("{delta:.2}")).dim()
            };
            println!("  {category:<16} {rendered}");
        }
    }
}
