//! llmbench CLI: submit benchmark runs, inspect their progress, evaluate
//! artifacts, and compare collections.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use llmbench::config::{self, RunRequest};
use llmbench::eventbus::EventKind;
use llmbench::harness::Harness;
use llmbench::orchestrator::BatchSizing;
use llmbench::profile_log;
use llmbench::profiling;
use llmbench::report::ConsoleReporter;
use llmbench::store::ArtifactId;
use llmbench::suite::TestSuite;

#[derive(Parser)]
#[command(name = "llmbench")]
#[command(about = "Deterministic LLM coding-benchmark harness", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path.
    #[arg(short, long, default_value = "llmbench.toml")]
    config: PathBuf,

    /// Test suite definition path.
    #[arg(short, long, default_value = "suite.json")]
    suite: PathBuf,

    /// Print every batch/evaluation event as it arrives.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a run, watch it to completion, and print its evaluation.
    Run {
        /// Model identifier to benchmark.
        model: String,

        /// Documentation variant name.
        variant: String,

        /// Sampling temperature (0.0-2.0).
        #[arg(short, long, default_value_t = 1.0)]
        temperature: f64,

        /// Number of test cases per batch.
        #[arg(short, long, default_value_t = 1)]
        batch_size: usize,

        /// Number of concurrent runs spawned by this request (1-20).
        #[arg(short, long, default_value_t = 1)]
        queue_size: usize,
    },

    /// Print a point-in-time snapshot of a run's batches and status.
    Status {
        /// Run id.
        run_id: String,
    },

    /// Cancel a single run, or every run with `--all`.
    Cancel {
        /// Run id to cancel. Ignored if `--all` is set.
        run_id: Option<String>,

        /// Cancel every run the process is tracking.
        #[arg(long)]
        all: bool,
    },

    /// Re-execute a single batch of an already-submitted run.
    RerunBatch {
        /// Run id.
        run_id: String,
        /// Batch number to rerun.
        batch_number: u32,
    },

    /// Score an artifact, printing its (possibly cached) result.
    Evaluate {
        /// Artifact id to evaluate.
        artifact_id: String,
    },

    /// Add an artifact to a collection, creating it if it doesn't exist.
    Promote {
        /// Collection name.
        name: String,
        /// Artifact id to add.
        artifact_id: String,
    },

    /// Compare two collections' summary statistics.
    Compare {
        /// First collection name.
        first: String,
        /// Second collection name.
        second: String,
    },

    /// List every collection known to the store.
    Collections,

    /// Validate the configuration file and print its effective settings.
    Validate,

    /// Write a starter configuration file and a tiny sample suite.
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    profiling::init();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install log subscriber")?;

    match cli.command {
        Commands::Run {
            model,
            variant,
            temperature,
            batch_size,
            queue_size,
        } => {
            run_and_report(
                &cli.config,
                &cli.suite,
                model,
                variant,
                temperature,
                batch_size,
                queue_size,
                cli.verbose,
            )
            .await
        }
        Commands::Status { run_id } => print_status(&cli.config, &cli.suite, &run_id).await,
        Commands::Cancel { run_id, all } => cancel(&cli.config, &cli.suite, run_id, all).await,
        Commands::RerunBatch { run_id, batch_number } => {
            rerun_batch(&cli.config, &cli.suite, &run_id, batch_number).await
        }
        Commands::Evaluate { artifact_id } => evaluate(&cli.config, &cli.suite, &artifact_id, cli.verbose).await,
        Commands::Promote { name, artifact_id } => promote(&cli.config, &cli.suite, &name, &artifact_id).await,
        Commands::Compare { first, second } => compare(&cli.config, &cli.suite, &first, &second, cli.verbose).await,
        Commands::Collections => list_collections(&cli.config, &cli.suite).await,
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(),
    }
}

async fn build_harness(config_path: &Path, suite_path: &Path) -> Result<Harness> {
    let config = config::load_config(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let suite = TestSuite::load(suite_path)
        .with_context(|| format!("failed to load suite from {}", suite_path.display()))?;
    info!(cases = suite.len(), "loaded test suite");
    Harness::new(config, suite).await.context("failed to build harness")
}

#[allow(clippy::too_many_arguments)]
async fn run_and_report(
    config_path: &Path,
    suite_path: &Path,
    model: String,
    variant: String,
    temperature: f64,
    batch_size: usize,
    queue_size: usize,
    verbose: bool,
) -> Result<()> {
    let harness = build_harness(config_path, suite_path).await?;
    let reporter = ConsoleReporter::new(verbose);

    let mut request = RunRequest::new(model, variant);
    request.temperature = temperature;
    request.batch_sizing = BatchSizing::Uniform(batch_size);
    request.queue_size = queue_size;

    profile_log!("submitting run");
    let run_ids = harness.submit(request).await.context("submit rejected")?;
    info!(runs = run_ids.len(), "run(s) submitted");

    for run_id in &run_ids {
        let total_batches = harness
            .run_status(run_id)
            .await
            .map(|s| s.batches.len())
            .unwrap_or(1)
            .max(1);
        let sub = harness.subscribe(run_id, None);
        let terminal = reporter.watch_run(run_id, total_batches, sub).await;
        profile_log!("run {run_id} reached {:?}", terminal.kind);

        if let Some(snapshot) = harness.run_status(run_id).await {
            reporter.print_run_snapshot(&snapshot);
        }

        if terminal.kind == EventKind::RunCompleted {
            if let Some(raw) = terminal.payload.get("artifact_id").and_then(|v| v.as_str()) {
                let artifact_id = ArtifactId::from_raw(raw.to_string());
                let result = harness.evaluate(&artifact_id).await.context("evaluation failed")?;
                reporter.print_eval_result(&result);
            }
        }
    }

    Ok(())
}

async fn print_status(config_path: &Path, suite_path: &Path, run_id: &str) -> Result<()> {
    let harness = build_harness(config_path, suite_path).await?;
    let reporter = ConsoleReporter::new(false);
    match harness.run_status(run_id).await {
        Some(snapshot) => {
            reporter.print_run_snapshot(&snapshot);
            Ok(())
        }
        None => Err(anyhow!("no such run: {run_id}")),
    }
}

async fn cancel(config_path: &Path, suite_path: &Path, run_id: Option<String>, all: bool) -> Result<()> {
    let harness = build_harness(config_path, suite_path).await?;
    if all {
        harness.cancel_all().await;
        println!("cancelled every tracked run");
        return Ok(());
    }
    let run_id = run_id.ok_or_else(|| anyhow!("either a run id or --all is required"))?;
    if harness.cancel_run(&run_id).await {
        println!("cancelled {run_id}");
        Ok(())
    } else {
        Err(anyhow!("no such run: {run_id}"))
    }
}

async fn rerun_batch(config_path: &Path, suite_path: &Path, run_id: &str, batch_number: u32) -> Result<()> {
    let harness = build_harness(config_path, suite_path).await?;
    let batch = harness.rerun_batch(run_id, batch_number).await?;
    println!("batch {} status: {:?}", batch.number, batch.status);
    Ok(())
}

async fn evaluate(config_path: &Path, suite_path: &Path, artifact_id: &str, verbose: bool) -> Result<()> {
    let harness = build_harness(config_path, suite_path).await?;
    let reporter = ConsoleReporter::new(verbose);
    let artifact_id = ArtifactId::from_raw(artifact_id.to_string());
    let result = harness.evaluate(&artifact_id).await?;
    reporter.print_eval_result(&result);
    Ok(())
}

async fn promote(config_path: &Path, suite_path: &Path, name: &str, artifact_id: &str) -> Result<()> {
    let harness = build_harness(config_path, suite_path).await?;
    let artifact_id = ArtifactId::from_raw(artifact_id.to_string());
    harness.promote_to_collection(name, &artifact_id).await?;
    println!("added {artifact_id} to {name}");
    Ok(())
}

async fn compare(config_path: &Path, suite_path: &Path, first: &str, second: &str, verbose: bool) -> Result<()> {
    let harness = build_harness(config_path, suite_path).await?;
    let reporter = ConsoleReporter::new(verbose);
    let comparison = harness.compare(first, second).await?;
    reporter.print_collection_stats(&comparison.first);
    reporter.print_collection_stats(&comparison.second);
    reporter.print_comparison(&comparison);
    Ok(())
}

async fn list_collections(config_path: &Path, suite_path: &Path) -> Result<()> {
    let harness = build_harness(config_path, suite_path).await?;
    for name in harness.list_collections().await? {
        println!("{name}");
    }
    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Batch concurrency: {}", config.harness.batch_concurrency);
            println!("  Evaluator concurrency: {}", config.harness.evaluator_concurrency);
            println!("  Batch timeout: {}s", config.harness.batch_timeout_secs);
            println!("  Max retries: {}", config.harness.max_retries);
            println!("  Run soft timeout: {}s", config.harness.run_soft_timeout_secs);
            println!("  Hard compile check (jac_check): {}", config.scoring.enable_jac_check);

            let model_client_name = match &config.model_client {
                config::ModelClientConfig::Mock(_) => "mock",
            };
            println!("  Model client: {model_client_name}");

            match &config.store {
                config::StoreConfig::Fs(fs) => {
                    println!("  Store: fs ({})", fs.root.display());
                }
            }

            println!("  Variants:");
            for variant in &config.variants {
                println!("    {} ({} bytes)", variant.name, variant.size_bytes);
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_config() -> Result<()> {
    let config_path = PathBuf::from("llmbench.toml");
    if config_path.exists() {
        eprintln!("llmbench.toml already exists. Remove it first or edit manually.");
        std::process::exit(1);
    }

    let config_toml = r#"[harness]
batch_concurrency = 4
evaluator_concurrency = 2
batch_timeout_secs = 600
max_retries = 3
run_soft_timeout_secs = 1800

[model_client]
type = "mock"
fallback = "mock response"

[store]
type = "fs"
root = "${LLMBENCH_STORE:-./llmbench-store}"

[scoring]
forbidden_penalty_fraction = 0.25
syntax_penalty_fraction = 0.05
jac_check_penalty_fraction = 1.0
enable_jac_check = true

[[variants]]
name = "baseline"
size_bytes = 0
reference = "docs/baseline.md"

[report]
verbose = false
"#;

    let suite_json = r#"{
  "name": "starter",
  "cases": [
    {
      "id": "hello-world",
      "category": "basics",
      "level": 1,
      "points": 10,
      "task": "Write a function that returns the string \"hello, world\".",
      "required_patterns": ["fn"],
      "forbidden_patterns": ["unimplemented!"],
      "hints": []
    }
  ]
}
"#;

    std::fs::write(&config_path, config_toml).context("failed to write llmbench.toml")?;
    std::fs::write("suite.json", suite_json).context("failed to write suite.json")?;
    println!("Created llmbench.toml and suite.json");
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  llmbench run <model> <variant>");
    Ok(())
}
