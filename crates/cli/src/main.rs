//! plotloom CLI - run phase-gated task pipelines from TOML files.

mod builtin;
mod pipeline;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use plotloom_core::PlanOutcome;
use plotloom_execution::{DependencyMatcher, PhaseController};
use plotloom_progress::{BlockerDetector, HealthReport, ProgressReport};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "plotloom")]
#[command(about = "Phase-gated task graph runner", long_about = None)]
struct Cli {
    /// Debug logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline and print its outcome as JSON
    Run {
        /// Pipeline file
        file: PathBuf,
        /// Override the concurrency limit
        #[arg(long)]
        concurrency: Option<usize>,
        /// Override the per-task timeout, in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Stop dispatching after the first required failure
        #[arg(long)]
        halt_on_failure: bool,
    },
    /// Print the stages in which the pipeline's tasks would run
    Order {
        /// Pipeline file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let registry = builtin::registry()?;

    match cli.command {
        Commands::Run {
            file,
            concurrency,
            timeout,
            halt_on_failure,
        } => {
            let pipeline = Pipeline::load(&file)?;
            let mut config = pipeline.engine.clone();
            if let Some(limit) = concurrency {
                config = config.with_concurrency_limit(limit);
            }
            if let Some(secs) = timeout {
                config = config.with_task_timeout(Duration::from_secs(secs));
            }
            if halt_on_failure {
                config = config.with_halt_on_failure(true);
            }

            let phases = pipeline.phases(&registry)?;
            let mut controller = PhaseController::new(phases, config);
            let mut plan = plotloom_core::Plan::new();
            info!(plan = %plan.id(), file = %file.display(), "Running pipeline");

            let outcome = controller
                .run(&mut plan)
                .await
                .context("pipeline could not be run")?;
            println!("{}", serde_json::to_string_pretty(&report(&outcome))?);

            Ok(if outcome.is_completed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Order { file } => {
            let pipeline = Pipeline::load(&file)?;
            let plan = pipeline.preview_plan(&registry)?;
            let stages = DependencyMatcher::new()
                .execution_order(&plan)
                .context("no execution order")?;

            for (i, stage) in stages.iter().enumerate() {
                println!("{:>3}  {}", i + 1, stage.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ if verbose => EnvFilter::new("debug"),
        _ => EnvFilter::new("info"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report(outcome: &PlanOutcome) -> serde_json::Value {
    let snapshot = outcome.snapshot();
    json!({
        "status": outcome.status().to_string(),
        "diagnostic": outcome.diagnostic(),
        "results": snapshot.results(),
        "progress": ProgressReport::from_snapshot(snapshot),
        "health": HealthReport::from_snapshot(snapshot),
        "blockers": BlockerDetector::new().analyze(snapshot),
    })
}
