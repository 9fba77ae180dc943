//! Smart factory experiment CLI.
//!
//! Commands:
//! - run: Run an iterate-then-retrain experiment, one simulation per weekday

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use ensemble_kernel::EstimatorMode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use factory_experiment::results::format_duration;
use factory_experiment::{run_experiment, ExperimentResult, FactoryConfig, OutputPaths};

/// Generate a timestamped output path from the given path.
/// e.g., "results.json" -> "results-20260108-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Predictive,
    Baseline,
    Reactive,
}

impl From<Mode> for EstimatorMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Predictive => Self::Predictive,
            Mode::Baseline => Self::Baseline,
            Mode::Reactive => Self::Reactive,
        }
    }
}

#[derive(Parser)]
#[command(name = "factory-experiment")]
#[command(version)]
#[command(about = "Smart factory shifts with preemptive replacement of late workers")]
struct Cli {
    /// JSON config file; flags below override it
    #[arg(long, env = "FACTORY_EXPERIMENT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single experiment
    Run {
        #[arg(long, value_enum, default_value = "predictive")]
        mode: Mode,

        /// Cancel missing workers this many steps before the shift starts
        /// (baseline mode)
        #[arg(short, long, default_value = "16")]
        baseline: usize,

        /// Share of late workers
        #[arg(short, long, default_value = "0.1")]
        late: f64,

        /// Number of iterations to run
        #[arg(short, long, default_value = "3")]
        iterations: usize,

        /// Random seed
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Output file for results
        #[arg(short, long, default_value = "factory-results.json")]
        output: PathBuf,

        /// Directory for per-iteration model parameters
        #[arg(long)]
        models: Option<PathBuf>,

        /// JSON-lines file receiving every step record
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Record every worker's position at every step
        #[arg(long)]
        log_workers: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let mut config = match &cli.config {
        Some(path) => FactoryConfig::load(path)?,
        None => FactoryConfig::default(),
    };

    match cli.command {
        Commands::Run {
            mode,
            baseline,
            late,
            iterations,
            seed,
            output,
            models,
            trace,
            log_workers,
        } => {
            config.mode = mode.into();
            config.cancellation_baseline = baseline;
            config.shifts.late_fraction = late;
            config.experiment.iterations = iterations;
            config.experiment.seed = seed;
            config.log_workers |= log_workers;

            let result = run_experiment(config, &OutputPaths { models, trace })?;
            let output_path = timestamped_path(&output);
            result.save(&output_path)?;

            print_result(&result);
            println!("\nResults saved to: {}", output_path.display());
        }
    }

    Ok(())
}

fn print_result(result: &ExperimentResult) {
    println!("\n=== Experiment Result ===");
    println!("Run: {}", result.run_id);
    println!("Mode: {}", result.config.mode);
    println!("Late workers: {:.0}%", result.config.shifts.late_fraction * 100.0);
    println!("Seed: {}", result.config.experiment.seed);
    println!("Duration: {}", format_duration(result.duration_ms()));

    println!("\nPer-Iteration Metrics:");
    println!(
        "  {:>4} {:>8} {:>9} {:>9} {:>9} {:>8}",
        "Iter", "Arrived", "Standbys", "Cancelled", "Lateness", "SE"
    );
    for it in &result.iterations {
        println!(
            "  {:>4} {:>8.2} {:>9.2} {:>9.2} {:>9.2} {:>8.2}",
            it.iteration + 1,
            it.avg_arrived,
            it.avg_standbys,
            it.avg_cancelled,
            it.avg_lateness,
            it.lateness_se
        );
    }
    println!("\nCancellations logged: {}", result.cancelled_workers.len());
    println!("Worker logs: {}", result.worker_logs.len());
    if !result.worker_positions.is_empty() {
        println!("Worker positions: {}", result.worker_positions.len());
    }
}
