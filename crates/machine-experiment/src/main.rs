//! Machine maintenance experiment CLI.
//!
//! Commands:
//! - run: Run an iterate-then-retrain experiment
//! - compare: Run every estimator mode on the same seed

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use ensemble_kernel::EstimatorMode;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use machine_experiment::results::format_duration;
use machine_experiment::{run_experiment, ExperimentResult, MachineConfig, OutputPaths};

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
#[command(name = "machine-experiment")]
#[command(version)]
#[command(about = "Preventive maintenance with learned time-to-failure estimates")]
struct Cli {
    /// JSON config file; flags below override it
    #[arg(long, env = "MACHINE_EXPERIMENT_CONFIG")]
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

        /// Number of iterations (retraining happens between them)
        #[arg(long)]
        iterations: Option<usize>,

        /// Simulations per iteration
        #[arg(long)]
        simulations: Option<usize>,

        /// Steps per simulation
        #[arg(long)]
        steps: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for results
        #[arg(long, default_value = "machine-results.json")]
        output: PathBuf,

        /// Directory for per-iteration model parameters
        #[arg(long)]
        models: Option<PathBuf>,

        /// JSON-lines file receiving every step record
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Keep every machine's state at every step in the results
        #[arg(long)]
        log_machines: bool,
    },

    /// Run predictive, baseline and reactive modes with the same seed
    Compare {
        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for results
        #[arg(long, default_value = "machine-compare.json")]
        output: PathBuf,
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
        Some(path) => MachineConfig::load(path)?,
        None => MachineConfig::default(),
    };

    match cli.command {
        Commands::Run {
            mode,
            iterations,
            simulations,
            steps,
            seed,
            output,
            models,
            trace,
            log_machines,
        } => {
            config.mode = mode.into();
            config.log_machines |= log_machines;
            if let Some(iterations) = iterations {
                config.experiment.iterations = iterations;
            }
            if let Some(simulations) = simulations {
                config.experiment.simulations = simulations;
            }
            if let Some(steps) = steps {
                config.experiment.steps = steps;
            }
            if let Some(seed) = seed {
                config.experiment.seed = seed;
            }

            let result = run_experiment(config, &OutputPaths { models, trace })?;
            let output_path = timestamped_path(&output);
            result.save(&output_path)?;

            print_result(&result);
            println!("\nResults saved to: {}", output_path.display());
        }

        Commands::Compare { seed, output } => {
            if let Some(seed) = seed {
                config.experiment.seed = seed;
            }

            let mut results = Vec::new();
            for mode in [EstimatorMode::Reactive, EstimatorMode::Baseline, EstimatorMode::Predictive] {
                info!(mode = %mode, "Starting run");
                let run = MachineConfig {
                    mode,
                    ..config.clone()
                };
                results.push(run_experiment(run, &OutputPaths::default())?);
            }

            let output_path = timestamped_path(&output);
            std::fs::write(&output_path, serde_json::to_string_pretty(&results)?)?;

            println!("\n=== Mode Comparison ===");
            println!("  {:>10} {:>12} {:>10} {:>10}", "Mode", "Availability", "Failures", "Preventive");
            for result in &results {
                if let Some(last) = result.iterations.last() {
                    println!(
                        "  {:>10} {:>12.3} {:>10.1} {:>10}",
                        result.config.mode.to_string(),
                        last.availability,
                        last.avg_failures,
                        last.preventive_calls
                    );
                }
            }
            println!("\nResults saved to: {}", output_path.display());
        }
    }

    Ok(())
}

fn print_result(result: &ExperimentResult) {
    println!("\n=== Experiment Result ===");
    println!("Run: {}", result.run_id);
    println!("Mode: {}", result.config.mode);
    println!("Machines: {}", result.config.plant.machine_count);
    println!("Seed: {}", result.config.experiment.seed);
    println!("Duration: {}", format_duration(result.duration_ms()));

    println!("\nPer-Iteration Metrics:");
    println!(
        "  {:>4} {:>12} {:>8} {:>8} {:>10} {:>10}",
        "Iter", "Availability", "SE", "Failures", "Preventive", "Emergency"
    );
    for it in &result.iterations {
        println!(
            "  {:>4} {:>12.3} {:>8.3} {:>8.1} {:>10} {:>10}",
            it.iteration + 1,
            it.availability,
            it.availability_se,
            it.avg_failures,
            it.preventive_calls,
            it.emergency_calls
        );
    }
    println!("\nAvailability gain: {:+.3}", result.availability_gain());
}
