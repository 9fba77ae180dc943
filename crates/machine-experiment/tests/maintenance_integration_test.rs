//! End-to-end maintenance runs through the kernel.
//!
//! Covers:
//! - Baseline predictions preventing every failure of noise-free machines
//! - Learned predictions improving availability after the first iteration
//! - Reproducibility from the seed
//! - Model parameters and step traces written to disk
//! - Maintenance logs kept for every simulation, machine states on request

use ensemble_kernel::{EstimatorMode, ExperimentConfig, TrainingOutcome};

use machine_experiment::estimate::TIME_TO_FAILURE;
use machine_experiment::{run_experiment, MachineConfig, OutputPaths, PlantConfig};

fn config(mode: EstimatorMode, iterations: usize) -> MachineConfig {
    MachineConfig {
        experiment: ExperimentConfig {
            iterations,
            simulations: 1,
            steps: 500,
            seed: 42,
        },
        mode,
        ..MachineConfig::default()
    }
}

#[test]
fn test_baseline_prevents_noise_free_failures() {
    let config = MachineConfig {
        plant: PlantConfig {
            failure_rate_variance: 0.0,
            ..PlantConfig::default()
        },
        baseline_margin: 5.0,
        ..config(EstimatorMode::Baseline, 1)
    };

    let result = run_experiment(config, &OutputPaths::default()).unwrap();

    let sim = &result.simulations[0];
    assert_eq!(sim.failures, 0);
    assert_eq!(sim.emergency_calls, 0);
    assert!(sim.preventive_calls > 0);
    assert_eq!(sim.running_steps, sim.machine_steps);

    for log in &result.machine_logs {
        let first = log.maintenance.first().expect("every machine is maintained");
        assert!(first.preventive);
        assert!(first.step < 101, "maintenance at {}", first.step);
    }
}

#[test]
fn test_reactive_mode_never_prevents() {
    let result = run_experiment(config(EstimatorMode::Reactive, 1), &OutputPaths::default()).unwrap();
    let sim = &result.simulations[0];
    assert_eq!(sim.preventive_calls, 0);
    assert!(sim.failures > 0);
    assert_eq!(sim.emergency_calls, sim.failures);
    assert!(result.machine_samples.is_empty());
}

#[test]
fn test_learned_estimate_improves_availability() {
    let result = run_experiment(config(EstimatorMode::Predictive, 2), &OutputPaths::default()).unwrap();

    assert_eq!(result.iterations.len(), 2);
    let (first, second) = (&result.iterations[0], &result.iterations[1]);

    // Untrained and without a baseline, the first iteration is reactive.
    assert_eq!(first.preventive_calls, 0);
    assert!(matches!(first.training.get(TIME_TO_FAILURE), Some(TrainingOutcome::Trained(_))));
    assert!(second.training.is_empty());

    assert!(second.preventive_calls > 0);
    assert!(
        second.availability > first.availability,
        "availability {:.3} -> {:.3}",
        first.availability,
        second.availability
    );
    assert!(second.avg_failures < first.avg_failures);
}

#[test]
fn test_runs_are_reproducible() {
    let a = run_experiment(config(EstimatorMode::Predictive, 2), &OutputPaths::default()).unwrap();
    let b = run_experiment(config(EstimatorMode::Predictive, 2), &OutputPaths::default()).unwrap();
    assert_eq!(a.simulations, b.simulations);
    assert_eq!(a.machine_logs, b.machine_logs);
}

#[test]
fn test_models_and_trace_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let paths = OutputPaths {
        models: Some(dir.path().join("models")),
        trace: Some(dir.path().join("trace.jsonl")),
    };
    let mut config = config(EstimatorMode::Predictive, 3);
    config.experiment.steps = 300;

    run_experiment(config, &paths).unwrap();

    let models = dir.path().join("models").join(TIME_TO_FAILURE);
    assert!(models.join("1.json").exists());
    assert!(models.join("2.json").exists());
    // No retraining after the last iteration.
    assert!(!models.join("3.json").exists());

    let trace = std::fs::read_to_string(dir.path().join("trace.jsonl")).unwrap();
    assert_eq!(trace.lines().count(), 3 * 300);
    let first: serde_json::Value = serde_json::from_str(trace.lines().next().unwrap()).unwrap();
    assert_eq!(first["step"], 0);
}

#[test]
fn test_logs_cover_every_simulation() {
    let mut config = config(EstimatorMode::Reactive, 2);
    config.experiment.simulations = 2;
    config.experiment.steps = 200;
    config.log_machines = true;

    let result = run_experiment(config, &OutputPaths::default()).unwrap();

    assert_eq!(result.simulations.len(), 4);
    assert_eq!(result.machine_logs.len(), 4 * 10);
    for iteration in 0..2 {
        for simulation in 0..2 {
            let logs: Vec<_> = result
                .machine_logs
                .iter()
                .filter(|l| l.iteration == iteration && l.simulation == simulation)
                .collect();
            assert_eq!(logs.len(), 10);
            let repairs: usize = logs.iter().map(|l| l.repairs.len()).sum();
            let sim = result
                .simulations
                .iter()
                .find(|s| s.iteration == iteration && s.simulation == simulation)
                .unwrap();
            assert_eq!(repairs, sim.repairs);
        }
    }

    assert_eq!(result.machine_samples.len(), 4 * 200 * 10);
    let first: Vec<_> = result
        .machine_samples
        .iter()
        .filter(|s| s.iteration == 1 && s.simulation == 1 && s.step == 0)
        .collect();
    assert_eq!(first.len(), 10);
    for sample in first {
        assert!(sample.running);
        assert_eq!(sample.time_since_last_repair, 1);
        assert!(sample.failure_rate < 0.5);
    }
}
