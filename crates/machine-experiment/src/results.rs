//! Results collection and output for maintenance experiments.
//!
//! Captures metrics like:
//! - Machine availability (share of machine-steps spent running)
//! - Failures per simulation
//! - Preventive vs emergency maintenance calls
//! - Retraining outcomes between iterations

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use ensemble_kernel::{Agent, AgentId, Step, TrainingOutcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MachineConfig;
use crate::machine::{MaintenanceCall, Plant};

/// Metrics of one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    pub iteration: usize,
    pub simulation: usize,
    /// Machine-steps spent running
    pub running_steps: usize,
    /// Machine-steps simulated
    pub machine_steps: usize,
    pub failures: usize,
    pub preventive_calls: usize,
    pub emergency_calls: usize,
    pub repairs: usize,
}

impl SimulationMetrics {
    pub fn collect(plant: &Plant, iteration: usize, simulation: usize, steps: Step) -> Self {
        let machines = plant.machines();
        let calls = machines.iter().flat_map(|m| m.maintenance_log());
        let preventive_calls = calls.clone().filter(|c| c.preventive).count();
        Self {
            iteration,
            simulation,
            running_steps: machines.iter().map(|m| m.running_steps()).sum(),
            machine_steps: machines.len() * steps,
            failures: machines.iter().map(|m| m.failures()).sum(),
            preventive_calls,
            emergency_calls: calls.count() - preventive_calls,
            repairs: machines.iter().map(|m| m.repair_log().len()).sum(),
        }
    }

    pub fn availability(&self) -> f64 {
        if self.machine_steps == 0 {
            0.0
        } else {
            self.running_steps as f64 / self.machine_steps as f64
        }
    }
}

/// Maintenance history of one machine in one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineLog {
    pub iteration: usize,
    pub simulation: usize,
    pub machine: AgentId,
    pub maintenance: Vec<MaintenanceCall>,
    pub repairs: Vec<Step>,
}

impl MachineLog {
    pub fn collect(plant: &Plant, iteration: usize, simulation: usize) -> Vec<Self> {
        plant
            .machines()
            .iter()
            .map(|m| MachineLog {
                iteration,
                simulation,
                machine: m.id(),
                maintenance: m.maintenance_log().to_vec(),
                repairs: m.repair_log().to_vec(),
            })
            .collect()
    }
}

/// State of one machine after one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSample {
    pub iteration: usize,
    pub simulation: usize,
    pub step: Step,
    pub machine: AgentId,
    pub time_since_last_repair: usize,
    pub running: bool,
    pub failure_rate: f64,
}

impl MachineSample {
    pub fn collect(plant: &Plant, iteration: usize, simulation: usize, step: Step) -> Vec<Self> {
        plant
            .machines()
            .iter()
            .map(|m| MachineSample {
                iteration,
                simulation,
                step,
                machine: m.id(),
                time_since_last_repair: m.time_since_last_repair(),
                running: m.is_running(),
                failure_rate: m.failure_rate(),
            })
            .collect()
    }
}

/// Summary statistics for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: usize,
    pub simulations: usize,
    pub availability: f64,
    /// Standard error of availability across simulations
    pub availability_se: f64,
    pub avg_failures: f64,
    pub preventive_calls: usize,
    pub emergency_calls: usize,
    /// Retraining outcomes after this iteration (empty after the last)
    pub training: BTreeMap<String, TrainingOutcome>,
}

impl IterationSummary {
    pub fn compute(
        iteration: usize,
        simulations: &[SimulationMetrics],
        training: BTreeMap<String, TrainingOutcome>,
    ) -> Self {
        let runs: Vec<&SimulationMetrics> = simulations
            .iter()
            .filter(|s| s.iteration == iteration)
            .collect();
        let count = runs.len();
        let n = count.max(1) as f64;

        let availability: Vec<f64> = runs.iter().map(|s| s.availability()).collect();
        let mean = availability.iter().sum::<f64>() / n;

        // Standard error for continuous: SE = std_dev / sqrt(n)
        let availability_se = if count > 1 {
            let variance = availability.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / (n - 1.0);
            variance.sqrt() / n.sqrt()
        } else {
            0.0
        };

        Self {
            iteration,
            simulations: count,
            availability: mean,
            availability_se,
            avg_failures: runs.iter().map(|s| s.failures as f64).sum::<f64>() / n,
            preventive_calls: runs.iter().map(|s| s.preventive_calls).sum(),
            emergency_calls: runs.iter().map(|s| s.emergency_calls).sum(),
            training,
        }
    }
}

/// Results from a complete experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub run_id: Uuid,
    pub config: MachineConfig,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub simulations: Vec<SimulationMetrics>,
    pub iterations: Vec<IterationSummary>,
    /// One log per machine and simulation
    pub machine_logs: Vec<MachineLog>,
    /// Per-step machine states, empty unless `log_machines` is set
    #[serde(default)]
    pub machine_samples: Vec<MachineSample>,
}

impl ExperimentResult {
    /// Availability gained from the first to the last iteration.
    pub fn availability_gain(&self) -> f64 {
        match (self.iterations.first(), self.iterations.last()) {
            (Some(first), Some(last)) => last.availability - first.availability,
            _ => 0.0,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Save results to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load results from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let results = serde_json::from_str(&json)?;
        Ok(results)
    }
}

/// Format a duration in milliseconds for display.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{:.1}m", ms as f64 / 60_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(iteration: usize, running_steps: usize, failures: usize) -> SimulationMetrics {
        SimulationMetrics {
            iteration,
            simulation: 0,
            running_steps,
            machine_steps: 100,
            failures,
            preventive_calls: 1,
            emergency_calls: failures,
            repairs: failures,
        }
    }

    #[test]
    fn test_iteration_summary() {
        let sims = vec![metrics(0, 70, 3), metrics(0, 80, 1), metrics(1, 95, 0)];

        let first = IterationSummary::compute(0, &sims, BTreeMap::new());
        assert_eq!(first.simulations, 2);
        assert!((first.availability - 0.75).abs() < 1e-12);
        assert!(first.availability_se > 0.0);
        assert!((first.avg_failures - 2.0).abs() < 1e-12);
        assert_eq!(first.emergency_calls, 4);

        let second = IterationSummary::compute(1, &sims, BTreeMap::new());
        assert_eq!(second.simulations, 1);
        assert_eq!(second.availability_se, 0.0);
    }

    #[test]
    fn test_save_and_load() {
        let sims = vec![metrics(0, 70, 3), metrics(1, 90, 0)];
        let result = ExperimentResult {
            run_id: Uuid::new_v4(),
            config: MachineConfig::default(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            iterations: vec![
                IterationSummary::compute(0, &sims, BTreeMap::new()),
                IterationSummary::compute(1, &sims, BTreeMap::new()),
            ],
            simulations: sims,
            machine_logs: vec![],
            machine_samples: vec![],
        };
        assert!((result.availability_gain() - 0.2).abs() < 1e-12);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        result.save(&path).unwrap();
        let loaded = ExperimentResult::load(&path).unwrap();
        assert_eq!(loaded.run_id, result.run_id);
        assert_eq!(loaded.simulations, result.simulations);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1500), "1.5s");
        assert_eq!(format_duration(90_000), "1.5m");
    }
}
