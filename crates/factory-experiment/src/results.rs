//! Results collection and output for late-worker experiments.
//!
//! Captures metrics like:
//! - Workers arriving at their workplace per shift
//! - Standbys called per shift
//! - Average arrival time and lateness
//! - Every cancellation, with the cancelled worker's bus arrival
//! - Every worker's final state per simulation, and optionally their
//!   position at every step

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use ensemble_kernel::{Agent, AgentId, ContextId, Step, TrainingOutcome, World};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{DayOfWeek, FactoryConfig};
use crate::factory::{Factory, Shift};
use crate::worker::{Assignment, Phase};

/// Mean over arrivals of the squared delay past the shift start; punctual
/// arrivals count as zero.
pub fn lateness(arrivals: &[Step], shift_start: Step) -> f64 {
    if arrivals.is_empty() {
        return 0.0;
    }
    let total: f64 = arrivals
        .iter()
        .map(|&at| (at.saturating_sub(shift_start) as f64).powi(2))
        .sum();
    total / arrivals.len() as f64
}

/// Metrics of one shift in one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftMetrics {
    pub iteration: usize,
    pub simulation: usize,
    pub day: DayOfWeek,
    pub shift: ContextId,
    /// Team members that reached the workplace
    pub arrived: usize,
    pub standbys: usize,
    pub cancelled: usize,
    /// Average workplace arrival step, if anybody arrived
    pub avg_arrival: Option<f64>,
    pub lateness: f64,
}

impl ShiftMetrics {
    pub fn collect(factory: &Factory, shift: &Shift, iteration: usize, simulation: usize) -> Self {
        let arrivals: Vec<Step> = shift
            .active_team()
            .iter()
            .filter_map(|id| factory.agent(*id).and_then(|w| w.arrived_at_workplace()))
            .collect();
        let avg_arrival = if arrivals.is_empty() {
            None
        } else {
            Some(arrivals.iter().sum::<Step>() as f64 / arrivals.len() as f64)
        };
        Self {
            iteration,
            simulation,
            day: factory.day(),
            shift: shift.id,
            arrived: arrivals.len(),
            standbys: shift.called_standbys.len(),
            cancelled: shift.cancelled.len(),
            avg_arrival,
            lateness: lateness(&arrivals, shift.start),
        }
    }
}

/// One cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledWorker {
    pub iteration: usize,
    pub simulation: usize,
    pub step: Step,
    pub worker: AgentId,
    pub bus_arrival: Option<Step>,
    pub shift: ContextId,
}

/// A worker as they stood when a simulation ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLog {
    pub iteration: usize,
    pub simulation: usize,
    pub day: DayOfWeek,
    pub worker: AgentId,
    pub shift: ContextId,
    pub assignment: Assignment,
    /// `Cancelled`, `Arrived`, `CalledStandby`, `Assigned` or `Standby`
    pub state: String,
    pub is_at_factory: bool,
    pub has_head_gear: bool,
    pub bus_arrival: Option<Step>,
    pub arrived_at_factory: Option<Step>,
    pub arrived_at_workplace: Option<Step>,
}

impl WorkerLog {
    pub fn collect(factory: &Factory, iteration: usize, simulation: usize) -> Vec<Self> {
        factory
            .workers()
            .iter()
            .map(|worker| Self {
                iteration,
                simulation,
                day: factory.day(),
                worker: worker.id(),
                shift: worker.shift(),
                assignment: worker.assignment(),
                state: worker.state_tag().to_string(),
                is_at_factory: worker.is_at_factory(),
                has_head_gear: worker.has_head_gear(),
                bus_arrival: worker.bus_arrival(),
                arrived_at_factory: worker.arrived_at_factory(),
                arrived_at_workplace: worker.arrived_at_workplace(),
            })
            .collect()
    }
}

/// Where a worker was after a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPosition {
    pub iteration: usize,
    pub simulation: usize,
    pub step: Step,
    pub worker: AgentId,
    pub x: f64,
    pub y: f64,
    pub phase: Phase,
}

impl WorkerPosition {
    pub fn collect(factory: &Factory, iteration: usize, simulation: usize, step: Step) -> Vec<Self> {
        factory
            .workers()
            .iter()
            .map(|worker| {
                let position = worker.position();
                Self {
                    iteration,
                    simulation,
                    step,
                    worker: worker.id(),
                    x: position.x,
                    y: position.y,
                    phase: worker.phase(),
                }
            })
            .collect()
    }
}

/// Averages over every shift of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: usize,
    pub shifts: usize,
    pub avg_arrived: f64,
    pub avg_standbys: f64,
    pub avg_cancelled: f64,
    pub avg_lateness: f64,
    /// Standard error of the average lateness
    pub lateness_se: f64,
    pub training: BTreeMap<String, TrainingOutcome>,
}

impl IterationSummary {
    pub fn compute(
        iteration: usize,
        shifts: &[ShiftMetrics],
        training: BTreeMap<String, TrainingOutcome>,
    ) -> Self {
        let runs: Vec<&ShiftMetrics> = shifts.iter().filter(|s| s.iteration == iteration).collect();
        let count = runs.len();
        let n = count.max(1) as f64;
        let mean = |f: &dyn Fn(&ShiftMetrics) -> f64| runs.iter().map(|s| f(s)).sum::<f64>() / n;

        let avg_lateness = mean(&|s| s.lateness);
        let lateness_se = if count > 1 {
            let variance = runs
                .iter()
                .map(|s| (s.lateness - avg_lateness).powi(2))
                .sum::<f64>()
                / (n - 1.0);
            variance.sqrt() / n.sqrt()
        } else {
            0.0
        };

        Self {
            iteration,
            shifts: count,
            avg_arrived: mean(&|s| s.arrived as f64),
            avg_standbys: mean(&|s| s.standbys as f64),
            avg_cancelled: mean(&|s| s.cancelled as f64),
            avg_lateness,
            lateness_se,
            training,
        }
    }
}

/// Results from a complete experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub run_id: Uuid,
    pub config: FactoryConfig,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub shifts: Vec<ShiftMetrics>,
    pub iterations: Vec<IterationSummary>,
    pub cancelled_workers: Vec<CancelledWorker>,
    /// One log per worker and simulation
    pub worker_logs: Vec<WorkerLog>,
    /// Per-step positions, only with `log_workers`
    #[serde(default)]
    pub worker_positions: Vec<WorkerPosition>,
}

impl ExperimentResult {
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
    use crate::config::ShiftConfig;

    #[test]
    fn test_lateness_counts_only_delay() {
        assert_eq!(lateness(&[], 30), 0.0);
        assert_eq!(lateness(&[20, 30], 30), 0.0);
        // (0 + 4 + 16) / 3
        assert!((lateness(&[25, 32, 34], 30) - 20.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_iteration_summary() {
        let shift = |iteration, lateness, standbys| ShiftMetrics {
            iteration,
            simulation: 0,
            day: DayOfWeek::Monday,
            shift: 0,
            arrived: 3,
            standbys,
            cancelled: standbys,
            avg_arrival: Some(31.0),
            lateness,
        };
        let shifts = vec![shift(0, 10.0, 1), shift(0, 30.0, 0), shift(1, 0.0, 2)];

        let first = IterationSummary::compute(0, &shifts, BTreeMap::new());
        assert_eq!(first.shifts, 2);
        assert!((first.avg_lateness - 20.0).abs() < 1e-12);
        assert!((first.avg_standbys - 0.5).abs() < 1e-12);
        assert!(first.lateness_se > 0.0);

        let second = IterationSummary::compute(1, &shifts, BTreeMap::new());
        assert_eq!(second.shifts, 1);
        assert_eq!(second.lateness_se, 0.0);
    }

    #[test]
    fn test_worker_logs_cover_assigned_and_standbys() {
        let mut factory = Factory::new(ShiftConfig::default(), DayOfWeek::Wednesday);
        factory.add_shift(&[5, 40], 1).unwrap();
        for step in 0..12 {
            factory.advance(step);
        }

        let logs = WorkerLog::collect(&factory, 1, 2);
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|log| log.iteration == 1 && log.simulation == 2));
        assert!(logs.iter().all(|log| log.day == DayOfWeek::Wednesday));

        // Off the bus at 5, at the gate five steps later.
        assert_eq!(logs[0].bus_arrival, Some(5));
        assert_eq!(logs[0].arrived_at_factory, Some(10));
        assert!(logs[0].is_at_factory);
        assert_eq!(logs[0].state, "Assigned");
        assert!(!logs[1].is_at_factory);
        assert_eq!(logs[1].arrived_at_factory, None);
        assert_eq!(logs[2].assignment, Assignment::Standby);
        assert_eq!(logs[2].state, "Standby");
        assert_eq!(logs[2].bus_arrival, None);

        let positions = WorkerPosition::collect(&factory, 1, 2, 11);
        assert_eq!(positions.len(), 3);
        assert_eq!(positions[0].step, 11);
        assert_eq!(positions[0].phase, Phase::AtGate);
        assert_eq!(positions[1].phase, Phase::Home);
    }
}
