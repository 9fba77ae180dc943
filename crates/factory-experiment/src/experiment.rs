//! Late-worker experiment: one simulation per day of the week.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use ensemble_kernel::{
    ContextSpec, ExperimentRunner, JsonlSink, KernelBuilder, RunIndex, Scenario, Step, StepRecord,
    TrainingOutcome, World,
};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{DayOfWeek, FactoryConfig};
use crate::ensembles::{shift_contexts, CANCEL_LATE_WORKERS, LATE_ROLE};
use crate::estimate::{self, ArrivalByShiftStart, LATE_WORKERS};
use crate::factory::Factory;
use crate::results::{
    CancelledWorker, ExperimentResult, IterationSummary, ShiftMetrics, WorkerLog, WorkerPosition,
};

#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
    /// Per-iteration model parameters go under `<models>/late_workers/`
    pub models: Option<PathBuf>,
    /// JSON-lines step trace
    pub trace: Option<PathBuf>,
}

pub struct LateWorkersScenario {
    config: FactoryConfig,
    trace: Option<JsonlSink>,
    run: Option<RunIndex>,
    shifts: Vec<ShiftMetrics>,
    iterations: Vec<IterationSummary>,
    cancelled: Vec<CancelledWorker>,
    worker_logs: Vec<WorkerLog>,
    worker_positions: Vec<WorkerPosition>,
}

impl LateWorkersScenario {
    pub fn new(config: FactoryConfig) -> Self {
        Self {
            config,
            trace: None,
            run: None,
            shifts: Vec::new(),
            iterations: Vec::new(),
            cancelled: Vec::new(),
            worker_logs: Vec::new(),
            worker_positions: Vec::new(),
        }
    }

    pub fn with_trace(mut self, path: &Path) -> Result<Self> {
        self.trace = Some(JsonlSink::create(path)?);
        Ok(self)
    }

    pub fn shifts(&self) -> &[ShiftMetrics] {
        &self.shifts
    }

    pub fn cancelled(&self) -> &[CancelledWorker] {
        &self.cancelled
    }

    pub fn worker_logs(&self) -> &[WorkerLog] {
        &self.worker_logs
    }
}

impl Scenario for LateWorkersScenario {
    type World = Factory;

    fn prepare_simulation(
        &mut self,
        run: RunIndex,
        rng: &mut ChaCha8Rng,
    ) -> Result<(Factory, Vec<ContextSpec<Factory>>)> {
        let day = DayOfWeek::from_index(run.simulation);
        let factory = Factory::generate(self.config.shifts.clone(), day, rng)?;
        let contexts = shift_contexts(&factory, self.config.cancel_below);
        debug!(day = %day, shifts = contexts.len(), "Factory prepared");
        self.run = Some(run);
        Ok((factory, contexts))
    }

    fn world_step(&mut self, factory: &mut Factory, step: Step, _rng: &mut ChaCha8Rng) {
        factory.advance(step);
    }

    fn step_callback(&mut self, factory: &Factory, record: &StepRecord) -> Result<()> {
        if let Some(run) = self.run {
            for shift in factory.shifts() {
                let Some(late) = record.admitted(CANCEL_LATE_WORKERS, shift.id, LATE_ROLE) else {
                    continue;
                };
                for &worker in late {
                    self.cancelled.push(CancelledWorker {
                        iteration: run.iteration,
                        simulation: run.simulation,
                        step: record.step,
                        worker,
                        bus_arrival: factory.agent(worker).and_then(|w| w.bus_arrival()),
                        shift: shift.id,
                    });
                }
            }
            if self.config.log_workers {
                self.worker_positions.extend(WorkerPosition::collect(
                    factory,
                    run.iteration,
                    run.simulation,
                    record.step,
                ));
            }
        }
        if let Some(sink) = self.trace.as_mut() {
            sink.write(record)?;
        }
        Ok(())
    }

    fn simulation_callback(&mut self, factory: &Factory, run: RunIndex) -> Result<()> {
        let metrics: Vec<ShiftMetrics> = factory
            .shifts()
            .map(|shift| ShiftMetrics::collect(factory, shift, run.iteration, run.simulation))
            .collect();
        let arrived: usize = metrics.iter().map(|m| m.arrived).sum();
        let standbys: usize = metrics.iter().map(|m| m.standbys).sum();
        let lateness = metrics.iter().map(|m| m.lateness).sum::<f64>() / metrics.len().max(1) as f64;
        info!(
            iteration = run.iteration + 1,
            simulation = run.simulation + 1,
            day = %factory.day(),
            arrived,
            standbys,
            lateness = format!("{:.1}", lateness),
            "Simulation finished"
        );
        self.shifts.extend(metrics);
        self.worker_logs
            .extend(WorkerLog::collect(factory, run.iteration, run.simulation));
        Ok(())
    }

    fn iteration_callback(
        &mut self,
        iteration: usize,
        training: &BTreeMap<String, TrainingOutcome>,
    ) -> Result<()> {
        let summary = IterationSummary::compute(iteration, &self.shifts, training.clone());
        info!(
            iteration = iteration + 1,
            lateness = format!("{:.2}", summary.avg_lateness),
            standbys = format!("{:.2}", summary.avg_standbys),
            "Iteration finished"
        );
        self.iterations.push(summary);
        if let Some(sink) = self.trace.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }
}

/// Run a full late-worker experiment.
pub fn run_experiment(config: FactoryConfig, paths: &OutputPaths) -> Result<ExperimentResult> {
    let started_at = Utc::now();

    let mut kernel = KernelBuilder::new(config.kernel.clone())
        .add_estimator(estimate::estimator(&config, paths.models.clone()))
        .add_estimate(LATE_WORKERS, LATE_WORKERS, ArrivalByShiftStart)
        .build()
        .context("declaring the late-worker estimate")?;

    let mut scenario = LateWorkersScenario::new(config.clone());
    if let Some(path) = &paths.trace {
        scenario = scenario.with_trace(path)?;
    }

    let runner = ExperimentRunner::new(config.experiment.clone());
    runner.run(&mut scenario, &mut kernel)?;

    Ok(ExperimentResult {
        run_id: Uuid::new_v4(),
        config,
        started_at,
        ended_at: Utc::now(),
        shifts: scenario.shifts,
        iterations: scenario.iterations,
        cancelled_workers: scenario.cancelled,
        worker_logs: scenario.worker_logs,
        worker_positions: scenario.worker_positions,
    })
}
