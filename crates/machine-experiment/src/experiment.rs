//! Maintenance experiment: plugs the plant into the generic runner.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use ensemble_kernel::{
    ContextSpec, ExperimentRunner, JsonlSink, KernelBuilder, RunIndex, Scenario, Step, StepRecord,
    TrainingOutcome,
};
use rand_chacha::ChaCha8Rng;
use tracing::info;
use uuid::Uuid;

use crate::config::MachineConfig;
use crate::ensembles::maintenance_contexts;
use crate::estimate::{self, TIME_TO_FAILURE};
use crate::machine::Plant;
use crate::results::{ExperimentResult, IterationSummary, MachineLog, MachineSample, SimulationMetrics};

/// Where a run writes its artifacts.
#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
    /// Per-iteration model parameters go under `<models>/time_to_failure/`
    pub models: Option<PathBuf>,
    /// JSON-lines step trace
    pub trace: Option<PathBuf>,
}

pub struct MaintenanceScenario {
    config: MachineConfig,
    trace: Option<JsonlSink>,
    simulations: Vec<SimulationMetrics>,
    iterations: Vec<IterationSummary>,
    machine_logs: Vec<MachineLog>,
    machine_samples: Vec<MachineSample>,
    run: Option<RunIndex>,
}

impl MaintenanceScenario {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            trace: None,
            simulations: Vec::new(),
            iterations: Vec::new(),
            machine_logs: Vec::new(),
            machine_samples: Vec::new(),
            run: None,
        }
    }

    pub fn with_trace(mut self, path: &Path) -> Result<Self> {
        self.trace = Some(JsonlSink::create(path)?);
        Ok(self)
    }

    pub fn simulations(&self) -> &[SimulationMetrics] {
        &self.simulations
    }

    pub fn iterations(&self) -> &[IterationSummary] {
        &self.iterations
    }

    pub fn machine_logs(&self) -> &[MachineLog] {
        &self.machine_logs
    }
}

impl Scenario for MaintenanceScenario {
    type World = Plant;

    fn prepare_simulation(
        &mut self,
        run: RunIndex,
        _rng: &mut ChaCha8Rng,
    ) -> Result<(Plant, Vec<ContextSpec<Plant>>)> {
        let plant = Plant::new(self.config.plant.clone());
        let contexts = maintenance_contexts(&plant);
        self.run = Some(run);
        Ok((plant, contexts))
    }

    fn world_step(&mut self, plant: &mut Plant, step: Step, rng: &mut ChaCha8Rng) {
        plant.advance(step, rng);
    }

    fn step_callback(&mut self, plant: &Plant, record: &StepRecord) -> Result<()> {
        if let (true, Some(run)) = (self.config.log_machines, self.run) {
            self.machine_samples.extend(MachineSample::collect(
                plant,
                run.iteration,
                run.simulation,
                record.step,
            ));
        }
        if let Some(sink) = self.trace.as_mut() {
            sink.write(record)?;
        }
        Ok(())
    }

    fn simulation_callback(&mut self, plant: &Plant, run: RunIndex) -> Result<()> {
        let metrics =
            SimulationMetrics::collect(plant, run.iteration, run.simulation, self.config.experiment.steps);
        info!(
            iteration = run.iteration + 1,
            simulation = run.simulation + 1,
            availability = format!("{:.3}", metrics.availability()),
            failures = metrics.failures,
            preventive = metrics.preventive_calls,
            emergency = metrics.emergency_calls,
            "Simulation finished"
        );
        self.simulations.push(metrics);
        self.machine_logs
            .extend(MachineLog::collect(plant, run.iteration, run.simulation));
        Ok(())
    }

    fn iteration_callback(
        &mut self,
        iteration: usize,
        training: &BTreeMap<String, TrainingOutcome>,
    ) -> Result<()> {
        self.iterations
            .push(IterationSummary::compute(iteration, &self.simulations, training.clone()));
        if let Some(sink) = self.trace.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }
}

/// Run a full maintenance experiment.
pub fn run_experiment(config: MachineConfig, paths: &OutputPaths) -> Result<ExperimentResult> {
    let started_at = Utc::now();

    let mut kernel = KernelBuilder::new(config.kernel.clone())
        .add_estimator(estimate::estimator(&config, paths.models.clone()))
        .add_estimate(TIME_TO_FAILURE, TIME_TO_FAILURE, estimate::label_rule())
        .build()
        .context("declaring the maintenance estimate")?;

    let mut scenario = MaintenanceScenario::new(config.clone());
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
        simulations: scenario.simulations,
        iterations: scenario.iterations,
        machine_logs: scenario.machine_logs,
        machine_samples: scenario.machine_samples,
    })
}
