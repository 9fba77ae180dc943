//! Generic iterate-then-retrain experiment driver.
//!
//! Orchestrates the experiment lifecycle:
//! 1. For each iteration, run `simulations` independent simulations
//! 2. Each simulation gets a fresh world and fresh contexts from the
//!    [`Scenario`], then runs `steps` steps through the kernel
//! 3. After each simulation every context window is closed
//! 4. Between iterations (never after the last one) estimators are
//!    retrained and persisted
//!
//! All randomness flows from one `ChaCha8Rng` seeded from the config, so a
//! run is reproducible from its seed.

use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::Step;
use crate::context::ContextSpec;
use crate::estimator::TrainingOutcome;
use crate::kernel::Kernel;
use crate::record::StepRecord;
use crate::world::World;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub iterations: usize,
    /// Simulations per iteration
    pub simulations: usize,
    /// Steps per simulation
    pub steps: Step,
    pub seed: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            iterations: 2,
            simulations: 1,
            steps: 500,
            seed: 42,
        }
    }
}

/// Position of a simulation within the experiment (both 0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIndex {
    pub iteration: usize,
    pub simulation: usize,
}

/// A domain plugged into the [`ExperimentRunner`].
pub trait Scenario {
    type World: World;

    /// Build a fresh world and its contexts for one simulation.
    fn prepare_simulation(
        &mut self,
        run: RunIndex,
        rng: &mut ChaCha8Rng,
    ) -> Result<(Self::World, Vec<ContextSpec<Self::World>>)>;

    /// Advance the world by one step, before the kernel runs.
    fn world_step(&mut self, world: &mut Self::World, step: Step, rng: &mut ChaCha8Rng);

    fn step_callback(&mut self, _world: &Self::World, _record: &StepRecord) -> Result<()> {
        Ok(())
    }

    fn simulation_callback(&mut self, _world: &Self::World, _run: RunIndex) -> Result<()> {
        Ok(())
    }

    /// Called after each iteration with the retraining outcomes (empty
    /// after the last iteration, which does not retrain).
    fn iteration_callback(
        &mut self,
        _iteration: usize,
        _training: &BTreeMap<String, TrainingOutcome>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Counters over a whole experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub simulations: usize,
    pub steps: usize,
    pub actuations: usize,
    pub shortfalls: usize,
    /// Retraining outcomes per iteration boundary
    pub training: Vec<BTreeMap<String, TrainingOutcome>>,
}

pub struct ExperimentRunner {
    config: ExperimentConfig,
}

impl ExperimentRunner {
    pub fn new(config: ExperimentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn run<S: Scenario>(&self, scenario: &mut S, kernel: &mut Kernel<S::World>) -> Result<RunSummary> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut summary = RunSummary::default();

        info!(
            iterations = self.config.iterations,
            simulations = self.config.simulations,
            steps = self.config.steps,
            seed = self.config.seed,
            "Starting experiment"
        );

        for iteration in 0..self.config.iterations {
            for simulation in 0..self.config.simulations {
                let run = RunIndex {
                    iteration,
                    simulation,
                };
                let (mut world, contexts) = scenario
                    .prepare_simulation(run, &mut rng)
                    .with_context(|| format!("preparing simulation {}/{}", iteration + 1, simulation + 1))?;
                kernel.begin_simulation(&world, contexts)?;

                for step in 0..self.config.steps {
                    scenario.world_step(&mut world, step, &mut rng);
                    kernel.prepare_step(&world, step);
                    let record = kernel.actuate_step(&mut world, step)?;
                    summary.actuations += record
                        .units
                        .iter()
                        .filter(|u| matches!(u.outcome, crate::record::UnitOutcome::Actuated { .. }))
                        .count();
                    summary.shortfalls += record.shortfalls().count();
                    scenario.step_callback(&world, &record)?;
                    summary.steps += 1;
                }

                let labels = kernel.end_simulation(&world, self.config.steps);
                debug!(
                    iteration = iteration + 1,
                    simulation = simulation + 1,
                    labels = ?labels,
                    "Simulation complete"
                );
                scenario.simulation_callback(&world, run)?;
                summary.simulations += 1;
            }

            let last = iteration + 1 == self.config.iterations;
            let training = if last {
                BTreeMap::new()
            } else {
                let outcomes = kernel.on_iteration_boundary(iteration);
                summary.training.push(outcomes.clone());
                outcomes
            };
            scenario.iteration_callback(iteration, &training)?;
        }

        info!(
            simulations = summary.simulations,
            actuations = summary.actuations,
            shortfalls = summary.shortfalls,
            "Experiment complete"
        );
        Ok(summary)
    }
}
