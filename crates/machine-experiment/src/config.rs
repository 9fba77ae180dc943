//! Configuration for the machine maintenance domain.

use std::path::Path;

use anyhow::{Context, Result};
use ensemble_kernel::{EstimatorMode, ExperimentConfig, KernelConfig};
use serde::{Deserialize, Serialize};

/// Physical parameters of the simulated plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantConfig {
    pub machine_count: usize,
    /// A running machine fails once its failure rate exceeds this
    pub failure_threshold: f64,
    /// Steps between calling maintenance and the repair
    pub time_to_repair: usize,
    /// Variance of the multiplicative noise on the failure rate
    pub failure_rate_variance: f64,
    /// Failure rate curve: `scale * growth^(age - midpoint)`
    pub growth: f64,
    pub midpoint: f64,
    pub scale: f64,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            machine_count: 10,
            failure_threshold: 0.5,
            time_to_repair: 30,
            failure_rate_variance: 0.05,
            growth: 1.1,
            midpoint: 100.0,
            scale: 0.5,
        }
    }
}

impl PlantConfig {
    /// Noise-free failure rate of a machine `age` steps after its last repair.
    pub fn mean_failure_rate(&self, age: usize) -> f64 {
        self.scale * self.growth.powf(age as f64 - self.midpoint)
    }

    /// Age at which the noise-free curve reaches `rate`.
    pub fn age_at_rate(&self, rate: f64) -> f64 {
        self.midpoint + (rate / self.scale).ln() / self.growth.ln()
    }

    /// First age at which a noise-free machine fails.
    pub fn failing_age(&self) -> f64 {
        self.age_at_rate(self.failure_threshold).floor() + 1.0
    }
}

/// Complete configuration of a maintenance experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub experiment: ExperimentConfig,
    pub kernel: KernelConfig,
    pub plant: PlantConfig,
    pub mode: EstimatorMode,
    /// Steps subtracted from the baseline's time-to-failure estimate
    pub baseline_margin: f64,
    /// L2 penalty of the ridge model
    pub ridge_lambda: f64,
    /// Record every machine's state at every step
    pub log_machines: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            experiment: ExperimentConfig::default(),
            kernel: KernelConfig::default(),
            plant: PlantConfig::default(),
            mode: EstimatorMode::Predictive,
            baseline_margin: 5.0,
            ridge_lambda: 1e-3,
            log_machines: false,
        }
    }
}

impl MachineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}
