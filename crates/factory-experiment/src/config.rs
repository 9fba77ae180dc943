//! Configuration for the smart factory domain.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use ensemble_kernel::{EstimatorMode, ExperimentConfig, KernelConfig, Step};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];

    /// Day for the n-th simulation of an iteration.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 7]
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
            Self::Saturday => "Saturday",
            Self::Sunday => "Sunday",
        }
    }

    /// How much more (or less) likely lateness is on this day.
    pub fn lateness_factor(self) -> f64 {
        match self {
            Self::Monday => 1.5,
            Self::Friday => 2.0,
            Self::Saturday | Self::Sunday => 0.5,
            _ => 1.0,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shifts, arrivals and walking distances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    /// One shift per workplace
    pub workplaces: usize,
    pub shift_start: Step,
    pub shift_end: Step,
    pub workers_per_shift: usize,
    pub standbys_per_shift: usize,
    /// Share of assigned workers arriving late on an ordinary day
    pub late_fraction: f64,
    /// Bus arrivals of punctual workers, relative to the shift start. The
    /// default keeps them at the gate before the baseline cutoff.
    pub punctual_arrival: (i64, i64),
    /// Bus arrivals of late workers, relative to the shift start
    pub late_arrival: (i64, i64),
    /// Steps between calling a standby and their bus arriving
    pub standby_delay: Step,
    /// Distance covered per step
    pub walking_speed: f64,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            workplaces: 10,
            shift_start: 30,
            shift_end: 50,
            workers_per_shift: 3,
            standbys_per_shift: 3,
            late_fraction: 0.1,
            punctual_arrival: (-30, -21),
            late_arrival: (-4, 10),
            standby_delay: 3,
            walking_speed: 1.0,
        }
    }
}

impl ShiftConfig {
    /// Late probability for `day`, capped at 1.
    pub fn late_probability(&self, day: DayOfWeek) -> f64 {
        (self.late_fraction * day.lateness_factor()).clamp(0.0, 1.0)
    }
}

/// Complete configuration of a late-worker experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    pub experiment: ExperimentConfig,
    pub kernel: KernelConfig,
    pub shifts: ShiftConfig,
    pub mode: EstimatorMode,
    /// Rigid baseline: cancel missing workers this many steps before the
    /// shift starts
    pub cancellation_baseline: Step,
    /// Workers whose predicted on-time probability falls below this are
    /// cancelled
    pub cancel_below: f64,
    pub ridge_lambda: f64,
    /// Record every worker's position at every step
    pub log_workers: bool,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            experiment: ExperimentConfig {
                iterations: 3,
                simulations: 7,
                steps: 50,
                seed: 42,
            },
            kernel: KernelConfig::default(),
            shifts: ShiftConfig::default(),
            mode: EstimatorMode::Predictive,
            cancellation_baseline: 16,
            cancel_below: 0.5,
            ridge_lambda: 1e-3,
            log_workers: false,
        }
    }
}

impl FactoryConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}
