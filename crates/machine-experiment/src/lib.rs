//! Preventive maintenance of production machines.
//!
//! Machines wear out with a noisy, exponentially growing failure rate. Each
//! machine has a maintenance context offering two units:
//! - `EmergencyRepair` schedules a repair for a failed machine
//! - `PreventiveMaintenance` schedules one ahead of a predicted failure
//!
//! The `time_to_failure` estimate learns from observed failures between
//! iterations, so later iterations keep machines running longer.

pub mod config;
pub mod ensembles;
pub mod estimate;
pub mod experiment;
pub mod machine;
pub mod results;

pub use config::{MachineConfig, PlantConfig};
pub use experiment::{run_experiment, MaintenanceScenario, OutputPaths};
pub use machine::{Machine, MachineEffect, Plant};
pub use results::ExperimentResult;
