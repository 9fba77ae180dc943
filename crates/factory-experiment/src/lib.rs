//! Smart factory shifts with preemptive replacement of late workers.
//!
//! Every workplace runs one shift. Assigned workers commute by bus and need
//! permissions to pass the gate, take head gear and enter the workplace.
//! Some arrive late, more often on some days of the week.
//!
//! The `late_workers` estimate predicts whether a worker still missing will
//! make it by the shift start. Workers predicted late are cancelled ahead
//! of time and replaced with standbys, trading standby calls for lateness.

pub mod config;
pub mod ensembles;
pub mod estimate;
pub mod experiment;
pub mod factory;
pub mod results;
pub mod worker;

pub use config::{DayOfWeek, FactoryConfig, ShiftConfig};
pub use experiment::{run_experiment, LateWorkersScenario, OutputPaths};
pub use factory::{Factory, Shift};
pub use results::ExperimentResult;
pub use worker::{Permission, Worker, WorkerEffect};
