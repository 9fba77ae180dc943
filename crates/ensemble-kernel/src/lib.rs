//! Ensemble Kernel: adaptive coordination units with delayed-label learning
//!
//! This crate implements a tick-driven scheduler that, at every logical
//! step, decides which temporary coordination units ("ensembles") apply and
//! which agents they claim. Role selection may consult trainable
//! estimators; the observations behind those predictions are buffered until
//! their true outcome is known and then fed back as training examples.

pub mod agent;
pub mod claims;
pub mod config;
pub mod context;
pub mod ensemble;
pub mod error;
pub mod estimator;
pub mod experiment;
pub mod features;
pub mod kernel;
pub mod labels;
pub mod record;
pub mod ridge;
pub mod world;

pub use agent::{Agent, AgentId, Attribute, Attributes, ContextId, Step};
pub use claims::{Claim, ClaimLedger};
pub use config::KernelConfig;
pub use context::{ContextSpec, UnitFactory, Window};
pub use ensemble::{Cardinality, Ensemble, ResolvedRoles, RoleSpec};
pub use error::{ConfigurationError, KernelError};
pub use estimator::{BufferPolicy, Estimator, EstimatorMode, Model, Target, TrainingOutcome};
pub use experiment::{ExperimentConfig, ExperimentRunner, RunIndex, RunSummary, Scenario};
pub use features::{FeatureSchema, FeatureValue};
pub use kernel::{Kernel, KernelBuilder};
pub use labels::{Closure, FeatureRecord, LabelBuffer, LabelRule, LabelSummary, TimeToEvent};
pub use record::{ClaimSummary, JsonlSink, RoleRecord, StepRecord, UnitOutcome};
pub use ridge::RidgeModel;
pub use world::World;
