//! Error types for the kernel.
//!
//! Only [`ConfigurationError`] is fatal. Shortfalls, unavailable predictions
//! and failed retraining are reported as values (see `record` and
//! `estimator`) and never abort a run.

use std::path::PathBuf;

use thiserror::Error;

use crate::agent::ContextId;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("feature error: {0}")]
    Feature(#[from] FeatureError),

    #[error("training error: {0}")]
    Training(#[from] TrainingError),

    #[error("persistence error at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Defects in how the kernel was assembled. Detected before the run where
/// possible, otherwise on the first step that exposes them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("role `{role}` of unit `{unit}` has min {min} > max {max}")]
    InvalidCardinality {
        unit: String,
        role: String,
        min: usize,
        max: usize,
    },

    #[error("role `{role}` of unit `{unit}` references undeclared estimate `{estimate}`")]
    UndeclaredEstimate {
        unit: String,
        role: String,
        estimate: String,
    },

    #[error("estimate `{estimate}` references undeclared estimator `{estimator}`")]
    UndeclaredEstimator { estimate: String, estimator: String },

    #[error("estimator `{0}` declared twice")]
    DuplicateEstimator(String),

    #[error("estimate `{0}` declared twice")]
    DuplicateEstimate(String),

    #[error("context {0} registered twice")]
    DuplicateContext(ContextId),

    #[error("estimator `{estimator}` expects {expected} features, schema declares {declared}")]
    FeatureArity {
        estimator: String,
        expected: usize,
        declared: usize,
    },

    #[error("saved parameters of estimator `{estimator}` were fitted on a different feature schema")]
    SchemaMismatch { estimator: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("expected {expected} feature values, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("feature `{feature}` expects a number")]
    ExpectedNumber { feature: String },

    #[error("feature `{feature}` expects a category")]
    ExpectedCategory { feature: String },

    #[error("feature `{feature}` has no category `{category}`")]
    UnknownCategory { feature: String, category: String },

    #[error("feature `{feature}` got non-finite value")]
    NonFinite { feature: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum TrainingError {
    #[error("no training examples")]
    Empty,

    #[error("example has {got} features, expected {expected}")]
    Arity { expected: usize, got: usize },

    #[error("fit produced non-finite parameters")]
    Diverged,
}

pub type Result<T> = std::result::Result<T, KernelError>;
