//! Estimator adapter: a trainable model behind a stable contract.
//!
//! The [`Model`] trait is the boundary to the concrete regression model.
//! [`Estimator`] wraps a model with everything the kernel needs around it:
//! - a [`FeatureSchema`] fixing the input encoding
//! - an [`EstimatorMode`] selecting trained model, baseline closure, or nothing
//! - a pending example buffer filled by the delayed-label loop
//! - retraining with keep-on-failure semantics
//! - parameter persistence keyed by iteration
//!
//! Predictions are read-only. Only [`Estimator::retrain`] mutates
//! parameters, and the kernel calls it only at iteration boundaries.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FeatureError, KernelError, Result, TrainingError};
use crate::features::{FeatureSchema, FeatureValue};

/// A supervised training example: encoded features and the observed label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub features: Vec<f64>,
    pub label: f64,
}

/// Summary of a successful fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub samples: usize,
    /// Mean squared error on the training data
    pub mse: f64,
}

/// A trainable numeric model.
///
/// Implementations must leave their parameters untouched when `fit` fails.
pub trait Model {
    /// Short identifier of the model family (e.g. "ridge").
    fn kind(&self) -> &'static str;

    fn is_trained(&self) -> bool;

    /// Raw prediction, `None` until trained.
    fn predict(&self, features: &[f64]) -> Option<f64>;

    fn fit(&mut self, examples: &[Example]) -> std::result::Result<FitReport, TrainingError>;

    fn parameters(&self) -> serde_json::Value;

    fn load_parameters(&mut self, value: serde_json::Value) -> std::result::Result<(), serde_json::Error>;
}

/// What the estimator predicts; controls the output transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Unbounded numeric value
    Value,
    /// Steps until an event, clamped to `>= 0`
    TimeToEvent,
    /// Probability of a binary outcome, clamped to `[0, 1]`
    Probability,
}

impl Target {
    fn transform(self, raw: f64) -> f64 {
        match self {
            Self::Value => raw,
            Self::TimeToEvent => raw.max(0.0),
            Self::Probability => raw.clamp(0.0, 1.0),
        }
    }
}

/// Which source of predictions is in force. Baseline and model outputs are
/// never blended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorMode {
    /// Trained model. Before the first successful fit the baseline is used
    /// if one is installed, otherwise no prediction is available.
    #[default]
    Predictive,
    /// Baseline closure only, the model is still trained but never consulted.
    Baseline,
    /// No predictions at all. Roles fall back to their declared default.
    Reactive,
}

impl fmt::Display for EstimatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Predictive => "predictive",
            Self::Baseline => "baseline",
            Self::Reactive => "reactive",
        };
        f.write_str(name)
    }
}

/// How [`Estimator::retrain`] combines pending examples with earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferPolicy {
    /// Fit on every example accumulated since the run started.
    #[default]
    Append,
    /// Fit on the examples accumulated since the last successful fit only.
    Replace,
}

/// Result of a retrain attempt at an iteration boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingOutcome {
    /// Nothing to train on
    Skipped,
    Trained(FitReport),
    /// Previous parameters and the pending buffer were kept
    Failed { reason: String },
}

/// Closed-form fallback over encoded features.
pub type Baseline = Box<dyn Fn(&[f64]) -> f64>;

/// On-disk form of saved parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedParameters {
    pub estimator: String,
    pub model: String,
    pub target: Target,
    pub schema: FeatureSchema,
    pub fits: usize,
    pub parameters: serde_json::Value,
}

pub struct Estimator {
    name: String,
    schema: FeatureSchema,
    target: Target,
    mode: EstimatorMode,
    policy: BufferPolicy,
    model: Box<dyn Model>,
    baseline: Option<Baseline>,
    /// Examples accumulated since the last successful fit
    pending: Vec<Example>,
    /// Examples already folded into a fit (kept for `Append`)
    history: Vec<Example>,
    /// Directory for saved parameters; `None` disables persistence
    output_dir: Option<PathBuf>,
    fits: usize,
}

impl fmt::Debug for Estimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Estimator")
            .field("name", &self.name)
            .field("model", &self.model.kind())
            .field("mode", &self.mode)
            .field("trained", &self.model.is_trained())
            .field("has_baseline", &self.baseline.is_some())
            .field("pending", &self.pending.len())
            .field("history", &self.history.len())
            .finish()
    }
}

impl Estimator {
    pub fn new(name: &str, schema: FeatureSchema, target: Target, model: Box<dyn Model>) -> Self {
        Self {
            name: name.to_string(),
            schema,
            target,
            mode: EstimatorMode::default(),
            policy: BufferPolicy::default(),
            model,
            baseline: None,
            pending: Vec::new(),
            history: Vec::new(),
            output_dir: None,
            fits: 0,
        }
    }

    pub fn with_mode(mut self, mode: EstimatorMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn set_mode(&mut self, mode: EstimatorMode) {
        self.mode = mode;
    }

    pub fn with_policy(mut self, policy: BufferPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Install a deterministic fallback usable before any training.
    pub fn with_baseline<F>(mut self, baseline: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + 'static,
    {
        self.baseline = Some(Box::new(baseline));
        self
    }

    /// Persist parameters under `dir/<name>/` at iteration boundaries.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn mode(&self) -> EstimatorMode {
        self.mode
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_trained()
    }

    pub fn pending_examples(&self) -> usize {
        self.pending.len()
    }

    pub fn total_examples(&self) -> usize {
        self.pending.len() + self.history.len()
    }

    pub fn encode(&self, values: &[FeatureValue]) -> std::result::Result<Vec<f64>, FeatureError> {
        self.schema.encode(values)
    }

    /// Predict from encoded features. `None` means the prediction is
    /// unavailable and callers must apply their declared default.
    pub fn predict(&self, features: &[f64]) -> Option<f64> {
        let raw = match self.mode {
            EstimatorMode::Reactive => None,
            EstimatorMode::Baseline => self.baseline.as_ref().map(|b| b(features)),
            EstimatorMode::Predictive => {
                if self.model.is_trained() {
                    self.model.predict(features)
                } else {
                    self.baseline.as_ref().map(|b| b(features))
                }
            }
        };
        raw.filter(|v| v.is_finite()).map(|v| self.target.transform(v))
    }

    /// Predict from raw values, encoding them with the declared schema.
    pub fn predict_values(
        &self,
        values: &[FeatureValue],
    ) -> std::result::Result<Option<f64>, FeatureError> {
        Ok(self.predict(&self.encode(values)?))
    }

    /// Predictions in input order, one per record.
    pub fn predict_batch(&self, batch: &[Vec<f64>]) -> Vec<Option<f64>> {
        batch.iter().map(|f| self.predict(f)).collect()
    }

    /// Append a supervised example. Live parameters are not touched.
    pub fn accumulate(&mut self, features: Vec<f64>, label: f64) {
        self.pending.push(Example { features, label });
    }

    /// Fit the model on the buffered examples.
    ///
    /// The pending buffer is cleared only after a successful fit. On failure
    /// the previous parameters stay in force and the buffer is retained for
    /// the next attempt.
    pub fn retrain(&mut self) -> TrainingOutcome {
        let training_set: Vec<Example> = match self.policy {
            BufferPolicy::Append => self
                .history
                .iter()
                .chain(self.pending.iter())
                .cloned()
                .collect(),
            BufferPolicy::Replace => self.pending.clone(),
        };

        if training_set.is_empty() {
            debug!(estimator = %self.name, "No examples, skipping retrain");
            return TrainingOutcome::Skipped;
        }

        match self.model.fit(&training_set) {
            Ok(report) => {
                self.fits += 1;
                match self.policy {
                    BufferPolicy::Append => self.history.append(&mut self.pending),
                    BufferPolicy::Replace => self.history = std::mem::take(&mut self.pending),
                }
                info!(
                    estimator = %self.name,
                    samples = report.samples,
                    mse = report.mse,
                    fits = self.fits,
                    "Estimator retrained"
                );
                TrainingOutcome::Trained(report)
            }
            Err(e) => {
                warn!(
                    estimator = %self.name,
                    error = %e,
                    pending = self.pending.len(),
                    "Retrain failed, keeping previous parameters"
                );
                TrainingOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Write current parameters to `<output_dir>/<name>/<tag>.json`.
    ///
    /// Returns `Ok(None)` when no output directory is configured.
    pub fn save_parameters(&self, tag: &str) -> Result<Option<PathBuf>> {
        let Some(root) = self.output_dir.as_ref() else {
            return Ok(None);
        };
        let dir = root.join(&self.name);
        std::fs::create_dir_all(&dir).map_err(|source| KernelError::Persistence {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("{tag}.json"));
        let saved = SavedParameters {
            estimator: self.name.clone(),
            model: self.model.kind().to_string(),
            target: self.target,
            schema: self.schema.clone(),
            fits: self.fits,
            parameters: self.model.parameters(),
        };
        let json = serde_json::to_string_pretty(&saved)?;
        std::fs::write(&path, json).map_err(|source| KernelError::Persistence {
            path: path.clone(),
            source,
        })?;
        debug!(estimator = %self.name, path = %path.display(), "Saved parameters");
        Ok(Some(path))
    }

    /// Continue from parameters saved by an earlier run.
    pub fn load_parameters(&mut self, path: &Path) -> Result<()> {
        let json = std::fs::read_to_string(path).map_err(|source| KernelError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
        let saved: SavedParameters = serde_json::from_str(&json)?;
        if saved.schema != self.schema {
            return Err(crate::error::ConfigurationError::SchemaMismatch {
                estimator: self.name.clone(),
            }
            .into());
        }
        self.model.load_parameters(saved.parameters)?;
        self.fits = saved.fits;
        info!(estimator = %self.name, path = %path.display(), "Loaded parameters");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;
    use crate::ridge::RidgeModel;

    fn estimator() -> Estimator {
        Estimator::new(
            "ttf",
            FeatureSchema::new().numeric("rate", 0.0, 1.0),
            Target::TimeToEvent,
            Box::new(RidgeModel::new(1e-6)),
        )
    }

    /// Model whose fit always fails.
    struct Broken;

    impl Model for Broken {
        fn kind(&self) -> &'static str {
            "broken"
        }
        fn is_trained(&self) -> bool {
            false
        }
        fn predict(&self, _features: &[f64]) -> Option<f64> {
            None
        }
        fn fit(&mut self, _examples: &[Example]) -> std::result::Result<FitReport, TrainingError> {
            Err(TrainingError::Diverged)
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
        fn load_parameters(&mut self, _value: serde_json::Value) -> std::result::Result<(), serde_json::Error> {
            Ok(())
        }
    }

    #[test]
    fn test_untrained_without_baseline_is_unavailable() {
        let est = estimator();
        assert_eq!(est.predict(&[0.2]), None);
    }

    #[test]
    fn test_baseline_used_until_trained() {
        let mut est = estimator().with_baseline(|_| 42.0);
        assert_eq!(est.predict(&[0.2]), Some(42.0));

        est.accumulate(vec![0.0], 100.0);
        est.accumulate(vec![1.0], 0.0);
        assert!(matches!(est.retrain(), TrainingOutcome::Trained(_)));

        let p = est.predict(&[0.5]).unwrap();
        assert!((p - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_modes_select_exclusively() {
        let mut est = estimator().with_baseline(|_| 7.0);
        est.accumulate(vec![0.0], 100.0);
        est.accumulate(vec![1.0], 0.0);
        est.retrain();

        let est = est.with_mode(EstimatorMode::Baseline);
        assert_eq!(est.predict(&[0.5]), Some(7.0));
        let est = est.with_mode(EstimatorMode::Reactive);
        assert_eq!(est.predict(&[0.5]), None);
    }

    #[test]
    fn test_target_transform_clamps() {
        let est = Estimator::new(
            "late",
            FeatureSchema::new().numeric("t", 0.0, 1.0),
            Target::Probability,
            Box::new(RidgeModel::default()),
        )
        .with_baseline(|x| x[0] * 3.0);
        assert_eq!(est.predict(&[1.0]), Some(1.0));

        let est = estimator().with_baseline(|_| -5.0);
        assert_eq!(est.predict(&[0.0]), Some(0.0));
    }

    #[test]
    fn test_accumulate_does_not_change_predictions() {
        let mut est = estimator();
        est.accumulate(vec![0.0], 10.0);
        est.accumulate(vec![1.0], 0.0);
        est.retrain();
        let before = est.predict(&[0.3]);

        est.accumulate(vec![0.3], 1000.0);
        assert_eq!(est.predict(&[0.3]), before);
        assert_eq!(est.pending_examples(), 1);
    }

    #[test]
    fn test_retrain_clears_buffer_on_success() {
        let mut est = estimator();
        assert_eq!(est.retrain(), TrainingOutcome::Skipped);

        est.accumulate(vec![0.0], 10.0);
        est.accumulate(vec![1.0], 0.0);
        assert!(matches!(est.retrain(), TrainingOutcome::Trained(_)));
        assert_eq!(est.pending_examples(), 0);
        assert_eq!(est.total_examples(), 2);
    }

    #[test]
    fn test_replace_policy_forgets_history() {
        let mut est = estimator().with_policy(BufferPolicy::Replace);
        est.accumulate(vec![0.0], 10.0);
        est.accumulate(vec![1.0], 0.0);
        est.retrain();
        est.accumulate(vec![0.5], 3.0);
        match est.retrain() {
            TrainingOutcome::Trained(report) => assert_eq!(report.samples, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(est.total_examples(), 1);
    }

    #[test]
    fn test_failed_retrain_retains_buffer() {
        let mut est = Estimator::new(
            "broken",
            FeatureSchema::new().numeric("x", 0.0, 1.0),
            Target::Value,
            Box::new(Broken),
        );
        est.accumulate(vec![0.5], 1.0);
        assert!(matches!(est.retrain(), TrainingOutcome::Failed { .. }));
        assert_eq!(est.pending_examples(), 1);
    }

    #[test]
    fn test_predict_batch_preserves_order() {
        let mut est = estimator();
        est.accumulate(vec![0.0], 10.0);
        est.accumulate(vec![1.0], 0.0);
        est.retrain();
        let out = est.predict_batch(&[vec![1.0], vec![0.0], vec![0.5]]);
        assert_eq!(out.len(), 3);
        assert!(out[0].unwrap() < out[2].unwrap());
        assert!(out[2].unwrap() < out[1].unwrap());
    }

    #[test]
    fn test_save_and_load_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut est = estimator().with_output_dir(dir.path());
        est.accumulate(vec![0.0], 10.0);
        est.accumulate(vec![1.0], 0.0);
        est.retrain();

        let path = est.save_parameters("1").unwrap().unwrap();
        assert!(path.ends_with("ttf/1.json"));

        let mut restored = estimator();
        restored.load_parameters(&path).unwrap();
        assert!(restored.is_trained());
        assert_eq!(restored.predict(&[0.25]), est.predict(&[0.25]));
    }

    #[test]
    fn test_load_rejects_parameters_of_another_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut est = estimator().with_output_dir(dir.path());
        est.accumulate(vec![0.0], 10.0);
        est.accumulate(vec![1.0], 0.0);
        est.retrain();
        let path = est.save_parameters("1").unwrap().unwrap();

        // Same width, different feature.
        let mut other = Estimator::new(
            "ttf",
            FeatureSchema::new().numeric("load", 0.0, 1.0),
            Target::TimeToEvent,
            Box::new(RidgeModel::new(1e-6)),
        );
        let err = other.load_parameters(&path).unwrap_err();
        assert!(matches!(
            err,
            KernelError::Configuration(ConfigurationError::SchemaMismatch { ref estimator }) if estimator == "ttf"
        ));
        assert!(!other.is_trained());
    }

    #[test]
    fn test_save_without_output_dir_is_noop() {
        let est = estimator();
        assert!(est.save_parameters("0").unwrap().is_none());
    }
}
