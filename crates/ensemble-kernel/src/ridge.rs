//! Ridge regression: closed-form linear model used as the default estimator.
//!
//! Given feature matrix `X` (N × D) and targets `y` (N):
//!
//! `w = (Zᵀ·Z + λI)⁻¹ · Zᵀ·(y - ȳ)` where `Z = (X - μ) / σ`
//!
//! Solved via Cholesky decomposition. The normalization is folded back into
//! the weights so predictions work on raw encoded features.

use serde::{Deserialize, Serialize};

use crate::error::TrainingError;
use crate::estimator::{Example, FitReport, Model};

/// Learned parameters of a [`RidgeModel`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RidgeParameters {
    pub weights: Vec<f64>,
    pub bias: f64,
}

#[derive(Debug, Clone)]
pub struct RidgeModel {
    /// Regularization strength (λ)
    lambda: f64,
    params: Option<RidgeParameters>,
}

impl RidgeModel {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda: lambda.max(1e-12),
            params: None,
        }
    }

    pub fn parameters_ref(&self) -> Option<&RidgeParameters> {
        self.params.as_ref()
    }
}

impl Default for RidgeModel {
    fn default() -> Self {
        Self::new(1e-3)
    }
}

impl Model for RidgeModel {
    fn kind(&self) -> &'static str {
        "ridge"
    }

    fn is_trained(&self) -> bool {
        self.params.is_some()
    }

    fn predict(&self, features: &[f64]) -> Option<f64> {
        let params = self.params.as_ref()?;
        if params.weights.len() != features.len() {
            return None;
        }
        let dot: f64 = params
            .weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum();
        Some(dot + params.bias)
    }

    fn fit(&mut self, examples: &[Example]) -> Result<FitReport, TrainingError> {
        let params = fit_ridge(examples, self.lambda)?;

        let mse = examples
            .iter()
            .map(|e| {
                let dot: f64 = params
                    .weights
                    .iter()
                    .zip(&e.features)
                    .map(|(w, x)| w * x)
                    .sum();
                (dot + params.bias - e.label).powi(2)
            })
            .sum::<f64>()
            / examples.len() as f64;

        self.params = Some(params);
        Ok(FitReport {
            samples: examples.len(),
            mse,
        })
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "lambda": self.lambda,
            "params": self.params,
        })
    }

    fn load_parameters(&mut self, value: serde_json::Value) -> Result<(), serde_json::Error> {
        #[derive(Deserialize)]
        struct Stored {
            lambda: f64,
            params: Option<RidgeParameters>,
        }
        let stored: Stored = serde_json::from_value(value)?;
        self.lambda = stored.lambda;
        self.params = stored.params;
        Ok(())
    }
}

/// Fit ridge parameters. Does not touch any model state, so a failed fit
/// leaves the caller's previous parameters in force.
pub fn fit_ridge(examples: &[Example], lambda: f64) -> Result<RidgeParameters, TrainingError> {
    let first = examples.first().ok_or(TrainingError::Empty)?;
    let d = first.features.len();
    if let Some(bad) = examples.iter().find(|e| e.features.len() != d) {
        return Err(TrainingError::Arity {
            expected: d,
            got: bad.features.len(),
        });
    }

    let n = examples.len() as f64;

    let mut mean = vec![0.0f64; d];
    let mut y_mean = 0.0f64;
    for e in examples {
        for (m, x) in mean.iter_mut().zip(&e.features) {
            *m += x;
        }
        y_mean += e.label;
    }
    for m in &mut mean {
        *m /= n;
    }
    y_mean /= n;

    // Per-column standard deviation; constant columns (unused one-hot
    // categories) get a tiny floor so they contribute zero weight.
    let mut std = vec![0.0f64; d];
    for e in examples {
        for j in 0..d {
            let diff = e.features[j] - mean[j];
            std[j] += diff * diff;
        }
    }
    for s in &mut std {
        *s = (*s / n).sqrt().max(1e-10);
    }

    let mut ztz = vec![0.0f64; d * d];
    let mut zty = vec![0.0f64; d];
    for e in examples {
        let y = e.label - y_mean;
        for a in 0..d {
            let za = (e.features[a] - mean[a]) / std[a];
            for b in a..d {
                let zb = (e.features[b] - mean[b]) / std[b];
                ztz[a * d + b] += za * zb;
            }
            zty[a] += za * y;
        }
    }
    for a in 0..d {
        for b in (a + 1)..d {
            ztz[b * d + a] = ztz[a * d + b];
        }
        ztz[a * d + a] += lambda;
    }

    let w_norm = cholesky_solve(&ztz, &zty, d);

    let weights: Vec<f64> = w_norm.iter().zip(&std).map(|(w, s)| w / s).collect();
    let bias = y_mean - weights.iter().zip(&mean).map(|(w, m)| w * m).sum::<f64>();

    if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
        return Err(TrainingError::Diverged);
    }

    Ok(RidgeParameters { weights, bias })
}

/// Solve `A·x = b` for symmetric positive-definite `A` (d × d, row-major).
fn cholesky_solve(a: &[f64], b: &[f64], d: usize) -> Vec<f64> {
    let mut l = vec![0.0f64; d * d];
    for i in 0..d {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|p| l[i * d + p] * l[j * d + p]).sum();
            if i == j {
                let val = a[i * d + i] - sum;
                l[i * d + j] = if val > 0.0 { val.sqrt() } else { 1e-10 };
            } else {
                l[i * d + j] = (a[i * d + j] - sum) / l[j * d + j];
            }
        }
    }

    // Forward substitution: L·y = b
    let mut y = vec![0.0f64; d];
    for i in 0..d {
        let sum: f64 = (0..i).map(|j| l[i * d + j] * y[j]).sum();
        y[i] = (b[i] - sum) / l[i * d + i];
    }

    // Back substitution: Lᵀ·x = y
    let mut x = vec![0.0f64; d];
    for i in (0..d).rev() {
        let sum: f64 = ((i + 1)..d).map(|j| l[j * d + i] * x[j]).sum();
        x[i] = (y[i] - sum) / l[i * d + i];
    }
    x
}
