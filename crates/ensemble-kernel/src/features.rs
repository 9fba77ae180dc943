//! Feature declarations and encoding.
//!
//! A [`FeatureSchema`] fixes the order and encoding of an estimator's inputs,
//! so the same logical feature encodes identically at prediction time and at
//! training time:
//! - `Numeric`: `(x - min) / (max - min)` (1 column)
//! - `Log`: `ln(max(x, floor))` (1 column)
//! - `Categorical`: one-hot over the declared categories (N columns)

use serde::{Deserialize, Serialize};

use crate::error::FeatureError;

/// A single declared input feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Feature {
    Numeric { name: String, min: f64, max: f64 },
    Log { name: String, floor: f64 },
    Categorical { name: String, categories: Vec<String> },
}

impl Feature {
    pub fn name(&self) -> &str {
        match self {
            Self::Numeric { name, .. } | Self::Log { name, .. } | Self::Categorical { name, .. } => {
                name
            }
        }
    }

    /// Number of encoded columns.
    pub fn width(&self) -> usize {
        match self {
            Self::Numeric { .. } | Self::Log { .. } => 1,
            Self::Categorical { categories, .. } => categories.len(),
        }
    }

    fn encode_into(&self, value: &FeatureValue, out: &mut Vec<f64>) -> Result<(), FeatureError> {
        match (self, value) {
            (Self::Numeric { name, min, max }, FeatureValue::Number(x)) => {
                check_finite(name, *x)?;
                let span = max - min;
                out.push(if span.abs() > f64::EPSILON {
                    (x - min) / span
                } else {
                    0.0
                });
                Ok(())
            }
            (Self::Log { name, floor }, FeatureValue::Number(x)) => {
                check_finite(name, *x)?;
                out.push(x.max(*floor).ln());
                Ok(())
            }
            (Self::Categorical { name, categories }, FeatureValue::Category(c)) => {
                let idx = categories.iter().position(|k| k == c).ok_or_else(|| {
                    FeatureError::UnknownCategory {
                        feature: name.clone(),
                        category: c.clone(),
                    }
                })?;
                out.extend((0..categories.len()).map(|i| if i == idx { 1.0 } else { 0.0 }));
                Ok(())
            }
            (Self::Categorical { name, .. }, FeatureValue::Number(_)) => {
                Err(FeatureError::ExpectedCategory {
                    feature: name.clone(),
                })
            }
            (Self::Numeric { name, .. } | Self::Log { name, .. }, FeatureValue::Category(_)) => {
                Err(FeatureError::ExpectedNumber {
                    feature: name.clone(),
                })
            }
        }
    }
}

fn check_finite(name: &str, x: f64) -> Result<(), FeatureError> {
    if x.is_finite() {
        Ok(())
    } else {
        Err(FeatureError::NonFinite {
            feature: name.to_string(),
        })
    }
}

/// A raw, unencoded feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::Category(value.to_string())
    }
}

/// Ordered list of features an estimator consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    features: Vec<Feature>,
}

impl FeatureSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn numeric(mut self, name: &str, min: f64, max: f64) -> Self {
        self.features.push(Feature::Numeric {
            name: name.to_string(),
            min,
            max,
        });
        self
    }

    pub fn log(mut self, name: &str, floor: f64) -> Self {
        self.features.push(Feature::Log {
            name: name.to_string(),
            floor,
        });
        self
    }

    pub fn categorical<S: AsRef<str>>(mut self, name: &str, categories: &[S]) -> Self {
        self.features.push(Feature::Categorical {
            name: name.to_string(),
            categories: categories.iter().map(|c| c.as_ref().to_string()).collect(),
        });
        self
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Number of raw values expected by [`encode`](Self::encode).
    pub fn arity(&self) -> usize {
        self.features.len()
    }

    /// Total encoded width.
    pub fn width(&self) -> usize {
        self.features.iter().map(Feature::width).sum()
    }

    /// Encode raw values into the fixed-order numeric vector.
    pub fn encode(&self, values: &[FeatureValue]) -> Result<Vec<f64>, FeatureError> {
        if values.len() != self.features.len() {
            return Err(FeatureError::Arity {
                expected: self.features.len(),
                got: values.len(),
            });
        }
        let mut out = Vec::with_capacity(self.width());
        for (feature, value) in self.features.iter().zip(values) {
            feature.encode_into(value, &mut out)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

    #[test]
    fn test_numeric_and_categorical_encoding() {
        let schema = FeatureSchema::new()
            .numeric("time_to_shift", 0.0, 50.0)
            .categorical("day", &DAYS);
        assert_eq!(schema.width(), 8);

        let encoded = schema
            .encode(&[FeatureValue::Number(25.0), FeatureValue::from("wed")])
            .unwrap();
        assert_eq!(encoded, vec![0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_log_feature_respects_floor() {
        let schema = FeatureSchema::new().log("rate", 1e-3);
        let at_zero = schema.encode(&[FeatureValue::Number(0.0)]).unwrap();
        assert!((at_zero[0] - (1e-3f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_encoding_is_stable() {
        let schema = FeatureSchema::new()
            .numeric("rate", 0.0, 1.0)
            .categorical("day", &DAYS);
        let values = [FeatureValue::Number(0.3), FeatureValue::from("sun")];
        assert_eq!(schema.encode(&values), schema.encode(&values));
    }

    #[test]
    fn test_encoding_errors() {
        let schema = FeatureSchema::new()
            .numeric("rate", 0.0, 1.0)
            .categorical("day", &DAYS);

        assert_eq!(
            schema.encode(&[FeatureValue::Number(0.3)]),
            Err(FeatureError::Arity {
                expected: 2,
                got: 1
            })
        );
        assert!(matches!(
            schema.encode(&[FeatureValue::Number(0.3), FeatureValue::from("holiday")]),
            Err(FeatureError::UnknownCategory { .. })
        ));
        assert!(matches!(
            schema.encode(&[FeatureValue::from("mon"), FeatureValue::from("mon")]),
            Err(FeatureError::ExpectedNumber { .. })
        ));
        assert!(matches!(
            schema.encode(&[FeatureValue::Number(f64::NAN), FeatureValue::from("mon")]),
            Err(FeatureError::NonFinite { .. })
        ));
    }
}
