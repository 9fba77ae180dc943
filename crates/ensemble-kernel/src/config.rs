//! Configuration types for the kernel.

use serde::{Deserialize, Serialize};

/// Top-level kernel configuration.
///
/// Immutable once the kernel is built. Loaded from JSON at runtime or
/// taken from `Default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Steps a feature record may wait for its label before it is
    /// discarded, unless the estimate declares its own horizon
    pub label_horizon: usize,

    /// Upper bound on buffered records per estimate
    pub max_buffered_records: usize,

    /// Log every admission at DEBUG instead of TRACE
    pub trace_admissions: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            label_horizon: 500,
            max_buffered_records: 100_000,
            trace_admissions: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: KernelConfig = serde_json::from_str(r#"{ "label_horizon": 60 }"#).unwrap();
        assert_eq!(config.label_horizon, 60);
        assert_eq!(config.max_buffered_records, 100_000);
        assert!(!config.trace_admissions);
    }
}
