//! The `time_to_failure` estimate: features, baseline and label rule.

use std::path::PathBuf;

use ensemble_kernel::{
    Estimator, EstimatorMode, FeatureRecord, FeatureSchema, FeatureValue, RidgeModel, Target,
    TimeToEvent,
};

use crate::config::{MachineConfig, PlantConfig};
use crate::machine::{Machine, Plant};

/// Name shared by the estimator and the estimate.
pub const TIME_TO_FAILURE: &str = "time_to_failure";

/// Rates below this are indistinguishable to the log feature.
const RATE_FLOOR: f64 = 1e-4;

pub fn schema() -> FeatureSchema {
    FeatureSchema::new()
        .numeric("failure_rate", 0.0, 1.0)
        .log("failure_rate_log", RATE_FLOOR)
}

/// Raw inputs for a machine. Only running machines without a scheduled
/// repair are worth predicting for.
pub fn inputs(_plant: &Plant, machine: &Machine) -> Option<Vec<FeatureValue>> {
    if !machine.is_running() || machine.maintenance_pending() {
        return None;
    }
    let rate = machine.failure_rate();
    Some(vec![rate.into(), rate.into()])
}

/// Time-to-failure read off the noise-free rate curve, from the encoded
/// log feature.
pub fn baseline(plant: &PlantConfig, margin: f64) -> impl Fn(&[f64]) -> f64 + 'static {
    let plant = plant.clone();
    move |features: &[f64]| {
        let rate = features.get(1).copied().unwrap_or(RATE_FLOOR.ln()).exp();
        plant.failing_age() - plant.age_at_rate(rate) - margin
    }
}

/// Build the estimator for the configured mode.
///
/// Only baseline mode installs the closed-form baseline, so a predictive
/// run without a trained model behaves reactively.
pub fn estimator(config: &MachineConfig, output_dir: Option<PathBuf>) -> Estimator {
    let mut estimator = Estimator::new(
        TIME_TO_FAILURE,
        schema(),
        Target::TimeToEvent,
        Box::new(RidgeModel::new(config.ridge_lambda)),
    )
    .with_mode(config.mode);
    if config.mode == EstimatorMode::Baseline {
        estimator = estimator.with_baseline(baseline(&config.plant, config.baseline_margin));
    }
    if let Some(dir) = output_dir {
        estimator = estimator.with_output_dir(dir);
    }
    estimator
}

/// Label: steps until the machine is seen failed. A repair after the record
/// means the failure it predicted can no longer happen.
pub fn label_rule() -> TimeToEvent<Plant> {
    TimeToEvent::new(|machine: &Machine| machine.is_failed()).invalidated_when(
        |machine: &Machine, record: &FeatureRecord| {
            machine
                .last_repair_step()
                .is_some_and(|repaired| repaired > record.key.step)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_counts_down_to_failure() {
        let plant = PlantConfig::default();
        let b = baseline(&plant, 0.0);
        let encoded = schema()
            .encode(&[plant.mean_failure_rate(71).into(), plant.mean_failure_rate(71).into()])
            .unwrap();
        assert!((b(&encoded) - 30.0).abs() < 1e-6);

        let b = baseline(&plant, 5.0);
        assert!((b(&encoded) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_inputs_skip_stopped_and_pending_machines() {
        let plant = Plant::new(PlantConfig::default());
        let mut machine = Machine::new(0, 30);
        assert!(inputs(&plant, &machine).is_some());
        machine.call_maintenance(0, true);
        assert!(inputs(&plant, &machine).is_none());
    }

    #[test]
    fn test_modes() {
        let features = schema().encode(&[0.1.into(), 0.1.into()]).unwrap();

        let config = MachineConfig {
            mode: EstimatorMode::Baseline,
            ..MachineConfig::default()
        };
        assert!(estimator(&config, None).predict(&features).is_some());

        let config = MachineConfig::default();
        assert_eq!(estimator(&config, None).predict(&features), None);
    }
}
