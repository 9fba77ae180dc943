//! The `late_workers` estimate: probability that an assigned worker who has
//! not reached the gate yet still makes it by the shift start.

use std::path::PathBuf;

use ensemble_kernel::{
    Closure, Estimator, EstimatorMode, FeatureRecord, FeatureSchema, FeatureValue, LabelRule,
    RidgeModel, Step, Target,
};

use crate::config::{DayOfWeek, FactoryConfig};
use crate::factory::Factory;
use crate::worker::{Assignment, Worker};

pub const LATE_WORKERS: &str = "late_workers";

pub fn schema(shift_start: Step) -> FeatureSchema {
    let days: Vec<&str> = DayOfWeek::ALL.iter().map(|d| d.name()).collect();
    FeatureSchema::new()
        .numeric("time_to_shift", 0.0, shift_start as f64)
        .categorical("day_of_week", &days)
}

/// Raw inputs, valid only for assigned, uncancelled workers still on their
/// way before the shift starts.
pub fn inputs(factory: &Factory, worker: &Worker) -> Option<Vec<FeatureValue>> {
    if worker.assignment() != Assignment::Assigned || worker.is_cancelled() || worker.is_at_factory() {
        return None;
    }
    let shift = factory.shift(worker.shift())?;
    if factory.now() >= shift.start {
        return None;
    }
    let time_to_shift = (shift.start - factory.now()) as f64;
    Some(vec![time_to_shift.into(), factory.day().name().into()])
}

/// Rigid rule: anybody still missing `minutes` steps before the shift
/// start will not make it.
pub fn baseline(shift_start: Step, minutes: Step) -> impl Fn(&[f64]) -> f64 + 'static {
    let span = shift_start as f64;
    let minutes = minutes as f64;
    move |features: &[f64]| {
        let time_to_shift = features.first().copied().unwrap_or(0.0) * span;
        if time_to_shift <= minutes + 1e-6 {
            0.0
        } else {
            1.0
        }
    }
}

pub fn estimator(config: &FactoryConfig, output_dir: Option<PathBuf>) -> Estimator {
    let start = config.shifts.shift_start;
    let mut estimator = Estimator::new(
        LATE_WORKERS,
        schema(start),
        Target::Probability,
        Box::new(RidgeModel::new(config.ridge_lambda)),
    )
    .with_mode(config.mode);
    if config.mode == EstimatorMode::Baseline {
        estimator = estimator.with_baseline(baseline(start, config.cancellation_baseline));
    }
    if let Some(dir) = output_dir {
        estimator = estimator.with_output_dir(dir);
    }
    estimator
}

/// Label 1 for reaching the gate by the shift start, 0 otherwise. Known as
/// soon as the worker reaches the gate or the shift has started without
/// them. A shift ending with the worker still away is a 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrivalByShiftStart;

impl ArrivalByShiftStart {
    fn shift_start(factory: &Factory, record: &FeatureRecord) -> Option<Step> {
        factory.shift(record.key.context).map(|s| s.start)
    }
}

impl LabelRule<Factory> for ArrivalByShiftStart {
    fn decidable(&self, factory: &Factory, worker: &Worker, record: &FeatureRecord, step: Step) -> bool {
        worker.is_at_factory() || Self::shift_start(factory, record).is_some_and(|start| step > start)
    }

    fn label(&self, factory: &Factory, worker: &Worker, record: &FeatureRecord, _step: Step) -> f64 {
        let on_time = match (worker.arrived_at_factory(), Self::shift_start(factory, record)) {
            (Some(arrived), Some(start)) => arrived <= start,
            _ => false,
        };
        if on_time {
            1.0
        } else {
            0.0
        }
    }

    fn on_window_closed(&self, _record: &FeatureRecord) -> Closure {
        Closure::Label(0.0)
    }
}
