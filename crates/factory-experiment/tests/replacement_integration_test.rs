//! Late-worker replacement through the kernel.
//!
//! Covers:
//! - Cancelling a missing worker at the baseline cutoff and calling one standby
//! - A shortfall when no standby is left, with the cancellations kept
//! - Team invariants over generated factories
//! - Gate access for stragglers after the shift ends
//! - Full runs in baseline and predictive mode, with their worker logs

use std::collections::BTreeSet;

use ensemble_kernel::{
    Agent, EstimatorMode, ExperimentConfig, Kernel, KernelBuilder, KernelConfig, Step, StepRecord,
    TrainingOutcome, World,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use factory_experiment::ensembles::{
    shift_contexts, ACCESS_TO_DISPENSER, ACCESS_TO_FACTORY, CANCEL_LATE_WORKERS, LATE_ROLE,
    REPLACE_LATE_WORKERS, STANDBY_ROLE,
};
use factory_experiment::estimate::{self, ArrivalByShiftStart, LATE_WORKERS};
use factory_experiment::worker::Phase;
use factory_experiment::{run_experiment, DayOfWeek, Factory, FactoryConfig, OutputPaths, ShiftConfig};

fn config(mode: EstimatorMode, iterations: usize) -> FactoryConfig {
    FactoryConfig {
        experiment: ExperimentConfig {
            iterations,
            simulations: 7,
            steps: 50,
            seed: 42,
        },
        mode,
        ..FactoryConfig::default()
    }
}

fn kernel(config: &FactoryConfig) -> Kernel<Factory> {
    KernelBuilder::new(KernelConfig::default())
        .add_estimator(estimate::estimator(config, None))
        .add_estimate(LATE_WORKERS, LATE_WORKERS, ArrivalByShiftStart)
        .build()
        .unwrap()
}

fn run_step(factory: &mut Factory, kernel: &mut Kernel<Factory>, step: Step) -> StepRecord {
    factory.advance(step);
    kernel.prepare_step(factory, step);
    kernel.actuate_step(factory, step).unwrap()
}

/// Run steps `0..=last`, returning the record of the last one.
fn run_until(factory: &mut Factory, kernel: &mut Kernel<Factory>, last: Step) -> StepRecord {
    for step in 0..last {
        run_step(factory, kernel, step);
    }
    run_step(factory, kernel, last)
}

/// Run steps `first..=last`, returning the record of the last one.
fn run_until_from(
    factory: &mut Factory,
    kernel: &mut Kernel<Factory>,
    first: Step,
    last: Step,
) -> StepRecord {
    for step in first..last {
        run_step(factory, kernel, step);
    }
    run_step(factory, kernel, last)
}

fn assert_team_invariants(factory: &Factory) {
    for shift in factory.shifts() {
        let allowed: BTreeSet<_> = shift.assigned.union(&shift.called_standbys).copied().collect();
        assert!(shift.current_members.is_subset(&allowed), "shift {}", shift.id);
        assert!(shift.current_members.is_disjoint(&shift.cancelled), "shift {}", shift.id);
        assert!(shift.called_standbys.is_subset(&shift.standbys), "shift {}", shift.id);
    }
}

#[test]
fn test_late_worker_replaced_by_one_standby() {
    let config = config(EstimatorMode::Baseline, 1);
    let mut kernel = kernel(&config);
    let mut factory = Factory::new(ShiftConfig::default(), DayOfWeek::Monday);
    // Workers 0 and 1 come by the bus at 5, worker 2 at 40; standbys 3 and 4.
    let shift = factory.add_shift(&[5, 5, 40], 2).unwrap();
    let contexts = shift_contexts(&factory, config.cancel_below);
    kernel.begin_simulation(&factory, contexts).unwrap();

    let record = run_until(&mut factory, &mut kernel, 13);
    assert!(factory.shift(shift).unwrap().cancelled.is_empty());
    assert_eq!(record.admitted(CANCEL_LATE_WORKERS, shift, LATE_ROLE), Some(&[][..]));

    // Sixteen steps before the start.
    let record = run_step(&mut factory, &mut kernel, 14);
    assert_eq!(record.admitted(CANCEL_LATE_WORKERS, shift, LATE_ROLE), Some(&[2][..]));
    assert_eq!(record.admitted(REPLACE_LATE_WORKERS, shift, STANDBY_ROLE), Some(&[3][..]));

    let s = factory.shift(shift).unwrap();
    assert_eq!(s.cancelled, BTreeSet::from([2]));
    assert_eq!(s.called_standbys, BTreeSet::from([3]));
    assert_eq!(s.current_members, BTreeSet::from([0, 1, 3]));
    assert!(factory.agent(2).unwrap().is_cancelled());
    assert!(factory.agent(3).unwrap().is_called());
    assert_eq!(factory.agent(3).unwrap().bus_arrival(), Some(14 + factory.config().standby_delay));
    assert_team_invariants(&factory);

    // Nothing left to cancel or replace.
    let record = run_step(&mut factory, &mut kernel, 15);
    assert!(!record.actuated(CANCEL_LATE_WORKERS, shift));
    assert!(!record.actuated(REPLACE_LATE_WORKERS, shift));
    assert_eq!(factory.shift(shift).unwrap().called_standbys.len(), 1);
}

#[test]
fn test_shortfall_without_standbys() {
    let config = config(EstimatorMode::Baseline, 1);
    let mut kernel = kernel(&config);
    let mut factory = Factory::new(ShiftConfig::default(), DayOfWeek::Tuesday);
    let shift = factory.add_shift(&[40, 40, 5], 0).unwrap();
    let contexts = shift_contexts(&factory, config.cancel_below);
    kernel.begin_simulation(&factory, contexts).unwrap();

    let record = run_until(&mut factory, &mut kernel, 14);

    assert_eq!(record.admitted(CANCEL_LATE_WORKERS, shift, LATE_ROLE), Some(&[0, 1][..]));
    let shortfalls: Vec<_> = record.shortfalls().collect();
    assert_eq!(shortfalls.len(), 1);
    let (unit, shortfall) = shortfalls[0];
    assert_eq!(unit.unit, REPLACE_LATE_WORKERS);
    assert_eq!(unit.context, shift);
    assert_eq!(shortfall.role, STANDBY_ROLE);
    assert_eq!(shortfall.eligible, 0);
    assert_eq!(shortfall.min, 1);

    let s = factory.shift(shift).unwrap();
    assert_eq!(s.cancelled, BTreeSet::from([0, 1]));
    assert!(s.called_standbys.is_empty());
    assert_eq!(s.current_members, BTreeSet::from([2]));
}

#[test]
fn test_team_invariants_hold_every_step() {
    let config = config(EstimatorMode::Baseline, 1);
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for day in DayOfWeek::ALL {
        let mut kernel = kernel(&config);
        let mut factory = Factory::generate(config.shifts.clone(), day, &mut rng).unwrap();
        let contexts = shift_contexts(&factory, config.cancel_below);
        kernel.begin_simulation(&factory, contexts).unwrap();

        for step in 0..config.experiment.steps {
            run_step(&mut factory, &mut kernel, step);
            assert_team_invariants(&factory);
        }
        kernel.end_simulation(&factory, config.experiment.steps);

        for worker in factory.workers().iter().filter(|w| w.is_cancelled()) {
            assert!(worker.arrived_at_workplace().is_none(), "worker {}", worker.id());
            assert_ne!(worker.phase(), Phase::Working);
        }
    }
}

#[test]
fn test_baseline_run_replaces_workers() {
    let result = run_experiment(config(EstimatorMode::Baseline, 1), &OutputPaths::default()).unwrap();

    assert_eq!(result.shifts.len(), 7 * 10);
    assert_eq!(result.iterations.len(), 1);
    assert!(!result.cancelled_workers.is_empty());
    assert!(result.iterations[0].avg_standbys > 0.0);

    let cutoff = 30 - result.config.cancellation_baseline;
    for cancelled in &result.cancelled_workers {
        assert!(cancelled.step >= cutoff && cancelled.step < 30, "cancelled at {}", cancelled.step);
        // The gate is five steps from the bus stop: only workers who would
        // have reached it after the start get cancelled.
        let bus = cancelled.bus_arrival.unwrap();
        assert!(bus + 5 > 30, "worker {} on the bus at {}", cancelled.worker, bus);
    }
    for shift in &result.shifts {
        assert!(shift.standbys <= 3);
        assert!(shift.arrived <= 3);
    }
}

#[test]
fn test_reactive_run_never_cancels() {
    let result = run_experiment(config(EstimatorMode::Reactive, 1), &OutputPaths::default()).unwrap();
    assert!(result.cancelled_workers.is_empty());
    assert_eq!(result.iterations[0].avg_standbys, 0.0);
    assert!(result.worker_positions.is_empty());
}

#[test]
fn test_straggler_passes_the_gate_after_shift_end() {
    let config = config(EstimatorMode::Reactive, 1);
    let mut kernel = kernel(&config);
    let mut factory = Factory::new(ShiftConfig::default(), DayOfWeek::Thursday);
    // Off the bus at the shift end, at the gate five steps later.
    let shift = factory.add_shift(&[50], 0).unwrap();
    let contexts = shift_contexts(&factory, config.cancel_below);
    kernel.begin_simulation(&factory, contexts).unwrap();

    let record = run_until(&mut factory, &mut kernel, 55);
    assert_eq!(factory.agent(0).unwrap().phase(), Phase::AtGate);
    assert!(record.actuated(ACCESS_TO_FACTORY, shift));
    assert!(!record.actuated(ACCESS_TO_DISPENSER, shift));

    run_step(&mut factory, &mut kernel, 56);
    assert_eq!(factory.agent(0).unwrap().phase(), Phase::ToDispenser);

    // The dispenser closed with the shift.
    let record = run_until_from(&mut factory, &mut kernel, 57, 79);
    assert!(record.actuated(ACCESS_TO_FACTORY, shift));
    let worker = factory.agent(0).unwrap();
    assert!(!worker.has_head_gear());
    assert!(worker.arrived_at_workplace().is_none());

    let record = run_step(&mut factory, &mut kernel, 80);
    assert!(!record.actuated(ACCESS_TO_FACTORY, shift));
    let record = run_step(&mut factory, &mut kernel, 81);
    assert!(record.units.is_empty());
}

#[test]
fn test_predictive_run_trains_and_saves_models() {
    let dir = tempfile::tempdir().unwrap();
    let paths = OutputPaths {
        models: Some(dir.path().join("models")),
        trace: Some(dir.path().join("trace.jsonl")),
    };

    let result = run_experiment(config(EstimatorMode::Predictive, 2), &paths).unwrap();

    assert_eq!(result.iterations.len(), 2);
    let first = &result.iterations[0];
    // Untrained and without a baseline, nobody is cancelled.
    assert_eq!(first.avg_cancelled, 0.0);
    assert!(matches!(first.training.get(LATE_WORKERS), Some(TrainingOutcome::Trained(_))));

    let models = dir.path().join("models").join(LATE_WORKERS);
    assert!(models.join("1.json").exists());
    assert!(!models.join("2.json").exists());

    let trace = std::fs::read_to_string(dir.path().join("trace.jsonl")).unwrap();
    assert_eq!(trace.lines().count(), 2 * 7 * 50);
}

#[test]
fn test_worker_logs_cover_every_simulation() {
    let config = FactoryConfig {
        log_workers: true,
        ..config(EstimatorMode::Baseline, 2)
    };
    let result = run_experiment(config, &OutputPaths::default()).unwrap();

    // Ten shifts of three assigned workers and three standbys.
    let per_simulation = 10 * 6;
    assert_eq!(result.worker_logs.len(), 2 * 7 * per_simulation);
    for iteration in 0..2 {
        for simulation in 0..7 {
            let logs: Vec<_> = result
                .worker_logs
                .iter()
                .filter(|log| log.iteration == iteration && log.simulation == simulation)
                .collect();
            assert_eq!(logs.len(), per_simulation);
            assert!(logs.iter().all(|log| log.day == DayOfWeek::from_index(simulation)));

            let cancelled = logs.iter().filter(|log| log.state == "Cancelled").count();
            let expected = result
                .cancelled_workers
                .iter()
                .filter(|c| c.iteration == iteration && c.simulation == simulation)
                .count();
            assert_eq!(cancelled, expected);
        }
    }
    for log in result.worker_logs.iter().filter(|log| log.state == "Arrived") {
        assert!(log.has_head_gear);
        assert!(log.arrived_at_factory.unwrap() < log.arrived_at_workplace.unwrap());
    }

    assert_eq!(result.worker_positions.len(), 2 * 7 * 50 * per_simulation);
    let first_step: Vec<_> = result
        .worker_positions
        .iter()
        .filter(|p| p.iteration == 1 && p.simulation == 3 && p.step == 0)
        .collect();
    assert_eq!(first_step.len(), per_simulation);
    assert!(first_step.iter().all(|p| matches!(p.phase, Phase::Home | Phase::ToGate)));
}
