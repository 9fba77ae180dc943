//! The factory world: workers plus one shift context per workplace.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};
use ensemble_kernel::{AgentId, ContextId, Step, Window, World};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{DayOfWeek, ShiftConfig};
use crate::worker::{Layout, Worker};

/// Steps before the shift start the factory opens to its team.
pub const ACCESS_LEAD: Step = 30;

/// A shift and the named worker subsets units maintain for it.
///
/// `current_members` is always a subset of `assigned ∪ called_standbys`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub id: ContextId,
    pub start: Step,
    pub end: Step,
    pub assigned: BTreeSet<AgentId>,
    pub standbys: BTreeSet<AgentId>,
    pub cancelled: BTreeSet<AgentId>,
    pub called_standbys: BTreeSet<AgentId>,
    pub current_members: BTreeSet<AgentId>,
}

impl Shift {
    /// Steps the shift's units may run in: from `ACCESS_LEAD` before the
    /// start until `ACCESS_LEAD` after the end, so stragglers can still pass
    /// the gate and reach the workplace. Cancellations and replacements stop
    /// earlier on their own situations.
    pub fn window(&self) -> Window {
        Window::new(self.start.saturating_sub(ACCESS_LEAD), self.end + ACCESS_LEAD)
    }

    /// Assigned workers not cancelled, plus called standbys.
    pub fn active_team(&self) -> BTreeSet<AgentId> {
        self.assigned
            .difference(&self.cancelled)
            .chain(self.called_standbys.iter())
            .copied()
            .collect()
    }

    /// Replacements still missing to bring the team back to its size.
    pub fn needed(&self) -> usize {
        self.assigned.len().saturating_sub(self.active_team().len())
    }

    /// Standbys nobody called yet.
    pub fn available_standbys(&self) -> Vec<AgentId> {
        self.standbys.difference(&self.called_standbys).copied().collect()
    }
}

#[derive(Debug, Clone)]
pub struct Factory {
    config: ShiftConfig,
    day: DayOfWeek,
    layout: Layout,
    now: Step,
    workers: Vec<Worker>,
    shifts: BTreeMap<ContextId, Shift>,
}

impl Factory {
    pub fn new(config: ShiftConfig, day: DayOfWeek) -> Self {
        let layout = Layout::new(config.workplaces);
        Self {
            config,
            day,
            layout,
            now: 0,
            workers: Vec::new(),
            shifts: BTreeMap::new(),
        }
    }

    /// A factory with every workplace staffed: punctual or late bus
    /// arrivals are drawn per assigned worker.
    pub fn generate<R: Rng + ?Sized>(config: ShiftConfig, day: DayOfWeek, rng: &mut R) -> Result<Self> {
        for (lo, hi) in [config.punctual_arrival, config.late_arrival] {
            if lo > hi {
                bail!("empty bus arrival range {lo}..={hi}");
            }
        }
        let mut factory = Self::new(config, day);
        let late = factory.config.late_probability(day);
        for _ in 0..factory.config.workplaces {
            let arrivals: Vec<Step> = (0..factory.config.workers_per_shift)
                .map(|_| {
                    let (lo, hi) = if rng.random_bool(late) {
                        factory.config.late_arrival
                    } else {
                        factory.config.punctual_arrival
                    };
                    let offset = rng.random_range(lo..=hi);
                    (factory.config.shift_start as i64 + offset).max(0) as Step
                })
                .collect();
            let standbys = factory.config.standbys_per_shift;
            factory.add_shift(&arrivals, standbys)?;
        }
        Ok(factory)
    }

    /// Add a shift at the next workplace with one assigned worker per bus
    /// arrival and `standbys` standbys. Returns the shift id.
    pub fn add_shift(&mut self, bus_arrivals: &[Step], standbys: usize) -> Result<ContextId> {
        let id = self.shifts.len() as ContextId;
        if id as usize >= self.layout.workplaces.len() {
            bail!("no workplace left for shift {id}");
        }

        let mut shift = Shift {
            id,
            start: self.config.shift_start,
            end: self.config.shift_end,
            assigned: BTreeSet::new(),
            standbys: BTreeSet::new(),
            cancelled: BTreeSet::new(),
            called_standbys: BTreeSet::new(),
            current_members: BTreeSet::new(),
        };
        for &at in bus_arrivals {
            let worker = self.workers.len() as AgentId;
            self.workers.push(Worker::assigned(worker, id, at));
            shift.assigned.insert(worker);
        }
        for _ in 0..standbys {
            let worker = self.workers.len() as AgentId;
            self.workers.push(Worker::standby(worker, id));
            shift.standbys.insert(worker);
        }
        self.shifts.insert(id, shift);
        Ok(id)
    }

    pub fn config(&self) -> &ShiftConfig {
        &self.config
    }

    pub fn day(&self) -> DayOfWeek {
        self.day
    }

    /// Step of the last [`advance`](Self::advance).
    pub fn now(&self) -> Step {
        self.now
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn shift(&self, id: ContextId) -> Option<&Shift> {
        self.shifts.get(&id)
    }

    pub fn shift_mut(&mut self, id: ContextId) -> Option<&mut Shift> {
        self.shifts.get_mut(&id)
    }

    pub fn shifts(&self) -> impl Iterator<Item = &Shift> {
        self.shifts.values()
    }

    pub fn advance(&mut self, step: Step) {
        self.now = step;
        for worker in &mut self.workers {
            worker.advance(step, &self.layout, self.config.walking_speed);
        }
    }
}

impl World for Factory {
    type Agent = Worker;

    fn agent_ids(&self) -> Vec<AgentId> {
        (0..self.workers.len() as AgentId).collect()
    }

    fn agent(&self, id: AgentId) -> Option<&Worker> {
        self.workers.get(id as usize)
    }

    fn agent_mut(&mut self, id: AgentId) -> Option<&mut Worker> {
        self.workers.get_mut(id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_generated_shifts_are_staffed() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let config = ShiftConfig::default();
        let factory = Factory::generate(config.clone(), DayOfWeek::Monday, &mut rng).unwrap();

        assert_eq!(factory.shifts().count(), config.workplaces);
        let per_shift = config.workers_per_shift + config.standbys_per_shift;
        assert_eq!(factory.workers().len(), config.workplaces * per_shift);
        for shift in factory.shifts() {
            assert_eq!(shift.assigned.len(), config.workers_per_shift);
            assert_eq!(shift.standbys.len(), config.standbys_per_shift);
            assert!(shift.assigned.is_disjoint(&shift.standbys));
            for id in &shift.assigned {
                assert_eq!(factory.agent(*id).map(|w| w.shift()), Some(shift.id));
            }
        }
    }

    #[test]
    fn test_default_arrivals_split_around_the_baseline_cutoff() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let config = ShiftConfig {
            late_fraction: 0.5,
            ..ShiftConfig::default()
        };
        let start = config.shift_start;
        let (mut punctual, mut late) = (0, 0);
        for day in DayOfWeek::ALL {
            let factory = Factory::generate(config.clone(), day, &mut rng).unwrap();
            for worker in factory.workers() {
                let Some(bus) = worker.bus_arrival() else { continue };
                // Five steps from the bus stop to the gate; the baseline
                // cancels whoever is missing sixteen steps before the start.
                if bus + 5 <= start - 16 {
                    punctual += 1;
                } else {
                    assert!(bus + 5 > start, "bus at {bus}");
                    late += 1;
                }
            }
        }
        assert!(punctual > 0);
        assert!(late > 0);
    }

    #[test]
    fn test_shift_window_outlasts_the_shift() {
        let mut factory = Factory::new(ShiftConfig::default(), DayOfWeek::Monday);
        let id = factory.add_shift(&[5], 0).unwrap();
        let window = factory.shift(id).unwrap().window();
        assert_eq!(window, Window::new(0, 80));
    }

    #[test]
    fn test_team_accounting() {
        let mut factory = Factory::new(ShiftConfig::default(), DayOfWeek::Tuesday);
        let id = factory.add_shift(&[5, 5, 5], 2).unwrap();
        let shift = factory.shift_mut(id).unwrap();
        assert_eq!(shift.needed(), 0);

        shift.cancelled.insert(0);
        assert_eq!(shift.needed(), 1);
        assert_eq!(shift.available_standbys(), vec![3, 4]);

        shift.called_standbys.insert(3);
        assert_eq!(shift.needed(), 0);
        assert_eq!(shift.active_team().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(shift.available_standbys(), vec![4]);
    }

    #[test]
    fn test_shift_count_bounded_by_workplaces() {
        let config = ShiftConfig {
            workplaces: 1,
            ..ShiftConfig::default()
        };
        let mut factory = Factory::new(config, DayOfWeek::Sunday);
        factory.add_shift(&[1], 0).unwrap();
        assert!(factory.add_shift(&[1], 0).is_err());
    }
}
