//! Production machines and the plant that owns them.
//!
//! A machine's failure rate grows with the time since its last repair. Once
//! the rate crosses the failure threshold the machine stops. Calling
//! maintenance starts a repair countdown; the machine keeps running (if it
//! still can) until the countdown reaches zero and the repair resets it.

use ensemble_kernel::{Agent, AgentId, Attributes, Step, World};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::PlantConfig;

/// Named effects units apply to machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineEffect {
    CallMaintenance { at: Step, preventive: bool },
}

/// Entry in a machine's maintenance log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceCall {
    pub step: Step,
    pub preventive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    id: AgentId,
    running: bool,
    failure_rate: f64,
    /// Steps left until the scheduled repair
    repair_countdown: Option<usize>,
    time_since_last_repair: usize,
    last_repair_step: Option<Step>,
    time_to_repair: usize,
    failures: usize,
    running_steps: usize,
    maintenance_log: Vec<MaintenanceCall>,
    repair_log: Vec<Step>,
}

impl Machine {
    pub fn new(id: AgentId, time_to_repair: usize) -> Self {
        Self {
            id,
            running: true,
            failure_rate: 0.0,
            repair_countdown: None,
            time_since_last_repair: 0,
            last_repair_step: None,
            time_to_repair,
            failures: 0,
            running_steps: 0,
            maintenance_log: Vec::new(),
            repair_log: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_failed(&self) -> bool {
        !self.running
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    /// Whether a repair is scheduled.
    pub fn maintenance_pending(&self) -> bool {
        self.repair_countdown.is_some()
    }

    pub fn repair_countdown(&self) -> Option<usize> {
        self.repair_countdown
    }

    pub fn time_since_last_repair(&self) -> usize {
        self.time_since_last_repair
    }

    pub fn last_repair_step(&self) -> Option<Step> {
        self.last_repair_step
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Steps this machine spent running.
    pub fn running_steps(&self) -> usize {
        self.running_steps
    }

    pub fn maintenance_log(&self) -> &[MaintenanceCall] {
        &self.maintenance_log
    }

    pub fn repair_log(&self) -> &[Step] {
        &self.repair_log
    }

    /// Schedule a repair. No-op while one is already scheduled.
    pub fn call_maintenance(&mut self, step: Step, preventive: bool) {
        if self.repair_countdown.is_some() {
            return;
        }
        self.repair_countdown = Some(self.time_to_repair);
        self.maintenance_log.push(MaintenanceCall { step, preventive });
    }

    /// Advance one step: repair countdown first, then wear.
    pub fn advance<R: Rng + ?Sized>(&mut self, step: Step, plant: &PlantConfig, rng: &mut R) {
        if let Some(left) = self.repair_countdown {
            let left = left.saturating_sub(1);
            if left == 0 {
                self.repair(step);
            } else {
                self.repair_countdown = Some(left);
            }
        }

        if !self.running {
            return;
        }

        let mean = plant.mean_failure_rate(self.time_since_last_repair);
        let noise = standard_normal(rng) * plant.failure_rate_variance.sqrt();
        self.failure_rate = (mean * (1.0 + noise)).max(0.0);
        self.time_since_last_repair += 1;

        if self.failure_rate > plant.failure_threshold {
            self.running = false;
            self.failures += 1;
        } else {
            self.running_steps += 1;
        }
    }

    fn repair(&mut self, step: Step) {
        self.running = true;
        self.failure_rate = 0.0;
        self.time_since_last_repair = 0;
        self.repair_countdown = None;
        self.last_repair_step = Some(step);
        self.repair_log.push(step);
    }
}

impl Agent for Machine {
    type Effect = MachineEffect;

    fn id(&self) -> AgentId {
        self.id
    }

    fn state_tag(&self) -> &'static str {
        match (self.running, self.repair_countdown.is_some()) {
            (_, true) => "Repairing",
            (true, false) => "Running",
            (false, false) => "Failed",
        }
    }

    fn observe(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("is_running".into(), self.running.into());
        attrs.insert("failure_rate".into(), self.failure_rate.into());
        attrs.insert(
            "time_since_last_repair".into(),
            self.time_since_last_repair.into(),
        );
        if let Some(left) = self.repair_countdown {
            attrs.insert("time_to_repair".into(), left.into());
        }
        if let Some(step) = self.last_repair_step {
            attrs.insert("last_repair_step".into(), step.into());
        }
        attrs
    }

    fn apply_effect(&mut self, effect: &MachineEffect) {
        match *effect {
            MachineEffect::CallMaintenance { at, preventive } => self.call_maintenance(at, preventive),
        }
    }
}

/// Standard normal sample via Box-Muller.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-10);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// All machines of one simulation. Machine ids equal their index.
#[derive(Debug, Clone)]
pub struct Plant {
    config: PlantConfig,
    machines: Vec<Machine>,
}

impl Plant {
    pub fn new(config: PlantConfig) -> Self {
        let machines = (0..config.machine_count)
            .map(|i| Machine::new(i as AgentId, config.time_to_repair))
            .collect();
        Self { config, machines }
    }

    pub fn config(&self) -> &PlantConfig {
        &self.config
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    pub fn advance<R: Rng + ?Sized>(&mut self, step: Step, rng: &mut R) {
        for machine in &mut self.machines {
            machine.advance(step, &self.config, rng);
        }
    }

    pub fn running_count(&self) -> usize {
        self.machines.iter().filter(|m| m.is_running()).count()
    }
}

impl World for Plant {
    type Agent = Machine;

    fn agent_ids(&self) -> Vec<AgentId> {
        self.machines.iter().map(|m| m.id).collect()
    }

    fn agent(&self, id: AgentId) -> Option<&Machine> {
        self.machines.get(id as usize)
    }

    fn agent_mut(&mut self, id: AgentId) -> Option<&mut Machine> {
        self.machines.get_mut(id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn quiet() -> PlantConfig {
        PlantConfig {
            failure_rate_variance: 0.0,
            ..PlantConfig::default()
        }
    }

    #[test]
    fn test_noise_free_machine_fails_at_failing_age() {
        let plant = quiet();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut machine = Machine::new(0, plant.time_to_repair);

        let mut failed_at = None;
        for step in 0..200 {
            machine.advance(step, &plant, &mut rng);
            if machine.is_failed() {
                failed_at = Some(step);
                break;
            }
        }
        // Ages 0..=100 survive, age 101 fails.
        assert_eq!(failed_at, Some(101));
        assert_eq!(machine.failures(), 1);
        assert_eq!(machine.state_tag(), "Failed");
    }

    #[test]
    fn test_repair_cycle() {
        let plant = quiet();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut machine = Machine::new(0, plant.time_to_repair);
        for step in 0..10 {
            machine.advance(step, &plant, &mut rng);
        }

        machine.call_maintenance(9, true);
        assert_eq!(machine.state_tag(), "Repairing");
        assert!(machine.is_running());

        // A second call while pending is ignored.
        machine.call_maintenance(9, false);
        assert_eq!(machine.maintenance_log().len(), 1);

        for step in 10..39 {
            machine.advance(step, &plant, &mut rng);
            assert!(machine.maintenance_pending());
        }
        machine.advance(39, &plant, &mut rng);
        assert!(!machine.maintenance_pending());
        assert_eq!(machine.last_repair_step(), Some(39));
        assert_eq!(machine.repair_log(), &[39]);
        // Repaired, then one step of wear.
        assert_eq!(machine.time_since_last_repair(), 1);
        assert_eq!(machine.state_tag(), "Running");
    }

    #[test]
    fn test_failed_machine_stays_down_until_repaired() {
        let plant = quiet();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut machine = Machine::new(0, 2);
        for step in 0..=101 {
            machine.advance(step, &plant, &mut rng);
        }
        assert!(machine.is_failed());
        let running = machine.running_steps();

        machine.apply_effect(&MachineEffect::CallMaintenance {
            at: 101,
            preventive: false,
        });
        machine.advance(102, &plant, &mut rng);
        assert!(machine.is_failed());
        assert_eq!(machine.running_steps(), running);

        machine.advance(103, &plant, &mut rng);
        assert!(machine.is_running());
        assert_eq!(machine.failure_rate(), plant.mean_failure_rate(0));
    }

    #[test]
    fn test_plant_ids_are_indices() {
        let plant = Plant::new(PlantConfig {
            machine_count: 4,
            ..PlantConfig::default()
        });
        assert_eq!(plant.agent_ids(), vec![0, 1, 2, 3]);
        assert_eq!(plant.agent(3).map(|m| m.id()), Some(3));
        assert!(plant.agent(4).is_none());
        assert_eq!(plant.running_count(), 4);
    }
}
