//! Workers commuting to their workplace.
//!
//! A worker gets off the bus at the bus stop, walks to the factory gate,
//! picks up head gear at the dispenser and walks to the workplace. Passing
//! the gate, using the dispenser and entering the workplace each need a
//! permission granted by an access unit in the previous step; without it
//! the worker waits where they are.

use std::collections::BTreeSet;

use ensemble_kernel::{Agent, AgentId, Attributes, ContextId, Step};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Move towards `target` by at most `speed`. Returns the new position
    /// and whether the target was reached.
    pub fn step_towards(self, target: Point, speed: f64) -> (Point, bool) {
        let distance = self.distance(target);
        if distance <= speed {
            return (target, true);
        }
        let t = speed / distance;
        let next = Point::new(self.x + (target.x - self.x) * t, self.y + (target.y - self.y) * t);
        (next, false)
    }
}

/// Fixed locations of the factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub bus_stop: Point,
    pub gate: Point,
    pub dispenser: Point,
    pub workplaces: Vec<Point>,
}

impl Layout {
    pub fn new(workplaces: usize) -> Self {
        Self {
            bus_stop: Point::new(0.0, 0.0),
            gate: Point::new(5.0, 0.0),
            dispenser: Point::new(5.0, 3.0),
            workplaces: (0..workplaces)
                .map(|i| Point::new(8.0, 3.0 + i as f64))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    EnterFactory,
    UseDispenser,
    EnterWorkplace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assignment {
    Assigned,
    Standby,
}

/// Where a worker is on the way to work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Not yet off the bus
    Home,
    ToGate,
    AtGate,
    ToDispenser,
    ToWorkplace,
    Working,
    /// Cancelled and sent home at the gate
    TurnedAway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerEffect {
    Grant(Permission),
    Cancel { at: Step },
    CallStandby { at: Step, bus_arrival: Step },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    id: AgentId,
    shift: ContextId,
    assignment: Assignment,
    phase: Phase,
    position: Point,
    /// `None` for standbys nobody called
    bus_arrival: Option<Step>,
    has_head_gear: bool,
    cancelled_at: Option<Step>,
    called_at: Option<Step>,
    arrived_at_factory: Option<Step>,
    arrived_at_workplace: Option<Step>,
    permissions: BTreeSet<Permission>,
}

impl Worker {
    pub fn assigned(id: AgentId, shift: ContextId, bus_arrival: Step) -> Self {
        Self::new(id, shift, Assignment::Assigned, Some(bus_arrival))
    }

    pub fn standby(id: AgentId, shift: ContextId) -> Self {
        Self::new(id, shift, Assignment::Standby, None)
    }

    fn new(id: AgentId, shift: ContextId, assignment: Assignment, bus_arrival: Option<Step>) -> Self {
        Self {
            id,
            shift,
            assignment,
            phase: Phase::Home,
            position: Point::new(0.0, 0.0),
            bus_arrival,
            has_head_gear: false,
            cancelled_at: None,
            called_at: None,
            arrived_at_factory: None,
            arrived_at_workplace: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn shift(&self) -> ContextId {
        self.shift
    }

    pub fn assignment(&self) -> Assignment {
        self.assignment
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn bus_arrival(&self) -> Option<Step> {
        self.bus_arrival
    }

    pub fn has_head_gear(&self) -> bool {
        self.has_head_gear
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    pub fn is_called(&self) -> bool {
        self.called_at.is_some()
    }

    /// Reached the gate, whether or not they were let in.
    pub fn is_at_factory(&self) -> bool {
        self.arrived_at_factory.is_some()
    }

    pub fn arrived_at_factory(&self) -> Option<Step> {
        self.arrived_at_factory
    }

    pub fn arrived_at_workplace(&self) -> Option<Step> {
        self.arrived_at_workplace
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Move one step using the permissions granted last step, then drop
    /// them.
    pub fn advance(&mut self, step: Step, layout: &Layout, speed: f64) {
        match self.phase {
            Phase::Home => {
                if self.bus_arrival.is_some_and(|at| at <= step) {
                    self.position = layout.bus_stop;
                    self.phase = Phase::ToGate;
                }
            }
            Phase::ToGate => {
                let (position, reached) = self.position.step_towards(layout.gate, speed);
                self.position = position;
                if reached {
                    self.arrived_at_factory = Some(step);
                    self.phase = if self.is_cancelled() {
                        Phase::TurnedAway
                    } else {
                        Phase::AtGate
                    };
                }
            }
            Phase::AtGate => {
                if self.is_cancelled() {
                    self.phase = Phase::TurnedAway;
                } else if self.has_permission(Permission::EnterFactory) {
                    self.phase = Phase::ToDispenser;
                }
            }
            Phase::ToDispenser => {
                let (position, reached) = self.position.step_towards(layout.dispenser, speed);
                self.position = position;
                if reached && self.has_permission(Permission::UseDispenser) {
                    self.has_head_gear = true;
                    self.phase = Phase::ToWorkplace;
                }
            }
            Phase::ToWorkplace => {
                let target = layout
                    .workplaces
                    .get(self.shift as usize)
                    .copied()
                    .unwrap_or(layout.dispenser);
                let (position, reached) = self.position.step_towards(target, speed);
                self.position = position;
                if reached && self.has_permission(Permission::EnterWorkplace) {
                    self.arrived_at_workplace = Some(step);
                    self.phase = Phase::Working;
                }
            }
            Phase::Working | Phase::TurnedAway => {}
        }
        self.permissions.clear();
    }
}

impl Agent for Worker {
    type Effect = WorkerEffect;

    fn id(&self) -> AgentId {
        self.id
    }

    fn state_tag(&self) -> &'static str {
        if self.is_cancelled() {
            "Cancelled"
        } else if self.arrived_at_workplace.is_some() {
            "Arrived"
        } else if self.is_called() {
            "CalledStandby"
        } else {
            match self.assignment {
                Assignment::Assigned => "Assigned",
                Assignment::Standby => "Standby",
            }
        }
    }

    fn observe(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("x".into(), self.position.x.into());
        attrs.insert("y".into(), self.position.y.into());
        attrs.insert("is_at_factory".into(), self.is_at_factory().into());
        attrs.insert("has_head_gear".into(), self.has_head_gear.into());
        if let Some(at) = self.bus_arrival {
            attrs.insert("bus_arrival".into(), at.into());
        }
        attrs
    }

    fn apply_effect(&mut self, effect: &WorkerEffect) {
        match *effect {
            WorkerEffect::Grant(permission) => {
                self.permissions.insert(permission);
            }
            WorkerEffect::Cancel { at } => {
                if self.cancelled_at.is_none() {
                    self.cancelled_at = Some(at);
                }
            }
            WorkerEffect::CallStandby { at, bus_arrival } => {
                if self.assignment == Assignment::Standby && self.called_at.is_none() {
                    self.called_at = Some(at);
                    self.bus_arrival = Some(bus_arrival);
                }
            }
        }
    }
}
