//! Units of a shift context.
//!
//! | unit                | priority | effect                                   |
//! |---------------------|----------|------------------------------------------|
//! | `CancelLateWorkers` | 4        | cancels workers predicted to be late      |
//! | `ReplaceLateWorkers`| 3        | calls standbys for the cancelled workers  |
//! | `ShiftTeam`         | 2        | copies the active team to current members |
//! | `AccessToFactory`   | 1        | lets the team through the gate            |
//! | `AccessToDispenser` | 1        | lets the team take head gear              |
//! | `AccessToWorkPlace` | 1        | lets team members with head gear in       |
//!
//! Higher priorities actuate first within a step, so replacement sees the
//! cancellations made in the same step and access sees the new team.

use ensemble_kernel::{
    AgentId, Cardinality, ContextId, ContextSpec, Ensemble, ResolvedRoles, RoleSpec, Step, Window,
    World,
};

use crate::estimate::{self, LATE_WORKERS};
use crate::factory::{Factory, ACCESS_LEAD};
use crate::worker::{Permission, Worker, WorkerEffect};

pub const CANCEL_LATE_WORKERS: &str = "CancelLateWorkers";
pub const REPLACE_LATE_WORKERS: &str = "ReplaceLateWorkers";
pub const SHIFT_TEAM: &str = "ShiftTeam";
pub const ACCESS_TO_FACTORY: &str = "AccessToFactory";
pub const ACCESS_TO_DISPENSER: &str = "AccessToDispenser";
pub const ACCESS_TO_WORKPLACE: &str = "AccessToWorkPlace";

pub const LATE_ROLE: &str = "late";
pub const STANDBY_ROLE: &str = "standbys";
pub const WORKERS_ROLE: &str = "workers";

/// Steps before the shift start the dispenser opens.
const DISPENSER_LEAD: Step = 15;

fn members(factory: &Factory, shift: ContextId) -> Vec<AgentId> {
    factory
        .shift(shift)
        .map(|s| s.current_members.iter().copied().collect())
        .unwrap_or_default()
}

pub struct CancelLateWorkers {
    shift: ContextId,
    cancel_below: f64,
}

impl Ensemble<Factory> for CancelLateWorkers {
    fn name(&self) -> &'static str {
        CANCEL_LATE_WORKERS
    }

    fn context(&self) -> ContextId {
        self.shift
    }

    fn priority(&self) -> i32 {
        4
    }

    fn situation(&self, factory: &Factory, step: Step) -> bool {
        let Some(shift) = factory.shift(self.shift) else {
            return false;
        };
        step < shift.start
            && shift
                .assigned
                .difference(&shift.cancelled)
                .any(|id| factory.agent(*id).is_some_and(|w| !w.is_at_factory()))
    }

    fn roles(&self, factory: &Factory, _step: Step) -> Vec<RoleSpec<Factory>> {
        let candidates: Vec<AgentId> = factory
            .shift(self.shift)
            .map(|s| s.assigned.difference(&s.cancelled).copied().collect())
            .unwrap_or_default();
        let cancel_below = self.cancel_below;
        vec![RoleSpec::new(LATE_ROLE, Cardinality::any(), |_: &Factory, w: &Worker| {
            !w.is_at_factory() && !w.is_cancelled()
        })
        .among(candidates)
        .with_estimate(
            LATE_WORKERS,
            estimate::inputs,
            move |on_time| on_time < cancel_below,
            false,
        )]
    }

    fn actuate(&self, factory: &mut Factory, roles: &ResolvedRoles, step: Step) {
        let late = roles.get(LATE_ROLE);
        factory.apply_all(late, &WorkerEffect::Cancel { at: step });
        if let Some(shift) = factory.shift_mut(self.shift) {
            shift.cancelled.extend(late.iter().copied());
        }
    }
}

pub struct ReplaceLateWorkers {
    shift: ContextId,
    standby_delay: Step,
}

impl Ensemble<Factory> for ReplaceLateWorkers {
    fn name(&self) -> &'static str {
        REPLACE_LATE_WORKERS
    }

    fn context(&self) -> ContextId {
        self.shift
    }

    fn priority(&self) -> i32 {
        3
    }

    fn situation(&self, factory: &Factory, step: Step) -> bool {
        factory
            .shift(self.shift)
            .is_some_and(|s| step < s.end && s.needed() > 0)
    }

    fn roles(&self, factory: &Factory, _step: Step) -> Vec<RoleSpec<Factory>> {
        let (needed, candidates) = factory
            .shift(self.shift)
            .map(|s| (s.needed(), s.available_standbys()))
            .unwrap_or_default();
        vec![RoleSpec::new(
            STANDBY_ROLE,
            Cardinality::between(1, needed.max(1)),
            |_: &Factory, w: &Worker| !w.is_called() && !w.is_cancelled(),
        )
        .exclusive()
        .among(candidates)]
    }

    fn actuate(&self, factory: &mut Factory, roles: &ResolvedRoles, step: Step) {
        let called = roles.get(STANDBY_ROLE);
        let effect = WorkerEffect::CallStandby {
            at: step,
            bus_arrival: step + self.standby_delay,
        };
        factory.apply_all(called, &effect);
        if let Some(shift) = factory.shift_mut(self.shift) {
            shift.called_standbys.extend(called.iter().copied());
        }
    }
}

pub struct ShiftTeam {
    shift: ContextId,
}

impl Ensemble<Factory> for ShiftTeam {
    fn name(&self) -> &'static str {
        SHIFT_TEAM
    }

    fn context(&self) -> ContextId {
        self.shift
    }

    fn priority(&self) -> i32 {
        2
    }

    fn situation(&self, factory: &Factory, _step: Step) -> bool {
        factory.shift(self.shift).is_some()
    }

    fn roles(&self, factory: &Factory, _step: Step) -> Vec<RoleSpec<Factory>> {
        let team: Vec<AgentId> = factory
            .shift(self.shift)
            .map(|s| s.active_team().into_iter().collect())
            .unwrap_or_default();
        vec![RoleSpec::new(WORKERS_ROLE, Cardinality::any(), |_: &Factory, _: &Worker| true).among(team)]
    }

    fn actuate(&self, factory: &mut Factory, roles: &ResolvedRoles, _step: Step) {
        if let Some(shift) = factory.shift_mut(self.shift) {
            shift.current_members = roles.get(WORKERS_ROLE).iter().copied().collect();
        }
    }
}

/// Which access unit, by what it grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Factory,
    Dispenser,
    WorkPlace,
}

/// Grants one permission to the shift's current members while the
/// shift's access window is open.
pub struct AccessUnit {
    shift: ContextId,
    access: Access,
}

impl AccessUnit {
    pub fn to_factory(shift: ContextId) -> Self {
        Self {
            shift,
            access: Access::Factory,
        }
    }

    pub fn to_dispenser(shift: ContextId) -> Self {
        Self {
            shift,
            access: Access::Dispenser,
        }
    }

    pub fn to_workplace(shift: ContextId) -> Self {
        Self {
            shift,
            access: Access::WorkPlace,
        }
    }

    fn permission(&self) -> Permission {
        match self.access {
            Access::Factory => Permission::EnterFactory,
            Access::Dispenser => Permission::UseDispenser,
            Access::WorkPlace => Permission::EnterWorkplace,
        }
    }
}

impl Ensemble<Factory> for AccessUnit {
    fn name(&self) -> &'static str {
        match self.access {
            Access::Factory => ACCESS_TO_FACTORY,
            Access::Dispenser => ACCESS_TO_DISPENSER,
            Access::WorkPlace => ACCESS_TO_WORKPLACE,
        }
    }

    fn context(&self) -> ContextId {
        self.shift
    }

    fn priority(&self) -> i32 {
        1
    }

    fn situation(&self, factory: &Factory, step: Step) -> bool {
        let Some(shift) = factory.shift(self.shift) else {
            return false;
        };
        // Strict bounds on both sides: start - lead < now < close
        let (lead, close) = match self.access {
            Access::Dispenser => (DISPENSER_LEAD, shift.end),
            Access::Factory | Access::WorkPlace => (ACCESS_LEAD, shift.end + ACCESS_LEAD),
        };
        step + lead > shift.start && step < close
    }

    fn roles(&self, factory: &Factory, _step: Step) -> Vec<RoleSpec<Factory>> {
        let team = members(factory, self.shift);
        match self.access {
            Access::WorkPlace => {
                let size = team.len();
                vec![RoleSpec::new(WORKERS_ROLE, Cardinality::between(0, size), |_: &Factory, w: &Worker| {
                    w.has_head_gear()
                })
                .among(team)]
            }
            Access::Factory | Access::Dispenser => {
                vec![RoleSpec::new(WORKERS_ROLE, Cardinality::any(), |_: &Factory, _: &Worker| true).among(team)]
            }
        }
    }

    fn actuate(&self, factory: &mut Factory, roles: &ResolvedRoles, _step: Step) {
        factory.apply_all(roles.get(WORKERS_ROLE), &WorkerEffect::Grant(self.permission()));
    }
}

/// One context per shift, offering its units only inside the shift window.
pub fn shift_contexts(factory: &Factory, cancel_below: f64) -> Vec<ContextSpec<Factory>> {
    let standby_delay = factory.config().standby_delay;
    factory
        .shifts()
        .map(|shift| {
            ContextSpec::new(
                shift.id,
                shift.window(),
                move |context: ContextId, window: Window, step: Step| {
                    if !window.contains(step) {
                        return Vec::new();
                    }
                    vec![
                        Box::new(CancelLateWorkers {
                            shift: context,
                            cancel_below,
                        }) as Box<dyn Ensemble<Factory>>,
                        Box::new(ReplaceLateWorkers {
                            shift: context,
                            standby_delay,
                        }) as Box<dyn Ensemble<Factory>>,
                        Box::new(ShiftTeam { shift: context }) as Box<dyn Ensemble<Factory>>,
                        Box::new(AccessUnit::to_factory(context)) as Box<dyn Ensemble<Factory>>,
                        Box::new(AccessUnit::to_dispenser(context)) as Box<dyn Ensemble<Factory>>,
                        Box::new(AccessUnit::to_workplace(context)) as Box<dyn Ensemble<Factory>>,
                    ]
                },
            )
        })
        .collect()
}
