//! Maintenance units, one context per machine.

use ensemble_kernel::{
    AgentId, Cardinality, ContextId, ContextSpec, Ensemble, ResolvedRoles, RoleSpec, Step, Window,
    World,
};

use crate::estimate::{self, TIME_TO_FAILURE};
use crate::machine::{Machine, MachineEffect, Plant};

pub const EMERGENCY_REPAIR: &str = "EmergencyRepair";
pub const PREVENTIVE_MAINTENANCE: &str = "PreventiveMaintenance";

const MACHINE_ROLE: &str = "machine";

/// Calls maintenance on a failed machine nobody has scheduled a repair for.
#[derive(Debug, Clone, Copy)]
pub struct EmergencyRepair {
    machine: AgentId,
}

impl Ensemble<Plant> for EmergencyRepair {
    fn name(&self) -> &'static str {
        EMERGENCY_REPAIR
    }

    fn context(&self) -> ContextId {
        self.machine
    }

    fn priority(&self) -> i32 {
        2
    }

    fn situation(&self, plant: &Plant, _step: Step) -> bool {
        plant
            .agent(self.machine)
            .is_some_and(|m| m.is_failed() && !m.maintenance_pending())
    }

    fn roles(&self, _plant: &Plant, _step: Step) -> Vec<RoleSpec<Plant>> {
        vec![RoleSpec::new(MACHINE_ROLE, Cardinality::exactly(1), |_: &Plant, m: &Machine| {
            m.is_failed() && !m.maintenance_pending()
        })
        .exclusive()
        .among(vec![self.machine])]
    }

    fn actuate(&self, plant: &mut Plant, roles: &ResolvedRoles, step: Step) {
        let effect = MachineEffect::CallMaintenance {
            at: step,
            preventive: false,
        };
        plant.apply_all(roles.get(MACHINE_ROLE), &effect);
    }
}

/// Schedules a repair for a running machine predicted to fail before a
/// repair could complete.
#[derive(Debug, Clone, Copy)]
pub struct PreventiveMaintenance {
    machine: AgentId,
    /// Predictions below this many steps admit the machine
    lead: f64,
}

impl Ensemble<Plant> for PreventiveMaintenance {
    fn name(&self) -> &'static str {
        PREVENTIVE_MAINTENANCE
    }

    fn context(&self) -> ContextId {
        self.machine
    }

    fn priority(&self) -> i32 {
        1
    }

    fn situation(&self, plant: &Plant, _step: Step) -> bool {
        plant
            .agent(self.machine)
            .is_some_and(|m| m.is_running() && !m.maintenance_pending())
    }

    fn roles(&self, _plant: &Plant, _step: Step) -> Vec<RoleSpec<Plant>> {
        let lead = self.lead;
        vec![RoleSpec::new(MACHINE_ROLE, Cardinality::between(0, 1), |_: &Plant, m: &Machine| {
            m.is_running() && !m.maintenance_pending()
        })
        .exclusive()
        .among(vec![self.machine])
        .with_estimate(
            TIME_TO_FAILURE,
            estimate::inputs,
            move |time_to_failure| time_to_failure < lead,
            false,
        )]
    }

    fn actuate(&self, plant: &mut Plant, roles: &ResolvedRoles, step: Step) {
        let effect = MachineEffect::CallMaintenance {
            at: step,
            preventive: true,
        };
        plant.apply_all(roles.get(MACHINE_ROLE), &effect);
    }
}

/// Maintenance contexts for every machine of the plant. Windows never
/// close; records still pending at run end are discarded.
pub fn maintenance_contexts(plant: &Plant) -> Vec<ContextSpec<Plant>> {
    let lead = plant.config().time_to_repair as f64;
    plant
        .agent_ids()
        .into_iter()
        .map(|machine| {
            ContextSpec::new(
                machine,
                Window::open_ended(0),
                move |context: ContextId, _window: Window, _step: Step| {
                    vec![
                        Box::new(EmergencyRepair { machine: context }) as Box<dyn Ensemble<Plant>>,
                        Box::new(PreventiveMaintenance {
                            machine: context,
                            lead,
                        }) as Box<dyn Ensemble<Plant>>,
                    ]
                },
            )
        })
        .collect()
}
