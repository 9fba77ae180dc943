//! Coordination units ("ensembles") and the shared role resolver.
//!
//! A unit is re-instantiated from its context every step. It declares a
//! priority, a situation predicate, role specifications and an actuation.
//! Roles are plain data ([`RoleSpec`]) evaluated by [`resolve_role`], so the
//! tie-break and shortfall policy live in one place:
//!
//! 1. Candidates are visited in ascending agent id order
//! 2. Agents held by an exclusive claim of another unit are skipped
//! 3. The role filter is applied, then the estimate decision if declared
//! 4. Fewer than `min` eligible agents is a shortfall and admits nobody
//! 5. Otherwise the first `max` eligible agents are admitted

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::agent::{AgentId, ContextId, Step};
use crate::claims::ClaimLedger;
use crate::error::{ConfigurationError, Result};
use crate::features::FeatureValue;
use crate::world::World;

/// Bounds on how many agents a role admits in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    pub min: usize,
    /// `None` is unbounded
    pub max: Option<usize>,
}

impl Cardinality {
    pub fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    pub fn between(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    /// Zero or more, no upper bound.
    pub fn any() -> Self {
        Self::at_least(0)
    }

    pub fn validate(&self, unit: &str, role: &str) -> std::result::Result<(), ConfigurationError> {
        match self.max {
            Some(max) if self.min > max => Err(ConfigurationError::InvalidCardinality {
                unit: unit.to_string(),
                role: role.to_string(),
                min: self.min,
                max,
            }),
            _ => Ok(()),
        }
    }
}

pub type AgentPredicate<W> = Box<dyn Fn(&W, &<W as World>::Agent) -> bool>;

pub type FeatureInputs<W> = Box<dyn Fn(&W, &<W as World>::Agent) -> Option<Vec<FeatureValue>>>;

/// Estimate-aware part of a role.
pub struct EstimateUse<W: World> {
    /// Name of the estimate registered with the kernel
    pub estimate: &'static str,
    /// Raw feature values for an agent. `None` means the inputs are not
    /// valid for this agent: no prediction is requested, nothing is buffered
    /// and the agent is not eligible.
    pub inputs: FeatureInputs<W>,
    /// Turns an available prediction into the eligibility decision.
    pub decide: Box<dyn Fn(f64) -> bool>,
    /// Decision used when no prediction is available.
    pub unavailable: bool,
}

/// A named slot within a unit.
pub struct RoleSpec<W: World> {
    pub name: &'static str,
    pub cardinality: Cardinality,
    /// Exclusive roles never admit an agent another unit instance already
    /// holds exclusively in the same step.
    pub exclusive: bool,
    /// Restrict the pool to these agents; `None` is the whole world.
    pub candidates: Option<Vec<AgentId>>,
    pub filter: AgentPredicate<W>,
    pub estimate: Option<EstimateUse<W>>,
}

impl<W: World> RoleSpec<W> {
    pub fn new<F>(name: &'static str, cardinality: Cardinality, filter: F) -> Self
    where
        F: Fn(&W, &W::Agent) -> bool + 'static,
    {
        Self {
            name,
            cardinality,
            exclusive: false,
            candidates: None,
            filter: Box::new(filter),
            estimate: None,
        }
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn among(mut self, candidates: Vec<AgentId>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    /// Make eligibility depend on a prediction.
    pub fn with_estimate<I, D>(
        mut self,
        estimate: &'static str,
        inputs: I,
        decide: D,
        unavailable: bool,
    ) -> Self
    where
        I: Fn(&W, &W::Agent) -> Option<Vec<FeatureValue>> + 'static,
        D: Fn(f64) -> bool + 'static,
    {
        self.estimate = Some(EstimateUse {
            estimate,
            inputs: Box::new(inputs),
            decide: Box::new(decide),
            unavailable,
        });
        self
    }
}

/// Agents admitted to each role of a unit, by role name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRoles {
    roles: BTreeMap<String, Vec<AgentId>>,
}

impl ResolvedRoles {
    pub fn insert(&mut self, role: &str, agents: Vec<AgentId>) {
        self.roles.insert(role.to_string(), agents);
    }

    /// Admitted agents of `role`, empty if the role is unknown.
    pub fn get(&self, role: &str) -> &[AgentId] {
        self.roles.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AgentId])> {
        self.roles.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// A coordination unit instance.
///
/// `situation` and `roles` must be pure functions of world state and step.
/// `actuate` may only touch the resolved agents and the unit's own context.
pub trait Ensemble<W: World> {
    fn name(&self) -> &'static str;

    fn context(&self) -> ContextId;

    /// Higher runs first.
    fn priority(&self) -> i32 {
        0
    }

    fn situation(&self, world: &W, step: Step) -> bool;

    fn roles(&self, _world: &W, _step: Step) -> Vec<RoleSpec<W>> {
        Vec::new()
    }

    fn actuate(&self, world: &mut W, roles: &ResolvedRoles, step: Step);
}

/// Where estimate-aware roles get their predictions from.
///
/// The kernel implementation buffers a feature record for every prediction
/// it is asked for.
pub trait PredictionSource {
    fn predict(
        &mut self,
        estimate: &str,
        context: ContextId,
        agent: AgentId,
        step: Step,
        values: Vec<FeatureValue>,
    ) -> Result<Option<f64>>;
}

/// Outcome of resolving one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleResolution {
    Admitted {
        eligible: usize,
        admitted: Vec<AgentId>,
    },
    Shortfall {
        eligible: usize,
        min: usize,
    },
}

/// Resolve a role against the current world and claim state.
///
/// Does not grant claims; the caller grants them once every role of the
/// unit resolved without a shortfall.
pub fn resolve_role<W: World>(
    world: &W,
    unit: &str,
    context: ContextId,
    role: &RoleSpec<W>,
    step: Step,
    claims: &mut ClaimLedger,
    predictions: &mut dyn PredictionSource,
) -> Result<RoleResolution> {
    role.cardinality.validate(unit, role.name)?;

    let mut pool = role.candidates.clone().unwrap_or_else(|| world.agent_ids());
    pool.sort_unstable();
    pool.dedup();

    let mut eligible = Vec::new();
    for id in pool {
        let Some(agent) = world.agent(id) else {
            continue;
        };
        if role.exclusive && claims.held_by_other(id, unit, context) {
            claims.note_denied();
            continue;
        }
        if !(role.filter)(world, agent) {
            continue;
        }
        if let Some(est) = &role.estimate {
            let Some(values) = (est.inputs)(world, agent) else {
                continue;
            };
            let prediction = predictions.predict(est.estimate, context, id, step, values)?;
            let decision = prediction.map_or(est.unavailable, |p| (est.decide)(p));
            trace!(
                unit = unit,
                role = role.name,
                agent = id,
                prediction = ?prediction,
                decision = decision,
                "Estimate-aware selection"
            );
            if !decision {
                continue;
            }
        }
        eligible.push(id);
    }

    let count = eligible.len();
    if count < role.cardinality.min {
        return Ok(RoleResolution::Shortfall {
            eligible: count,
            min: role.cardinality.min,
        });
    }
    if let Some(max) = role.cardinality.max {
        eligible.truncate(max);
    }
    Ok(RoleResolution::Admitted {
        eligible: count,
        admitted: eligible,
    })
}
