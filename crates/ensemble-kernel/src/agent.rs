//! Agent types: the entities coordination units claim and act upon.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Stable identifier of an agent. Ascending id order is the tie-break used
/// whenever more agents qualify for a role than it may admit.
pub type AgentId = u32;

/// Identifier of a context object (a shift, a machine's maintenance record).
pub type ContextId = u32;

/// Logical time. There is no wall clock in the kernel.
pub type Step = usize;

/// An observed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attribute {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Attribute {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<usize> for Attribute {
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Snapshot of an agent's named attributes, ordered by name so snapshots
/// serialize identically across runs.
pub type Attributes = BTreeMap<String, Attribute>;

/// An entity with observable, mutable state.
///
/// Agents never validate effects themselves: the engine only hands an
/// effect to agents it admitted into a role this step.
pub trait Agent {
    /// Named effect applied by unit actuation.
    type Effect;

    fn id(&self) -> AgentId;

    /// Finite state tag, e.g. `Running` or `Cancelled`.
    fn state_tag(&self) -> &'static str;

    /// Snapshot of the agent's attributes.
    fn observe(&self) -> Attributes;

    /// Apply an effect. Effects should be idempotent where possible.
    fn apply_effect(&mut self, effect: &Self::Effect);
}
