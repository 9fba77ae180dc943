//! ClaimLedger: per-step record of which unit admitted which agent.
//!
//! Implements a reservation system within a step:
//! - Every admission is recorded as a claim held by (unit, context, role)
//! - Exclusive roles skip agents already held exclusively by another unit
//!   instance in the same step
//! - Claims reset at step boundaries
//!
//! Because units resolve in priority order, a higher-priority unit always
//! wins a contested agent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::agent::{AgentId, ContextId};

/// A single admission of an agent into a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub unit: String,
    pub context: ContextId,
    pub role: String,
    pub exclusive: bool,
}

impl Claim {
    fn same_instance(&self, unit: &str, context: ContextId) -> bool {
        self.unit == unit && self.context == context
    }
}

#[derive(Debug, Default, Clone)]
pub struct ClaimLedger {
    claims: BTreeMap<AgentId, Vec<Claim>>,
    /// Admissions granted this step
    granted: usize,
    /// Candidates skipped because another unit held them exclusively
    denied: usize,
}

impl ClaimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all claims for a new step.
    pub fn reset(&mut self) {
        if self.granted > 0 || self.denied > 0 {
            debug!(
                granted = self.granted,
                denied = self.denied,
                agents = self.claims.len(),
                "ClaimLedger step summary"
            );
        }
        self.claims.clear();
        self.granted = 0;
        self.denied = 0;
    }

    /// Whether a unit instance other than (`unit`, `context`) holds an
    /// exclusive claim on `agent`.
    pub fn held_by_other(&self, agent: AgentId, unit: &str, context: ContextId) -> bool {
        self.claims.get(&agent).is_some_and(|held| {
            held.iter()
                .any(|c| c.exclusive && !c.same_instance(unit, context))
        })
    }

    pub fn grant(&mut self, agent: AgentId, claim: Claim) {
        trace!(
            agent = agent,
            unit = %claim.unit,
            context = claim.context,
            role = %claim.role,
            "Claim granted"
        );
        self.claims.entry(agent).or_default().push(claim);
        self.granted += 1;
    }

    pub fn note_denied(&mut self) {
        self.denied += 1;
    }

    /// Claims currently held on an agent.
    pub fn claims_of(&self, agent: AgentId) -> &[Claim] {
        self.claims.get(&agent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn granted(&self) -> usize {
        self.granted
    }

    pub fn denied(&self) -> usize {
        self.denied
    }
}
