//! The World trait: abstraction over the agent pool and shared context state.
//!
//! A world owns every agent of a simulation run plus whatever context state
//! its coordination units read and mutate (shift rosters, maintenance
//! records). The kernel only reads agents and hands named effects to agents
//! a unit admitted; advancing the world between steps is the caller's job.

use crate::agent::{Agent, AgentId};

pub trait World {
    type Agent: Agent;

    /// Ids of all live agents, ascending.
    fn agent_ids(&self) -> Vec<AgentId>;

    fn agent(&self, id: AgentId) -> Option<&Self::Agent>;

    fn agent_mut(&mut self, id: AgentId) -> Option<&mut Self::Agent>;

    /// Apply an effect to one agent. Returns `false` if the agent is gone.
    fn apply(&mut self, id: AgentId, effect: &<Self::Agent as Agent>::Effect) -> bool {
        match self.agent_mut(id) {
            Some(agent) => {
                agent.apply_effect(effect);
                true
            }
            None => false,
        }
    }

    /// Apply an effect to each agent in `ids`, in order.
    fn apply_all(&mut self, ids: &[AgentId], effect: &<Self::Agent as Agent>::Effect) {
        for id in ids {
            self.apply(*id, effect);
        }
    }
}
