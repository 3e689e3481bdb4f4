//! Read-only, serialisable views of world state.

use serde::{Deserialize, Serialize};

use crate::agent::{Generation, Traits};
use crate::geometry::Vec2;
use crate::motivation::ActionKind;
use crate::resources::{Environment, ResourceKind};
use crate::tribe::{CivilizationLevel, DecisionMode, Role, Territory, TribalResponse};
use crate::{AgentId, Tick, TribeId};

/// One living agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub energy: f32,
    pub health: f32,
    pub age: f32,
    pub offspring_count: u32,
    pub social_interactions: u32,
    pub generation: Generation,
    pub tribe: Option<TribeId>,
    pub traits: Traits,
    pub last_action: Option<ActionKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSnapshot {
    pub position: Vec2,
    pub kind: ResourceKind,
    pub value: f32,
    pub depleted: bool,
}

/// One tribe, with roles listed in member order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TribeSnapshot {
    pub id: TribeId,
    pub name: String,
    pub members: Vec<AgentId>,
    pub leader: AgentId,
    pub territory: Territory,
    pub roles: Vec<(AgentId, Role)>,
    pub decision_mode: DecisionMode,
    pub directive: Option<TribalResponse>,
    pub material: f32,
    pub knowledge: f32,
    pub technology_level: u32,
    pub civilization: CivilizationLevel,
}

/// Relationship between two tribes; `a < b`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationSnapshot {
    pub a: TribeId,
    pub b: TribeId,
    pub score: f32,
    pub allied: bool,
}

/// Population-wide scalars.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldAggregates {
    pub population: usize,
    pub average_energy: f32,
    pub average_health: f32,
    pub average_age: f32,
    pub total_offspring: u64,
    pub total_interactions: u64,
    pub tribe_count: usize,
    pub resources_available: usize,
}

/// Point-in-time view consumed by renderers and reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldSnapshot {
    pub tick: Tick,
    pub environment: Environment,
    pub agents: Vec<AgentSnapshot>,
    pub resources: Vec<ResourceSnapshot>,
    pub tribes: Vec<TribeSnapshot>,
    pub relations: Vec<RelationSnapshot>,
    pub aggregates: WorldAggregates,
}

impl WorldSnapshot {
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&AgentSnapshot> {
        self.agents.iter().find(|a| a.id == id)
    }

    #[must_use]
    pub fn tribe(&self, id: TribeId) -> Option<&TribeSnapshot> {
        self.tribes.iter().find(|t| t.id == id)
    }

    /// Compact JSON encoding.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl WorldAggregates {
    /// Fold agent rows into aggregates; tribe and resource counts are filled by the caller.
    #[must_use]
    pub fn from_agents(agents: &[AgentSnapshot]) -> Self {
        let population = agents.len();
        let mut aggregates = Self {
            population,
            ..Self::default()
        };
        if population == 0 {
            return aggregates;
        }
        let n = population as f32;
        aggregates.average_energy = agents.iter().map(|a| a.energy).sum::<f32>() / n;
        aggregates.average_health = agents.iter().map(|a| a.health).sum::<f32>() / n;
        aggregates.average_age = agents.iter().map(|a| a.age).sum::<f32>() / n;
        aggregates.total_offspring = agents.iter().map(|a| u64::from(a.offspring_count)).sum();
        aggregates.total_interactions = agents
            .iter()
            .map(|a| u64::from(a.social_interactions))
            .sum();
        aggregates
    }
}
