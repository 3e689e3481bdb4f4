//! Fixed-length perception vectors built from pre-tick world state.

use serde::{Deserialize, Serialize};

use crate::agent::{AgentData, MAX_HEALTH};
use crate::geometry::{Bounds, Vec2};
use crate::resources::{Environment, ResourceKind};
use crate::{AgentId, TribeId};

/// Length of the vector fed to neural evaluators.
pub const PERCEPTION_SIZE: usize = 18;
/// Evaluator outputs read by the decision pipeline.
pub const DECISION_OUTPUTS: usize = 9;
/// Outputs `0..GATE_OUTPUTS` gate the six drives, in [`crate::Drive::ALL`] order.
pub const GATE_OUTPUTS: usize = 6;
/// Output holding the x component of the preferred heading.
pub const OUTPUT_HEADING_X: usize = 6;
/// Output holding the y component of the preferred heading.
pub const OUTPUT_HEADING_Y: usize = 7;
/// Output holding the preferred movement intensity.
pub const OUTPUT_INTENSITY: usize = 8;

/// A resource seen during perception.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResourceSighting {
    pub index: usize,
    pub position: Vec2,
    pub kind: ResourceKind,
    pub value: f32,
    pub distance: f32,
}

/// Another agent seen during perception.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AgentSighting {
    pub id: AgentId,
    pub position: Vec2,
    pub distance: f32,
    pub energy: f32,
    pub aggression: f32,
    pub tribe: Option<TribeId>,
}

/// Normalisation constants for the perception vector.
#[derive(Debug, Clone, Copy)]
pub struct PerceptionScales {
    pub bounds: Bounds,
    pub radius: f32,
    pub max_energy: f32,
    pub max_lifespan: f32,
    pub max_speed: f32,
    pub max_offspring: u32,
    pub resource_capacity: f32,
}

/// Everything an agent knows about its surroundings for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Perception {
    pub nearest_resource: Option<ResourceSighting>,
    pub nearest_agent: Option<AgentSighting>,
    pub resource_count: usize,
    pub neighbor_count: usize,
    /// Strength of nearby threats in [0, 1].
    pub threat: f32,
    /// Mean position of threatening neighbors.
    pub threat_center: Option<Vec2>,
    /// Local density in [0, 1].
    pub crowding: f32,
}

fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

fn signed_unit(value: f32) -> f32 {
    value.clamp(-1.0, 1.0)
}

impl Perception {
    /// Encode into the evaluator input layout.
    ///
    /// Slots: 0-6 self vitals and position, 7-11 nearest resource, 12-15 nearest
    /// agent and neighbor count, 16-17 environment.
    #[must_use]
    pub fn encode(
        &self,
        agent: &AgentData,
        scales: &PerceptionScales,
        environment: &Environment,
    ) -> [f32; PERCEPTION_SIZE] {
        let mut v = [0.0; PERCEPTION_SIZE];
        v[0] = clamp01(agent.energy / scales.max_energy);
        v[1] = clamp01(agent.health / MAX_HEALTH);
        v[2] = clamp01(agent.age / scales.max_lifespan);
        v[3] = clamp01(agent.velocity.length() / scales.max_speed);
        v[4] = if scales.max_offspring == 0 {
            1.0
        } else {
            clamp01(agent.offspring_count as f32 / scales.max_offspring as f32)
        };
        v[5] = clamp01(agent.position.x / scales.bounds.width);
        v[6] = clamp01(agent.position.y / scales.bounds.height);
        if let Some(resource) = &self.nearest_resource {
            let delta = resource.position - agent.position;
            v[7] = 1.0;
            v[8] = signed_unit(delta.x / scales.radius);
            v[9] = signed_unit(delta.y / scales.radius);
            v[10] = clamp01(resource.value / scales.resource_capacity);
        }
        v[11] = clamp01(self.resource_count as f32 / 5.0);
        if let Some(other) = &self.nearest_agent {
            let delta = other.position - agent.position;
            v[12] = 1.0;
            v[13] = signed_unit(delta.x / scales.radius);
            v[14] = signed_unit(delta.y / scales.radius);
        }
        v[15] = clamp01(self.neighbor_count as f32 / 10.0);
        v[16] = environment.normalized_temperature();
        v[17] = clamp01(environment.daylight);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tick;

    fn scales() -> PerceptionScales {
        PerceptionScales {
            bounds: Bounds::new(100.0, 50.0),
            radius: 10.0,
            max_energy: 150.0,
            max_lifespan: 400.0,
            max_speed: 2.0,
            max_offspring: 3,
            resource_capacity: 100.0,
        }
    }

    #[test]
    fn empty_surroundings_leave_descriptor_slots_zero() {
        let agent = AgentData::new(Vec2::new(50.0, 25.0), 75.0);
        let v = Perception::default().encode(&agent, &scales(), &Environment::default());
        assert_eq!(v[0], 0.5);
        assert_eq!(v[1], 1.0);
        assert_eq!(v[5], 0.5);
        assert_eq!(v[6], 0.5);
        assert!(v[7..=15].iter().all(|x| *x == 0.0));
        assert!(v.iter().all(|x| (-1.0..=1.0).contains(x)));
    }

    #[test]
    fn descriptors_point_toward_targets() {
        let agent = AgentData::new(Vec2::new(10.0, 10.0), 75.0);
        let perception = Perception {
            nearest_resource: Some(ResourceSighting {
                index: 0,
                position: Vec2::new(15.0, 10.0),
                kind: ResourceKind::Food,
                value: 50.0,
                distance: 5.0,
            }),
            nearest_agent: Some(AgentSighting {
                id: AgentId::default(),
                position: Vec2::new(10.0, 0.0),
                distance: 10.0,
                energy: 10.0,
                aggression: 0.1,
                tribe: None,
            }),
            resource_count: 10,
            neighbor_count: 5,
            ..Perception::default()
        };
        let env = Environment::at_tick(Tick(250), 1_000);
        let v = perception.encode(&agent, &scales(), &env);
        assert_eq!(&v[7..12], &[1.0, 0.5, 0.0, 0.5, 1.0]);
        assert_eq!(&v[12..16], &[1.0, 0.0, -1.0, 0.5]);
        assert!(v[17] > 0.99);
    }
}
