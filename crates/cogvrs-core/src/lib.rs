//! Simulation engine for the Cogvrs artificial-life sandbox.
//!
//! A [`WorldState`] owns every agent, resource, and tribe. Callers drive it with
//! [`WorldState::tick`] (or [`WorldState::step`]) and observe it through
//! [`WorldState::snapshot`]; nothing else mutates simulation state.

pub mod agent;
pub mod config;
pub mod geometry;
pub mod motivation;
pub mod perception;
pub mod reproduction;
pub mod resources;
pub mod snapshot;
pub mod tribe;
pub mod world;

use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, new_key_type};

pub use agent::{AgentData, Genome, Generation, Trait, Traits};
pub use config::{CogvrsConfig, ConfigError};
pub use geometry::{BoundaryMode, Bounds, Vec2};
pub use motivation::{Action, ActionKind, Drive};
pub use resources::{Environment, ResourceKind};
pub use snapshot::WorldSnapshot;
pub use tribe::{DecisionMode, Role, TribalReport, TribalResponse};
pub use world::WorldState;

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    pub struct AgentId;

    /// Stable handle for tribes.
    pub struct TribeId;
}

/// Convenience alias for associating side data with agents.
pub type AgentMap<T> = SecondaryMap<AgentId, T>;

/// Discrete simulation tick counter.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    pub births: usize,
    pub deaths: usize,
    /// Present on ticks that ran tribal maintenance.
    pub tribal: Option<TribalReport>,
    pub resources_revived: usize,
    pub resources_spawned: usize,
}

/// Summary retained in the world's history and handed to persistence hooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub population: usize,
    pub births: usize,
    pub deaths: usize,
    pub tribes: usize,
    pub average_energy: f32,
    pub average_health: f32,
    pub average_age: f32,
}

/// Event type recorded for persistence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PersistenceEventKind {
    Births,
    Deaths,
    TribesFormed,
    TribesDissolved,
    Conflicts,
}

/// Structured persistence event entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceEvent {
    pub kind: PersistenceEventKind,
    pub count: usize,
}

impl PersistenceEvent {
    /// Construct a new event entry.
    #[must_use]
    pub fn new(kind: PersistenceEventKind, count: usize) -> Self {
        Self { kind, count }
    }
}

/// Aggregate payload forwarded to persistence sinks.
#[derive(Debug, Clone)]
pub struct PersistenceBatch {
    pub summary: TickSummary,
    pub events: Vec<PersistenceEvent>,
    pub snapshot: WorldSnapshot,
}

/// Persistence sink invoked every `persistence_interval` ticks.
pub trait WorldPersistence: Send {
    fn on_tick(&mut self, payload: &PersistenceBatch);
}

/// No-op persistence sink.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl WorldPersistence for NullPersistence {
    fn on_tick(&mut self, _payload: &PersistenceBatch) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_advances_and_resets() {
        let t = Tick::zero().next().next();
        assert_eq!(t, Tick(2));
        assert_eq!(Tick::zero(), Tick::default());
    }

    #[test]
    fn tick_events_round_trip_through_json() {
        let events = TickEvents {
            tick: Tick(7),
            births: 1,
            deaths: 2,
            tribal: Some(TribalReport {
                formed: 1,
                ..TribalReport::default()
            }),
            ..TickEvents::default()
        };
        let json = serde_json::to_string(&events).expect("serialize");
        let back: TickEvents = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, events);
    }
}
