//! Agent state: physical columns, heritable genome, and the dense arena holding them.

use cogvrs_brain::{NeuralEvaluator, gaussian};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::{HashSet, VecDeque};

use crate::geometry::Vec2;
use crate::motivation::{ActionKind, MotivationEngine};
use crate::{AgentId, TribeId};

/// Upper bound for agent health.
pub const MAX_HEALTH: f32 = 100.0;

/// Number of heritable personality traits.
pub const TRAIT_COUNT: usize = 7;

const RECENT_CELL_MEMORY: usize = 32;

/// Named personality trait scalars carried in every genome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Trait {
    Exploration,
    Cooperation,
    Aggression,
    Curiosity,
    RiskTaking,
    SocialActivity,
    /// Fraction of consumed yield converted into energy.
    Efficiency,
}

impl Trait {
    pub const ALL: [Self; TRAIT_COUNT] = [
        Self::Exploration,
        Self::Cooperation,
        Self::Aggression,
        Self::Curiosity,
        Self::RiskTaking,
        Self::SocialActivity,
        Self::Efficiency,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exploration => "exploration",
            Self::Cooperation => "cooperation",
            Self::Aggression => "aggression",
            Self::Curiosity => "curiosity",
            Self::RiskTaking => "risk_taking",
            Self::SocialActivity => "social_activity",
            Self::Efficiency => "efficiency",
        }
    }

    /// Range sampled for founders.
    const fn initial_range(self) -> (f32, f32) {
        match self {
            Self::Exploration => (0.2, 0.8),
            Self::Cooperation => (0.1, 0.9),
            Self::Aggression => (0.0, 0.3),
            Self::Curiosity => (0.3, 0.9),
            Self::RiskTaking => (0.1, 0.7),
            Self::SocialActivity => (0.2, 0.8),
            Self::Efficiency => (0.6, 1.0),
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

/// Trait scalars, each clamped to [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Traits([f32; TRAIT_COUNT]);

impl Default for Traits {
    fn default() -> Self {
        let mut values = [0.0; TRAIT_COUNT];
        for t in Trait::ALL {
            let (lo, hi) = t.initial_range();
            values[t.slot()] = (lo + hi) * 0.5;
        }
        Self(values)
    }
}

impl Traits {
    /// Every trait set to `value`.
    #[must_use]
    pub fn uniform(value: f32) -> Self {
        Self([value.clamp(0.0, 1.0); TRAIT_COUNT])
    }

    /// Founder traits sampled from their initial ranges.
    pub fn random(rng: &mut dyn RngCore) -> Self {
        let mut values = [0.0; TRAIT_COUNT];
        for t in Trait::ALL {
            let (lo, hi) = t.initial_range();
            values[t.slot()] = rng.random_range(lo..=hi);
        }
        Self(values)
    }

    #[must_use]
    pub fn get(&self, t: Trait) -> f32 {
        self.0[t.slot()]
    }

    pub fn set(&mut self, t: Trait, value: f32) {
        self.0[t.slot()] = value.clamp(0.0, 1.0);
    }

    /// Builder-style variant of [`Traits::set`].
    #[must_use]
    pub fn with(mut self, t: Trait, value: f32) -> Self {
        self.set(t, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Trait, f32)> + '_ {
        Trait::ALL.iter().map(|t| (*t, self.0[t.slot()]))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// `1 - mean |a - b|`; symmetric and in [0, 1].
    #[must_use]
    pub fn similarity(&self, other: &Self) -> f32 {
        let diff: f32 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        1.0 - diff / TRAIT_COUNT as f32
    }

    /// `alpha * primary + (1 - alpha) * secondary`, slot by slot.
    #[must_use]
    pub fn blend(primary: &Self, secondary: &Self, alpha: f32) -> Self {
        let alpha = alpha.clamp(0.0, 1.0);
        let mut values = [0.0; TRAIT_COUNT];
        for (slot, value) in values.iter_mut().enumerate() {
            *value = (alpha * primary.0[slot] + (1.0 - alpha) * secondary.0[slot]).clamp(0.0, 1.0);
        }
        Self(values)
    }

    /// Add Gaussian noise to each trait with probability `rate`; returns how many changed.
    pub fn mutate(&mut self, rng: &mut dyn RngCore, rate: f32, strength: f32) -> usize {
        let mut changed = 0;
        for value in &mut self.0 {
            if rng.random::<f32>() < rate {
                *value = (*value + gaussian(rng) * strength).clamp(0.0, 1.0);
                changed += 1;
            }
        }
        changed
    }
}

/// Heritable state: evaluator weights plus personality traits.
#[derive(Debug, Clone)]
pub struct Genome {
    pub traits: Traits,
    pub brain: Box<dyn NeuralEvaluator>,
}

/// Lineage counter (agents produced by reproduction increment this).
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Generation(pub u32);

impl Generation {
    /// Advances to the next lineage generation.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Scalar fields for a single agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AgentData {
    pub position: Vec2,
    pub velocity: Vec2,
    pub energy: f32,
    pub health: f32,
    /// Age in simulated time units.
    pub age: f32,
    pub alive: bool,
    pub offspring_count: u32,
    pub social_interactions: u32,
    pub generation: Generation,
    /// Non-owning reference to the tribe this agent belongs to.
    pub tribe: Option<TribeId>,
}

impl AgentData {
    /// A fresh, healthy, unaffiliated agent at `position`.
    #[must_use]
    pub fn new(position: Vec2, energy: f32) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            energy,
            health: MAX_HEALTH,
            age: 0.0,
            alive: true,
            offspring_count: 0,
            social_interactions: 0,
            generation: Generation::default(),
            tribe: None,
        }
    }

    /// Whether the vitals call for death under `max_lifespan`.
    #[must_use]
    pub fn should_die(&self, max_lifespan: f32) -> bool {
        self.energy <= 0.0 || self.health <= 0.0 || self.age > max_lifespan
    }
}

impl Default for AgentData {
    fn default() -> Self {
        Self::new(Vec2::ZERO, 100.0)
    }
}

/// Short-term memory used for novelty rewards and learning.
#[derive(Debug, Clone, Default)]
pub struct AgentMemory {
    recent_cells: VecDeque<(i32, i32)>,
    /// Evaluator outputs from the latest decision.
    pub last_outputs: Vec<f32>,
    pub last_action: Option<ActionKind>,
    pub last_reward: f32,
    pub cumulative_reward: f32,
    /// Reward earned after learning ran (births), credited at the next learning step.
    pub pending_reward: f32,
}

impl AgentMemory {
    /// Record a visit; returns true when the cell was not among the recently visited ones.
    pub fn visit(&mut self, cell: (i32, i32)) -> bool {
        if self.recent_cells.contains(&cell) {
            return false;
        }
        if self.recent_cells.len() == RECENT_CELL_MEMORY {
            self.recent_cells.pop_front();
        }
        self.recent_cells.push_back(cell);
        true
    }
}

/// Per-agent runtime data that is not plain scalar state.
#[derive(Debug, Clone)]
pub struct AgentRuntime {
    pub genome: Genome,
    pub motivations: MotivationEngine,
    pub memory: AgentMemory,
}

impl AgentRuntime {
    #[must_use]
    pub fn new(genome: Genome) -> Self {
        Self {
            genome,
            motivations: MotivationEngine::default(),
            memory: AgentMemory::default(),
        }
    }

    #[must_use]
    pub fn traits(&self) -> &Traits {
        &self.genome.traits
    }
}

/// Dense storage with generational handles; iteration order is insertion order.
#[derive(Debug)]
pub struct AgentArena {
    slots: SlotMap<AgentId, usize>,
    handles: Vec<AgentId>,
    rows: Vec<AgentData>,
}

impl Default for AgentArena {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
            handles: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Number of stored agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over agent handles in dense (birth) order.
    pub fn iter_handles(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.handles.iter().copied()
    }

    /// Iterate over `(handle, data)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (AgentId, &AgentData)> + '_ {
        self.handles.iter().copied().zip(self.rows.iter())
    }

    /// Dense handle slice.
    #[must_use]
    pub fn handles(&self) -> &[AgentId] {
        &self.handles
    }

    #[must_use]
    pub fn rows(&self) -> &[AgentData] {
        &self.rows
    }

    #[must_use]
    pub fn rows_mut(&mut self) -> &mut [AgentData] {
        &mut self.rows
    }

    /// Returns the dense index for `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Returns true if `id` refers to a stored agent.
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.slots.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<&AgentData> {
        self.index_of(id).map(|idx| &self.rows[idx])
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut AgentData> {
        let idx = self.index_of(id)?;
        self.rows.get_mut(idx)
    }

    /// Insert a new agent and return its handle.
    pub fn insert(&mut self, agent: AgentData) -> AgentId {
        let index = self.rows.len();
        self.rows.push(agent);
        let id = self.slots.insert(index);
        self.handles.push(id);
        id
    }

    /// Remove all agents whose ids are contained in `dead`, preserving iteration order.
    pub fn remove_many(&mut self, dead: &HashSet<AgentId>) -> usize {
        if dead.is_empty() {
            return 0;
        }
        let mut write = 0;
        for read in 0..self.handles.len() {
            let id = self.handles[read];
            if dead.contains(&id) {
                self.slots.remove(id);
                continue;
            }
            if write != read {
                self.handles[write] = id;
                self.rows[write] = self.rows[read];
            }
            if let Some(slot) = self.slots.get_mut(id) {
                *slot = write;
            }
            write += 1;
        }
        let removed = self.handles.len().saturating_sub(write);
        self.handles.truncate(write);
        self.rows.truncate(write);
        removed
    }

    /// Remove a single agent, preserving iteration order.
    pub fn remove(&mut self, id: AgentId) -> Option<AgentData> {
        let data = self.get(id).copied()?;
        self.remove_many(&HashSet::from([id]));
        Some(data)
    }
}
