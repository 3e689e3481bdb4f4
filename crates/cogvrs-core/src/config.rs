//! World configuration and its validation.

use cogvrs_brain::{ActivationKind, EvaluatorError, MutationParams, NetworkLayout};
use cogvrs_index::IndexError;
use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{BoundaryMode, Bounds};
use crate::perception::{DECISION_OUTPUTS, PERCEPTION_SIZE};
use crate::tribe::DecisionMode;

/// Failures surfaced while constructing a world. Nothing else is ever reported to callers.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The configuration document could not be parsed or named an unknown option.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// The neural evaluator layout is unusable.
    #[error("invalid neural layout: {0}")]
    Topology(#[from] EvaluatorError),
    /// The spatial index rejected its parameters.
    #[error("spatial index rejected configuration: {0}")]
    Index(#[from] IndexError),
}

/// Static configuration for a Cogvrs world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CogvrsConfig {
    /// Width of the world in world units.
    pub world_width: f32,
    /// Height of the world in world units.
    pub world_height: f32,
    /// Edge behaviour for moving agents.
    pub boundary: BoundaryMode,
    /// Agents spawned by [`crate::WorldState::populate`].
    pub initial_agents: usize,
    /// Hard cap on living agents; reproduction stops at this size.
    pub max_population: usize,
    /// Radius within which agents see other agents and resources.
    pub perception_radius: f32,
    /// Radius within which communication and cooperation succeed.
    pub interaction_radius: f32,
    /// Maximum agent speed in world units per time unit.
    pub max_speed: f32,
    /// Time step used by [`crate::WorldState::step`].
    pub time_step: f32,
    /// Ticks in one full day/night cycle.
    pub day_length: u32,
    /// Extra metabolic load per unit of temperature stress.
    pub climate_sensitivity: f32,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
    /// Interval (ticks) between persistence flushes. 0 disables persistence.
    pub persistence_interval: u32,
    pub resources: ResourceConfig,
    pub vitals: VitalsConfig,
    pub decision: DecisionConfig,
    pub neural: NeuralConfig,
    pub mutation: MutationConfig,
    pub reproduction: ReproductionConfig,
    pub tribal: TribalConfig,
}

impl Default for CogvrsConfig {
    fn default() -> Self {
        Self {
            world_width: 100.0,
            world_height: 100.0,
            boundary: BoundaryMode::Bounded,
            initial_agents: 20,
            max_population: 50,
            perception_radius: 10.0,
            interaction_radius: 5.0,
            max_speed: 2.0,
            time_step: 0.1,
            day_length: 1_000,
            climate_sensitivity: 0.1,
            rng_seed: None,
            history_capacity: 256,
            persistence_interval: 0,
            resources: ResourceConfig::default(),
            vitals: VitalsConfig::default(),
            decision: DecisionConfig::default(),
            neural: NeuralConfig::default(),
            mutation: MutationConfig::default(),
            reproduction: ReproductionConfig::default(),
            tribal: TribalConfig::default(),
        }
    }
}

/// Resource field generation and regrowth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceConfig {
    /// Resources generated per unit of world area.
    pub density: f32,
    /// Lower bound of the initial yield of a new resource.
    pub min_value: f32,
    /// Upper bound of the initial yield of a new resource.
    pub max_value: f32,
    /// Yield ceiling reached through regrowth.
    pub capacity: f32,
    pub min_regen_rate: f32,
    pub max_regen_rate: f32,
    /// Chance per time unit that a depleted resource becomes available again.
    pub respawn_chance: f32,
    /// Fraction of capacity a respawned resource starts with.
    pub respawn_fraction: f32,
    /// Ticks between spawns of brand new resources; 0 disables.
    pub spawn_interval: u32,
    pub spawn_count: usize,
    /// Upper bound on the number of resource nodes.
    pub max_resources: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            density: 0.1,
            min_value: 20.0,
            max_value: 100.0,
            capacity: 100.0,
            min_regen_rate: 0.05,
            max_regen_rate: 0.2,
            respawn_chance: 0.02,
            respawn_fraction: 0.3,
            spawn_interval: 200,
            spawn_count: 5,
            max_resources: 2_000,
        }
    }
}

/// Energy, health, and aging parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VitalsConfig {
    pub max_energy: f32,
    /// Energy assigned to agents created by `populate`.
    pub initial_energy: f32,
    /// Energy burned per time unit just by existing.
    pub base_metabolism: f32,
    /// Energy burned per unit of speed per time unit.
    pub movement_cost: f32,
    /// Energy burned per unit of evaluator complexity per time unit.
    pub brain_cost_rate: f32,
    /// Below this energy health starts to decay.
    pub low_energy_threshold: f32,
    /// Above this energy health recovers.
    pub high_energy_threshold: f32,
    pub health_decay: f32,
    pub health_recovery: f32,
    /// Age after which health decays with excess age.
    pub elderly_age: f32,
    /// Health lost per time unit for each unit of age past `elderly_age`.
    pub elderly_decay: f32,
    /// Age at which an agent dies regardless of vitals.
    pub max_lifespan: f32,
    /// Reach within which an agent can consume a resource.
    pub eat_radius: f32,
    /// Maximum yield removed by one consume action.
    pub bite_size: f32,
    /// Fraction of consumed yield credited to health.
    pub health_gain_fraction: f32,
    /// Health regained per time unit while resting.
    pub rest_recovery: f32,
    /// Minimum energy before an agent will share with a partner.
    pub share_threshold: f32,
    /// Cap on energy shared in one cooperative act.
    pub share_amount: f32,
    /// Fraction of the sharer's energy offered in one cooperative act.
    pub share_fraction: f32,
    /// Energy value of material relative to food for agents without a tribe.
    pub material_energy_fraction: f32,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            max_energy: 150.0,
            initial_energy: 100.0,
            base_metabolism: 0.5,
            movement_cost: 0.1,
            brain_cost_rate: 0.001,
            low_energy_threshold: 20.0,
            high_energy_threshold: 80.0,
            health_decay: 1.0,
            health_recovery: 0.5,
            elderly_age: 200.0,
            elderly_decay: 0.01,
            max_lifespan: 400.0,
            eat_radius: 1.5,
            bite_size: 20.0,
            health_gain_fraction: 0.1,
            rest_recovery: 2.0,
            share_threshold: 30.0,
            share_amount: 10.0,
            share_fraction: 0.1,
            material_energy_fraction: 0.25,
        }
    }
}

/// Motivation engine and reward shaping knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DecisionConfig {
    /// Probability that the selected action is replaced by a random alternative.
    pub exploration_rate: f32,
    /// How strongly evaluator outputs scale motivation strengths (0 disables gating).
    pub neural_gating: f32,
    /// Reward expected from an average action.
    pub reward_baseline: f32,
    /// Edge length of the cells used to detect novel-area discovery.
    pub novelty_cell_size: f32,
    /// Distance an agent tries to put between itself and a threat.
    pub flee_distance: f32,
    /// Distance at which a social approach stops.
    pub social_distance: f32,
    /// Aggression above which a neighbor counts as a threat.
    pub threat_aggression: f32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            exploration_rate: 0.05,
            neural_gating: 0.3,
            reward_baseline: 0.5,
            novelty_cell_size: 5.0,
            flee_distance: 10.0,
            social_distance: 3.0,
            threat_aggression: 0.5,
        }
    }
}

/// Neural evaluator dimensions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NeuralConfig {
    /// Must equal the perception vector length.
    pub input_size: usize,
    pub hidden_layers: Vec<usize>,
    /// Must equal the number of decision outputs the engine reads.
    pub output_size: usize,
    pub hidden_activation: ActivationKind,
    pub output_activation: ActivationKind,
    pub learning_rate: f32,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            input_size: PERCEPTION_SIZE,
            hidden_layers: vec![32, 16],
            output_size: DECISION_OUTPUTS,
            hidden_activation: ActivationKind::Tanh,
            output_activation: ActivationKind::Sigmoid,
            learning_rate: 0.01,
        }
    }
}

impl NeuralConfig {
    /// Evaluator layout described by this section.
    #[must_use]
    pub fn layout(&self) -> NetworkLayout {
        NetworkLayout {
            input_size: self.input_size,
            hidden: self.hidden_layers.clone(),
            output_size: self.output_size,
            hidden_activation: self.hidden_activation,
            output_activation: self.output_activation,
            learning_rate: self.learning_rate,
        }
    }
}

/// Genome mutation applied to every child.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MutationConfig {
    /// Per-weight probability of Gaussian noise.
    pub rate: f32,
    /// Standard deviation of weight noise.
    pub strength: f32,
    /// Share of `rate` that zeroes or introduces a connection.
    pub structural_rate: f32,
    /// Share of `rate` applied per trait; a zero `rate` leaves traits unmutated.
    pub trait_rate: f32,
    /// Standard deviation of trait noise.
    pub trait_strength: f32,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            rate: 0.1,
            strength: 0.05,
            structural_rate: 0.01,
            trait_rate: 1.0,
            trait_strength: 0.05,
        }
    }
}

impl MutationConfig {
    #[must_use]
    pub fn weight_params(&self) -> MutationParams {
        MutationParams {
            rate: self.rate,
            strength: self.strength,
            structural_rate: self.structural_rate,
        }
    }
}

/// Eligibility thresholds and costs for mating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ReproductionConfig {
    pub min_energy: f32,
    pub min_age: f32,
    pub min_health: f32,
    pub max_offspring: u32,
    /// Parents must be strictly closer than this.
    pub proximity: f32,
    /// Energy deducted from each parent.
    pub energy_cost: f32,
    /// Energy a child starts with.
    pub child_energy: f32,
    /// Maximum offset of the child from the parents' midpoint.
    pub spawn_jitter: f32,
}

impl Default for ReproductionConfig {
    fn default() -> Self {
        Self {
            min_energy: 80.0,
            min_age: 50.0,
            min_health: 50.0,
            max_offspring: 3,
            proximity: 3.0,
            energy_cost: 30.0,
            child_energy: 60.0,
            spawn_jitter: 2.0,
        }
    }
}

/// Weights of the leadership score components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LeadershipWeights {
    pub social: f32,
    pub survival: f32,
    pub resources: f32,
    pub personality: f32,
}

impl Default for LeadershipWeights {
    fn default() -> Self {
        Self {
            social: 0.3,
            survival: 0.3,
            resources: 0.2,
            personality: 0.2,
        }
    }
}

/// Weights of the affinity score components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AffinityWeights {
    pub traits: f32,
    pub age: f32,
    pub energy: f32,
}

impl Default for AffinityWeights {
    fn default() -> Self {
        Self {
            traits: 0.5,
            age: 0.25,
            energy: 0.25,
        }
    }
}

/// Tribal clustering, decision, and diplomacy parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TribalConfig {
    /// Ticks between maintenance passes; 0 disables tribes.
    pub check_interval: u32,
    /// Unaffiliated agents required before new tribes are seeded.
    pub formation_population: usize,
    /// Radius around a seed within which members are recruited.
    pub spatial_proximity: f32,
    /// Minimum affinity for joining a cluster.
    pub affinity_threshold: f32,
    pub min_tribe_size: usize,
    pub max_tribe_size: usize,
    /// Multiplier applied to the farthest member distance to obtain the territory radius.
    pub territory_buffer: f32,
    pub territory_min_radius: f32,
    /// Decision procedure assigned to newly formed tribes.
    pub decision_mode: DecisionMode,
    /// Lowest member preference a consensus response may have.
    pub consensus_floor: f32,
    /// Territory centers further apart than this never interact.
    pub interaction_range: f32,
    /// Scales the distance-based chance that two tribes interact in a pass.
    pub interaction_chance: f32,
    /// Fraction of the richer tribe's surplus handed over in a trade.
    pub trade_fraction: f32,
    /// Relationship at or below which tribes go to war.
    pub conflict_threshold: f32,
    /// Relationship at or above which tribes ally.
    pub alliance_threshold: f32,
    /// Fraction of health removed from each member of a defeated tribe.
    pub conflict_health_loss: f32,
    /// Fraction of energy removed from each member of a defeated tribe.
    pub conflict_energy_loss: f32,
    pub leadership: LeadershipWeights,
    pub affinity: AffinityWeights,
}

impl Default for TribalConfig {
    fn default() -> Self {
        Self {
            check_interval: 50,
            formation_population: 8,
            spatial_proximity: 30.0,
            affinity_threshold: 0.5,
            min_tribe_size: 3,
            max_tribe_size: 20,
            territory_buffer: 1.5,
            territory_min_radius: 20.0,
            decision_mode: DecisionMode::Democratic,
            consensus_floor: 0.3,
            interaction_range: 150.0,
            interaction_chance: 0.5,
            trade_fraction: 0.1,
            conflict_threshold: -0.5,
            alliance_threshold: 0.5,
            conflict_health_loss: 0.2,
            conflict_energy_loss: 0.2,
            leadership: LeadershipWeights::default(),
            affinity: AffinityWeights::default(),
        }
    }
}

fn non_negative(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite() && *v >= 0.0)
}

fn positive(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite() && *v > 0.0)
}

fn probability(value: f32) -> bool {
    (0.0..=1.0).contains(&value)
}

impl CogvrsConfig {
    /// Parse a JSON document, rejecting unknown options, then validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// World rectangle.
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.world_width, self.world_height)
    }

    /// Check every option; the first violation is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.world_width.is_finite() && self.world_height.is_finite())
            || self.world_width <= 0.0
            || self.world_height <= 0.0
        {
            return Err(ConfigError::InvalidConfig(
                "world dimensions must be positive",
            ));
        }
        if self.max_population == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_population must be non-zero",
            ));
        }
        if self.initial_agents > self.max_population {
            return Err(ConfigError::InvalidConfig(
                "initial_agents cannot exceed max_population",
            ));
        }
        if !positive(&[self.perception_radius, self.interaction_radius]) {
            return Err(ConfigError::InvalidConfig(
                "perception and interaction radii must be positive",
            ));
        }
        if !(self.max_speed.is_finite() && self.max_speed > 0.0) {
            return Err(ConfigError::InvalidConfig("max_speed must be positive"));
        }
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(ConfigError::InvalidConfig("time_step must be positive"));
        }
        if self.day_length == 0 {
            return Err(ConfigError::InvalidConfig("day_length must be non-zero"));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        if !non_negative(&[self.climate_sensitivity]) {
            return Err(ConfigError::InvalidConfig(
                "climate_sensitivity must be non-negative",
            ));
        }
        self.validate_resources()?;
        self.validate_vitals()?;
        self.validate_decision()?;
        self.validate_neural()?;
        self.validate_mutation()?;
        self.validate_reproduction()?;
        self.validate_tribal()
    }

    fn validate_resources(&self) -> Result<(), ConfigError> {
        let r = &self.resources;
        if !non_negative(&[
            r.density,
            r.min_value,
            r.max_value,
            r.min_regen_rate,
            r.max_regen_rate,
            r.respawn_chance,
        ]) {
            return Err(ConfigError::InvalidConfig(
                "resource density, values, and rates must be non-negative",
            ));
        }
        if r.min_value > r.max_value || r.max_value > r.capacity || !positive(&[r.capacity]) {
            return Err(ConfigError::InvalidConfig(
                "resource values must satisfy min_value <= max_value <= capacity",
            ));
        }
        if r.min_regen_rate > r.max_regen_rate {
            return Err(ConfigError::InvalidConfig(
                "resource min_regen_rate cannot exceed max_regen_rate",
            ));
        }
        if !probability(r.respawn_fraction) {
            return Err(ConfigError::InvalidConfig(
                "resource respawn_fraction must lie in [0, 1]",
            ));
        }
        Ok(())
    }

    fn validate_vitals(&self) -> Result<(), ConfigError> {
        let v = &self.vitals;
        if !(v.max_energy.is_finite() && v.max_energy > 0.0) {
            return Err(ConfigError::InvalidConfig("max_energy must be positive"));
        }
        if !(0.0..=v.max_energy).contains(&v.initial_energy) {
            return Err(ConfigError::InvalidConfig(
                "initial_energy must lie in [0, max_energy]",
            ));
        }
        if !non_negative(&[
            v.base_metabolism,
            v.movement_cost,
            v.brain_cost_rate,
            v.low_energy_threshold,
            v.high_energy_threshold,
            v.health_decay,
            v.health_recovery,
            v.elderly_age,
            v.elderly_decay,
            v.eat_radius,
            v.bite_size,
            v.health_gain_fraction,
            v.rest_recovery,
            v.share_threshold,
            v.share_amount,
            v.material_energy_fraction,
        ]) {
            return Err(ConfigError::InvalidConfig(
                "vital rates and thresholds must be non-negative",
            ));
        }
        if v.low_energy_threshold > v.high_energy_threshold {
            return Err(ConfigError::InvalidConfig(
                "low_energy_threshold cannot exceed high_energy_threshold",
            ));
        }
        if !(v.max_lifespan.is_finite() && v.max_lifespan > 0.0) {
            return Err(ConfigError::InvalidConfig("max_lifespan must be positive"));
        }
        if !probability(v.share_fraction) {
            return Err(ConfigError::InvalidConfig(
                "share_fraction must lie in [0, 1]",
            ));
        }
        Ok(())
    }

    fn validate_decision(&self) -> Result<(), ConfigError> {
        let d = &self.decision;
        if !probability(d.exploration_rate) {
            return Err(ConfigError::InvalidConfig(
                "exploration_rate must lie in [0, 1]",
            ));
        }
        if !probability(d.neural_gating) {
            return Err(ConfigError::InvalidConfig(
                "neural_gating must lie in [0, 1]",
            ));
        }
        if !positive(&[d.novelty_cell_size]) {
            return Err(ConfigError::InvalidConfig(
                "novelty_cell_size must be positive",
            ));
        }
        if !non_negative(&[d.flee_distance, d.social_distance, d.reward_baseline]) {
            return Err(ConfigError::InvalidConfig(
                "decision distances and baseline must be non-negative",
            ));
        }
        if !probability(d.threat_aggression) {
            return Err(ConfigError::InvalidConfig(
                "threat_aggression must lie in [0, 1]",
            ));
        }
        Ok(())
    }

    fn validate_neural(&self) -> Result<(), ConfigError> {
        let layout = self.neural.layout();
        layout.validate()?;
        if layout.input_size != PERCEPTION_SIZE {
            return Err(ConfigError::Topology(EvaluatorError::MismatchedTopology {
                index: 0,
                expected: PERCEPTION_SIZE,
                actual: layout.input_size,
            }));
        }
        if layout.output_size != DECISION_OUTPUTS {
            return Err(ConfigError::Topology(EvaluatorError::MismatchedTopology {
                index: layout.hidden.len(),
                expected: DECISION_OUTPUTS,
                actual: layout.output_size,
            }));
        }
        Ok(())
    }

    fn validate_mutation(&self) -> Result<(), ConfigError> {
        let m = &self.mutation;
        if !(probability(m.rate) && probability(m.structural_rate) && probability(m.trait_rate)) {
            return Err(ConfigError::InvalidConfig(
                "mutation rates must lie in [0, 1]",
            ));
        }
        if !non_negative(&[m.strength, m.trait_strength]) {
            return Err(ConfigError::InvalidConfig(
                "mutation strengths must be non-negative",
            ));
        }
        Ok(())
    }

    fn validate_reproduction(&self) -> Result<(), ConfigError> {
        let r = &self.reproduction;
        if !non_negative(&[
            r.min_energy,
            r.min_age,
            r.min_health,
            r.energy_cost,
            r.child_energy,
            r.spawn_jitter,
        ]) {
            return Err(ConfigError::InvalidConfig(
                "reproduction thresholds and costs must be non-negative",
            ));
        }
        if !positive(&[r.proximity]) {
            return Err(ConfigError::InvalidConfig(
                "reproduction proximity must be positive",
            ));
        }
        if r.energy_cost > r.min_energy {
            return Err(ConfigError::InvalidConfig(
                "reproduction energy_cost cannot exceed min_energy",
            ));
        }
        if r.child_energy > self.vitals.max_energy {
            return Err(ConfigError::InvalidConfig(
                "child_energy cannot exceed max_energy",
            ));
        }
        Ok(())
    }

    fn validate_tribal(&self) -> Result<(), ConfigError> {
        let t = &self.tribal;
        if t.min_tribe_size < 2 || t.min_tribe_size > t.max_tribe_size {
            return Err(ConfigError::InvalidConfig(
                "tribe sizes must satisfy 2 <= min_tribe_size <= max_tribe_size",
            ));
        }
        if !positive(&[t.spatial_proximity, t.interaction_range]) {
            return Err(ConfigError::InvalidConfig(
                "tribal proximity and interaction range must be positive",
            ));
        }
        if !probability(t.affinity_threshold)
            || !probability(t.consensus_floor)
            || !probability(t.interaction_chance)
            || !probability(t.trade_fraction)
            || !probability(t.conflict_health_loss)
            || !probability(t.conflict_energy_loss)
        {
            return Err(ConfigError::InvalidConfig(
                "tribal thresholds, chances, and loss fractions must lie in [0, 1]",
            ));
        }
        if !(-1.0..=1.0).contains(&t.conflict_threshold)
            || !(-1.0..=1.0).contains(&t.alliance_threshold)
            || t.conflict_threshold >= t.alliance_threshold
        {
            return Err(ConfigError::InvalidConfig(
                "relationship thresholds must lie in [-1, 1] with conflict below alliance",
            ));
        }
        if !(t.territory_buffer.is_finite() && t.territory_buffer >= 1.0)
            || !non_negative(&[t.territory_min_radius])
        {
            return Err(ConfigError::InvalidConfig(
                "territory_buffer must be at least 1 and territory_min_radius non-negative",
            ));
        }
        let lw = t.leadership;
        let aw = t.affinity;
        if !non_negative(&[
            lw.social,
            lw.survival,
            lw.resources,
            lw.personality,
            aw.traits,
            aw.age,
            aw.energy,
        ]) || aw.traits + aw.age + aw.energy <= 0.0
        {
            return Err(ConfigError::InvalidConfig(
                "leadership and affinity weights must be non-negative with a positive affinity total",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, drawing a seed from entropy if none is set.
    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        CogvrsConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn rejects_zero_world() {
        let config = CogvrsConfig {
            world_width: 0.0,
            ..CogvrsConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig("world dimensions must be positive"))
        ));
    }

    #[test]
    fn rejects_mismatched_neural_dimensions() {
        let mut config = CogvrsConfig::default();
        config.neural.input_size = PERCEPTION_SIZE + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Topology(EvaluatorError::MismatchedTopology { .. }))
        ));

        let mut config = CogvrsConfig::default();
        config.neural.hidden_layers = vec![16, 0];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Topology(EvaluatorError::EmptyLayer { index: 1 }))
        ));
    }

    #[test]
    fn rejects_non_finite_values() {
        let cases: Vec<(&str, fn(&mut CogvrsConfig))> = vec![
            ("max_regen_rate", |c| c.resources.max_regen_rate = f32::INFINITY),
            ("max_value nan", |c| c.resources.max_value = f32::NAN),
            ("max_value inf", |c| {
                c.resources.max_value = f32::INFINITY;
                c.resources.capacity = f32::INFINITY;
            }),
            ("capacity", |c| c.resources.capacity = f32::NAN),
            ("perception_radius", |c| c.perception_radius = f32::NAN),
            ("interaction_radius", |c| c.interaction_radius = f32::INFINITY),
            ("high_energy_threshold", |c| c.vitals.high_energy_threshold = f32::NAN),
            ("novelty_cell_size", |c| c.decision.novelty_cell_size = f32::NAN),
            ("threat_aggression", |c| c.decision.threat_aggression = f32::NAN),
            ("proximity", |c| c.reproduction.proximity = f32::NAN),
            ("spatial_proximity", |c| c.tribal.spatial_proximity = f32::NAN),
            ("interaction_range", |c| c.tribal.interaction_range = f32::INFINITY),
            ("territory_buffer", |c| c.tribal.territory_buffer = f32::NAN),
            ("territory_min_radius", |c| c.tribal.territory_min_radius = f32::NAN),
        ];
        for (name, apply) in cases {
            let mut config = CogvrsConfig::default();
            apply(&mut config);
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidConfig(_))),
                "{name} accepted"
            );
        }
    }

    #[test]
    fn json_rejects_unknown_options() {
        let err = CogvrsConfig::from_json_str(r#"{"world_width": 50.0, "warp_drive": true}"#)
            .expect_err("unknown option");
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("warp_drive"));
    }

    #[test]
    fn json_fills_defaults_and_validates_ranges() {
        let config = CogvrsConfig::from_json_str(
            r#"{"world_width": 64.0, "rng_seed": 9, "tribal": {"min_tribe_size": 4}}"#,
        )
        .expect("config");
        assert_eq!(config.world_width, 64.0);
        assert_eq!(config.world_height, 100.0);
        assert_eq!(config.rng_seed, Some(9));
        assert_eq!(config.tribal.min_tribe_size, 4);
        assert_eq!(config.tribal.max_tribe_size, 20);

        let err = CogvrsConfig::from_json_str(r#"{"decision": {"exploration_rate": 1.5}}"#)
            .expect_err("out of range");
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        use rand::Rng;
        let config = CogvrsConfig {
            rng_seed: Some(77),
            ..CogvrsConfig::default()
        };
        let a: u64 = config.seeded_rng().random();
        let b: u64 = config.seeded_rng().random();
        assert_eq!(a, b);
    }
}
