//! The world: owns agents, resources, and tribes and advances them one tick at a time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use cogvrs_brain::{FeedForwardNet, NeuralEvaluator, TrainingSignal};
use cogvrs_index::{NeighborhoodIndex, UniformGridIndex};
use ordered_float::OrderedFloat;
use rand::{Rng, rngs::SmallRng};
use tracing::{debug, trace, warn};

use crate::agent::{AgentArena, AgentData, AgentRuntime, Genome, MAX_HEALTH, Trait, Traits};
use crate::config::{CogvrsConfig, ConfigError};
use crate::geometry::Vec2;
use crate::motivation::{Action, DecisionContext};
use crate::perception::{AgentSighting, Perception, PerceptionScales, ResourceSighting};
use crate::reproduction::{breed, plan_pairings, spawn_position};
use crate::resources::{Environment, RegrowthReport, ResourceField, ResourceKind};
use crate::snapshot::{
    AgentSnapshot, RelationSnapshot, ResourceSnapshot, TribeSnapshot, WorldAggregates,
    WorldSnapshot,
};
use crate::tribe::{MemberView, TribalEffect, TribalEngine, TribalReport};
use crate::{
    AgentId, AgentMap, NullPersistence, PersistenceBatch, PersistenceEvent, PersistenceEventKind,
    Tick, TickEvents, TickSummary, TribeId, WorldPersistence,
};

const REWARD_MOVE: f32 = 0.1;
const REWARD_COMMUNICATE: f32 = 0.3;
const REWARD_COOPERATE: f32 = 0.5;
const REWARD_REST: f32 = 0.05;
const REWARD_BIRTH: f32 = 1.0;
const REWARD_NOVELTY: f32 = 0.2;
const REWARD_SURVIVAL: f32 = 0.01;
const REWARD_FAILURE: f32 = -0.1;
/// Energy gained per unit of reward for a meal.
const MEAL_REWARD_SCALE: f32 = 20.0;
/// Supervised target bump on the slot of the drive that was acted on.
const TARGET_BUMP: f32 = 0.1;
const SUPERVISED_REWARD: f32 = 0.5;
/// Satiation applied to a drive after its action succeeded.
const SATISFACTION: f32 = 0.2;
/// Speed per unit of movement intensity.
const CRUISE_SPEED: f32 = 1.5;
/// Fraction of its energy a tribe member gives up at most in a transfer.
const TRANSFER_CAP: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
struct Outcome {
    reward: f32,
    success: bool,
}

impl Outcome {
    const fn success(reward: f32) -> Self {
        Self {
            reward,
            success: true,
        }
    }

    const fn failure() -> Self {
        Self {
            reward: REWARD_FAILURE,
            success: false,
        }
    }
}

/// Simulation state container.
pub struct WorldState {
    config: CogvrsConfig,
    tick: Tick,
    rng: SmallRng,
    agents: AgentArena,
    runtime: AgentMap<AgentRuntime>,
    index: UniformGridIndex,
    resources: ResourceField,
    environment: Environment,
    tribes: TribalEngine,
    /// Shape donor for spawned brains.
    template: Box<dyn NeuralEvaluator>,
    history: VecDeque<TickSummary>,
    persistence: Box<dyn WorldPersistence>,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("tick", &self.tick)
            .field("agent_count", &self.agents.len())
            .field("resource_count", &self.resources.len())
            .field("tribe_count", &self.tribes.len())
            .finish()
    }
}

impl WorldState {
    /// Instantiate an empty world with validated configuration; see [`WorldState::populate`].
    pub fn new(config: CogvrsConfig) -> Result<Self, ConfigError> {
        Self::with_persistence(config, Box::new(NullPersistence))
    }

    /// Instantiate a new world with a custom persistence sink.
    pub fn with_persistence(
        config: CogvrsConfig,
        persistence: Box<dyn WorldPersistence>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let mut index = UniformGridIndex::new(config.perception_radius);
        index.rebuild(&[])?;
        let resources = ResourceField::generate(
            &config.resources,
            config.bounds(),
            config.perception_radius,
            &mut rng,
        )?;
        let template = FeedForwardNet::boxed(&config.neural.layout(), &mut rng)?;
        let environment = Environment::at_tick(Tick::zero(), config.day_length);
        let history = VecDeque::with_capacity(config.history_capacity);
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            agents: AgentArena::new(),
            runtime: AgentMap::new(),
            index,
            resources,
            environment,
            tribes: TribalEngine::new(),
            template,
            history,
            persistence,
        })
    }

    /// Spawn `initial_agents` at random positions with random genomes; returns how many were added.
    pub fn populate(&mut self) -> usize {
        let room = self.config.max_population.saturating_sub(self.agents.len());
        let count = self.config.initial_agents.min(room);
        let bounds = self.config.bounds();
        for _ in 0..count {
            let position = Vec2::new(
                self.rng.random_range(0.0..bounds.width),
                self.rng.random_range(0.0..bounds.height),
            );
            let data = AgentData::new(position, self.config.vitals.initial_energy);
            self.spawn_agent(data);
        }
        debug!(count, "populated world");
        count
    }

    /// Insert an agent with random traits and a freshly initialised evaluator.
    pub fn spawn_agent(&mut self, data: AgentData) -> AgentId {
        let traits = Traits::random(&mut self.rng);
        self.spawn_agent_with_traits(data, traits)
    }

    /// Insert an agent with explicit traits and a freshly initialised evaluator.
    pub fn spawn_agent_with_traits(&mut self, data: AgentData, traits: Traits) -> AgentId {
        let brain = self.template.fresh(&mut self.rng);
        self.spawn_agent_with_genome(data, Genome { traits, brain })
    }

    /// Insert an agent with an explicit genome.
    ///
    /// Vitals are clamped into range and the position is folded into the world.
    /// Spawning bypasses `max_population`, which only limits reproduction.
    pub fn spawn_agent_with_genome(&mut self, mut data: AgentData, genome: Genome) -> AgentId {
        data.position = self
            .config
            .bounds()
            .apply(data.position, self.config.boundary);
        data.energy = data.energy.clamp(0.0, self.config.vitals.max_energy);
        data.health = data.health.clamp(0.0, MAX_HEALTH);
        data.tribe = None;
        data.alive = !data.should_die(self.config.vitals.max_lifespan);
        self.insert_agent(data, genome)
    }

    fn insert_agent(&mut self, data: AgentData, genome: Genome) -> AgentId {
        let id = self.agents.insert(data);
        self.runtime.insert(id, AgentRuntime::new(genome));
        id
    }

    /// Found a tribe from living agents; the first id leads. Unknown ids are skipped.
    pub fn found_tribe(&mut self, members: &[AgentId]) -> Option<TribeId> {
        let views: Vec<MemberView> = members
            .iter()
            .filter_map(|id| self.member_view(*id))
            .collect();
        let tribe = self.tribes.found(&views, &self.config, self.tick)?;
        self.sync_affiliations();
        Some(tribe)
    }

    #[must_use]
    pub fn config(&self) -> &CogvrsConfig {
        &self.config
    }

    #[must_use]
    pub const fn tick_count(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn agents(&self) -> &AgentArena {
        &self.agents
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&AgentData> {
        self.agents.get(id)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut AgentData> {
        self.agents.get_mut(id)
    }

    #[must_use]
    pub fn agent_runtime(&self, id: AgentId) -> Option<&AgentRuntime> {
        self.runtime.get(id)
    }

    pub fn agent_runtime_mut(&mut self, id: AgentId) -> Option<&mut AgentRuntime> {
        self.runtime.get_mut(id)
    }

    #[must_use]
    pub fn resources(&self) -> &ResourceField {
        &self.resources
    }

    /// Mutable resource access. Call [`ResourceField::rebuild_index`] after inserting nodes,
    /// or lookups fall back to linear scans until the next tick.
    pub fn resources_mut(&mut self) -> &mut ResourceField {
        &mut self.resources
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    #[must_use]
    pub fn tribes(&self) -> &TribalEngine {
        &self.tribes
    }

    pub fn tribes_mut(&mut self) -> &mut TribalEngine {
        &mut self.tribes
    }

    /// Recent per-tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    pub fn set_persistence(&mut self, persistence: Box<dyn WorldPersistence>) {
        self.persistence = persistence;
    }

    /// Advance one tick of `config.time_step`.
    pub fn step(&mut self) -> TickEvents {
        self.tick(self.config.time_step)
    }

    /// Advance the simulation by `dt` time units.
    ///
    /// Non-finite or negative `dt` is treated as zero: agents still decide and act,
    /// but nothing moves, ages, or regrows.
    pub fn tick(&mut self, dt: f32) -> TickEvents {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let next_tick = self.tick.next();

        let perceptions = self.stage_perception();
        let actions = self.stage_decision(&perceptions, dt);
        let outcomes = self.stage_resolution(&actions, dt);
        self.stage_learning(&actions, &outcomes);
        let mut deaths = self.stage_lifecycle(dt);
        let births = self.stage_reproduction();
        let tribal = self.stage_tribal(next_tick);
        if tribal.is_some() {
            deaths += self.remove_dead();
        }
        let regrowth = self.stage_environment(next_tick, dt);

        self.tick = next_tick;
        self.stage_history(births, deaths, tribal.as_ref());

        TickEvents {
            tick: next_tick,
            births,
            deaths,
            tribal,
            resources_revived: regrowth.revived,
            resources_spawned: regrowth.spawned,
        }
    }

    fn perception_scales(&self) -> PerceptionScales {
        PerceptionScales {
            bounds: self.config.bounds(),
            radius: self.config.perception_radius,
            max_energy: self.config.vitals.max_energy,
            max_lifespan: self.config.vitals.max_lifespan,
            max_speed: self.config.max_speed,
            max_offspring: self.config.reproduction.max_offspring,
            resource_capacity: self.config.resources.capacity,
        }
    }

    fn stage_perception(&mut self) -> Vec<Perception> {
        let rows = self.agents.rows();
        let handles = self.agents.handles();
        let positions: Vec<(f32, f32)> = rows.iter().map(|a| a.position.to_tuple()).collect();
        let indexed = match self.index.rebuild(&positions) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "agent index rebuild failed; scanning linearly");
                false
            }
        };
        let aggression: Vec<f32> = handles
            .iter()
            .map(|id| {
                self.runtime
                    .get(*id)
                    .map_or(0.0, |rt| rt.traits().get(Trait::Aggression))
            })
            .collect();

        let radius = self.config.perception_radius;
        let radius_sq = radius * radius;
        let decision = &self.config.decision;
        let mut perceptions = Vec::with_capacity(rows.len());

        for (i, me) in rows.iter().enumerate() {
            let mut perception = Perception::default();
            let mut nearest: Option<(OrderedFloat<f32>, usize)> = None;
            let mut threat = 0.0_f32;
            let mut threat_sum = Vec2::ZERO;

            let mut visit = |j: usize, dist_sq: OrderedFloat<f32>| {
                let dist = dist_sq.into_inner().sqrt();
                perception.neighbor_count += 1;
                if nearest.is_none_or(|best| (dist_sq, j) < best) {
                    nearest = Some((dist_sq, j));
                }
                let other = &rows[j];
                let friendly = match (me.tribe, other.tribe) {
                    (Some(a), Some(b)) => a == b || self.tribes.allied(a, b),
                    _ => false,
                };
                if !friendly
                    && aggression[j] > decision.threat_aggression
                    && dist < decision.flee_distance
                {
                    let weight = aggression[j] * (1.0 - dist / decision.flee_distance);
                    threat += weight;
                    threat_sum += other.position * weight;
                }
            };
            if indexed {
                self.index
                    .neighbors_within(i, radius_sq, &mut |j, d| visit(j, d));
            } else {
                for (j, other) in rows.iter().enumerate() {
                    let dist_sq = other.position.distance_squared(me.position);
                    if j != i && dist_sq <= radius_sq {
                        visit(j, OrderedFloat(dist_sq));
                    }
                }
            }

            perception.threat = threat.min(1.0);
            perception.threat_center = (threat > 0.0).then(|| threat_sum / threat);
            perception.crowding = (perception.neighbor_count as f32 / 10.0).min(1.0);
            perception.nearest_agent = nearest.map(|(dist_sq, j)| AgentSighting {
                id: handles[j],
                position: rows[j].position,
                distance: dist_sq.into_inner().sqrt(),
                energy: rows[j].energy,
                aggression: aggression[j],
                tribe: rows[j].tribe,
            });

            let mut nearest_resource: Option<(OrderedFloat<f32>, usize)> = None;
            let mut resource_count = 0;
            self.resources
                .visit_available(me.position, radius, &mut |idx, dist| {
                    resource_count += 1;
                    let key = (OrderedFloat(dist), idx);
                    if nearest_resource.is_none_or(|best| key < best) {
                        nearest_resource = Some(key);
                    }
                });
            perception.resource_count = resource_count;
            perception.nearest_resource = nearest_resource.and_then(|(distance, idx)| {
                self.resources.get(idx).map(|r| ResourceSighting {
                    index: idx,
                    position: r.position,
                    kind: r.kind,
                    value: r.value,
                    distance: distance.into_inner(),
                })
            });
            perceptions.push(perception);
        }
        perceptions
    }

    fn stage_decision(&mut self, perceptions: &[Perception], dt: f32) -> Vec<Action> {
        let scales = self.perception_scales();
        let rows = self.agents.rows();
        let handles = self.agents.handles();
        let mut actions = Vec::with_capacity(rows.len());
        for (i, id) in handles.iter().enumerate() {
            let Some(runtime) = self.runtime.get_mut(*id) else {
                actions.push(Action::Rest);
                continue;
            };
            let agent = &rows[i];
            let perception = &perceptions[i];
            let inputs = perception.encode(agent, &scales, &self.environment);
            let outputs = runtime.genome.brain.evaluate(&inputs);
            let ctx = DecisionContext {
                agent,
                traits: &runtime.genome.traits,
                perception,
                outputs: &outputs,
                directive: agent.tribe.and_then(|t| self.tribes.directive_for(t)),
                config: &self.config,
                dt,
            };
            let decision = runtime.motivations.decide(&ctx, &mut self.rng);
            trace!(
                agent = ?id,
                drive = ?decision.drive,
                action = ?decision.action.kind(),
                randomized = decision.randomized,
                "agent decided"
            );
            runtime.memory.last_outputs = outputs;
            runtime.memory.last_action = Some(decision.action.kind());
            actions.push(decision.action);
        }
        actions
    }

    fn cruise_speed(&self, intensity: f32) -> f32 {
        (intensity.clamp(0.0, 1.0) * CRUISE_SPEED).min(self.config.max_speed)
    }

    /// Velocity that closes on `target` without overshooting to within `stop` of it.
    fn approach(&self, origin: Vec2, target: Vec2, stop: f32, dt: f32) -> Vec2 {
        let delta = target - origin;
        let dist = delta.length();
        if dist <= stop || dist <= f32::EPSILON {
            return Vec2::ZERO;
        }
        let max_speed = self.config.max_speed;
        let speed = if dt > 0.0 {
            max_speed.min((dist - stop) / dt)
        } else {
            max_speed
        };
        delta * (speed / dist)
    }

    fn stage_resolution(&mut self, actions: &[Action], dt: f32) -> Vec<Outcome> {
        let origins: Vec<Vec2> = self.agents.rows().iter().map(|a| a.position).collect();
        let eat_radius = self.config.vitals.eat_radius;

        // Nearest claimant wins each resource; ties go to the earlier agent.
        let mut claims: HashMap<usize, (f32, usize)> = HashMap::new();
        for (i, action) in actions.iter().enumerate() {
            if let Action::Consume { resource, target } = action {
                let dist = origins[i].distance(*target);
                if dist > eat_radius {
                    continue;
                }
                claims
                    .entry(*resource)
                    .and_modify(|best| {
                        if dist < best.0 {
                            *best = (dist, i);
                        }
                    })
                    .or_insert((dist, i));
            }
        }

        let bounds = self.config.bounds();
        let boundary = self.config.boundary;
        let max_speed = self.config.max_speed;
        let novelty_cell = self.config.decision.novelty_cell_size;
        let handles: Vec<AgentId> = self.agents.handles().to_vec();
        let mut outcomes = Vec::with_capacity(actions.len());

        for (i, action) in actions.iter().enumerate() {
            let origin = origins[i];
            let (velocity, mut outcome) = match *action {
                Action::Move {
                    direction,
                    intensity,
                }
                | Action::Explore {
                    direction,
                    intensity,
                } => (
                    direction * self.cruise_speed(intensity),
                    Outcome::success(REWARD_MOVE),
                ),
                Action::Consume { resource, target } => {
                    if claims.get(&resource).is_some_and(|(_, winner)| *winner == i) {
                        let gain = self.consume(i, handles[i], resource);
                        let outcome = if gain > 0.0 {
                            Outcome::success(gain / MEAL_REWARD_SCALE)
                        } else {
                            Outcome::failure()
                        };
                        (Vec2::ZERO, outcome)
                    } else if origin.distance(target) <= eat_radius {
                        (Vec2::ZERO, Outcome::failure())
                    } else {
                        (
                            self.approach(origin, target, eat_radius * 0.5, dt),
                            Outcome::success(REWARD_MOVE),
                        )
                    }
                }
                Action::Communicate {
                    target,
                    cooperative,
                    ..
                } => match self.agents.index_of(target) {
                    Some(j) if j != i => {
                        let other = origins[j];
                        if origin.distance(other) <= self.config.interaction_radius {
                            (Vec2::ZERO, self.communicate(i, j, cooperative))
                        } else {
                            let stop = self.config.decision.social_distance;
                            (
                                self.approach(origin, other, stop, dt),
                                Outcome::success(REWARD_MOVE),
                            )
                        }
                    }
                    _ => (Vec2::ZERO, Outcome::failure()),
                },
                Action::Mate { partner, .. } => match self.agents.index_of(partner) {
                    Some(j) if j != i => {
                        let stop = self.config.reproduction.proximity * 0.5;
                        (
                            self.approach(origin, origins[j], stop, dt),
                            Outcome::success(REWARD_MOVE),
                        )
                    }
                    _ => (Vec2::ZERO, Outcome::failure()),
                },
                Action::Rest => {
                    let gain = self.rest(i, dt);
                    (Vec2::ZERO, Outcome::success(REWARD_REST + gain * 0.1))
                }
            };

            let row = &mut self.agents.rows_mut()[i];
            row.velocity = velocity.clamp_length(max_speed);
            row.position = bounds.apply(origin + row.velocity * dt, boundary);
            let position = row.position;
            if let Some(runtime) = self.runtime.get_mut(handles[i]) {
                let cell = (
                    (position.x / novelty_cell).floor() as i32,
                    (position.y / novelty_cell).floor() as i32,
                );
                if runtime.memory.visit(cell) {
                    outcome.reward += REWARD_NOVELTY;
                }
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Harvest one bite; returns the energy-equivalent gained.
    fn consume(&mut self, i: usize, id: AgentId, resource: usize) -> f32 {
        let efficiency = self
            .runtime
            .get(id)
            .map_or(1.0, |rt| rt.traits().get(Trait::Efficiency));
        let Some(node) = self.resources.get_mut(resource) else {
            return 0.0;
        };
        let kind = node.kind;
        let taken = node.consume(self.config.vitals.bite_size);
        if taken <= 0.0 {
            return 0.0;
        }
        let vitals = &self.config.vitals;
        let row = &mut self.agents.rows_mut()[i];
        match kind {
            ResourceKind::Food | ResourceKind::Energy => {
                let gain = taken * efficiency;
                row.energy = (row.energy + gain).min(vitals.max_energy);
                row.health = (row.health + taken * vitals.health_gain_fraction).min(MAX_HEALTH);
                gain
            }
            ResourceKind::Material => match row.tribe {
                Some(tribe) => {
                    self.tribes.deposit_material(tribe, taken);
                    taken * vitals.material_energy_fraction
                }
                None => {
                    let gain = taken * vitals.material_energy_fraction * efficiency;
                    row.energy = (row.energy + gain).min(vitals.max_energy);
                    gain
                }
            },
        }
    }

    fn communicate(&mut self, i: usize, j: usize, cooperative: bool) -> Outcome {
        let vitals = &self.config.vitals;
        let rows = self.agents.rows_mut();
        rows[i].social_interactions += 1;
        rows[j].social_interactions += 1;
        if cooperative && rows[i].energy > vitals.share_threshold {
            let amount = vitals.share_amount.min(vitals.share_fraction * rows[i].energy);
            rows[i].energy -= amount;
            rows[j].energy = (rows[j].energy + amount).min(vitals.max_energy);
            Outcome::success(REWARD_COOPERATE)
        } else {
            Outcome::success(REWARD_COMMUNICATE)
        }
    }

    fn rest(&mut self, i: usize, dt: f32) -> f32 {
        let row = &mut self.agents.rows_mut()[i];
        let before = row.health;
        row.health = (row.health + self.config.vitals.rest_recovery * dt).min(MAX_HEALTH);
        row.health - before
    }

    fn stage_learning(&mut self, actions: &[Action], outcomes: &[Outcome]) {
        let baseline = self.config.decision.reward_baseline;
        for (i, id) in self.agents.handles().iter().enumerate() {
            let Some(runtime) = self.runtime.get_mut(*id) else {
                continue;
            };
            let outcome = outcomes[i];
            let reward =
                outcome.reward + REWARD_SURVIVAL + std::mem::take(&mut runtime.memory.pending_reward);
            let drive = actions[i].kind().drive();
            if outcome.success && reward > SUPERVISED_REWARD {
                let mut target = runtime.memory.last_outputs.clone();
                if let Some(slot) = target.get_mut(drive.slot()) {
                    *slot = (*slot + TARGET_BUMP).clamp(0.0, 1.0);
                }
                runtime
                    .genome
                    .brain
                    .train(TrainingSignal::Supervised { target: &target }, &mut self.rng);
            } else {
                runtime.genome.brain.train(
                    TrainingSignal::Reinforce {
                        advantage: reward - baseline,
                    },
                    &mut self.rng,
                );
            }
            if outcome.success {
                runtime.motivations.satisfy(drive, SATISFACTION);
            }
            runtime.memory.last_reward = reward;
            runtime.memory.cumulative_reward += reward;
        }
    }

    fn stage_lifecycle(&mut self, dt: f32) -> usize {
        let vitals = &self.config.vitals;
        let multiplier = self
            .environment
            .metabolic_multiplier(self.config.climate_sensitivity);
        let brain_costs: Vec<f32> = self
            .agents
            .handles()
            .iter()
            .map(|id| {
                self.runtime
                    .get(*id)
                    .map_or(0.0, |rt| rt.genome.brain.cost() * vitals.brain_cost_rate)
            })
            .collect();

        for (row, brain_cost) in self.agents.rows_mut().iter_mut().zip(brain_costs) {
            row.age += dt;
            let burn = vitals.base_metabolism * multiplier
                + row.velocity.length() * vitals.movement_cost
                + brain_cost;
            row.energy = (row.energy - burn * dt).clamp(0.0, vitals.max_energy);
            if row.energy < vitals.low_energy_threshold {
                row.health -= vitals.health_decay * dt;
            } else if row.energy > vitals.high_energy_threshold {
                row.health += vitals.health_recovery * dt;
            }
            if row.age > vitals.elderly_age {
                row.health -= vitals.elderly_decay * (row.age - vitals.elderly_age) * dt;
            }
            row.health = row.health.clamp(0.0, MAX_HEALTH);
            row.alive = !row.should_die(vitals.max_lifespan);
        }
        self.remove_dead()
    }

    /// Remove agents whose vitals call for death; returns how many were removed.
    fn remove_dead(&mut self) -> usize {
        let max_lifespan = self.config.vitals.max_lifespan;
        let dead: HashSet<AgentId> = self
            .agents
            .iter()
            .filter(|(_, a)| !a.alive || a.should_die(max_lifespan))
            .map(|(id, _)| id)
            .collect();
        if dead.is_empty() {
            return 0;
        }
        for id in &dead {
            self.runtime.remove(*id);
            self.tribes.forget(*id);
        }
        let removed = self.agents.remove_many(&dead);
        trace!(removed, "removed dead agents");
        removed
    }

    fn stage_reproduction(&mut self) -> usize {
        let repro = &self.config.reproduction;
        let pairs = plan_pairings(repro, self.agents.rows(), self.config.max_population);
        if pairs.is_empty() {
            return 0;
        }
        let bounds = self.config.bounds();
        let handles: Vec<AgentId> = self.agents.handles().to_vec();
        let mut births = Vec::with_capacity(pairs.len());

        for (i, j) in pairs {
            let (Some(a), Some(b)) = (self.runtime.get(handles[i]), self.runtime.get(handles[j]))
            else {
                continue;
            };
            let Some((genome, _)) = breed(&a.genome, &b.genome, &self.config.mutation, &mut self.rng)
            else {
                warn!("parent evaluators could not be crossed");
                continue;
            };
            let rows = self.agents.rows_mut();
            let (pa, pb) = (rows[i], rows[j]);
            let position =
                spawn_position(pa.position, pb.position, repro.spawn_jitter, bounds, &mut self.rng);
            for k in [i, j] {
                rows[k].energy = (rows[k].energy - repro.energy_cost).max(0.0);
                rows[k].offspring_count += 1;
            }
            let mut child = AgentData::new(position, repro.child_energy);
            child.generation = pa.generation.max(pb.generation).next();
            births.push((child, genome));
            for parent in [handles[i], handles[j]] {
                if let Some(runtime) = self.runtime.get_mut(parent) {
                    runtime.memory.pending_reward += REWARD_BIRTH;
                }
            }
        }

        let count = births.len();
        for (child, genome) in births {
            self.insert_agent(child, genome);
        }
        if count > 0 {
            debug!(births = count, population = self.agents.len(), "agents born");
        }
        count
    }

    fn member_view(&self, id: AgentId) -> Option<MemberView> {
        let agent = self.agents.get(id)?;
        let runtime = self.runtime.get(id)?;
        Some(MemberView {
            id,
            position: agent.position,
            energy: agent.energy,
            health: agent.health,
            age: agent.age,
            social_interactions: agent.social_interactions,
            traits: runtime.genome.traits,
            tribe: agent.tribe,
        })
    }

    fn sync_affiliations(&mut self) {
        let handles: Vec<AgentId> = self.agents.handles().to_vec();
        for (row, id) in self.agents.rows_mut().iter_mut().zip(handles) {
            row.tribe = self.tribes.affiliation(id);
        }
    }

    fn stage_tribal(&mut self, next_tick: Tick) -> Option<TribalReport> {
        let interval = self.config.tribal.check_interval;
        if interval == 0 || !next_tick.0.is_multiple_of(u64::from(interval)) {
            return None;
        }
        let views: Vec<MemberView> = self
            .agents
            .iter_handles()
            .filter_map(|id| self.member_view(id))
            .collect();
        let outcome = self
            .tribes
            .maintain(&views, &self.config, next_tick, &mut self.rng);
        self.sync_affiliations();
        for effect in outcome.effects {
            self.apply_tribal_effect(effect);
        }
        if outcome.report != TribalReport::default() {
            debug!(tick = next_tick.0, report = ?outcome.report, "tribal maintenance");
        }
        Some(outcome.report)
    }

    fn member_indices(&self, tribe: TribeId) -> Vec<usize> {
        self.tribes
            .get(tribe)
            .map(|t| {
                t.members
                    .iter()
                    .filter_map(|m| self.agents.index_of(*m))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn apply_tribal_effect(&mut self, effect: TribalEffect) {
        let max_energy = self.config.vitals.max_energy;
        match effect {
            TribalEffect::EnergyTransfer { from, to, amount } => {
                let donors = self.member_indices(from);
                let recipients = self.member_indices(to);
                if donors.is_empty() || recipients.is_empty() || amount <= 0.0 {
                    return;
                }
                let share = amount / donors.len() as f32;
                let rows = self.agents.rows_mut();
                let mut pooled = 0.0;
                for i in donors {
                    let given = share.min(rows[i].energy * TRANSFER_CAP);
                    rows[i].energy -= given;
                    pooled += given;
                }
                let gift = pooled / recipients.len() as f32;
                for i in recipients {
                    rows[i].energy = (rows[i].energy + gift).min(max_energy);
                }
            }
            TribalEffect::Provision { tribe, energy } => {
                let members = self.member_indices(tribe);
                if members.is_empty() || energy <= 0.0 {
                    return;
                }
                let gift = energy / members.len() as f32;
                let rows = self.agents.rows_mut();
                for i in members {
                    rows[i].energy = (rows[i].energy + gift).min(max_energy);
                }
            }
            TribalEffect::Losses {
                tribe,
                health_fraction,
                energy_fraction,
            } => {
                let members = self.member_indices(tribe);
                let max_lifespan = self.config.vitals.max_lifespan;
                let rows = self.agents.rows_mut();
                for i in members {
                    let row = &mut rows[i];
                    row.health *= (1.0 - health_fraction).clamp(0.0, 1.0);
                    row.energy *= (1.0 - energy_fraction).clamp(0.0, 1.0);
                    row.alive = !row.should_die(max_lifespan);
                }
            }
        }
    }

    fn stage_environment(&mut self, next_tick: Tick, dt: f32) -> RegrowthReport {
        self.environment = Environment::at_tick(next_tick, self.config.day_length);
        let report = self.resources.regenerate(
            &self.config.resources,
            self.config.bounds(),
            next_tick,
            dt,
            &mut self.rng,
        );
        if let Err(err) = self.resources.rebuild_index() {
            warn!(%err, "resource index rebuild failed; scanning linearly");
        }
        report
    }

    fn summary(&self, births: usize, deaths: usize) -> TickSummary {
        let rows = self.agents.rows();
        let n = rows.len().max(1) as f32;
        let mean = |f: fn(&AgentData) -> f32| {
            if rows.is_empty() {
                0.0
            } else {
                rows.iter().map(f).sum::<f32>() / n
            }
        };
        TickSummary {
            tick: self.tick,
            population: rows.len(),
            births,
            deaths,
            tribes: self.tribes.len(),
            average_energy: mean(|a| a.energy),
            average_health: mean(|a| a.health),
            average_age: mean(|a| a.age),
        }
    }

    fn stage_history(&mut self, births: usize, deaths: usize, tribal: Option<&TribalReport>) {
        let summary = self.summary(births, deaths);
        if self.config.history_capacity > 0 {
            while self.history.len() >= self.config.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(summary.clone());
        }

        let interval = self.config.persistence_interval;
        if interval == 0 || !self.tick.0.is_multiple_of(u64::from(interval)) {
            return;
        }
        let mut events = Vec::new();
        let mut record = |kind, count: usize| {
            if count > 0 {
                events.push(PersistenceEvent::new(kind, count));
            }
        };
        record(PersistenceEventKind::Births, births);
        record(PersistenceEventKind::Deaths, deaths);
        if let Some(report) = tribal {
            record(PersistenceEventKind::TribesFormed, report.formed);
            record(PersistenceEventKind::TribesDissolved, report.dissolved);
            record(PersistenceEventKind::Conflicts, report.conflicts);
        }
        let batch = PersistenceBatch {
            summary,
            events,
            snapshot: self.snapshot(),
        };
        self.persistence.on_tick(&batch);
    }

    /// Read-only view of the whole world. Living agents are listed in birth order.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let agents: Vec<AgentSnapshot> = self
            .agents
            .iter()
            .filter(|(_, a)| a.alive)
            .map(|(id, a)| {
                let runtime = self.runtime.get(id);
                AgentSnapshot {
                    id,
                    position: a.position,
                    velocity: a.velocity,
                    energy: a.energy,
                    health: a.health,
                    age: a.age,
                    offspring_count: a.offspring_count,
                    social_interactions: a.social_interactions,
                    generation: a.generation,
                    tribe: a.tribe,
                    traits: runtime.map(|rt| rt.genome.traits).unwrap_or_default(),
                    last_action: runtime.and_then(|rt| rt.memory.last_action),
                }
            })
            .collect();
        let resources = self
            .resources
            .resources()
            .iter()
            .map(|r| ResourceSnapshot {
                position: r.position,
                kind: r.kind,
                value: r.value,
                depleted: r.depleted,
            })
            .collect();
        let tribes: Vec<TribeSnapshot> = self
            .tribes
            .iter()
            .map(|(id, t)| TribeSnapshot {
                id,
                name: t.name.clone(),
                members: t.members.clone(),
                leader: t.leader,
                territory: t.territory,
                roles: t
                    .members
                    .iter()
                    .filter_map(|m| t.roles.get(m).map(|role| (*m, *role)))
                    .collect(),
                decision_mode: t.decision_mode,
                directive: t.directive.map(|d| d.response),
                material: t.material,
                knowledge: t.knowledge,
                technology_level: t.technology_level,
                civilization: t.civilization,
            })
            .collect();
        let relations = self
            .tribes
            .relations()
            .map(|((a, b), score)| RelationSnapshot {
                a,
                b,
                score,
                allied: self.tribes.allied(a, b),
            })
            .collect();
        let mut aggregates = WorldAggregates::from_agents(&agents);
        aggregates.tribe_count = tribes.len();
        aggregates.resources_available = self.resources.available_count();
        WorldSnapshot {
            tick: self.tick,
            environment: self.environment,
            agents,
            resources,
            tribes,
            relations,
            aggregates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::resources::Resource;
    use std::sync::{Arc, Mutex};

    fn empty_config() -> CogvrsConfig {
        CogvrsConfig {
            initial_agents: 0,
            rng_seed: Some(7),
            resources: ResourceConfig {
                density: 0.0,
                spawn_interval: 0,
                ..ResourceConfig::default()
            },
            ..CogvrsConfig::default()
        }
    }

    fn world() -> WorldState {
        WorldState::new(empty_config()).expect("world")
    }

    fn place_resource(world: &mut WorldState, position: Vec2, kind: ResourceKind) -> usize {
        let idx = world.resources_mut().insert(Resource {
            position,
            kind,
            value: 50.0,
            capacity: 100.0,
            regen_rate: 0.0,
            depleted: false,
        });
        world.resources_mut().rebuild_index().expect("index");
        idx
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = CogvrsConfig {
            world_width: 0.0,
            ..CogvrsConfig::default()
        };
        assert!(matches!(
            WorldState::new(config),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn populate_places_initial_agents_inside_the_world() {
        let mut world = WorldState::new(CogvrsConfig {
            rng_seed: Some(3),
            ..CogvrsConfig::default()
        })
        .expect("world");
        assert_eq!(world.agent_count(), 0);
        let spawned = world.populate();
        assert_eq!(spawned, world.config().initial_agents);
        let bounds = world.config().bounds();
        for (_, agent) in world.agents().iter() {
            assert!(bounds.contains(agent.position));
            assert_eq!(agent.energy, world.config().vitals.initial_energy);
        }
    }

    #[test]
    fn nearest_claimant_wins_contested_resource() {
        let mut world = world();
        let idx = place_resource(&mut world, Vec2::new(10.0, 10.0), ResourceKind::Food);
        let far = world.spawn_agent(AgentData::new(Vec2::new(11.0, 10.0), 50.0));
        let near = world.spawn_agent(AgentData::new(Vec2::new(10.5, 10.0), 50.0));
        let target = Vec2::new(10.0, 10.0);
        let actions = vec![
            Action::Consume {
                resource: idx,
                target,
            },
            Action::Consume {
                resource: idx,
                target,
            },
        ];
        let outcomes = world.stage_resolution(&actions, 0.1);
        assert!(!outcomes[0].success);
        assert!(outcomes[1].success);
        assert!(world.agent(near).expect("near").energy > 50.0);
        assert_eq!(world.agent(far).expect("far").energy, 50.0);
        let bite = world.config().vitals.bite_size;
        let left = world.resources().get(idx).expect("resource").value;
        assert!((left - (50.0 - bite)).abs() < 1e-4);
    }

    #[test]
    fn equidistant_claimants_favour_the_older_agent() {
        let mut world = world();
        let idx = place_resource(&mut world, Vec2::new(10.0, 10.0), ResourceKind::Energy);
        let first = world.spawn_agent(AgentData::new(Vec2::new(9.5, 10.0), 50.0));
        let second = world.spawn_agent(AgentData::new(Vec2::new(10.5, 10.0), 50.0));
        let consume = Action::Consume {
            resource: idx,
            target: Vec2::new(10.0, 10.0),
        };
        let outcomes = world.stage_resolution(&[consume, consume], 0.1);
        assert!(outcomes[0].success && !outcomes[1].success);
        assert!(world.agent(first).expect("first").energy > 50.0);
        assert_eq!(world.agent(second).expect("second").energy, 50.0);
    }

    #[test]
    fn material_goes_to_the_tribe_stockpile() {
        let mut world = world();
        let idx = place_resource(&mut world, Vec2::new(20.0, 20.0), ResourceKind::Material);
        let ids: Vec<AgentId> = (0..3)
            .map(|i| world.spawn_agent(AgentData::new(Vec2::new(20.0 + i as f32 * 0.2, 20.0), 60.0)))
            .collect();
        let tribe = world.found_tribe(&ids).expect("tribe");
        let consume = Action::Consume {
            resource: idx,
            target: Vec2::new(20.0, 20.0),
        };
        world.stage_resolution(&[consume, Action::Rest, Action::Rest], 0.1);
        let stock = world.tribes().get(tribe).expect("tribe").material;
        assert!(stock > 0.0);
        assert_eq!(world.agent(ids[0]).expect("agent").energy, 60.0);
    }

    #[test]
    fn cooperative_communication_shares_energy() {
        let mut world = world();
        let giver = world.spawn_agent(AgentData::new(Vec2::new(30.0, 30.0), 80.0));
        let taker = world.spawn_agent(AgentData::new(Vec2::new(31.0, 30.0), 20.0));
        let talk = Action::Communicate {
            target: taker,
            position: Vec2::new(31.0, 30.0),
            cooperative: true,
        };
        let outcomes = world.stage_resolution(&[talk, Action::Rest], 0.1);
        assert!(outcomes[0].success);
        assert!(outcomes[0].reward >= REWARD_COOPERATE);
        let giver = world.agent(giver).expect("giver");
        let taker = world.agent(taker).expect("taker");
        assert!((giver.energy - 72.0).abs() < 1e-4);
        assert!((taker.energy - 28.0).abs() < 1e-4);
        assert_eq!(giver.social_interactions, 1);
        assert_eq!(taker.social_interactions, 1);
    }

    #[test]
    fn communicating_with_a_vanished_agent_fails() {
        let mut world = world();
        let lonely = world.spawn_agent(AgentData::new(Vec2::new(5.0, 5.0), 50.0));
        let gone = world.spawn_agent(AgentData::new(Vec2::new(6.0, 5.0), 0.0));
        world.remove_dead();
        let talk = Action::Communicate {
            target: gone,
            position: Vec2::new(6.0, 5.0),
            cooperative: false,
        };
        let outcomes = world.stage_resolution(&[talk], 0.1);
        assert!(!outcomes[0].success);
        assert_eq!(world.agent(lonely).expect("agent").social_interactions, 0);
    }

    #[test]
    fn movement_is_capped_by_max_speed() {
        let mut world = world();
        let id = world.spawn_agent(AgentData::new(Vec2::new(50.0, 50.0), 50.0));
        let dash = Action::Move {
            direction: Vec2::new(1.0, 0.0),
            intensity: 5.0,
        };
        world.stage_resolution(&[dash], 1.0);
        let agent = world.agent(id).expect("agent");
        assert!(agent.velocity.length() <= world.config().max_speed + 1e-5);
        assert!(agent.position.x > 50.0);
    }

    #[test]
    fn conflict_losses_scale_member_vitals() {
        let mut world = world();
        let ids: Vec<AgentId> = (0..3)
            .map(|i| world.spawn_agent(AgentData::new(Vec2::new(i as f32, 0.0), 100.0)))
            .collect();
        let tribe = world.found_tribe(&ids).expect("tribe");
        world.apply_tribal_effect(TribalEffect::Losses {
            tribe,
            health_fraction: 0.2,
            energy_fraction: 0.5,
        });
        for id in ids {
            let agent = world.agent(id).expect("agent");
            assert!((agent.health - 80.0).abs() < 1e-4);
            assert!((agent.energy - 50.0).abs() < 1e-4);
        }
    }

    #[test]
    fn energy_transfer_conserves_what_donors_give() {
        let mut world = world();
        let a: Vec<AgentId> = (0..3)
            .map(|i| world.spawn_agent(AgentData::new(Vec2::new(i as f32, 0.0), 60.0)))
            .collect();
        let b: Vec<AgentId> = (0..3)
            .map(|i| world.spawn_agent(AgentData::new(Vec2::new(50.0 + i as f32, 0.0), 30.0)))
            .collect();
        let from = world.found_tribe(&a).expect("a");
        let to = world.found_tribe(&b).expect("b");
        let before: f32 = world.agents().rows().iter().map(|r| r.energy).sum();
        world.apply_tribal_effect(TribalEffect::EnergyTransfer {
            from,
            to,
            amount: 9.0,
        });
        let after: f32 = world.agents().rows().iter().map(|r| r.energy).sum();
        assert!((before - after).abs() < 1e-3);
        for id in b {
            assert!((world.agent(id).expect("b").energy - 33.0).abs() < 1e-4);
        }
    }

    #[test]
    fn history_is_bounded() {
        let mut world = WorldState::new(CogvrsConfig {
            history_capacity: 4,
            ..empty_config()
        })
        .expect("world");
        for _ in 0..10 {
            world.step();
        }
        let ticks: Vec<u64> = world.history().map(|s| s.tick.0).collect();
        assert_eq!(ticks, vec![7, 8, 9, 10]);
    }

    #[derive(Default)]
    struct Recorder(Arc<Mutex<Vec<Tick>>>);

    impl WorldPersistence for Recorder {
        fn on_tick(&mut self, payload: &PersistenceBatch) {
            self.0.lock().expect("lock").push(payload.summary.tick);
            assert_eq!(payload.snapshot.tick, payload.summary.tick);
        }
    }

    #[test]
    fn persistence_runs_every_interval() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut world = WorldState::with_persistence(
            CogvrsConfig {
                persistence_interval: 3,
                ..empty_config()
            },
            Box::new(Recorder(Arc::clone(&seen))),
        )
        .expect("world");
        for _ in 0..10 {
            world.step();
        }
        let seen = seen.lock().expect("lock").clone();
        assert_eq!(seen, vec![Tick(3), Tick(6), Tick(9)]);
    }

    #[test]
    fn non_finite_dt_freezes_time() {
        let mut world = world();
        let id = world.spawn_agent(AgentData::new(Vec2::new(40.0, 40.0), 90.0));
        world.tick(f32::NAN);
        let agent = world.agent(id).expect("agent");
        assert_eq!(agent.age, 0.0);
        assert_eq!(agent.position, Vec2::new(40.0, 40.0));
        assert_eq!(world.tick_count(), Tick(1));
    }
}
