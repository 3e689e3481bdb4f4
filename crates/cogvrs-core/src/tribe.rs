//! Tribal clustering, leadership, collective decisions, and inter-tribe diplomacy.
//!
//! The engine owns every [`Tribe`] and the relationship table between them. It reads
//! agents through [`MemberView`] rows built by the world and never writes vitals:
//! membership is published through [`TribalEngine::affiliation`], and energy or health
//! consequences are returned as [`TribalEffect`] values for the world to apply.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::agent::{MAX_HEALTH, Trait, Traits};
use crate::config::{AffinityWeights, CogvrsConfig, LeadershipWeights, TribalConfig};
use crate::geometry::Vec2;
use crate::motivation::DirectiveView;
use crate::{AgentId, Tick, TribeId};

/// Colors used to name new tribes, in founding order.
pub const TRIBE_PALETTE: [&str; 8] = [
    "Azure", "Crimson", "Emerald", "Golden", "Violet", "Amber", "Silver", "Obsidian",
];

/// Problems scoring below this do not produce a directive.
const PROBLEM_FLOOR: f32 = 0.2;
const KNOWLEDGE_PER_INTERACTION: f32 = 0.1;
const CULTURAL_EXCHANGE_KNOWLEDGE: f32 = 1.0;
const TRADE_MARGIN: f32 = 1.0;

/// Function of a member inside its tribe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Leader,
    Hunter,
    Gatherer,
    Defender,
    Caretaker,
    Scout,
}

impl Role {
    /// Roles available to non-leaders, in tie-breaking order.
    pub const WORKERS: [Self; 5] = [
        Self::Hunter,
        Self::Gatherer,
        Self::Defender,
        Self::Caretaker,
        Self::Scout,
    ];

    /// Trait-weighted suitability in [0, 1].
    #[must_use]
    pub fn suitability(self, traits: &Traits) -> f32 {
        let t = |k| traits.get(k);
        match self {
            Self::Leader => {
                (t(Trait::SocialActivity) + t(Trait::Cooperation)) * 0.5
            }
            Self::Hunter => {
                t(Trait::Aggression) * 0.5 + t(Trait::RiskTaking) * 0.3 + t(Trait::Exploration) * 0.2
            }
            Self::Gatherer => {
                t(Trait::Efficiency) * 0.5 + t(Trait::Cooperation) * 0.3 + t(Trait::Curiosity) * 0.2
            }
            Self::Defender => {
                t(Trait::Aggression) * 0.4
                    + (1.0 - t(Trait::RiskTaking)) * 0.3
                    + t(Trait::Cooperation) * 0.3
            }
            Self::Caretaker => t(Trait::Cooperation) * 0.5 + t(Trait::SocialActivity) * 0.5,
            Self::Scout => {
                t(Trait::Exploration) * 0.5 + t(Trait::Curiosity) * 0.3 + t(Trait::RiskTaking) * 0.2
            }
        }
    }

    /// Best worker role for `traits`; ties go to the earlier role.
    #[must_use]
    pub fn best_worker(traits: &Traits) -> Self {
        let mut best = Self::WORKERS[0];
        let mut best_score = best.suitability(traits);
        for role in &Self::WORKERS[1..] {
            let score = role.suitability(traits);
            if score > best_score {
                best = *role;
                best_score = score;
            }
        }
        best
    }
}

/// How a tribe turns member preferences into one response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DecisionMode {
    /// The leader decides alone.
    Autocratic,
    /// Plurality vote across members.
    #[default]
    Democratic,
    /// Only responses no member rejects; otherwise a vote.
    Consensus,
    /// The oldest member decides.
    Expertise,
}

/// Issues a tribe can react to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TribalProblem {
    ResourceShortage,
    HealthCrisis,
    PopulationDecline,
    Overpopulation,
    TerritorialThreat,
}

impl TribalProblem {
    /// Candidate responses, in tie-breaking order.
    #[must_use]
    pub const fn responses(self) -> &'static [TribalResponse] {
        match self {
            Self::ResourceShortage => &[
                TribalResponse::ForageEmphasis,
                TribalResponse::Migrate,
                TribalResponse::ShareStores,
            ],
            Self::HealthCrisis => &[TribalResponse::Recuperate, TribalResponse::ShareStores],
            Self::PopulationDecline => &[TribalResponse::Recruit, TribalResponse::SeekAlliance],
            Self::Overpopulation => &[TribalResponse::Expand, TribalResponse::Migrate],
            Self::TerritorialThreat => &[
                TribalResponse::Fortify,
                TribalResponse::SeekAlliance,
                TribalResponse::Migrate,
            ],
        }
    }
}

/// Tribe-level flag consumed by members' next decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TribalResponse {
    ForageEmphasis,
    Migrate,
    ShareStores,
    Recuperate,
    Recruit,
    SeekAlliance,
    Fortify,
    Expand,
}

impl TribalResponse {
    /// How strongly `member` favors this response, in [0, 1].
    #[must_use]
    pub fn preference(self, member: &MemberView, max_energy: f32) -> f32 {
        let t = |k| member.traits.get(k);
        let energy = (member.energy / max_energy).clamp(0.0, 1.0);
        let health = (member.health / MAX_HEALTH).clamp(0.0, 1.0);
        let score = match self {
            Self::ForageEmphasis => {
                t(Trait::Exploration) * 0.4 + t(Trait::Efficiency) * 0.3 + (1.0 - energy) * 0.3
            }
            Self::Migrate => {
                t(Trait::Exploration) * 0.5 + t(Trait::RiskTaking) * 0.3 + t(Trait::Curiosity) * 0.2
            }
            Self::ShareStores => t(Trait::Cooperation) * 0.7 + t(Trait::SocialActivity) * 0.3,
            Self::Recuperate => (1.0 - t(Trait::RiskTaking)) * 0.5 + (1.0 - health) * 0.5,
            Self::Recruit => t(Trait::SocialActivity) * 0.6 + t(Trait::Cooperation) * 0.4,
            Self::SeekAlliance => t(Trait::Cooperation) * 0.6 + (1.0 - t(Trait::Aggression)) * 0.4,
            Self::Fortify => t(Trait::Aggression) * 0.5 + (1.0 - t(Trait::RiskTaking)) * 0.5,
            Self::Expand => {
                t(Trait::Exploration) * 0.4 + t(Trait::Aggression) * 0.3 + t(Trait::RiskTaking) * 0.3
            }
        };
        score.clamp(0.0, 1.0)
    }
}

/// Development stage derived from member count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CivilizationLevel {
    #[default]
    Nomadic,
    Settlement,
    Village,
    Town,
    City,
}

impl CivilizationLevel {
    #[must_use]
    pub fn for_population(members: usize) -> Self {
        match members {
            100.. => Self::City,
            50.. => Self::Town,
            25.. => Self::Village,
            12.. => Self::Settlement,
            _ => Self::Nomadic,
        }
    }
}

/// Kind of contact between two tribes during one maintenance pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    Trade,
    Dispute,
    Alliance,
    Conflict,
    CulturalExchange,
}

impl InteractionKind {
    fn relation_delta(self) -> f32 {
        match self {
            Self::Trade => 0.1,
            Self::Dispute => -0.1,
            Self::Alliance => 0.1,
            Self::Conflict => -0.2,
            Self::CulturalExchange => 0.05,
        }
    }
}

/// Circle claimed by a tribe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Territory {
    pub center: Vec2,
    pub radius: f32,
}

impl Territory {
    #[must_use]
    pub fn contains(&self, point: Vec2) -> bool {
        self.center.distance(point) <= self.radius
    }

    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.center.distance(other.center) < self.radius + other.radius
    }

    /// Centroid of `positions` with radius `max(min_radius, farthest * buffer)`.
    #[must_use]
    pub fn enclosing(positions: &[Vec2], buffer: f32, min_radius: f32) -> Self {
        if positions.is_empty() {
            return Self {
                center: Vec2::ZERO,
                radius: min_radius,
            };
        }
        let sum = positions.iter().fold(Vec2::ZERO, |acc, p| acc + *p);
        let center = sum / positions.len() as f32;
        let farthest = positions
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0_f32, f32::max);
        Self {
            center,
            radius: (farthest * buffer).max(min_radius),
        }
    }
}

/// The response a tribe is currently acting on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Directive {
    pub problem: TribalProblem,
    pub response: TribalResponse,
    /// Destination for migration and expansion.
    pub target: Option<Vec2>,
    pub issued: Tick,
}

/// An emergent group of agents.
#[derive(Debug, Clone)]
pub struct Tribe {
    pub id: TribeId,
    pub name: String,
    pub founded: Tick,
    /// Unique member ids.
    pub members: Vec<AgentId>,
    pub leader: AgentId,
    pub territory: Territory,
    pub roles: BTreeMap<AgentId, Role>,
    pub decision_mode: DecisionMode,
    pub directive: Option<Directive>,
    /// Collected material.
    pub material: f32,
    /// Energy held by members above the high-energy threshold, as of the last pass.
    pub surplus: f32,
    pub knowledge: f32,
    pub technology_level: u32,
    pub civilization: CivilizationLevel,
    previous_size: usize,
    interaction_total: u64,
}

impl Tribe {
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.members.contains(&id)
    }

    #[must_use]
    pub fn role_of(&self, id: AgentId) -> Option<Role> {
        self.roles.get(&id).copied()
    }

    /// Add knowledge and advance technology for every `10 * (level + 1)` crossed.
    pub fn learn(&mut self, amount: f32) {
        self.knowledge += amount.max(0.0);
        while self.knowledge >= 10.0 * (self.technology_level + 1) as f32 {
            self.technology_level += 1;
        }
    }
}

/// Read-only agent row used by the tribal engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberView {
    pub id: AgentId,
    pub position: Vec2,
    pub energy: f32,
    pub health: f32,
    pub age: f32,
    pub social_interactions: u32,
    pub traits: Traits,
    pub tribe: Option<TribeId>,
}

/// Vitals consequence of a tribal event, applied by the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TribalEffect {
    /// Move `amount` energy from `from`'s members to `to`'s members.
    EnergyTransfer {
        from: TribeId,
        to: TribeId,
        amount: f32,
    },
    /// Split `energy` evenly across the tribe's members.
    Provision { tribe: TribeId, energy: f32 },
    /// Remove a fraction of every member's health and energy.
    Losses {
        tribe: TribeId,
        health_fraction: f32,
        energy_fraction: f32,
    },
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TribalReport {
    pub formed: usize,
    pub dissolved: usize,
    pub recruited: usize,
    pub trades: usize,
    pub disputes: usize,
    pub alliances: usize,
    pub conflicts: usize,
    pub exchanges: usize,
}

/// Result of [`TribalEngine::maintain`].
#[derive(Debug, Clone, Default)]
pub struct TribalOutcome {
    pub report: TribalReport,
    pub effects: Vec<TribalEffect>,
}

/// Result of a single war between two tribes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConflictOutcome {
    pub winner: TribeId,
    pub loser: TribeId,
    pub winner_strength: f32,
    pub loser_strength: f32,
}

/// Leadership potential of an agent.
#[must_use]
pub fn leadership_score(
    member: &MemberView,
    weights: &LeadershipWeights,
    config: &CogvrsConfig,
) -> f32 {
    let social = (member.social_interactions as f32 / 20.0).min(1.0);
    let survival = 0.5 * (member.age / config.vitals.max_lifespan).clamp(0.0, 1.0)
        + 0.5 * (member.health / MAX_HEALTH).clamp(0.0, 1.0);
    let resources = (member.energy / config.vitals.max_energy).clamp(0.0, 1.0);
    let personality = Role::Leader.suitability(&member.traits);
    weights.social * social
        + weights.survival * survival
        + weights.resources * resources
        + weights.personality * personality
}

fn ratio_similarity(a: f32, b: f32) -> f32 {
    1.0 - (a - b).abs() / a.max(b).max(1.0)
}

/// Symmetric similarity of two agents in [0, 1].
#[must_use]
pub fn affinity(a: &MemberView, b: &MemberView, weights: &AffinityWeights) -> f32 {
    let total = weights.traits + weights.age + weights.energy;
    if total <= 0.0 {
        return 0.0;
    }
    let score = weights.traits * a.traits.similarity(&b.traits)
        + weights.age * ratio_similarity(a.age, b.age)
        + weights.energy * ratio_similarity(a.energy, b.energy);
    (score / total).clamp(0.0, 1.0)
}

fn favorite(member: &MemberView, menu: &[TribalResponse], max_energy: f32) -> TribalResponse {
    let mut best = menu[0];
    let mut best_score = best.preference(member, max_energy);
    for response in &menu[1..] {
        let score = response.preference(member, max_energy);
        if score > best_score {
            best = *response;
            best_score = score;
        }
    }
    best
}

fn plurality(members: &[&MemberView], menu: &[TribalResponse], max_energy: f32) -> TribalResponse {
    let mut votes = vec![0usize; menu.len()];
    for member in members {
        let choice = favorite(member, menu, max_energy);
        if let Some(slot) = menu.iter().position(|r| *r == choice) {
            votes[slot] += 1;
        }
    }
    let mut best = 0;
    for (slot, count) in votes.iter().enumerate() {
        if *count > votes[best] {
            best = slot;
        }
    }
    menu[best]
}

/// Pick one response to `problem` using `mode`.
///
/// `members` must be non-empty; `leader` is the leader's row if present.
#[must_use]
pub fn choose_response(
    mode: DecisionMode,
    problem: TribalProblem,
    members: &[&MemberView],
    leader: Option<&MemberView>,
    consensus_floor: f32,
    max_energy: f32,
) -> TribalResponse {
    let menu = problem.responses();
    match mode {
        DecisionMode::Autocratic => match leader.or_else(|| members.first().copied()) {
            Some(leader) => favorite(leader, menu, max_energy),
            None => menu[0],
        },
        DecisionMode::Democratic => plurality(members, menu, max_energy),
        DecisionMode::Consensus => {
            let mut best: Option<(TribalResponse, f32)> = None;
            for response in menu {
                let prefs: Vec<f32> = members
                    .iter()
                    .map(|m| response.preference(m, max_energy))
                    .collect();
                if prefs.iter().any(|p| *p < consensus_floor) {
                    continue;
                }
                let mean = prefs.iter().sum::<f32>() / prefs.len().max(1) as f32;
                if best.is_none_or(|(_, b)| mean > b) {
                    best = Some((*response, mean));
                }
            }
            best.map_or_else(|| plurality(members, menu, max_energy), |(r, _)| r)
        }
        DecisionMode::Expertise => {
            let mut elder: Option<&MemberView> = None;
            for member in members {
                if elder.is_none_or(|e| member.age > e.age) {
                    elder = Some(*member);
                }
            }
            elder.map_or(menu[0], |e| favorite(e, menu, max_energy))
        }
    }
}

fn pair_key(a: TribeId, b: TribeId) -> (TribeId, TribeId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Aggregates of one tribe's members for a pass.
#[derive(Debug, Clone, Copy, Default)]
struct TribeVitals {
    size: usize,
    energy_ratio: f32,
    health_ratio: f32,
}

/// Owns all tribes and their relationships.
#[derive(Debug, Default)]
pub struct TribalEngine {
    tribes: SlotMap<TribeId, Tribe>,
    affiliation: HashMap<AgentId, TribeId>,
    relations: BTreeMap<(TribeId, TribeId), f32>,
    allies: BTreeSet<(TribeId, TribeId)>,
    founded: usize,
}

impl TribalEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tribes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tribes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: TribeId) -> Option<&Tribe> {
        self.tribes.get(id)
    }

    pub fn get_mut(&mut self, id: TribeId) -> Option<&mut Tribe> {
        self.tribes.get_mut(id)
    }

    /// Tribes in stable slot order.
    pub fn iter(&self) -> impl Iterator<Item = (TribeId, &Tribe)> + '_ {
        self.tribes.iter()
    }

    /// Tribe the agent currently belongs to.
    #[must_use]
    pub fn affiliation(&self, agent: AgentId) -> Option<TribeId> {
        self.affiliation.get(&agent).copied()
    }

    /// Relationship score in [-1, 1]; unknown pairs are neutral.
    #[must_use]
    pub fn relation(&self, a: TribeId, b: TribeId) -> f32 {
        self.relations.get(&pair_key(a, b)).copied().unwrap_or(0.0)
    }

    pub fn set_relation(&mut self, a: TribeId, b: TribeId, score: f32) {
        if a != b {
            self.relations.insert(pair_key(a, b), score.clamp(-1.0, 1.0));
        }
    }

    /// All recorded relationship scores keyed by ordered pair.
    pub fn relations(&self) -> impl Iterator<Item = ((TribeId, TribeId), f32)> + '_ {
        self.relations.iter().map(|(k, v)| (*k, *v))
    }

    #[must_use]
    pub fn allied(&self, a: TribeId, b: TribeId) -> bool {
        self.allies.contains(&pair_key(a, b))
    }

    /// Credit collected material to a tribe.
    pub fn deposit_material(&mut self, tribe: TribeId, amount: f32) {
        if let Some(t) = self.tribes.get_mut(tribe) {
            t.material += amount.max(0.0);
        }
    }

    /// Guidance for members of `tribe`, if it has an active directive.
    #[must_use]
    pub fn directive_for(&self, tribe: TribeId) -> Option<DirectiveView> {
        let t = self.tribes.get(tribe)?;
        let directive = t.directive?;
        Some(DirectiveView {
            response: directive.response,
            territory_center: t.territory.center,
            territory_radius: t.territory.radius,
            target: directive.target,
        })
    }

    fn next_name(&mut self) -> String {
        let color = TRIBE_PALETTE[self.founded % TRIBE_PALETTE.len()];
        let round = self.founded / TRIBE_PALETTE.len();
        self.founded += 1;
        if round == 0 {
            format!("{color} Tribe")
        } else {
            format!("{color} Tribe {}", round + 1)
        }
    }

    /// Found a tribe from explicit members; the first member leads.
    ///
    /// Members already affiliated elsewhere are moved. Returns `None` for an empty list.
    pub fn found(
        &mut self,
        members: &[MemberView],
        config: &CogvrsConfig,
        tick: Tick,
    ) -> Option<TribeId> {
        let leader = members.first()?.id;
        for m in members {
            self.leave(m.id);
        }
        let name = self.next_name();
        let tribal = &config.tribal;
        let positions: Vec<Vec2> = members.iter().map(|m| m.position).collect();
        let territory =
            Territory::enclosing(&positions, tribal.territory_buffer, tribal.territory_min_radius);
        let id = self.tribes.insert_with_key(|id| Tribe {
            id,
            name,
            founded: tick,
            members: members.iter().map(|m| m.id).collect(),
            leader,
            territory,
            roles: BTreeMap::new(),
            decision_mode: tribal.decision_mode,
            directive: None,
            material: 0.0,
            surplus: 0.0,
            knowledge: 0.0,
            technology_level: 0,
            civilization: CivilizationLevel::for_population(members.len()),
            previous_size: members.len(),
            interaction_total: members.iter().map(|m| u64::from(m.social_interactions)).sum(),
        });
        for m in members {
            self.affiliation.insert(m.id, id);
        }
        if let Some(tribe) = self.tribes.get_mut(id) {
            assign_roles(tribe, members);
            debug!(tribe = %tribe.name, members = tribe.len(), "tribe formed");
        }
        Some(id)
    }

    /// Drop a dead agent from its tribe; size rules are enforced at the next pass.
    pub fn forget(&mut self, agent: AgentId) {
        self.leave(agent);
    }

    fn leave(&mut self, agent: AgentId) {
        if let Some(previous) = self.affiliation.remove(&agent)
            && let Some(t) = self.tribes.get_mut(previous)
        {
            t.members.retain(|m| *m != agent);
            t.roles.remove(&agent);
        }
    }

    fn dissolve(&mut self, id: TribeId) {
        if let Some(tribe) = self.tribes.remove(id) {
            for member in &tribe.members {
                self.affiliation.remove(member);
            }
            self.relations.retain(|(a, b), _| *a != id && *b != id);
            self.allies.retain(|(a, b)| *a != id && *b != id);
            debug!(tribe = %tribe.name, "tribe dissolved");
        }
    }

    /// Run one maintenance pass over the living population in `agents`.
    pub fn maintain(
        &mut self,
        agents: &[MemberView],
        config: &CogvrsConfig,
        tick: Tick,
        rng: &mut dyn RngCore,
    ) -> TribalOutcome {
        let mut outcome = TribalOutcome::default();
        let lookup: HashMap<AgentId, usize> =
            agents.iter().enumerate().map(|(i, a)| (a.id, i)).collect();

        self.prune(&lookup, config.tribal.min_tribe_size, &mut outcome.report);
        outcome.report.recruited = self.recruit(agents, &config.tribal);
        outcome.report.formed = self.form(agents, config, tick);

        let ids: Vec<TribeId> = self.tribes.keys().collect();
        let mut vitals = HashMap::with_capacity(ids.len());
        for id in &ids {
            let Some(tribe) = self.tribes.get_mut(*id) else {
                continue;
            };
            let members: Vec<MemberView> = tribe
                .members
                .iter()
                .filter_map(|m| lookup.get(m).map(|i| agents[*i]))
                .collect();
            refresh(tribe, &members, config);
            vitals.insert(*id, tribe_vitals(&members, config));
        }
        for id in &ids {
            self.decide(*id, agents, &lookup, &vitals, config, tick, rng, &mut outcome);
        }
        self.diplomacy(&ids, agents, &lookup, &vitals, config, rng, &mut outcome);
        outcome
    }

    fn prune(&mut self, lookup: &HashMap<AgentId, usize>, min_size: usize, report: &mut TribalReport) {
        let ids: Vec<TribeId> = self.tribes.keys().collect();
        let mut gone = Vec::new();
        for id in ids {
            if let Some(tribe) = self.tribes.get_mut(id) {
                tribe.members.retain(|m| {
                    let alive = lookup.contains_key(m);
                    if !alive {
                        gone.push(*m);
                    }
                    alive
                });
                tribe.roles.retain(|m, _| lookup.contains_key(m));
                if tribe.members.len() < min_size {
                    self.dissolve(id);
                    report.dissolved += 1;
                }
            }
        }
        for m in gone {
            self.affiliation.remove(&m);
        }
    }

    fn recruit(&mut self, agents: &[MemberView], config: &TribalConfig) -> usize {
        let mut recruited = 0;
        let leaders: HashMap<AgentId, &MemberView> = agents.iter().map(|a| (a.id, a)).collect();
        let ids: Vec<TribeId> = self.tribes.keys().collect();
        for agent in agents {
            if self.affiliation.contains_key(&agent.id) {
                continue;
            }
            for id in &ids {
                let Some(tribe) = self.tribes.get_mut(*id) else {
                    continue;
                };
                if tribe.members.len() >= config.max_tribe_size
                    || !tribe.territory.contains(agent.position)
                {
                    continue;
                }
                let Some(leader) = leaders.get(&tribe.leader) else {
                    continue;
                };
                if affinity(agent, leader, &config.affinity) >= config.affinity_threshold {
                    tribe.members.push(agent.id);
                    tribe.roles.insert(agent.id, Role::best_worker(&agent.traits));
                    self.affiliation.insert(agent.id, *id);
                    recruited += 1;
                    break;
                }
            }
        }
        recruited
    }

    fn form(&mut self, agents: &[MemberView], config: &CogvrsConfig, tick: Tick) -> usize {
        let tribal = &config.tribal;
        let mut free: Vec<usize> = (0..agents.len())
            .filter(|i| !self.affiliation.contains_key(&agents[*i].id))
            .collect();
        if free.len() < tribal.formation_population {
            return 0;
        }
        let mut tried: HashSet<usize> = HashSet::new();
        let mut formed = 0;
        while free.len() >= tribal.min_tribe_size {
            let mut seed: Option<(usize, f32)> = None;
            for i in &free {
                if tried.contains(i) {
                    continue;
                }
                let score = leadership_score(&agents[*i], &tribal.leadership, config);
                if seed.is_none_or(|(_, s)| score > s) {
                    seed = Some((*i, score));
                }
            }
            let Some((seed, _)) = seed else {
                break;
            };
            tried.insert(seed);
            let leader = &agents[seed];
            let mut candidates: Vec<(usize, f32)> = free
                .iter()
                .copied()
                .filter(|i| *i != seed)
                .filter(|i| agents[*i].position.distance(leader.position) <= tribal.spatial_proximity)
                .map(|i| (i, affinity(leader, &agents[i], &tribal.affinity)))
                .filter(|(_, score)| *score > tribal.affinity_threshold)
                .collect();
            candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            candidates.truncate(tribal.max_tribe_size.saturating_sub(1));
            if candidates.len() + 1 < tribal.min_tribe_size {
                continue;
            }
            let mut members = vec![*leader];
            members.extend(candidates.iter().map(|(i, _)| agents[*i]));
            if self.found(&members, config, tick).is_some() {
                formed += 1;
            }
            let taken: HashSet<usize> = candidates.iter().map(|(i, _)| *i).chain([seed]).collect();
            free.retain(|i| !taken.contains(i));
        }
        formed
    }

    #[allow(clippy::too_many_arguments)]
    fn decide(
        &mut self,
        id: TribeId,
        agents: &[MemberView],
        lookup: &HashMap<AgentId, usize>,
        vitals: &HashMap<TribeId, TribeVitals>,
        config: &CogvrsConfig,
        tick: Tick,
        rng: &mut dyn RngCore,
        outcome: &mut TribalOutcome,
    ) {
        let threat = self.territorial_threat(id);
        let Some(tribe) = self.tribes.get_mut(id) else {
            return;
        };
        let Some(v) = vitals.get(&id) else {
            return;
        };
        let members: Vec<&MemberView> = tribe
            .members
            .iter()
            .filter_map(|m| lookup.get(m).map(|i| &agents[*i]))
            .collect();
        if members.is_empty() {
            return;
        }
        let tribal = &config.tribal;
        let decline = if tribe.previous_size > 0 && v.size < tribe.previous_size {
            (tribe.previous_size - v.size) as f32 / tribe.previous_size as f32 * 2.0
        } else {
            0.0
        };
        let crowding = v.size as f32 / tribal.max_tribe_size as f32;
        let candidates = [
            (TribalProblem::ResourceShortage, (0.5 - v.energy_ratio) * 2.0),
            (TribalProblem::HealthCrisis, (0.6 - v.health_ratio) * 2.5),
            (TribalProblem::PopulationDecline, decline),
            (TribalProblem::Overpopulation, (crowding - 0.8) * 5.0),
            (TribalProblem::TerritorialThreat, threat),
        ];
        tribe.previous_size = v.size;
        let mut pressing: Option<(TribalProblem, f32)> = None;
        for (problem, severity) in candidates {
            if severity > PROBLEM_FLOOR && pressing.is_none_or(|(_, s)| severity > s) {
                pressing = Some((problem, severity));
            }
        }
        let Some((problem, _)) = pressing else {
            tribe.directive = None;
            return;
        };
        let leader = lookup.get(&tribe.leader).map(|i| &agents[*i]);
        let response = choose_response(
            tribe.decision_mode,
            problem,
            &members,
            leader,
            tribal.consensus_floor,
            config.vitals.max_energy,
        );
        let bounds = config.bounds();
        let target = match response {
            TribalResponse::Migrate | TribalResponse::Expand => {
                let reach = if response == TribalResponse::Migrate { 2.0 } else { 1.5 };
                let heading = Vec2::from_angle(rng.random_range(0.0..std::f32::consts::TAU));
                Some(bounds.clamp(tribe.territory.center + heading * tribe.territory.radius * reach))
            }
            _ => None,
        };
        if response == TribalResponse::ShareStores && tribe.material > 0.0 {
            let energy = tribe.material * config.vitals.material_energy_fraction;
            tribe.material = 0.0;
            outcome.effects.push(TribalEffect::Provision { tribe: id, energy });
        }
        if tribe.directive.map(|d| d.response) != Some(response) {
            debug!(tribe = %tribe.name, ?problem, ?response, "tribal decision");
        }
        tribe.directive = Some(Directive {
            problem,
            response,
            target,
            issued: tick,
        });
    }

    fn territorial_threat(&self, id: TribeId) -> f32 {
        let Some(tribe) = self.tribes.get(id) else {
            return 0.0;
        };
        let mut threat: f32 = 0.0;
        for (other_id, other) in &self.tribes {
            if other_id == id || !tribe.territory.overlaps(&other.territory) {
                continue;
            }
            let hostility = -self.relation(id, other_id);
            if hostility > 0.0 {
                threat = threat.max(hostility);
            }
        }
        threat
    }

    /// Military strength: size, vitals, leadership, role composition, and technology.
    fn strength(&self, id: TribeId, vitals: &TribeVitals, leader_aggression: Option<f32>) -> f32 {
        let Some(tribe) = self.tribes.get(id) else {
            return 0.0;
        };
        let fighters = tribe
            .roles
            .values()
            .filter(|r| matches!(r, Role::Defender | Role::Hunter))
            .count();
        let fighter_share = if tribe.members.is_empty() {
            0.0
        } else {
            fighters as f32 / tribe.members.len() as f32
        };
        let leader_bonus = leader_aggression.map_or(0.0, |a| 0.1 + 0.2 * a);
        vitals.size as f32
            * vitals.health_ratio
            * vitals.energy_ratio
            * (1.0 + leader_bonus + fighter_share * 0.3 + tribe.technology_level as f32 * 0.1)
    }

    fn leader_aggression(
        &self,
        id: TribeId,
        agents: &[MemberView],
        lookup: &HashMap<AgentId, usize>,
    ) -> Option<f32> {
        let tribe = self.tribes.get(id)?;
        lookup
            .get(&tribe.leader)
            .map(|i| agents[*i].traits.get(Trait::Aggression))
    }

    /// Fight a war between `a` and `b`; the winner is drawn in proportion to strength.
    ///
    /// Returns `None` if either tribe is unknown. The loser's losses are pushed onto `effects`.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve_conflict(
        &mut self,
        a: TribeId,
        b: TribeId,
        agents: &[MemberView],
        config: &CogvrsConfig,
        rng: &mut dyn RngCore,
        effects: &mut Vec<TribalEffect>,
    ) -> Option<ConflictOutcome> {
        let lookup: HashMap<AgentId, usize> =
            agents.iter().enumerate().map(|(i, v)| (v.id, i)).collect();
        let vitals_of = |id: TribeId| -> Option<TribeVitals> {
            let tribe = self.tribes.get(id)?;
            let members: Vec<MemberView> = tribe
                .members
                .iter()
                .filter_map(|m| lookup.get(m).map(|i| agents[*i]))
                .collect();
            Some(tribe_vitals(&members, config))
        };
        let va = vitals_of(a)?;
        let vb = vitals_of(b)?;
        Some(self.fight(a, b, &va, &vb, agents, &lookup, config, rng, effects))
    }

    #[allow(clippy::too_many_arguments)]
    fn fight(
        &mut self,
        a: TribeId,
        b: TribeId,
        va: &TribeVitals,
        vb: &TribeVitals,
        agents: &[MemberView],
        lookup: &HashMap<AgentId, usize>,
        config: &CogvrsConfig,
        rng: &mut dyn RngCore,
        effects: &mut Vec<TribalEffect>,
    ) -> ConflictOutcome {
        let sa = self.strength(a, va, self.leader_aggression(a, agents, lookup));
        let sb = self.strength(b, vb, self.leader_aggression(b, agents, lookup));
        let total = sa + sb;
        let p_a = if total > 0.0 { sa / total } else { 0.5 };
        let a_wins = rng.random::<f32>() < p_a;
        let outcome = if a_wins {
            ConflictOutcome {
                winner: a,
                loser: b,
                winner_strength: sa,
                loser_strength: sb,
            }
        } else {
            ConflictOutcome {
                winner: b,
                loser: a,
                winner_strength: sb,
                loser_strength: sa,
            }
        };
        effects.push(TribalEffect::Losses {
            tribe: outcome.loser,
            health_fraction: config.tribal.conflict_health_loss,
            energy_fraction: config.tribal.conflict_energy_loss,
        });
        self.adjust_relation(a, b, InteractionKind::Conflict.relation_delta());
        debug!(
            winner = ?outcome.winner,
            loser = ?outcome.loser,
            winner_strength = outcome.winner_strength,
            loser_strength = outcome.loser_strength,
            "tribal conflict"
        );
        outcome
    }

    fn adjust_relation(&mut self, a: TribeId, b: TribeId, delta: f32) {
        let score = (self.relation(a, b) + delta).clamp(-1.0, 1.0);
        self.set_relation(a, b, score);
        if score < 0.0 {
            self.allies.remove(&pair_key(a, b));
        }
    }

    fn classify(
        &self,
        a: TribeId,
        b: TribeId,
        leader_aggression: f32,
        tribal: &TribalConfig,
    ) -> Option<InteractionKind> {
        let (ta, tb) = (self.tribes.get(a)?, self.tribes.get(b)?);
        let relation = self.relation(a, b);
        let allied = self.allied(a, b);
        let kind = if !allied && relation <= tribal.conflict_threshold {
            InteractionKind::Conflict
        } else if !allied && relation < 0.0 && ta.territory.overlaps(&tb.territory) {
            if leader_aggression > 0.5 {
                InteractionKind::Conflict
            } else {
                InteractionKind::Dispute
            }
        } else if !allied && relation >= tribal.alliance_threshold {
            InteractionKind::Alliance
        } else if (ta.surplus - tb.surplus).abs() > TRADE_MARGIN {
            InteractionKind::Trade
        } else {
            InteractionKind::CulturalExchange
        };
        Some(kind)
    }

    #[allow(clippy::too_many_arguments)]
    fn diplomacy(
        &mut self,
        ids: &[TribeId],
        agents: &[MemberView],
        lookup: &HashMap<AgentId, usize>,
        vitals: &HashMap<TribeId, TribeVitals>,
        config: &CogvrsConfig,
        rng: &mut dyn RngCore,
        outcome: &mut TribalOutcome,
    ) {
        let tribal = &config.tribal;
        for (pos, a) in ids.iter().enumerate() {
            for b in &ids[pos + 1..] {
                let (Some(ta), Some(tb)) = (self.tribes.get(*a), self.tribes.get(*b)) else {
                    continue;
                };
                let distance = ta.territory.center.distance(tb.territory.center);
                if distance >= tribal.interaction_range {
                    continue;
                }
                let chance = tribal.interaction_chance * (1.0 - distance / tribal.interaction_range);
                if rng.random::<f32>() >= chance {
                    continue;
                }
                let aggression = [*a, *b]
                    .iter()
                    .filter_map(|id| self.leader_aggression(*id, agents, lookup))
                    .fold(0.0_f32, f32::max);
                let Some(kind) = self.classify(*a, *b, aggression, tribal) else {
                    continue;
                };
                let (va, vb) = (
                    vitals.get(a).copied().unwrap_or_default(),
                    vitals.get(b).copied().unwrap_or_default(),
                );
                match kind {
                    InteractionKind::Conflict => {
                        self.fight(*a, *b, &va, &vb, agents, lookup, config, rng, &mut outcome.effects);
                        outcome.report.conflicts += 1;
                        continue;
                    }
                    InteractionKind::Trade => {
                        let (sa, sb) = (ta.surplus, tb.surplus);
                        let (from, to, surplus) = if sa >= sb { (*a, *b, sa) } else { (*b, *a, sb) };
                        outcome.effects.push(TribalEffect::EnergyTransfer {
                            from,
                            to,
                            amount: surplus * tribal.trade_fraction,
                        });
                        outcome.report.trades += 1;
                    }
                    InteractionKind::Alliance => {
                        self.allies.insert(pair_key(*a, *b));
                        outcome.report.alliances += 1;
                        debug!(a = ?a, b = ?b, "tribes allied");
                    }
                    InteractionKind::Dispute => outcome.report.disputes += 1,
                    InteractionKind::CulturalExchange => {
                        for id in [*a, *b] {
                            if let Some(t) = self.tribes.get_mut(id) {
                                t.learn(CULTURAL_EXCHANGE_KNOWLEDGE);
                            }
                        }
                        outcome.report.exchanges += 1;
                    }
                }
                self.adjust_relation(*a, *b, kind.relation_delta());
            }
        }
    }
}

fn tribe_vitals(members: &[MemberView], config: &CogvrsConfig) -> TribeVitals {
    if members.is_empty() {
        return TribeVitals::default();
    }
    let n = members.len() as f32;
    TribeVitals {
        size: members.len(),
        energy_ratio: members.iter().map(|m| m.energy).sum::<f32>() / n / config.vitals.max_energy,
        health_ratio: members.iter().map(|m| m.health).sum::<f32>() / n / MAX_HEALTH,
    }
}

fn assign_roles(tribe: &mut Tribe, members: &[MemberView]) {
    tribe.roles.clear();
    for m in members {
        let role = if m.id == tribe.leader {
            Role::Leader
        } else {
            Role::best_worker(&m.traits)
        };
        tribe.roles.insert(m.id, role);
    }
}

/// Re-elect the leader, reassign roles, and recompute territory and progression.
fn refresh(tribe: &mut Tribe, members: &[MemberView], config: &CogvrsConfig) {
    let tribal = &config.tribal;
    let mut best: Option<(AgentId, f32)> = None;
    for m in members {
        let score = leadership_score(m, &tribal.leadership, config);
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((m.id, score));
        }
    }
    if let Some((leader, _)) = best
        && leader != tribe.leader
    {
        debug!(tribe = %tribe.name, "leader elected");
        tribe.leader = leader;
    }
    assign_roles(tribe, members);
    let positions: Vec<Vec2> = members.iter().map(|m| m.position).collect();
    tribe.territory =
        Territory::enclosing(&positions, tribal.territory_buffer, tribal.territory_min_radius);
    tribe.surplus = members
        .iter()
        .map(|m| (m.energy - config.vitals.high_energy_threshold).max(0.0))
        .sum();
    let interactions: u64 = members.iter().map(|m| u64::from(m.social_interactions)).sum();
    let fresh = interactions.saturating_sub(tribe.interaction_total);
    tribe.interaction_total = interactions;
    tribe.learn(fresh as f32 * KNOWLEDGE_PER_INTERACTION);
    tribe.civilization = CivilizationLevel::for_population(members.len());
}
