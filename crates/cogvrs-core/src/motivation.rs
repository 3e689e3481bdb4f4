//! Motivation engine: drive strengths, dominant-drive selection, and action planning.
//!
//! Each agent owns six drives. Every tick their strengths are recomputed from the
//! agent's vitals and surroundings, optionally gated by the neural evaluator, and
//! relaxed toward a per-drive baseline. The strongest drive above its own
//! threshold is mapped to exactly one [`ActionKind`]; with probability
//! `exploration_rate` that choice is swapped for a random alternative.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::AgentId;
use crate::agent::{AgentData, MAX_HEALTH, Trait, Traits};
use crate::config::CogvrsConfig;
use crate::geometry::Vec2;
use crate::perception::{GATE_OUTPUTS, OUTPUT_HEADING_X, OUTPUT_HEADING_Y, OUTPUT_INTENSITY, Perception};
use crate::tribe::TribalResponse;

/// Rate at which satisfied drives recover, per time unit.
const SATIATION_RECOVERY: f32 = 0.5;
const DIRECTIVE_BIAS: f32 = 0.2;

/// Named internal drives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Drive {
    Hunger,
    Energy,
    Curiosity,
    Social,
    Reproduction,
    Safety,
}

impl Drive {
    pub const ALL: [Self; 6] = [
        Self::Hunger,
        Self::Energy,
        Self::Curiosity,
        Self::Social,
        Self::Reproduction,
        Self::Safety,
    ];

    /// Position in [`Drive::ALL`] and in the evaluator's gate outputs.
    #[must_use]
    pub const fn slot(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hunger => "hunger",
            Self::Energy => "energy",
            Self::Curiosity => "curiosity",
            Self::Social => "social",
            Self::Reproduction => "reproduction",
            Self::Safety => "safety",
        }
    }

    /// The action kind this drive resolves to.
    #[must_use]
    pub const fn action(self) -> ActionKind {
        match self {
            Self::Hunger => ActionKind::Consume,
            Self::Energy => ActionKind::Rest,
            Self::Curiosity => ActionKind::Explore,
            Self::Social => ActionKind::Communicate,
            Self::Reproduction => ActionKind::Mate,
            Self::Safety => ActionKind::Move,
        }
    }

    /// `(baseline, decay_rate, threshold)`.
    const fn parameters(self) -> (f32, f32, f32) {
        match self {
            Self::Hunger => (0.3, 0.02, 0.6),
            Self::Energy => (0.2, 0.01, 0.7),
            Self::Curiosity => (0.8, 0.005, 0.5),
            Self::Social => (0.4, 0.008, 0.6),
            Self::Reproduction => (0.05, 0.005, 0.5),
            Self::Safety => (0.3, 0.005, 0.8),
        }
    }
}

/// One drive's state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Motivation {
    pub drive: Drive,
    pub strength: f32,
    pub baseline: f32,
    pub decay_rate: f32,
    pub threshold: f32,
    /// Temporary suppression after the drive was acted upon.
    pub satiation: f32,
}

impl Motivation {
    #[must_use]
    pub fn new(drive: Drive) -> Self {
        let (baseline, decay_rate, threshold) = drive.parameters();
        Self {
            drive,
            strength: baseline,
            baseline,
            decay_rate,
            threshold,
            satiation: 0.0,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.strength > self.threshold
    }

    fn relax(&mut self, raw: f32, dt: f32) {
        let relaxed = self.baseline + (raw - self.baseline) * (-self.decay_rate * dt).exp();
        self.strength = (relaxed - self.satiation).clamp(0.0, 1.0);
        self.satiation *= (-SATIATION_RECOVERY * dt).exp();
    }
}

/// Concrete action categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Move,
    Consume,
    Communicate,
    Mate,
    Rest,
    Explore,
}

impl ActionKind {
    pub const ALL: [Self; 6] = [
        Self::Move,
        Self::Consume,
        Self::Communicate,
        Self::Mate,
        Self::Rest,
        Self::Explore,
    ];

    /// Drive whose satisfaction this action serves, used as the learning target slot.
    #[must_use]
    pub const fn drive(self) -> Drive {
        match self {
            Self::Move => Drive::Safety,
            Self::Consume => Drive::Hunger,
            Self::Communicate => Drive::Social,
            Self::Mate => Drive::Reproduction,
            Self::Rest => Drive::Energy,
            Self::Explore => Drive::Curiosity,
        }
    }
}

/// One decided behavior for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Directed movement; `intensity` in [0, 1] scales toward top speed.
    Move { direction: Vec2, intensity: f32 },
    /// Undirected roaming.
    Explore { direction: Vec2, intensity: f32 },
    /// Harvest the resource at `resource`, walking to `target` if out of reach.
    Consume { resource: usize, target: Vec2 },
    Communicate {
        target: AgentId,
        position: Vec2,
        cooperative: bool,
    },
    /// Approach a prospective mate; births happen in the reproduction stage.
    Mate { partner: AgentId, position: Vec2 },
    Rest,
}

impl Action {
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Move { .. } => ActionKind::Move,
            Self::Explore { .. } => ActionKind::Explore,
            Self::Consume { .. } => ActionKind::Consume,
            Self::Communicate { .. } => ActionKind::Communicate,
            Self::Mate { .. } => ActionKind::Mate,
            Self::Rest => ActionKind::Rest,
        }
    }
}

/// Tribe-level guidance visible to a member.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectiveView {
    pub response: TribalResponse,
    pub territory_center: Vec2,
    pub territory_radius: f32,
    /// Destination for migration-style responses.
    pub target: Option<Vec2>,
}

/// Inputs to one decision.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub agent: &'a AgentData,
    pub traits: &'a Traits,
    pub perception: &'a Perception,
    /// Evaluator outputs; may be shorter than expected, missing slots read as neutral.
    pub outputs: &'a [f32],
    pub directive: Option<DirectiveView>,
    pub config: &'a CogvrsConfig,
    pub dt: f32,
}

impl DecisionContext<'_> {
    fn output(&self, slot: usize) -> f32 {
        self.outputs.get(slot).copied().unwrap_or(0.5)
    }

    fn directive_is(&self, responses: &[TribalResponse]) -> bool {
        self.directive
            .is_some_and(|d| responses.contains(&d.response))
    }
}

/// Result of [`MotivationEngine::decide`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Winning drive, or `None` when the default exploration fallback applied.
    pub drive: Option<Drive>,
    pub action: Action,
    /// True when the exploration-rate override replaced the planned action.
    pub randomized: bool,
}

/// The six drives owned by one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotivationEngine {
    motivations: [Motivation; 6],
}

impl Default for MotivationEngine {
    fn default() -> Self {
        Self {
            motivations: Drive::ALL.map(Motivation::new),
        }
    }
}

impl MotivationEngine {
    #[must_use]
    pub fn motivations(&self) -> &[Motivation; 6] {
        &self.motivations
    }

    #[must_use]
    pub fn get(&self, drive: Drive) -> &Motivation {
        &self.motivations[drive.slot()]
    }

    #[must_use]
    pub fn strength(&self, drive: Drive) -> f32 {
        self.get(drive).strength
    }

    /// Force a strength, bypassing the update rules.
    pub fn set_strength(&mut self, drive: Drive, strength: f32) {
        self.motivations[drive.slot()].strength = strength.clamp(0.0, 1.0);
    }

    /// Suppress a drive after it was acted upon.
    pub fn satisfy(&mut self, drive: Drive, amount: f32) {
        let m = &mut self.motivations[drive.slot()];
        m.satiation = (m.satiation + amount).clamp(0.0, 1.0);
        m.strength = (m.strength - amount).clamp(0.0, 1.0);
    }

    /// Recompute every drive from the current context.
    pub fn update(&mut self, ctx: &DecisionContext<'_>, rng: &mut dyn RngCore) {
        let raw = raw_strengths(ctx, rng);
        let gating = ctx.config.decision.neural_gating;
        for (slot, m) in self.motivations.iter_mut().enumerate() {
            let gated = if slot < GATE_OUTPUTS {
                raw[slot] * (1.0 + gating * (2.0 * ctx.output(slot) - 1.0))
            } else {
                raw[slot]
            };
            m.relax(gated.clamp(0.0, 1.0), ctx.dt);
        }
    }

    /// Strongest drive above its threshold; ties go to the earlier drive.
    #[must_use]
    pub fn dominant(&self) -> Option<Drive> {
        let mut best: Option<&Motivation> = None;
        for m in self.motivations.iter().filter(|m| m.is_active()) {
            if best.is_none_or(|b| m.strength > b.strength) {
                best = Some(m);
            }
        }
        best.map(|m| m.drive)
    }

    /// Update drives, pick one, and plan the resulting action.
    pub fn decide(&mut self, ctx: &DecisionContext<'_>, rng: &mut dyn RngCore) -> Decision {
        self.update(ctx, rng);
        let drive = self.dominant();
        let planned = drive.map_or(ActionKind::Explore, Drive::action);
        let mut kind = planned;
        let mut randomized = false;
        if rng.random::<f32>() < ctx.config.decision.exploration_rate {
            let alternatives: Vec<ActionKind> = ActionKind::ALL
                .iter()
                .copied()
                .filter(|k| *k != planned)
                .collect();
            kind = alternatives[rng.random_range(0..alternatives.len())];
            randomized = true;
        }
        Decision {
            drive,
            action: plan(kind, ctx, self, rng),
            randomized,
        }
    }
}

fn raw_strengths(ctx: &DecisionContext<'_>, rng: &mut dyn RngCore) -> [f32; 6] {
    let agent = ctx.agent;
    let traits = ctx.traits;
    let perception = ctx.perception;
    let vitals = &ctx.config.vitals;
    let repro = &ctx.config.reproduction;
    let energy_level = (agent.energy / vitals.max_energy).clamp(0.0, 1.0);
    let health_level = (agent.health / MAX_HEALTH).clamp(0.0, 1.0);
    let bias = |on: bool| if on { DIRECTIVE_BIAS } else { 0.0 };

    let hunger = (1.0 - energy_level).max(0.1)
        + bias(ctx.directive_is(&[TribalResponse::ForageEmphasis]));

    let fatigue = (1.0 - health_level) * 0.8
        + if energy_level < 0.3 { 0.3 } else { 0.0 }
        + bias(ctx.directive_is(&[TribalResponse::Recuperate]));

    let mut curiosity = traits.get(Trait::Curiosity) * 0.7
        + bias(ctx.directive_is(&[TribalResponse::Migrate, TribalResponse::Expand]));
    if rng.random::<f32>() < 0.1 {
        curiosity += rng.random_range(0.1..0.3);
    }

    let company = if perception.neighbor_count > 0 { 0.2 } else { 0.1 };
    let social = traits.get(Trait::SocialActivity) * 0.6
        + company
        + bias(ctx.directive_is(&[TribalResponse::SeekAlliance, TribalResponse::Recruit]));

    let maturity = if repro.min_age > 0.0 {
        (agent.age / repro.min_age).min(1.0)
    } else {
        1.0
    };
    let fertility = if repro.max_offspring == 0 {
        0.0
    } else {
        (1.0 - agent.offspring_count as f32 / repro.max_offspring as f32).max(0.0)
    };
    let reproduction = maturity * energy_level * health_level * fertility;

    let caution = 1.0 - 0.5 * traits.get(Trait::RiskTaking);
    let safety = (perception.threat * 0.6
        + perception.crowding * 0.3
        + if health_level < 0.5 { 0.3 } else { 0.0 })
        * caution
        + bias(ctx.directive_is(&[TribalResponse::Fortify]));

    [hunger, fatigue, curiosity, social, reproduction, safety]
}

fn neural_heading(ctx: &DecisionContext<'_>) -> Vec2 {
    Vec2::new(
        2.0 * ctx.output(OUTPUT_HEADING_X) - 1.0,
        2.0 * ctx.output(OUTPUT_HEADING_Y) - 1.0,
    )
}

fn explore(ctx: &DecisionContext<'_>, rng: &mut dyn RngCore) -> Action {
    let agent = ctx.agent;
    let intensity = (0.5 + 0.5 * ctx.output(OUTPUT_INTENSITY)).clamp(0.0, 1.0);
    if let Some(target) = ctx.directive.and_then(|d| d.target) {
        let direction = (target - agent.position).normalized();
        if direction != Vec2::ZERO {
            return Action::Explore {
                direction,
                intensity,
            };
        }
    }
    let exploration = ctx.traits.get(Trait::Exploration);
    let wander = if exploration > 0.7 {
        let bounds = ctx.config.bounds();
        let far = Vec2::new(
            rng.random_range(0.0..=bounds.width),
            rng.random_range(0.0..=bounds.height),
        );
        (far - agent.position).normalized()
    } else {
        Vec2::from_angle(rng.random_range(0.0..std::f32::consts::TAU))
    };
    let gating = ctx.config.decision.neural_gating;
    let mut direction = (wander * (1.0 - gating) + neural_heading(ctx) * gating).normalized();
    if direction == Vec2::ZERO {
        direction = wander;
    }
    Action::Explore {
        direction,
        intensity: intensity * (0.5 + 0.5 * exploration),
    }
}

fn plan(
    kind: ActionKind,
    ctx: &DecisionContext<'_>,
    engine: &MotivationEngine,
    rng: &mut dyn RngCore,
) -> Action {
    let agent = ctx.agent;
    let perception = ctx.perception;
    match kind {
        ActionKind::Consume => match perception.nearest_resource {
            Some(resource) => Action::Consume {
                resource: resource.index,
                target: resource.position,
            },
            None => explore(ctx, rng),
        },
        ActionKind::Communicate => match perception.nearest_agent {
            Some(other) => Action::Communicate {
                target: other.id,
                position: other.position,
                cooperative: engine.strength(Drive::Social) > 0.6
                    && ctx.traits.get(Trait::Cooperation) > 0.5,
            },
            None => explore(ctx, rng),
        },
        ActionKind::Mate => match perception.nearest_agent {
            Some(other) => Action::Mate {
                partner: other.id,
                position: other.position,
            },
            None => explore(ctx, rng),
        },
        ActionKind::Rest => Action::Rest,
        ActionKind::Move => {
            if let Some(center) = perception.threat_center {
                let away = (agent.position - center).normalized();
                let direction = if away == Vec2::ZERO {
                    Vec2::from_angle(rng.random_range(0.0..std::f32::consts::TAU))
                } else {
                    away
                };
                return Action::Move {
                    direction,
                    intensity: 1.0,
                };
            }
            let home = match ctx.directive {
                Some(d) if agent.position.distance(d.territory_center) > d.territory_radius * 0.5 => {
                    d.territory_center
                }
                Some(_) => agent.position,
                None => ctx.config.bounds().center(),
            };
            Action::Move {
                direction: (home - agent.position).normalized(),
                intensity: 0.6,
            }
        }
        ActionKind::Explore => explore(ctx, rng),
    }
}
