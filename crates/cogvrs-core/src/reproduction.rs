//! Mate eligibility, pairing, and genome recombination.

use cogvrs_brain::MutationReport;
use rand::{Rng, RngCore};
use tracing::trace;

use crate::agent::{AgentData, Genome, Traits};
use crate::config::{MutationConfig, ReproductionConfig};
use crate::geometry::{Bounds, Vec2};

/// Whether one agent meets every parent threshold on its own.
#[must_use]
pub fn parent_ready(config: &ReproductionConfig, agent: &AgentData) -> bool {
    agent.alive
        && agent.energy > config.min_energy
        && agent.age > config.min_age
        && agent.health > config.min_health
        && agent.offspring_count < config.max_offspring
}

/// Whether `a` and `b` may produce a child in a world holding `population` agents.
#[must_use]
pub fn pair_eligible(
    config: &ReproductionConfig,
    a: &AgentData,
    b: &AgentData,
    population: usize,
    max_population: usize,
) -> bool {
    population < max_population
        && parent_ready(config, a)
        && parent_ready(config, b)
        && a.position.distance(b.position) < config.proximity
}

/// Choose disjoint parent pairs from dense-order `agents`.
///
/// Agents are visited in ascending order; each unpaired, ready agent is matched with
/// its nearest ready, unpaired partner within `proximity` (ties by lower index).
/// Every planned birth counts against `max_population`.
#[must_use]
pub fn plan_pairings(
    config: &ReproductionConfig,
    agents: &[AgentData],
    max_population: usize,
) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let ready: Vec<bool> = agents.iter().map(|a| parent_ready(config, a)).collect();
    let mut paired = vec![false; agents.len()];
    for i in 0..agents.len() {
        if agents.len() + pairs.len() >= max_population {
            break;
        }
        if !ready[i] || paired[i] {
            continue;
        }
        let mut best: Option<(usize, f32)> = None;
        for j in (i + 1)..agents.len() {
            if !ready[j] || paired[j] {
                continue;
            }
            let dist = agents[i].position.distance(agents[j].position);
            if dist < config.proximity && best.is_none_or(|(_, d)| dist < d) {
                best = Some((j, dist));
            }
        }
        if let Some((j, _)) = best {
            paired[i] = true;
            paired[j] = true;
            pairs.push((i, j));
        }
    }
    pairs
}

/// Recombine and mutate two parent genomes.
///
/// Returns `None` when the evaluators cannot be crossed.
pub fn breed(
    a: &Genome,
    b: &Genome,
    mutation: &MutationConfig,
    rng: &mut dyn RngCore,
) -> Option<(Genome, MutationReport)> {
    let mut brain = a.brain.crossover(b.brain.as_ref(), rng)?;
    let report = brain.mutate(rng, &mutation.weight_params());
    let alpha = rng.random::<f32>();
    let mut traits = Traits::blend(&a.traits, &b.traits, alpha);
    let trait_changes = traits.mutate(
        rng,
        mutation.rate * mutation.trait_rate,
        mutation.trait_strength,
    );
    trace!(
        weights = report.total(),
        traits = trait_changes,
        "bred child genome"
    );
    Some((Genome { traits, brain }, report))
}

/// Child position: parents' midpoint plus bounded jitter, kept inside the world.
pub fn spawn_position(
    a: Vec2,
    b: Vec2,
    jitter: f32,
    bounds: Bounds,
    rng: &mut dyn RngCore,
) -> Vec2 {
    let mut position = a.midpoint(b);
    if jitter > 0.0 {
        position += Vec2::new(
            rng.random_range(-jitter..=jitter),
            rng.random_range(-jitter..=jitter),
        );
    }
    bounds.clamp(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogvrs_brain::{FeedForwardNet, NetworkLayout};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn ready_at(x: f32) -> AgentData {
        AgentData {
            energy: 120.0,
            age: 80.0,
            ..AgentData::new(Vec2::new(x, 10.0), 120.0)
        }
    }

    fn genome(rng: &mut SmallRng, traits: Traits) -> Genome {
        let layout = NetworkLayout {
            input_size: 4,
            hidden: vec![3],
            output_size: 2,
            ..NetworkLayout::default()
        };
        Genome {
            traits,
            brain: FeedForwardNet::boxed(&layout, rng).expect("brain"),
        }
    }

    #[test]
    fn thresholds_are_strict() {
        let config = ReproductionConfig::default();
        let agent = ready_at(0.0);
        assert!(parent_ready(&config, &agent));
        assert!(!parent_ready(&config, &AgentData { energy: 80.0, ..agent }));
        assert!(!parent_ready(&config, &AgentData { age: 50.0, ..agent }));
        assert!(!parent_ready(&config, &AgentData { health: 50.0, ..agent }));
        assert!(!parent_ready(&config, &AgentData { offspring_count: 3, ..agent }));
        assert!(!parent_ready(&config, &AgentData { alive: false, ..agent }));
    }

    #[test]
    fn pair_requires_proximity_and_room() {
        let config = ReproductionConfig::default();
        let a = ready_at(0.0);
        assert!(pair_eligible(&config, &a, &ready_at(2.9), 10, 50));
        assert!(!pair_eligible(&config, &a, &ready_at(3.0), 10, 50));
        assert!(!pair_eligible(&config, &a, &ready_at(1.0), 50, 50));
    }

    #[test]
    fn pairing_prefers_nearest_and_never_reuses_parents() {
        let config = ReproductionConfig::default();
        let agents = vec![ready_at(0.0), ready_at(2.5), ready_at(1.0), ready_at(2.0)];
        let pairs = plan_pairings(&config, &agents, 50);
        assert_eq!(pairs, vec![(0, 2), (1, 3)]);
    }

    #[test]
    fn pairing_respects_population_cap() {
        let config = ReproductionConfig::default();
        let agents = vec![ready_at(0.0), ready_at(1.0), ready_at(20.0), ready_at(21.0)];
        assert_eq!(plan_pairings(&config, &agents, 5), vec![(0, 1)]);
        assert!(plan_pairings(&config, &agents, 4).is_empty());
    }

    #[test]
    fn unmutated_child_traits_lie_between_parents() {
        let mut rng = SmallRng::seed_from_u64(21);
        let a = genome(&mut rng, Traits::uniform(0.2));
        let b = genome(&mut rng, Traits::uniform(0.8));
        let mutation = MutationConfig {
            rate: 0.0,
            ..MutationConfig::default()
        };
        let pa = a.brain.parameters();
        let pb = b.brain.parameters();
        for _ in 0..200 {
            let (child, report) = breed(&a, &b, &mutation, &mut rng).expect("child");
            assert_eq!(report.total(), 0);
            for (_, v) in child.traits.iter() {
                assert!((0.2 - 1e-6..=0.8 + 1e-6).contains(&v), "trait {v}");
            }
            for ((c, x), y) in child.brain.parameters().iter().zip(&pa).zip(&pb) {
                assert!(*c >= x.min(*y) - 1e-5 && *c <= x.max(*y) + 1e-5);
            }
        }
    }

    #[test]
    fn full_rate_mutation_moves_every_weight() {
        let mut rng = SmallRng::seed_from_u64(22);
        let a = genome(&mut rng, Traits::default());
        let b = a.clone();
        let mutation = MutationConfig {
            rate: 1.0,
            strength: 0.5,
            structural_rate: 0.0,
            ..MutationConfig::default()
        };
        let (child, report) = breed(&a, &b, &mutation, &mut rng).expect("child");
        assert_eq!(report.perturbed, a.brain.parameters().len());
        let changed = child
            .brain
            .parameters()
            .iter()
            .zip(a.brain.parameters())
            .filter(|(c, p)| (**c - *p).abs() > 0.0)
            .count();
        assert_eq!(changed, a.brain.parameters().len());
    }

    #[test]
    fn spawn_position_stays_in_bounds() {
        let mut rng = SmallRng::seed_from_u64(23);
        let bounds = Bounds::new(10.0, 10.0);
        for _ in 0..100 {
            let p = spawn_position(Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.5), 3.0, bounds, &mut rng);
            assert!(bounds.contains(p));
        }
        let exact = spawn_position(Vec2::new(2.0, 2.0), Vec2::new(4.0, 6.0), 0.0, bounds, &mut rng);
        assert_eq!(exact, Vec2::new(3.0, 4.0));
    }
}
