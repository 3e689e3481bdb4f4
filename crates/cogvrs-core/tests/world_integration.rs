use cogvrs_core::agent::MAX_HEALTH;
use cogvrs_core::config::{MutationConfig, ResourceConfig};
use cogvrs_core::reproduction::pair_eligible;
use cogvrs_core::{
    AgentData, AgentId, BoundaryMode, CogvrsConfig, Generation, Role, Tick, Traits, Vec2, WorldState,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn quiet_config(seed: u64) -> CogvrsConfig {
    CogvrsConfig {
        initial_agents: 0,
        rng_seed: Some(seed),
        resources: ResourceConfig {
            density: 0.0,
            spawn_interval: 0,
            ..ResourceConfig::default()
        },
        ..CogvrsConfig::default()
    }
}

fn seasoned(x: f32, y: f32) -> AgentData {
    AgentData {
        energy: 100.0,
        age: 60.0,
        health: 90.0,
        ..AgentData::new(Vec2::new(x, y), 100.0)
    }
}

fn populated(config: CogvrsConfig) -> WorldState {
    let mut world = WorldState::new(config).expect("world");
    world.populate();
    world
}

#[test]
fn eligible_pair_produces_exactly_one_child() {
    let mut world = WorldState::new(quiet_config(11)).expect("world");
    let a = world.spawn_agent_with_traits(seasoned(10.0, 10.0), Traits::uniform(0.0));
    let b = world.spawn_agent_with_traits(seasoned(11.0, 10.0), Traits::uniform(0.0));

    let events = world.tick(0.1);

    assert_eq!(events.births, 1);
    assert_eq!(world.agent_count(), 3);
    for id in [a, b] {
        let parent = world.agent(id).expect("parent");
        assert_eq!(parent.offspring_count, 1);
        assert!(
            (69.0..=70.0).contains(&parent.energy),
            "parent energy {}",
            parent.energy
        );
    }
    let snapshot = world.snapshot();
    let child = snapshot
        .agents
        .iter()
        .find(|agent| agent.id != a && agent.id != b)
        .expect("child");
    assert_eq!(child.generation, Generation(1));
    assert_eq!(child.energy, world.config().reproduction.child_energy);
    assert_eq!(child.age, 0.0);
}

#[test]
fn starving_agent_is_removed_within_one_tick() {
    let mut config = quiet_config(12);
    config.vitals.base_metabolism = 0.5;
    let mut world = WorldState::new(config).expect("world");
    world.spawn_agent(AgentData::new(Vec2::new(50.0, 50.0), 0.4));

    let events = world.tick(1.0);

    assert_eq!(events.deaths, 1);
    assert_eq!(world.agent_count(), 0);
    let snapshot = world.snapshot();
    assert!(snapshot.agents.is_empty());
    assert_eq!(snapshot.aggregates.population, 0);
}

#[test]
fn agents_spawned_dead_are_hidden_from_snapshots() {
    let mut world = WorldState::new(quiet_config(18)).expect("world");
    world.spawn_agent(AgentData::new(Vec2::new(50.0, 50.0), 0.0));
    let living = world.spawn_agent(AgentData::new(Vec2::new(20.0, 20.0), 50.0));

    let snapshot = world.snapshot();
    assert_eq!(snapshot.agents.len(), 1);
    assert_eq!(snapshot.agents[0].id, living);
    assert_eq!(snapshot.aggregates.population, 1);
}

#[test]
fn non_finite_resource_rates_fail_construction() {
    let mut config = quiet_config(19);
    config.resources.density = 0.01;
    config.resources.max_regen_rate = f32::INFINITY;
    assert!(WorldState::new(config).is_err());
}

fn random_vitals(rng: &mut SmallRng, x: f32) -> AgentData {
    AgentData {
        energy: rng.random_range(60.0..110.0),
        age: rng.random_range(30.0..70.0),
        health: rng.random_range(30.0..100.0),
        offspring_count: rng.random_range(0..5),
        ..AgentData::new(Vec2::new(x, 20.0), 0.0)
    }
}

#[test]
fn births_happen_only_for_eligible_pairs() {
    let mut rng = SmallRng::seed_from_u64(13);
    let mut births = 0;
    for round in 0..200 {
        let mut world = WorldState::new(quiet_config(1_000 + round)).expect("world");
        let gap = rng.random_range(0.0..6.0);
        let first = random_vitals(&mut rng, 20.0);
        let second = random_vitals(&mut rng, 20.0 + gap);
        world.spawn_agent_with_traits(first, Traits::uniform(0.0));
        world.spawn_agent_with_traits(second, Traits::uniform(0.0));
        let config = world.config().clone();

        // Zero dt freezes every vital, so eligibility is judged on the spawned state.
        let events = world.tick(0.0);
        let expected = pair_eligible(&config.reproduction, &first, &second, 2, config.max_population);
        assert_eq!(events.births == 1, expected, "round {round}: {first:?} / {second:?}");
        births += events.births;
    }
    assert!(births > 0, "property never exercised a birth");
}

#[test]
fn population_cap_stops_reproduction() {
    let mut config = quiet_config(14);
    config.max_population = 2;
    let mut world = WorldState::new(config).expect("world");
    world.spawn_agent(seasoned(10.0, 10.0));
    world.spawn_agent(seasoned(11.0, 10.0));
    let events = world.tick(0.1);
    assert_eq!(events.births, 0);
    assert_eq!(world.agent_count(), 2);
}

#[test]
fn unmutated_children_inherit_blended_traits() {
    let mut config = quiet_config(15);
    config.mutation = MutationConfig {
        rate: 0.0,
        ..MutationConfig::default()
    };
    let mut world = WorldState::new(config).expect("world");
    let a = world.spawn_agent_with_traits(seasoned(10.0, 10.0), Traits::uniform(0.2));
    let b = world.spawn_agent_with_traits(seasoned(11.0, 10.0), Traits::uniform(0.8));
    assert_eq!(world.tick(0.1).births, 1);
    let snapshot = world.snapshot();
    let child = snapshot
        .agents
        .iter()
        .find(|agent| agent.id != a && agent.id != b)
        .expect("child");
    for (_, value) in child.traits.iter() {
        assert!((0.2 - 1e-6..=0.8 + 1e-6).contains(&value), "trait {value}");
    }
}

#[test]
fn positions_and_vitals_stay_in_range() {
    for boundary in [BoundaryMode::Bounded, BoundaryMode::Toroidal] {
        let mut world = populated(CogvrsConfig {
            boundary,
            rng_seed: Some(16),
            ..CogvrsConfig::default()
        });
        let bounds = world.config().bounds();
        let max_energy = world.config().vitals.max_energy;
        let max_lifespan = world.config().vitals.max_lifespan;
        for _ in 0..300 {
            world.step();
            assert!(world.agent_count() <= world.config().max_population);
            for (_, agent) in world.agents().iter() {
                assert!(bounds.contains(agent.position), "{:?}", agent.position);
                assert!((0.0..=max_energy).contains(&agent.energy));
                assert!((0.0..=MAX_HEALTH).contains(&agent.health));
                assert!(agent.alive);
                assert!(!agent.should_die(max_lifespan));
            }
        }
    }
}

#[test]
fn dead_agents_never_linger() {
    let mut rng = SmallRng::seed_from_u64(17);
    let mut config = quiet_config(17);
    config.vitals.base_metabolism = 2.0;
    let mut world = WorldState::new(config).expect("world");
    for _ in 0..30 {
        let position = Vec2::new(rng.random_range(0.0..100.0), rng.random_range(0.0..100.0));
        world.spawn_agent(AgentData::new(position, rng.random_range(0.1..5.0)));
    }
    let mut deaths = 0;
    for _ in 0..40 {
        deaths += world.tick(0.5).deaths;
        let snapshot = world.snapshot();
        for agent in &snapshot.agents {
            assert!(agent.energy > 0.0 && agent.health > 0.0);
        }
    }
    assert_eq!(deaths, 30);
    assert_eq!(world.agent_count(), 0);
}

#[test]
fn clustered_agents_found_one_tribe() {
    let mut config = quiet_config(18);
    config.tribal.check_interval = 1;
    config.tribal.formation_population = 6;
    config.tribal.min_tribe_size = 5;
    let mut world = WorldState::new(config).expect("world");
    let ids: Vec<_> = (0..6)
        .map(|i| {
            let agent = AgentData {
                age: 30.0,
                ..AgentData::new(Vec2::new(40.0 + i as f32, 40.0), 90.0)
            };
            world.spawn_agent_with_traits(agent, Traits::uniform(0.4))
        })
        .collect();

    let events = world.tick(0.0);

    assert_eq!(events.tribal.map(|r| r.formed), Some(1));
    let snapshot = world.snapshot();
    assert_eq!(snapshot.tribes.len(), 1);
    let tribe = &snapshot.tribes[0];
    assert_eq!(tribe.members.len(), 6);
    assert!(tribe.members.contains(&tribe.leader));
    assert_eq!(tribe.roles.len(), 6);
    let leaders = tribe.roles.iter().filter(|(_, r)| *r == Role::Leader).count();
    assert_eq!(leaders, 1);
    for id in ids {
        assert_eq!(world.agent(id).expect("agent").tribe, Some(tribe.id));
    }
}

#[test]
fn hostile_tribes_fight_and_the_loser_pays() {
    let mut config = quiet_config(19);
    config.tribal.check_interval = 1;
    config.tribal.interaction_chance = 1.0;
    let mut world = WorldState::new(config).expect("world");
    let spawn = |world: &mut WorldState, i: usize| {
        let agent = AgentData {
            health: 90.0,
            age: 30.0,
            ..AgentData::new(Vec2::new(40.0 + (i % 4) as f32, 40.0), 100.0)
        };
        world.spawn_agent_with_traits(agent, Traits::uniform(0.4))
    };
    let first: Vec<_> = (0..4).map(|i| spawn(&mut world, i)).collect();
    let second: Vec<_> = (4..8).map(|i| spawn(&mut world, i)).collect();
    let a = world.found_tribe(&first).expect("tribe a");
    let b = world.found_tribe(&second).expect("tribe b");
    world.tribes_mut().set_relation(a, b, -0.6);

    let events = world.tick(0.0);

    assert_eq!(events.tribal.map(|r| r.conflicts), Some(1));
    let mean_health = |ids: &[AgentId]| -> f32 {
        ids.iter()
            .map(|id| world.agent(*id).expect("member").health)
            .sum::<f32>()
            / ids.len() as f32
    };
    let (ha, hb) = (mean_health(&first[..]), mean_health(&second[..]));
    let loser_health = ha.min(hb);
    let winner_health = ha.max(hb);
    assert!((winner_health - 90.0).abs() < 1e-3, "winner {winner_health}");
    assert!((loser_health - 72.0).abs() < 1e-3, "loser {loser_health}");
    assert!(world.tribes().relation(a, b) < -0.6);
}

#[test]
fn tribes_respect_minimum_size_after_maintenance() {
    let mut config = CogvrsConfig {
        rng_seed: Some(20),
        initial_agents: 40,
        ..CogvrsConfig::default()
    };
    config.tribal.check_interval = 5;
    config.tribal.formation_population = 6;
    let min = config.tribal.min_tribe_size;
    let mut world = populated(config);
    for _ in 0..400 {
        let events = world.step();
        if events.tribal.is_none() {
            continue;
        }
        for (_, tribe) in world.tribes().iter() {
            assert!(tribe.len() >= min, "{} has {} members", tribe.name, tribe.len());
            assert!(tribe.contains(tribe.leader));
            for member in &tribe.members {
                let agent = world.agent(*member).expect("living member");
                assert_eq!(agent.tribe, Some(tribe.id));
            }
        }
    }
}

#[test]
fn snapshot_is_idempotent() {
    let mut world = populated(CogvrsConfig {
        rng_seed: Some(21),
        ..CogvrsConfig::default()
    });
    for _ in 0..25 {
        world.step();
    }
    let first = world.snapshot();
    let second = world.snapshot();
    assert_eq!(first, second);
    assert_eq!(first.tick, Tick(25));
    assert_eq!(first.aggregates.population, world.agent_count());
}

#[test]
fn seeded_worlds_evolve_identically() {
    let config = CogvrsConfig {
        rng_seed: Some(0xC06),
        ..CogvrsConfig::default()
    };
    let mut left = populated(config.clone());
    let mut right = populated(config);
    for _ in 0..120 {
        assert_eq!(left.step(), right.step());
    }
    assert_eq!(left.snapshot(), right.snapshot());
}

#[test]
fn snapshot_json_round_trips() {
    let mut world = populated(CogvrsConfig {
        rng_seed: Some(22),
        ..CogvrsConfig::default()
    });
    for _ in 0..10 {
        world.step();
    }
    let snapshot = world.snapshot();
    let json = snapshot.to_json().expect("json");
    let back: cogvrs_core::WorldSnapshot = serde_json::from_str(&json).expect("parse");
    assert_eq!(back, snapshot);
}

#[test]
fn history_tracks_population() {
    let mut world = populated(CogvrsConfig {
        rng_seed: Some(23),
        history_capacity: 8,
        ..CogvrsConfig::default()
    });
    for _ in 0..20 {
        world.step();
    }
    let history: Vec<_> = world.history().cloned().collect();
    assert_eq!(history.len(), 8);
    let last = history.last().expect("summary");
    assert_eq!(last.tick, Tick(20));
    assert_eq!(last.population, world.agent_count());
}
