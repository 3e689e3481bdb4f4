//! Resource nodes, their regrowth, and the global day/night environment.

use cogvrs_index::{NeighborhoodIndex, UniformGridIndex};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::Tick;
use crate::config::{ConfigError, ResourceConfig};
use crate::geometry::{Bounds, Vec2};

/// Category of a resource node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Food,
    Energy,
    Material,
}

impl ResourceKind {
    pub const ALL: [Self; 3] = [Self::Food, Self::Energy, Self::Material];

    /// Whether consuming this kind restores energy at full value.
    #[must_use]
    pub fn is_nourishing(self) -> bool {
        matches!(self, Self::Food | Self::Energy)
    }
}

/// A harvestable node in the world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub position: Vec2,
    pub kind: ResourceKind,
    /// Remaining yield.
    pub value: f32,
    /// Yield ceiling reached through regrowth.
    pub capacity: f32,
    /// Yield regained per time unit while available.
    pub regen_rate: f32,
    pub depleted: bool,
}

impl Resource {
    /// Remove up to `amount` yield, returning what was actually taken.
    pub fn consume(&mut self, amount: f32) -> f32 {
        if self.depleted {
            return 0.0;
        }
        let taken = amount.clamp(0.0, self.value);
        self.value -= taken;
        if self.value <= f32::EPSILON {
            self.value = 0.0;
            self.depleted = true;
        }
        taken
    }

    fn regrow(&mut self, dt: f32) {
        if !self.depleted && self.value < self.capacity {
            self.value = (self.value + self.regen_rate * dt).min(self.capacity);
        }
    }
}

/// Counts produced by one regeneration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegrowthReport {
    pub revived: usize,
    pub spawned: usize,
}

/// Owns every resource node plus a spatial index over their positions.
#[derive(Debug, Clone)]
pub struct ResourceField {
    resources: Vec<Resource>,
    index: UniformGridIndex,
    index_dirty: bool,
}

impl ResourceField {
    /// Create an empty field whose index buckets are `cell_size` wide.
    #[must_use]
    pub fn new(cell_size: f32) -> Self {
        Self {
            resources: Vec::new(),
            index: UniformGridIndex::new(cell_size),
            index_dirty: true,
        }
    }

    /// Populate a field for `bounds` using `config.density`.
    pub fn generate(
        config: &ResourceConfig,
        bounds: Bounds,
        cell_size: f32,
        rng: &mut dyn RngCore,
    ) -> Result<Self, ConfigError> {
        let mut field = Self::new(cell_size);
        let area = bounds.width * bounds.height;
        let count = ((area * config.density) as usize).min(config.max_resources);
        for _ in 0..count {
            field.spawn_random(config, bounds, rng);
        }
        field.rebuild_index()?;
        Ok(field)
    }

    /// Add a resource with randomised position, kind, yield, and regrowth rate.
    pub fn spawn_random(
        &mut self,
        config: &ResourceConfig,
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Option<usize> {
        if self.resources.len() >= config.max_resources {
            return None;
        }
        let position = Vec2::new(
            rng.random_range(0.0..=bounds.width),
            rng.random_range(0.0..=bounds.height),
        );
        let kind = ResourceKind::ALL[rng.random_range(0..ResourceKind::ALL.len())];
        let value = rng.random_range(config.min_value..=config.max_value);
        let regen_rate = rng.random_range(config.min_regen_rate..=config.max_regen_rate);
        Some(self.insert(Resource {
            position,
            kind,
            value,
            capacity: config.capacity,
            regen_rate,
            depleted: value <= 0.0,
        }))
    }

    /// Insert an explicit resource and return its index.
    pub fn insert(&mut self, resource: Resource) -> usize {
        self.resources.push(resource);
        self.index_dirty = true;
        self.resources.len() - 1
    }

    /// Remove every resource node.
    pub fn clear(&mut self) {
        self.resources.clear();
        self.index_dirty = true;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    #[must_use]
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Resource> {
        self.resources.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Resource> {
        self.resources.get_mut(idx)
    }

    /// Number of resources currently available for harvest.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.resources.iter().filter(|r| !r.depleted).count()
    }

    /// Refresh the spatial index if nodes were added since the last rebuild.
    pub fn rebuild_index(&mut self) -> Result<(), ConfigError> {
        if self.index_dirty {
            let positions: Vec<(f32, f32)> =
                self.resources.iter().map(|r| r.position.to_tuple()).collect();
            self.index.rebuild(&positions)?;
            self.index_dirty = false;
        }
        Ok(())
    }

    /// Visit available resources within `radius` of `point` with their distance.
    ///
    /// Uses the spatial index when it is current and falls back to a linear scan otherwise.
    pub fn visit_available(
        &self,
        point: Vec2,
        radius: f32,
        visitor: &mut dyn FnMut(usize, f32),
    ) {
        let radius_sq = radius * radius;
        if self.index_dirty {
            for (idx, resource) in self.resources.iter().enumerate() {
                let dist_sq = resource.position.distance_squared(point);
                if !resource.depleted && dist_sq <= radius_sq {
                    visitor(idx, dist_sq.sqrt());
                }
            }
            return;
        }
        self.index
            .query_point(point.to_tuple(), radius_sq, &mut |idx, dist_sq| {
                if !self.resources[idx].depleted {
                    visitor(idx, dist_sq.into_inner().sqrt());
                }
            });
    }

    /// Regrow available nodes, revive depleted ones, and periodically spawn new ones.
    pub fn regenerate(
        &mut self,
        config: &ResourceConfig,
        bounds: Bounds,
        tick: Tick,
        dt: f32,
        rng: &mut dyn RngCore,
    ) -> RegrowthReport {
        let mut report = RegrowthReport::default();
        let revive_chance = (config.respawn_chance * dt).clamp(0.0, 1.0);
        for resource in &mut self.resources {
            if resource.depleted {
                if rng.random::<f32>() < revive_chance {
                    resource.depleted = false;
                    resource.value = resource.capacity * config.respawn_fraction;
                    report.revived += 1;
                }
            } else {
                resource.regrow(dt);
            }
        }
        if config.spawn_interval > 0
            && tick.0 > 0
            && tick.0.is_multiple_of(u64::from(config.spawn_interval))
        {
            for _ in 0..config.spawn_count {
                if self.spawn_random(config, bounds, rng).is_some() {
                    report.spawned += 1;
                }
            }
        }
        report
    }
}

/// Global environmental scalars derived from the day/night cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    /// Ambient temperature in degrees.
    pub temperature: f32,
    /// Light level in [0, 1].
    pub daylight: f32,
    /// Position in the day cycle in [0, 1); 0.5 is dusk.
    pub cycle_position: f32,
}

impl Default for Environment {
    fn default() -> Self {
        Self::at_tick(Tick::zero(), 1)
    }
}

impl Environment {
    const BASE_TEMPERATURE: f32 = 20.0;

    /// Environment at `tick` for a cycle of `day_length` ticks.
    #[must_use]
    pub fn at_tick(tick: Tick, day_length: u32) -> Self {
        let length = u64::from(day_length.max(1));
        let cycle_position = (tick.0 % length) as f32 / length as f32;
        let wave = (cycle_position * std::f32::consts::TAU).sin();
        let modifier = if cycle_position < 0.5 {
            1.0 + 0.2 * wave
        } else {
            1.0 + 0.1 * wave
        };
        Self {
            temperature: Self::BASE_TEMPERATURE * modifier,
            daylight: wave.max(0.0),
            cycle_position,
        }
    }

    /// Temperature mapped from [-10, 50] onto [0, 1].
    #[must_use]
    pub fn normalized_temperature(&self) -> f32 {
        ((self.temperature + 10.0) / 60.0).clamp(0.0, 1.0)
    }

    /// Factor applied to base metabolism for temperature stress.
    #[must_use]
    pub fn metabolic_multiplier(&self, sensitivity: f32) -> f32 {
        1.0 + sensitivity * (self.temperature - Self::BASE_TEMPERATURE).abs() / 50.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn food(position: Vec2, value: f32) -> Resource {
        Resource {
            position,
            kind: ResourceKind::Food,
            value,
            capacity: 100.0,
            regen_rate: 1.0,
            depleted: false,
        }
    }

    #[test]
    fn generation_respects_density_and_bounds() {
        let mut rng = SmallRng::seed_from_u64(1);
        let config = ResourceConfig::default();
        let bounds = Bounds::new(50.0, 40.0);
        let field = ResourceField::generate(&config, bounds, 10.0, &mut rng).expect("field");
        assert_eq!(field.len(), 200);
        assert!(field.resources().iter().all(|r| {
            bounds.contains(r.position)
                && (config.min_value..=config.max_value).contains(&r.value)
                && !r.depleted
        }));
    }

    #[test]
    fn generation_rejects_bad_cell_size() {
        let mut rng = SmallRng::seed_from_u64(1);
        let result = ResourceField::generate(
            &ResourceConfig::default(),
            Bounds::new(10.0, 10.0),
            0.0,
            &mut rng,
        );
        assert!(matches!(result, Err(ConfigError::Index(_))));
    }

    #[test]
    fn consume_depletes_and_caps_yield() {
        let mut resource = food(Vec2::ZERO, 15.0);
        assert_eq!(resource.consume(10.0), 10.0);
        assert_eq!(resource.consume(10.0), 5.0);
        assert!(resource.depleted);
        assert_eq!(resource.consume(10.0), 0.0);
    }

    #[test]
    fn visit_available_skips_depleted_nodes() {
        let mut field = ResourceField::new(5.0);
        field.insert(food(Vec2::new(1.0, 0.0), 10.0));
        let depleted = field.insert(food(Vec2::new(2.0, 0.0), 10.0));
        field.insert(food(Vec2::new(30.0, 0.0), 10.0));
        field.rebuild_index().expect("index");
        if let Some(resource) = field.get_mut(depleted) {
            resource.consume(100.0);
        }
        let mut seen = Vec::new();
        field.visit_available(Vec2::ZERO, 5.0, &mut |idx, dist| seen.push((idx, dist)));
        assert_eq!(seen, vec![(0, 1.0)]);
    }

    #[test]
    fn regeneration_regrows_and_revives() {
        let mut rng = SmallRng::seed_from_u64(3);
        let config = ResourceConfig {
            respawn_chance: 1.0,
            respawn_fraction: 0.5,
            spawn_interval: 0,
            ..ResourceConfig::default()
        };
        let mut field = ResourceField::new(5.0);
        field.insert(food(Vec2::ZERO, 50.0));
        let gone = field.insert(food(Vec2::new(1.0, 1.0), 1.0));
        if let Some(resource) = field.get_mut(gone) {
            resource.consume(1.0);
        }
        let report = field.regenerate(&config, Bounds::new(10.0, 10.0), Tick(1), 1.0, &mut rng);
        assert_eq!(report.revived, 1);
        assert_eq!(field.resources()[0].value, 51.0);
        assert_eq!(field.resources()[1].value, 50.0);
        assert!(!field.resources()[1].depleted);
    }

    #[test]
    fn periodic_spawns_respect_cap() {
        let mut rng = SmallRng::seed_from_u64(4);
        let config = ResourceConfig {
            spawn_interval: 10,
            spawn_count: 3,
            max_resources: 2,
            ..ResourceConfig::default()
        };
        let mut field = ResourceField::new(5.0);
        let bounds = Bounds::new(10.0, 10.0);
        let report = field.regenerate(&config, bounds, Tick(9), 1.0, &mut rng);
        assert_eq!(report.spawned, 0);
        let report = field.regenerate(&config, bounds, Tick(10), 1.0, &mut rng);
        assert_eq!(report.spawned, 2);
        assert_eq!(field.len(), 2);
    }

    #[test]
    fn day_cycle_warms_by_day_and_cools_by_night() {
        let noon = Environment::at_tick(Tick(250), 1_000);
        let midnight = Environment::at_tick(Tick(750), 1_000);
        assert!((noon.temperature - 24.0).abs() < 1e-3);
        assert!((midnight.temperature - 18.0).abs() < 1e-3);
        assert!(noon.daylight > 0.99);
        assert_eq!(midnight.daylight, 0.0);
        assert!(noon.metabolic_multiplier(1.0) > 1.0);
    }
}
