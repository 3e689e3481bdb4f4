//! Spatial indexing abstractions for agent and resource neighborhood queries.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A position handed to `rebuild` was NaN or infinite.
    #[error("entry {0} has a non-finite position")]
    NonFinitePosition(usize),
}

/// Common behaviour exposed by neighborhood indices.
///
/// Visitors are invoked in a deterministic order for a given set of positions:
/// cells are walked row by row and entries within a cell in insertion order.
pub trait NeighborhoodIndex {
    /// Rebuild internal structures from entry positions.
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError>;

    /// Visit neighbors of `entry_idx` within the provided squared radius, excluding itself.
    fn neighbors_within(
        &self,
        entry_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );

    /// Visit every entry within the squared radius of an arbitrary point.
    fn query_point(
        &self,
        point: (f32, f32),
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );

    /// Number of indexed entries.
    fn len(&self) -> usize;

    /// Returns true when nothing is indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Uniform grid bucketing entries by `cell_size`-wide square cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    /// Edge length of each grid cell used for bucketing entries.
    pub cell_size: f32,
    #[serde(skip)]
    points: Vec<(f32, f32)>,
    #[serde(skip)]
    buckets: HashMap<(i32, i32), Vec<usize>>,
}

impl UniformGridIndex {
    /// Create a new uniform grid with the provided cell size.
    #[must_use]
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            points: Vec::new(),
            buckets: HashMap::new(),
        }
    }

    /// Position stored for `entry_idx` during the last rebuild.
    #[must_use]
    pub fn position(&self, entry_idx: usize) -> Option<(f32, f32)> {
        self.points.get(entry_idx).copied()
    }

    fn cell_of(&self, x: f32, y: f32) -> (i32, i32) {
        (
            (x / self.cell_size).floor() as i32,
            (y / self.cell_size).floor() as i32,
        )
    }

    fn visit_cells(
        &self,
        point: (f32, f32),
        radius_sq: f32,
        skip: Option<usize>,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        if self.points.is_empty() || radius_sq < 0.0 || !radius_sq.is_finite() {
            return;
        }
        let radius = radius_sq.sqrt();
        let (min_cx, min_cy) = self.cell_of(point.0 - radius, point.1 - radius);
        let (max_cx, max_cy) = self.cell_of(point.0 + radius, point.1 + radius);
        for cy in min_cy..=max_cy {
            for cx in min_cx..=max_cx {
                let Some(bucket) = self.buckets.get(&(cx, cy)) else {
                    continue;
                };
                for &idx in bucket {
                    if Some(idx) == skip {
                        continue;
                    }
                    let (x, y) = self.points[idx];
                    let dx = x - point.0;
                    let dy = y - point.1;
                    let dist_sq = dx * dx + dy * dy;
                    if dist_sq <= radius_sq {
                        visitor(idx, OrderedFloat(dist_sq));
                    }
                }
            }
        }
    }
}

impl Default for UniformGridIndex {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        if self.cell_size <= 0.0 || !self.cell_size.is_finite() {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        if let Some(bad) = positions
            .iter()
            .position(|(x, y)| !x.is_finite() || !y.is_finite())
        {
            return Err(IndexError::NonFinitePosition(bad));
        }
        self.points.clear();
        self.points.extend_from_slice(positions);
        for bucket in self.buckets.values_mut() {
            bucket.clear();
        }
        for (idx, &(x, y)) in positions.iter().enumerate() {
            let cell = self.cell_of(x, y);
            self.buckets.entry(cell).or_default().push(idx);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        Ok(())
    }

    fn neighbors_within(
        &self,
        entry_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        let Some(origin) = self.points.get(entry_idx).copied() else {
            return;
        };
        self.visit_cells(origin, radius_sq, Some(entry_idx), visitor);
    }

    fn query_point(
        &self,
        point: (f32, f32),
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        self.visit_cells(point, radius_sq, None, visitor);
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_neighbors(index: &UniformGridIndex, idx: usize, radius: f32) -> Vec<usize> {
        let mut found = Vec::new();
        index.neighbors_within(idx, radius * radius, &mut |other, _| found.push(other));
        found.sort_unstable();
        found
    }

    #[test]
    fn rejects_non_positive_cell_size() {
        let mut index = UniformGridIndex::new(0.0);
        assert_eq!(
            index.rebuild(&[(1.0, 1.0)]),
            Err(IndexError::InvalidConfig("cell_size must be positive"))
        );
    }

    #[test]
    fn rejects_nan_positions() {
        let mut index = UniformGridIndex::new(5.0);
        let err = index
            .rebuild(&[(1.0, 1.0), (f32::NAN, 2.0)])
            .expect_err("nan rejected");
        assert_eq!(err, IndexError::NonFinitePosition(1));
    }

    #[test]
    fn neighbors_span_cell_boundaries() {
        let mut index = UniformGridIndex::new(5.0);
        let positions = [(4.9, 4.9), (5.1, 5.1), (20.0, 20.0), (4.0, 9.0)];
        index.rebuild(&positions).expect("rebuild");
        assert_eq!(collect_neighbors(&index, 0, 1.0), vec![1]);
        assert_eq!(collect_neighbors(&index, 0, 5.0), vec![1, 3]);
        assert!(collect_neighbors(&index, 2, 5.0).is_empty());
    }

    #[test]
    fn matches_brute_force() {
        let mut index = UniformGridIndex::new(3.0);
        let positions: Vec<(f32, f32)> = (0..60)
            .map(|i| {
                let f = i as f32;
                ((f * 7.3) % 31.0, (f * 3.7) % 29.0)
            })
            .collect();
        index.rebuild(&positions).expect("rebuild");
        let radius = 6.5_f32;
        for idx in 0..positions.len() {
            let expected: Vec<usize> = positions
                .iter()
                .enumerate()
                .filter(|(other, (x, y))| {
                    let dx = x - positions[idx].0;
                    let dy = y - positions[idx].1;
                    *other != idx && dx * dx + dy * dy <= radius * radius
                })
                .map(|(other, _)| other)
                .collect();
            assert_eq!(collect_neighbors(&index, idx, radius), expected);
        }
    }

    #[test]
    fn point_queries_report_squared_distance() {
        let mut index = UniformGridIndex::new(2.0);
        index
            .rebuild(&[(0.0, 0.0), (3.0, 4.0), (-1.0, -1.0)])
            .expect("rebuild");
        let mut hits = Vec::new();
        index.query_point((0.0, 0.0), 25.0, &mut |idx, dist_sq| {
            hits.push((idx, dist_sq.into_inner()));
        });
        hits.sort_by_key(|(idx, _)| *idx);
        assert_eq!(hits, vec![(0, 0.0), (1, 25.0), (2, 2.0)]);
    }

    #[test]
    fn rebuild_discards_stale_entries() {
        let mut index = UniformGridIndex::default();
        index.rebuild(&[(1.0, 1.0), (2.0, 2.0)]).expect("rebuild");
        index.rebuild(&[(50.0, 50.0)]).expect("rebuild");
        assert_eq!(index.len(), 1);
        let mut hits = 0;
        index.query_point((1.0, 1.0), 9.0, &mut |_, _| hits += 1);
        assert_eq!(hits, 0);
    }
}
