//! Binned statistics grids
//!
//! Both aggregation grids address their cells by a composite key flattened in
//! row-major order. Only observed cells are stored, so a cell without an entry
//! means "never observed". The reaction-time state machine relies on that to
//! tell an empty cell apart from a cell with data.
//!
//! On disk the grids keep the nested, index-addressed layout: the leading
//! axes are nested arrays and the last axis is a sparse map from bin index to
//! entry.

use crate::error::TelemetryError;
use crate::types::{Vec3, Vec3d};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Nested on-disk layout of the behavioral grid: area × angle → velocity → entry
pub type BehaviorSnapshot = Vec<Vec<BTreeMap<u32, BehaviorBinEntry>>>;

/// Nested on-disk layout of the reaction-time grid: time × distance × angle → velocity → entry
pub type ReactionTimeSnapshot = Vec<Vec<Vec<BTreeMap<u32, ReactionTimeBinEntry>>>>;

/// Cell of the action-statistics grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BehaviorBinKey {
    pub area: usize,
    pub angle: usize,
    pub velocity: usize,
}

/// Cell of the reaction-time grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReactionTimeBinKey {
    pub time: usize,
    pub distance: usize,
    pub angle: usize,
    pub velocity: usize,
}

/// Online first/second moment accumulators of the 2-D action
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorBinEntry {
    pub count: u64,
    pub action_sum: Vec3d,
    pub action_sum_sq: Vec3d,
}

impl BehaviorBinEntry {
    /// First observation of a cell
    pub fn new(action: Vec3d) -> Self {
        Self {
            count: 1,
            action_sum: action,
            action_sum_sq: action.squared(),
        }
    }

    /// Add one observation. Returns false and leaves the entry untouched on overflow.
    pub fn accumulate(&mut self, action: Vec3d) -> bool {
        let count = self.count.checked_add(1);
        let sum = self.action_sum.checked_add(action);
        let sum_sq = self.action_sum_sq.checked_add(action.squared());

        match (count, sum, sum_sq) {
            (Some(count), Some(sum), Some(sum_sq)) => {
                self.count = count;
                self.action_sum = sum;
                self.action_sum_sq = sum_sq;
                true
            }
            _ => false,
        }
    }

    /// Running mean action of the cell
    pub fn mean_action(&self) -> Vec3 {
        self.action_sum.mean(self.count)
    }
}

/// Reaction-time accumulators of one cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionTimeBinEntry {
    pub count: u64,
    pub suspended_count: u64,
    pub time_sum: f64,
    pub time_sum_sq: f64,
}

impl ReactionTimeBinEntry {
    pub fn new(time: f64, suspended: u64) -> Self {
        Self {
            count: 1,
            suspended_count: suspended,
            time_sum: time,
            time_sum_sq: time * time,
        }
    }

    /// Add one measurement. Returns false and leaves the entry untouched on overflow.
    pub fn accumulate(&mut self, time: f64, suspended: u64) -> bool {
        let count = self.count.checked_add(1);
        let suspended_count = self.suspended_count.checked_add(suspended);
        let time_sum = Some(self.time_sum + time).filter(|v| v.is_finite());
        let time_sum_sq = Some(self.time_sum_sq + time * time).filter(|v| v.is_finite());

        match (count, suspended_count, time_sum, time_sum_sq) {
            (Some(count), Some(suspended_count), Some(time_sum), Some(time_sum_sq)) => {
                self.count = count;
                self.suspended_count = suspended_count;
                self.time_sum = time_sum;
                self.time_sum_sq = time_sum_sq;
                true
            }
            _ => false,
        }
    }

    pub fn mean_time(&self) -> Option<f64> {
        (self.count > 0).then(|| self.time_sum / self.count as f64)
    }
}

/// Sparse row-major grid: only occupied cells are stored, keyed by flat offset
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<E> {
    shape: Vec<usize>,
    capacity: usize,
    cells: BTreeMap<usize, E>,
}

impl<E> Grid<E> {
    /// Create an empty grid with the given axis lengths
    pub fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            capacity: shape.iter().product(),
            cells: BTreeMap::new(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of addressable cells
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cells holding an entry
    pub fn occupied(&self) -> usize {
        self.cells.len()
    }

    pub fn get(&self, coords: &[usize]) -> Option<&E> {
        flat_offset(&self.shape, coords).and_then(|i| self.cells.get(&i))
    }

    pub fn get_mut(&mut self, coords: &[usize]) -> Option<&mut E> {
        match flat_offset(&self.shape, coords) {
            Some(i) => self.cells.get_mut(&i),
            None => None,
        }
    }

    pub fn contains(&self, coords: &[usize]) -> bool {
        self.get(coords).is_some()
    }

    /// Store an entry in an empty cell. Returns false when the cell is out of
    /// bounds or already occupied.
    pub fn insert(&mut self, coords: &[usize], entry: E) -> bool {
        let Some(i) = flat_offset(&self.shape, coords) else {
            return false;
        };

        match self.cells.entry(i) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Occupied cells with their flat offset, in row-major order
    pub fn entries(&self) -> impl Iterator<Item = (usize, &E)> {
        self.cells.iter().map(|(i, e)| (*i, e))
    }

    /// Presence mask with the same shape
    pub fn mask(&self) -> ComparisonMask {
        ComparisonMask {
            shape: self.shape.clone(),
            present: self.cells.keys().copied().collect(),
        }
    }
}

/// Row-major offset of `coords`, or `None` when out of bounds
fn flat_offset(shape: &[usize], coords: &[usize]) -> Option<usize> {
    if coords.len() != shape.len() {
        return None;
    }

    let mut offset = 0;
    for (coord, len) in coords.iter().zip(shape) {
        if coord >= len {
            return None;
        }
        offset = offset * len + coord;
    }

    Some(offset)
}

/// Action-statistics grid keyed by (area, angle, velocity)
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorGrid {
    grid: Grid<BehaviorBinEntry>,
}

impl BehaviorGrid {
    pub fn new(area_bins: usize, angle_bins: usize, velocity_bins: usize) -> Self {
        Self {
            grid: Grid::new(&[area_bins, angle_bins, velocity_bins]),
        }
    }

    pub fn get(&self, key: BehaviorBinKey) -> Option<&BehaviorBinEntry> {
        self.grid.get(&key.coords())
    }

    pub fn get_mut(&mut self, key: BehaviorBinKey) -> Option<&mut BehaviorBinEntry> {
        self.grid.get_mut(&key.coords())
    }

    pub fn contains(&self, key: BehaviorBinKey) -> bool {
        self.grid.contains(&key.coords())
    }

    pub fn insert(&mut self, key: BehaviorBinKey, entry: BehaviorBinEntry) -> bool {
        self.grid.insert(&key.coords(), entry)
    }

    /// Number of cells observed at least once
    pub fn unique_cells(&self) -> usize {
        self.grid.occupied()
    }

    pub fn capacity(&self) -> usize {
        self.grid.capacity()
    }

    pub fn shape(&self) -> &[usize] {
        self.grid.shape()
    }

    /// Sum of all per-cell observation counts
    pub fn total_count(&self) -> u64 {
        self.grid.entries().map(|(_, e)| e.count).sum()
    }

    pub fn mask(&self) -> ComparisonMask {
        self.grid.mask()
    }

    /// Nested on-disk representation
    pub fn to_snapshot(&self) -> BehaviorSnapshot {
        let (areas, angles, velocities) = self.dims();
        let mut snapshot = vec![vec![BTreeMap::new(); angles]; areas];

        for (offset, entry) in self.grid.entries() {
            let velocity = offset % velocities;
            let angle = offset / velocities % angles;
            let area = offset / velocities / angles;
            snapshot[area][angle].insert(velocity as u32, *entry);
        }

        snapshot
    }

    /// Rebuild a grid from its nested representation, refusing any snapshot
    /// whose dimensions differ from the requested ones.
    pub fn from_snapshot(
        snapshot: &BehaviorSnapshot,
        area_bins: usize,
        angle_bins: usize,
        velocity_bins: usize,
    ) -> Result<Self, TelemetryError> {
        check_axis("area", snapshot.len(), area_bins)?;

        let mut grid = Self::new(area_bins, angle_bins, velocity_bins);

        for (area, per_angle) in snapshot.iter().enumerate() {
            check_axis("angle", per_angle.len(), angle_bins)?;

            for (angle, per_velocity) in per_angle.iter().enumerate() {
                for (velocity, entry) in per_velocity {
                    let velocity = *velocity as usize;
                    check_axis_index("velocity", velocity, velocity_bins)?;
                    grid.insert(BehaviorBinKey { area, angle, velocity }, *entry);
                }
            }
        }

        Ok(grid)
    }

    fn dims(&self) -> (usize, usize, usize) {
        let shape = self.grid.shape();
        (shape[0], shape[1], shape[2])
    }
}

/// Reaction-time grid keyed by (time, distance, angle, velocity)
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionTimeGrid {
    grid: Grid<ReactionTimeBinEntry>,
}

impl ReactionTimeGrid {
    pub fn new(time_bins: usize, distance_bins: usize, angle_bins: usize, velocity_bins: usize) -> Self {
        Self {
            grid: Grid::new(&[time_bins, distance_bins, angle_bins, velocity_bins]),
        }
    }

    pub fn get(&self, key: ReactionTimeBinKey) -> Option<&ReactionTimeBinEntry> {
        self.grid.get(&key.coords())
    }

    pub fn get_mut(&mut self, key: ReactionTimeBinKey) -> Option<&mut ReactionTimeBinEntry> {
        self.grid.get_mut(&key.coords())
    }

    pub fn contains(&self, key: ReactionTimeBinKey) -> bool {
        self.grid.contains(&key.coords())
    }

    pub fn insert(&mut self, key: ReactionTimeBinKey, entry: ReactionTimeBinEntry) -> bool {
        self.grid.insert(&key.coords(), entry)
    }

    pub fn unique_cells(&self) -> usize {
        self.grid.occupied()
    }

    pub fn capacity(&self) -> usize {
        self.grid.capacity()
    }

    pub fn shape(&self) -> &[usize] {
        self.grid.shape()
    }

    /// Sum of all per-cell measurement counts
    pub fn total_count(&self) -> u64 {
        self.grid.entries().map(|(_, e)| e.count).sum()
    }

    pub fn mask(&self) -> ComparisonMask {
        self.grid.mask()
    }

    pub fn to_snapshot(&self) -> ReactionTimeSnapshot {
        let shape = self.grid.shape();
        let (times, distances, angles, velocities) = (shape[0], shape[1], shape[2], shape[3]);
        let mut snapshot = vec![vec![vec![BTreeMap::new(); angles]; distances]; times];

        for (offset, entry) in self.grid.entries() {
            let velocity = offset % velocities;
            let rest = offset / velocities;
            let angle = rest % angles;
            let rest = rest / angles;
            let distance = rest % distances;
            let time = rest / distances;
            snapshot[time][distance][angle].insert(velocity as u32, *entry);
        }

        snapshot
    }

    pub fn from_snapshot(
        snapshot: &ReactionTimeSnapshot,
        time_bins: usize,
        distance_bins: usize,
        angle_bins: usize,
        velocity_bins: usize,
    ) -> Result<Self, TelemetryError> {
        check_axis("time", snapshot.len(), time_bins)?;

        let mut grid = Self::new(time_bins, distance_bins, angle_bins, velocity_bins);

        for (time, per_distance) in snapshot.iter().enumerate() {
            check_axis("distance", per_distance.len(), distance_bins)?;

            for (distance, per_angle) in per_distance.iter().enumerate() {
                check_axis("angle", per_angle.len(), angle_bins)?;

                for (angle, per_velocity) in per_angle.iter().enumerate() {
                    for (velocity, entry) in per_velocity {
                        let velocity = *velocity as usize;
                        check_axis_index("velocity", velocity, velocity_bins)?;
                        let key = ReactionTimeBinKey {
                            time,
                            distance,
                            angle,
                            velocity,
                        };
                        grid.insert(key, *entry);
                    }
                }
            }
        }

        Ok(grid)
    }
}

/// Read-only set of cells present in a reference dataset
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonMask {
    shape: Vec<usize>,
    present: BTreeSet<usize>,
}

impl ComparisonMask {
    pub fn contains_behavior(&self, key: BehaviorBinKey) -> bool {
        self.contains(&key.coords())
    }

    pub fn contains_reaction(&self, key: ReactionTimeBinKey) -> bool {
        self.contains(&key.coords())
    }

    /// Number of cells present in the reference
    pub fn total(&self) -> usize {
        self.present.len()
    }

    /// Number of reference cells that are also occupied in `grid`
    pub fn matched<E>(&self, grid: &Grid<E>) -> usize {
        if grid.shape() != self.shape.as_slice() {
            return 0;
        }

        grid.entries().filter(|(i, _)| self.present.contains(i)).count()
    }

    pub fn matched_behavior(&self, grid: &BehaviorGrid) -> usize {
        self.matched(&grid.grid)
    }

    pub fn matched_reaction(&self, grid: &ReactionTimeGrid) -> usize {
        self.matched(&grid.grid)
    }

    fn contains(&self, coords: &[usize]) -> bool {
        flat_offset(&self.shape, coords).is_some_and(|i| self.present.contains(&i))
    }
}

impl BehaviorBinKey {
    fn coords(&self) -> [usize; 3] {
        [self.area, self.angle, self.velocity]
    }
}

impl ReactionTimeBinKey {
    fn coords(&self) -> [usize; 4] {
        [self.time, self.distance, self.angle, self.velocity]
    }
}

fn check_axis(axis: &str, found: usize, expected: usize) -> Result<(), TelemetryError> {
    if found != expected {
        return Err(TelemetryError::ShapeMismatch {
            expected: format!("{} {} bins", expected, axis),
            found: format!("{} {} bins", found, axis),
        });
    }
    Ok(())
}

fn check_axis_index(axis: &str, index: usize, bins: usize) -> Result<(), TelemetryError> {
    if index >= bins {
        return Err(TelemetryError::ShapeMismatch {
            expected: format!("{} bin below {}", axis, bins),
            found: format!("{} bin {}", axis, index),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(area: usize, angle: usize, velocity: usize) -> BehaviorBinKey {
        BehaviorBinKey { area, angle, velocity }
    }

    #[test]
    fn test_behavior_entry_accumulation() {
        let mut entry = BehaviorBinEntry::new(Vec3d::new(0.5, 0.0, -0.5));
        assert!(entry.accumulate(Vec3d::new(0.25, 0.0, 0.5)));
        assert!(entry.accumulate(Vec3d::new(-0.25, 0.0, 0.3)));

        assert_eq!(entry.count, 3);
        assert!((entry.action_sum.x - 0.5).abs() < 1e-9);
        assert!((entry.action_sum.z - 0.3).abs() < 1e-9);
        assert!((entry.action_sum_sq.x - 0.375).abs() < 1e-9);

        let mean = entry.mean_action();
        assert!((mean.x - 0.5 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_overflow_leaves_entry_untouched() {
        let mut entry = BehaviorBinEntry::new(Vec3d::new(f64::MAX, 0.0, 0.0));
        let before = entry;
        assert!(!entry.accumulate(Vec3d::new(f64::MAX, 0.0, 0.0)));
        assert_eq!(entry, before);

        let mut entry = ReactionTimeBinEntry::new(1.0, 0);
        entry.count = u64::MAX;
        let before = entry;
        assert!(!entry.accumulate(2.0, 1));
        assert_eq!(entry, before);
    }

    #[test]
    fn test_grid_distinguishes_missing_cells() {
        let mut grid = BehaviorGrid::new(4, 3, 2);
        assert!(!grid.contains(key(1, 2, 1)));

        assert!(grid.insert(key(1, 2, 1), BehaviorBinEntry::new(Vec3d::default())));
        assert!(!grid.insert(key(1, 2, 1), BehaviorBinEntry::new(Vec3d::default())));
        assert!(grid.contains(key(1, 2, 1)));
        assert!(!grid.contains(key(1, 2, 0)));
        assert!(!grid.insert(key(4, 0, 0), BehaviorBinEntry::new(Vec3d::default())));

        assert_eq!(grid.unique_cells(), 1);
        assert_eq!(grid.capacity(), 24);
    }

    #[test]
    fn test_behavior_snapshot_layout() {
        let mut grid = BehaviorGrid::new(2, 2, 3);
        grid.insert(key(0, 1, 2), BehaviorBinEntry::new(Vec3d::new(1.0, 0.0, 1.0)));
        grid.insert(key(1, 0, 0), BehaviorBinEntry::new(Vec3d::new(-1.0, 0.0, 0.0)));

        let snapshot = grid.to_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].len(), 2);
        assert!(snapshot[0][0].is_empty());
        assert_eq!(snapshot[0][1].keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(snapshot[1][0][&0].count, 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: BehaviorSnapshot = serde_json::from_str(&json).unwrap();
        let restored = BehaviorGrid::from_snapshot(&parsed, 2, 2, 3).unwrap();
        assert_eq!(restored, grid);
    }

    #[test]
    fn test_snapshot_shape_mismatch_is_rejected() {
        let grid = BehaviorGrid::new(2, 2, 3);
        let snapshot = grid.to_snapshot();

        assert!(matches!(
            BehaviorGrid::from_snapshot(&snapshot, 3, 2, 3),
            Err(TelemetryError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            BehaviorGrid::from_snapshot(&snapshot, 2, 4, 3),
            Err(TelemetryError::ShapeMismatch { .. })
        ));

        let mut with_wide_velocity = BehaviorGrid::new(2, 2, 5);
        with_wide_velocity.insert(key(0, 0, 4), BehaviorBinEntry::new(Vec3d::default()));
        assert!(matches!(
            BehaviorGrid::from_snapshot(&with_wide_velocity.to_snapshot(), 2, 2, 3),
            Err(TelemetryError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_reaction_snapshot_restores_entries() {
        let mut grid = ReactionTimeGrid::new(2, 3, 4, 2);
        let k = ReactionTimeBinKey {
            time: 1,
            distance: 2,
            angle: 3,
            velocity: 1,
        };
        grid.insert(k, ReactionTimeBinEntry::new(450.0, 3));
        grid.get_mut(k).unwrap().accumulate(550.0, 1);

        let restored = ReactionTimeGrid::from_snapshot(&grid.to_snapshot(), 2, 3, 4, 2).unwrap();
        let entry = restored.get(k).unwrap();
        assert_eq!(entry.count, 2);
        assert_eq!(entry.suspended_count, 4);
        assert!((entry.mean_time().unwrap() - 500.0).abs() < 1e-9);
        assert_eq!(restored.total_count(), 2);
    }

    #[test]
    fn test_comparison_mask_matches() {
        let mut reference = BehaviorGrid::new(2, 2, 2);
        reference.insert(key(0, 0, 1), BehaviorBinEntry::new(Vec3d::default()));
        reference.insert(key(1, 1, 1), BehaviorBinEntry::new(Vec3d::default()));
        let mask = reference.mask();

        assert_eq!(mask.total(), 2);
        assert!(mask.contains_behavior(key(1, 1, 1)));
        assert!(!mask.contains_behavior(key(1, 1, 0)));

        let mut collected = BehaviorGrid::new(2, 2, 2);
        collected.insert(key(1, 1, 1), BehaviorBinEntry::new(Vec3d::default()));
        collected.insert(key(0, 1, 0), BehaviorBinEntry::new(Vec3d::default()));
        assert_eq!(mask.matched_behavior(&collected), 1);
    }

    #[test]
    fn test_full_resolution_grid_stores_only_observed_cells() {
        // 225 areas × 125 angles × 216 velocities
        let mut grid = BehaviorGrid::new(225, 125, 216);
        assert_eq!(grid.capacity(), 6_075_000);
        assert_eq!(grid.unique_cells(), 0);

        assert!(grid.insert(key(224, 124, 215), BehaviorBinEntry::new(Vec3d::default())));
        assert!(grid.insert(key(0, 0, 0), BehaviorBinEntry::new(Vec3d::default())));
        assert_eq!(grid.unique_cells(), 2);
        assert!(grid.contains(key(224, 124, 215)));
        assert!(!grid.contains(key(224, 124, 214)));

        let mask = grid.mask();
        assert_eq!(mask.total(), 2);
        assert!(mask.contains_behavior(key(0, 0, 0)));
        assert!(!mask.contains_behavior(key(225, 0, 0)));
    }
}
