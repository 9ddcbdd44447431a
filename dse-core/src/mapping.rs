//! The loop nest and its tiling/bypass annotations (spec §3 C3).

use crate::shape::DimId;

/// Whether a loop iterates in time (one iteration at a time) or in space
/// (all iterations execute concurrently across a spatial fanout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceTime {
    Temporal,
    SpatialX,
    SpatialY,
}

impl SpaceTime {
    pub fn is_spatial(self) -> bool {
        self != SpaceTime::Temporal
    }
}

/// One loop in the nest: `(dim, start, end, stride, spacetime)` plus an
/// optional residual extent modelling imperfect factorization (spec §3).
#[derive(Debug, Clone)]
pub struct LoopDescriptor {
    pub dim: DimId,
    pub start: u32,
    pub end: u32,
    pub stride: u32,
    pub spacetime: SpaceTime,
    /// `Some(r)` with `r < end` when the last factor of this dimension is
    /// imperfect (the dimension's bound does not divide evenly).
    pub residual_end: Option<u32>,
}

impl LoopDescriptor {
    pub fn is_spatial(&self) -> bool {
        self.spacetime.is_spatial()
    }

    /// Nominal extent, ignoring the imperfect-factorization residual.
    pub fn extent(&self) -> u32 {
        let stride = self.stride.max(1);
        ((self.end - self.start) / stride).max(1)
    }

    /// Extent of the "residual" assignment in the imperfect-factorization
    /// weighting of spec §4.4 Phase 0, or `None` when the loop factors
    /// perfectly.
    pub fn residual_extent(&self) -> Option<u32> {
        self.residual_end.filter(|&r| r < self.end).map(|r| {
            let stride = self.stride.max(1);
            ((r - self.start) / stride).max(1)
        })
    }

    pub fn is_imperfect(&self) -> bool {
        self.residual_extent().is_some()
    }

    /// The "outer size": how many tiles this loop is repeated across one
    /// level up, used as the weighting denominator in spec §4.4 Phase 0 and
    /// §8 scenario 6 (`outer_size`).
    pub fn outer_size(&self) -> u32 {
        self.extent()
    }
}

/// A totally ordered loop sequence, partitioned into one block per storage
/// level by `storage_tiling_boundaries` (ascending, outermost level last).
#[derive(Debug, Clone, Default)]
pub struct LoopNest {
    pub loops: Vec<LoopDescriptor>,
    /// Ascending indices into `loops`; `loops[boundaries[i]..boundaries[i+1]]`
    /// is the loop block belonging to storage level `i`, innermost (0) first.
    pub storage_tiling_boundaries: Vec<usize>,
}

impl LoopNest {
    pub fn num_levels(&self) -> usize {
        self.storage_tiling_boundaries.len().saturating_sub(1)
    }

    /// The slice of loops belonging to a given storage level.
    pub fn level_loops(&self, level: usize) -> &[LoopDescriptor] {
        let start = self.storage_tiling_boundaries[level];
        let end = self.storage_tiling_boundaries[level + 1];
        &self.loops[start..end]
    }

    /// Total extent of all temporal loops at or below a given level, times
    /// the extent of the dimension's own factors: used to check spec
    /// invariant 1 (product of extents across a dimension equals its bound).
    pub fn dimension_product(&self, dim: DimId) -> u64 {
        self.loops
            .iter()
            .filter(|l| l.dim == dim)
            .map(|l| u64::from(l.extent()))
            .product()
    }
}

/// A loop nest plus, per data space, a bitset over storage levels recording
/// which levels keep (rather than bypass) that data space.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    pub loop_nest: LoopNest,
    /// `datatype_bypass_nest[data_space][level]`; `true` = kept at that level.
    pub datatype_bypass_nest: Vec<Vec<bool>>,
}

impl Mapping {
    pub fn is_kept(&self, data_space: usize, level: usize) -> bool {
        self.datatype_bypass_nest
            .get(data_space)
            .and_then(|v| v.get(level))
            .copied()
            .unwrap_or(true)
    }

    /// Counts temporal loops whose extent exceeds their stride, used by the
    /// `max_temporal_loops_in_a_mapping` rejection of spec §4.2 step 3.
    pub fn temporal_loop_count(&self) -> usize {
        self.loop_nest
            .loops
            .iter()
            .filter(|l| !l.is_spatial() && l.extent() > l.stride.max(1))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_product_matches_bound_for_perfect_factorization() {
        let nest = LoopNest {
            loops: vec![
                LoopDescriptor { dim: 0, start: 0, end: 4, stride: 1, spacetime: SpaceTime::Temporal, residual_end: None },
                LoopDescriptor { dim: 0, start: 0, end: 4, stride: 1, spacetime: SpaceTime::SpatialX, residual_end: None },
            ],
            storage_tiling_boundaries: vec![0, 1, 2],
        };
        assert_eq!(nest.dimension_product(0), 16);
    }

    #[test]
    fn residual_extent_is_none_when_perfect() {
        let l = LoopDescriptor { dim: 0, start: 0, end: 4, stride: 1, spacetime: SpaceTime::Temporal, residual_end: Some(4) };
        assert!(l.residual_extent().is_none());
    }

    #[test]
    fn residual_extent_reflects_shorter_last_factor() {
        let l = LoopDescriptor { dim: 0, start: 0, end: 4, stride: 1, spacetime: SpaceTime::Temporal, residual_end: Some(3) };
        assert_eq!(l.residual_extent(), Some(3));
    }
}
