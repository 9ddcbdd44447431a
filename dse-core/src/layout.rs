//! The concordant layout and the cumulative-product bookkeeping that feeds
//! the legal layout-space (spec §3 `LayoutNest`/`Layout`/`LayoutSpace state`,
//! §4.3 `CreateConcordantLayout`/`CheckBufferCapacityConstraint`).
//!
//! Grounded on `include/layout/layout.hpp` in `original_source`: a
//! `LayoutNest` there is a plain `rank -> factor` map with a fixed rank
//! order, and a `Layout` bundles one such map per (data space, kind) plus
//! addressing metadata. We keep that shape, replacing the original's
//! pointer-heavy per-level `Layout*` array with an owned `Vec<Layout>`.

use fxhash::FxHashMap;

use crate::arch::{Architecture, Technology};
use crate::config::LayoutEntryConfig;
use crate::error::{ConfigError, LayoutError};
use crate::mapping::Mapping;
use crate::shape::{DimId, Workload};
use crate::util::ceil_div;

/// A `rank -> factor` bag with a fixed, never-reordered rank list (spec §3
/// `LayoutNest`, §4.3 invariant "the rank lists of nests are never reordered").
#[derive(Debug, Clone, Default)]
pub struct Nest {
    pub ranks: Vec<String>,
    factors: FxHashMap<String, u32>,
}

impl Nest {
    pub fn new(ranks: Vec<String>) -> Self {
        Nest {
            ranks,
            factors: FxHashMap::default(),
        }
    }

    pub fn factor(&self, rank: &str) -> u32 {
        *self.factors.get(rank).unwrap_or(&1)
    }

    pub fn set_factor(&mut self, rank: &str, value: u32) {
        self.factors.insert(rank.to_string(), value);
    }

    /// `Π_r factor[r]`, used for block-size and capacity checks.
    pub fn product(&self) -> u32 {
        self.ranks.iter().map(|r| self.factor(r)).product()
    }

    /// Resets every rank's factor to 1, isolating one phase's effect from the
    /// others (spec §4.2 step 6: "authblock factors have been cleared").
    pub fn clear(&mut self) {
        self.factors.clear();
    }
}

/// The three nests coexisting per (level, data space): `interline` carries
/// temporal (cross-line) traffic, `intraline` spatial (one-cycle) traffic,
/// `authblock_lines` cryptographic authentication-block sizing.
#[derive(Debug, Clone, Default)]
pub struct DataSpaceLayout {
    pub interline: Nest,
    pub intraline: Nest,
    pub authblock_lines: Nest,
}

/// One storage level's full layout: per-data-space nests plus addressing
/// metadata (spec §3 `Layout`).
#[derive(Debug, Clone)]
pub struct Layout {
    pub level: usize,
    pub data_spaces: Vec<String>,
    pub nests: Vec<DataSpaceLayout>,
    pub rank_to_dims: FxHashMap<String, Vec<DimId>>,
    pub rank_to_coefficient: FxHashMap<String, Vec<u32>>,
    pub rank_to_zero_padding: FxHashMap<String, u32>,
    pub dim_order: Vec<DimId>,
    pub num_read_ports: u32,
    pub num_write_ports: u32,
    pub assume_zero_padding: bool,
    pub assume_row_buffer: bool,
    pub assume_reuse: bool,
}

impl Layout {
    pub fn nest(&self, data_space: usize) -> &DataSpaceLayout {
        &self.nests[data_space]
    }

    pub fn nest_mut(&mut self, data_space: usize) -> &mut DataSpaceLayout {
        &mut self.nests[data_space]
    }
}

/// Layouts for every storage level of one mapping (spec §3 lifecycle: "one
/// layout-space object per attempted mapping").
#[derive(Debug, Clone)]
pub struct Layouts {
    pub levels: Vec<Layout>,
}

impl Layouts {
    pub fn clear_authblock(&mut self) {
        for level in &mut self.levels {
            for ds in &mut level.nests {
                ds.authblock_lines.clear();
            }
        }
    }
}

/// Cumulative-product bookkeeping across levels, indexed `[level][dim]`,
/// used both while building the concordant layout and while sizing the
/// layout-space's variable factors (spec §3 `LayoutSpace state`).
#[derive(Debug, Clone)]
pub struct ConcordantState {
    pub cumulatively_intraline_dimval: Vec<Vec<u32>>,
    pub cumulatively_product_dimval: Vec<Vec<u32>>,
}

impl ConcordantState {
    pub fn num_levels(&self) -> usize {
        self.cumulatively_intraline_dimval.len()
    }
}

/// Walks the mapping's loop nest from innermost to outermost, classifying
/// each loop as spatial (-> intraline) or temporal (-> interline), and
/// derives per-level per-dimension cumulative products (spec §4.3).
pub fn create_concordant_layout(
    mapping: &Mapping,
    workload: &Workload,
    arch: &Architecture,
) -> (Layouts, ConcordantState) {
    let num_levels = arch.num_levels();
    let num_dims = workload.dimensions.len();

    let mut per_level_intraline = vec![vec![1u32; num_dims]; num_levels];
    let mut per_level_interline = vec![vec![1u32; num_dims]; num_levels];
    for level in 0..num_levels.min(mapping.loop_nest.num_levels()) {
        for l in mapping.loop_nest.level_loops(level) {
            let d = l.dim;
            if l.is_spatial() {
                per_level_intraline[level][d] *= l.extent();
            } else {
                per_level_interline[level][d] *= l.extent();
            }
        }
    }

    let mut cumulatively_intraline_dimval = vec![vec![1u32; num_dims]; num_levels];
    let mut cumulatively_product_dimval = vec![vec![1u32; num_dims]; num_levels];
    for level in 0..num_levels {
        for d in 0..num_dims {
            let prev_intra = if level == 0 { 1 } else { cumulatively_intraline_dimval[level - 1][d] };
            let prev_prod = if level == 0 { 1 } else { cumulatively_product_dimval[level - 1][d] };
            cumulatively_intraline_dimval[level][d] = prev_intra * per_level_intraline[level][d];
            cumulatively_product_dimval[level][d] =
                prev_prod * per_level_intraline[level][d] * per_level_interline[level][d];
        }
    }
    let state = ConcordantState {
        cumulatively_intraline_dimval,
        cumulatively_product_dimval,
    };

    let dim_order: Vec<DimId> = (0..num_dims).collect();
    let mut levels = Vec::with_capacity(num_levels);
    for level in 0..num_levels {
        let mut nests = Vec::with_capacity(workload.data_spaces.len());
        let mut rank_to_dims = FxHashMap::default();
        let mut rank_to_coefficient = FxHashMap::default();
        let mut rank_to_zero_padding = FxHashMap::default();
        let mut data_spaces = Vec::with_capacity(workload.data_spaces.len());

        for ds in &workload.data_spaces {
            data_spaces.push(ds.name.clone());
            let rank_names: Vec<String> = ds.ranks.iter().map(|r| r.name.clone()).collect();
            let mut layer = DataSpaceLayout {
                interline: Nest::new(rank_names.clone()),
                intraline: Nest::new(rank_names.clone()),
                authblock_lines: Nest::new(rank_names.clone()),
            };
            for rank in &ds.ranks {
                rank_to_dims.insert(rank.name.clone(), rank.dims().collect());
                rank_to_coefficient.insert(
                    rank.name.clone(),
                    rank.terms.iter().map(|&(_, c)| c.value).collect(),
                );
                let intra = rank.contribution(|d| state.cumulatively_intraline_dimval[level][d]);
                let total = rank.contribution(|d| {
                    let prod = state.cumulatively_product_dimval[level][d];
                    let intra_d = state.cumulatively_intraline_dimval[level][d].max(1);
                    ceil_div(u64::from(prod), u64::from(intra_d)) as u32
                });
                layer.intraline.set_factor(&rank.name, intra.max(1));
                layer.interline.set_factor(&rank.name, total.max(1));

                // DRAM levels pad a rank's raw extent up to the level's
                // block size; the padding amount is the zero-padding a
                // boundary tile carries (spec §4.4 Phase 3, §3 `rankToZeroPadding`).
                let zero_padding = if arch.levels[level].technology == Technology::Dram {
                    let raw = u64::from(intra.max(1)) * u64::from(total.max(1));
                    let block = u64::from(arch.levels[level].block_size.max(1));
                    (ceil_div(raw, block) * block - raw) as u32
                } else {
                    0
                };
                rank_to_zero_padding.entry(rank.name.clone()).or_insert(zero_padding);
            }
            nests.push(layer);
        }

        let level_spec = &arch.levels[level];
        levels.push(Layout {
            level,
            data_spaces,
            nests,
            rank_to_dims,
            rank_to_coefficient,
            rank_to_zero_padding,
            dim_order: dim_order.clone(),
            num_read_ports: level_spec.num_ports.max(1),
            num_write_ports: level_spec.num_ports.max(1),
            assume_zero_padding: level_spec.technology == Technology::Dram,
            assume_row_buffer: level_spec.technology == Technology::Dram,
            assume_reuse: false,
        });
    }

    (Layouts { levels }, state)
}

/// Validates, per level, that the total and parallel working sets fit the
/// level's capacity and block size (spec §4.3; fatal per §7 kind 5).
pub fn check_buffer_capacity_constraint(
    layouts: &Layouts,
    arch: &Architecture,
) -> Result<(), LayoutError> {
    for layout in &layouts.levels {
        let level_spec = &arch.levels[layout.level];
        let mut total_size: u64 = 0;
        let mut parallel_size: u64 = 0;
        for ds in &layout.nests {
            let intra = u64::from(ds.intraline.product());
            let inter = u64::from(ds.interline.product());
            total_size += intra * inter;
            parallel_size += intra;
        }
        if total_size > level_spec.capacity_or_infinite() {
            return Err(LayoutError::CapacityExceeded(
                level_spec.name.clone(),
                total_size,
                level_spec.capacity_or_infinite(),
            ));
        }
        if parallel_size > u64::from(level_spec.block_size.max(1)) {
            return Err(LayoutError::BlockSizeExceeded(
                parallel_size as u32,
                level_spec.name.clone(),
                level_spec.block_size,
            ));
        }
    }
    Ok(())
}

/// Builds an all-ones base layout (every nest factor defaults to 1), for
/// the `layout` configuration entries (spec §6) to be applied onto when a
/// user-supplied layout pins the mapper's layout search (spec §4.2 step 5).
pub fn default_layout(workload: &Workload, arch: &Architecture) -> Layouts {
    let levels = (0..arch.num_levels())
        .map(|level| {
            let level_spec = &arch.levels[level];
            let mut rank_to_dims = FxHashMap::default();
            let mut rank_to_coefficient = FxHashMap::default();
            let mut rank_to_zero_padding = FxHashMap::default();
            let mut data_spaces = Vec::with_capacity(workload.data_spaces.len());
            let mut nests = Vec::with_capacity(workload.data_spaces.len());
            for ds in &workload.data_spaces {
                data_spaces.push(ds.name.clone());
                let rank_names: Vec<String> = ds.ranks.iter().map(|r| r.name.clone()).collect();
                nests.push(DataSpaceLayout {
                    interline: Nest::new(rank_names.clone()),
                    intraline: Nest::new(rank_names.clone()),
                    authblock_lines: Nest::new(rank_names),
                });
                for rank in &ds.ranks {
                    rank_to_dims.insert(rank.name.clone(), rank.dims().collect());
                    rank_to_coefficient.insert(
                        rank.name.clone(),
                        rank.terms.iter().map(|&(_, c)| c.value).collect(),
                    );
                    rank_to_zero_padding.entry(rank.name.clone()).or_insert(0);
                }
            }
            Layout {
                level,
                data_spaces,
                nests,
                rank_to_dims,
                rank_to_coefficient,
                rank_to_zero_padding,
                dim_order: (0..workload.dimensions.len()).collect(),
                num_read_ports: level_spec.num_ports.max(1),
                num_write_ports: level_spec.num_ports.max(1),
                // All-ones base: factors aren't known yet, so zero-padding is
                // not yet computable; `apply_layout_entries` refines this.
                assume_zero_padding: level_spec.technology == Technology::Dram,
                assume_row_buffer: level_spec.technology == Technology::Dram,
                assume_reuse: false,
            }
        })
        .collect();
    Layouts { levels }
}

/// Applies user-supplied `layout` configuration entries onto a base layout
/// (spec §6 `layout`: `target`/`type`/`factors`/`permutation` per entry,
/// grounded on `layout::ParseAndConstruct` in
/// `examples/original_source/src/layout/layout.cpp`). Factor letters are
/// matched against the first character of each rank's name; a rank whose
/// letter is absent from the permutation keeps its default factor of 1
/// ("missing nests default to all-1", spec §6).
pub fn apply_layout_entries(
    layouts: &mut Layouts,
    arch: &Architecture,
    entries: &[LayoutEntryConfig],
) -> Result<(), ConfigError> {
    for entry in entries {
        let level = arch
            .level_id(&entry.target)
            .ok_or_else(|| ConfigError::UnknownLevel(entry.target.clone()))?;

        let mut factor_values: FxHashMap<char, u32> = FxHashMap::default();
        for token in entry.factors.split_whitespace() {
            if let Some(eq) = token.find('=') {
                let letter = token.chars().next();
                let value = token[eq + 1..].parse::<u32>();
                if let (Some(letter), Ok(value)) = (letter, value) {
                    factor_values.insert(letter, value);
                }
            }
        }
        let permutation: String = entry.permutation.chars().filter(|c| !c.is_whitespace()).collect();

        let layout = &mut layouts.levels[level];
        for ds in &mut layout.nests {
            let nest = if entry.kind == "intraline" {
                &mut ds.intraline
            } else {
                &mut ds.interline
            };
            for rank in nest.ranks.clone() {
                if let Some(letter) = rank.chars().next() {
                    if permutation.contains(letter) {
                        let value = factor_values.get(&letter).copied().unwrap_or(1);
                        nest.set_factor(&rank, value.max(1));
                    }
                }
            }
        }
        if entry.kind == "interline" {
            if let Some(nr) = entry.num_read_ports {
                layout.num_read_ports = nr;
            }
            if let Some(nw) = entry.num_write_ports {
                layout.num_write_ports = nw;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{ArithmeticLevel, EnergyModel, StorageLevel};
    use crate::mapping::{LoopDescriptor, LoopNest, SpaceTime};
    use crate::shape::{Coefficient, DataSpace, Dimension, Rank};

    fn workload() -> Workload {
        Workload::new(
            vec![Dimension { name: "M".into(), bound: 4 }],
            vec![DataSpace {
                name: "A".into(),
                order: 1,
                ranks: vec![Rank { name: "M".into(), terms: vec![(0, Coefficient { value: 1 })] }],
                read_write: false,
            }],
        )
    }

    fn arch() -> Architecture {
        let level = |name: &str, block: u32, tech: Technology| StorageLevel {
            name: name.into(),
            capacity: Some(1024),
            block_size: block,
            cluster_size: 4,
            instances: 1,
            read_bandwidth: Some(16.0),
            write_bandwidth: Some(16.0),
            shared_bandwidth: None,
            num_ports: 1,
            num_banks: 1,
            technology: tech,
            word_bits: 16,
            energy: EnergyModel::default(),
        };
        Architecture {
            levels: vec![level("RF", 4, Technology::Sram), level("DRAM", 16, Technology::Dram)],
            arithmetic: ArithmeticLevel { name: "MAC".into(), instances: 1, energy_per_op: 1.0 },
        }
    }

    fn perfect_mapping() -> Mapping {
        let loops = vec![
            LoopDescriptor { dim: 0, start: 0, end: 2, stride: 1, spacetime: SpaceTime::SpatialX, residual_end: Some(2) },
            LoopDescriptor { dim: 0, start: 0, end: 2, stride: 1, spacetime: SpaceTime::Temporal, residual_end: Some(2) },
        ];
        Mapping {
            loop_nest: LoopNest { loops, storage_tiling_boundaries: vec![0, 1, 2] },
            datatype_bypass_nest: vec![vec![true, true]],
        }
    }

    #[test]
    fn cumulative_product_equals_intraline_times_interline() {
        let w = workload();
        let a = arch();
        let (_, state) = create_concordant_layout(&perfect_mapping(), &w, &a);
        for level in 0..state.num_levels() {
            for d in 0..w.dimensions.len() {
                let intra = state.cumulatively_intraline_dimval[level][d];
                let prod = state.cumulatively_product_dimval[level][d];
                assert_eq!(prod % intra, 0);
            }
        }
    }

    #[test]
    fn concordant_layout_fits_within_capacity() {
        let w = workload();
        let a = arch();
        let (layouts, _) = create_concordant_layout(&perfect_mapping(), &w, &a);
        assert!(check_buffer_capacity_constraint(&layouts, &a).is_ok());
    }

    #[test]
    fn layout_entry_sets_named_rank_factor_and_leaves_others_default() {
        let w = workload();
        let a = arch();
        let mut layouts = default_layout(&w, &a);
        let entries = vec![LayoutEntryConfig {
            target: "DRAM".into(),
            kind: "intraline".into(),
            factors: "M=4".into(),
            permutation: "M".into(),
            num_read_ports: None,
            num_write_ports: None,
        }];
        apply_layout_entries(&mut layouts, &a, &entries).unwrap();
        let dram = &layouts.levels[a.level_id("DRAM").unwrap()];
        assert_eq!(dram.nests[0].intraline.factor("M"), 4);
        assert_eq!(dram.nests[0].interline.factor("M"), 1);
    }

    #[test]
    fn layout_entry_rejects_unknown_target_level() {
        let w = workload();
        let a = arch();
        let mut layouts = default_layout(&w, &a);
        let entries = vec![LayoutEntryConfig {
            target: "NoSuchLevel".into(),
            kind: "interline".into(),
            factors: String::new(),
            permutation: String::new(),
            num_read_ports: None,
            num_write_ports: None,
        }];
        assert!(apply_layout_entries(&mut layouts, &a, &entries).is_err());
    }
}
