//! The "Legal" layout-space: three orthogonal sub-spaces (splitting, packing,
//! authentication-block sizing) over a concordant layout, and the composite
//! ID decoder that turns a `(splitting_id, auth_id, packing_id)` triple into
//! a concrete `Layouts` (spec §3 `LayoutSpace state`, §4.3 `CreateSpace` /
//! `ConstructLayout`).
//!
//! Grounded on `include/layoutspaces/legal.hpp` (`LegalLayoutSpace`, its
//! `packing_options_per_level_` table and `FindDivisors` helper) and
//! `legal.cpp`'s `CreateSpace`. The divisor-only range convention and the
//! "packing moves at most one rank per level" rule are carried over
//! verbatim (SPEC_FULL §14); the "splitting" sub-space's exact mechanics are
//! not spelled out by name in `legal.hpp` beyond "collected analogously
//! [to authblock]" (spec §4.3) — here a splitting variable is, for each
//! (level, data-space, rank), the rank's combined intraline·interline factor
//! at that level; its divisor range repartitions that fixed product between
//! intraline and interline without changing the level's total traffic for
//! that rank. This choice is recorded in DESIGN.md.

use crate::arch::{Architecture, Technology};
use crate::error::LayoutError;
use crate::layout::{ConcordantState, Layouts};
use crate::util::{divisors, mixed_radix_decode, mixed_radix_size};

/// One variable factor: a (level, data-space, rank) triple whose legal
/// values are exactly the divisors of a computed maximum (spec §3
/// `variable_authblock_factors`, `authblock_factor_ranges`).
#[derive(Debug, Clone)]
pub struct VariableFactor {
    pub level: usize,
    pub data_space: usize,
    pub rank: String,
    pub max_factor: u32,
    pub range: Vec<u32>,
}

impl VariableFactor {
    fn new(level: usize, data_space: usize, rank: String, max_factor: u32) -> Self {
        VariableFactor {
            level,
            data_space,
            rank,
            range: divisors(max_factor),
            max_factor,
        }
    }
}

/// One storage level's packing choice set: "no packing" (index 0) or moving
/// exactly one `(data_space, rank)` pair from interline into intraline
/// (spec §14: "packing chooses at most one rank per level").
#[derive(Debug, Clone, Default)]
pub struct PackingOption {
    pub level: usize,
    /// `candidates[i] = (data_space, rank)`; choice `0` always means "none".
    pub candidates: Vec<(usize, String)>,
}

impl PackingOption {
    fn radix(&self) -> usize {
        self.candidates.len() + 1
    }
}

/// The full legal layout-space for one mapping's concordant layout.
pub struct Legal {
    pub authblock: Vec<VariableFactor>,
    pub splitting: Vec<VariableFactor>,
    pub packing: Vec<PackingOption>,
}

impl Legal {
    pub fn splitting_candidates(&self) -> u64 {
        mixed_radix_size(&self.splitting.iter().map(|v| v.range.len()).collect::<Vec<_>>())
    }

    pub fn packing_candidates(&self) -> u64 {
        mixed_radix_size(&self.packing.iter().map(|p| p.radix()).collect::<Vec<_>>())
    }

    pub fn authblock_candidates(&self) -> u64 {
        mixed_radix_size(&self.authblock.iter().map(|v| v.range.len()).collect::<Vec<_>>())
    }

    pub fn num_layout_candidates(&self) -> u64 {
        self.splitting_candidates() * self.packing_candidates() * self.authblock_candidates()
    }

    /// Collects the three sub-spaces from a concordant layout (spec §4.3
    /// `CreateSpace`).
    pub fn create_space(layouts: &Layouts, state: &ConcordantState, arch: &Architecture) -> Self {
        let mut splitting = Vec::new();
        let mut authblock = Vec::new();
        let mut packing = Vec::new();

        for layout in &layouts.levels {
            let level = layout.level;
            let mut packing_candidates = Vec::new();

            for (ds_idx, ds_layout) in layout.nests.iter().enumerate() {
                for rank in &ds_layout.interline.ranks {
                    let intra = ds_layout.intraline.factor(rank);
                    let inter = ds_layout.interline.factor(rank);
                    let total = intra.saturating_mul(inter);
                    if total > 1 {
                        splitting.push(VariableFactor::new(level, ds_idx, rank.clone(), total));
                    }
                    if inter > 1 {
                        packing_candidates.push((ds_idx, rank.clone()));
                    }
                }
            }
            packing.push(PackingOption { level, candidates: packing_candidates });

            if arch.levels[level].technology != Technology::Dram {
                continue;
            }
            let prev1 = level.checked_sub(1);
            let prev2 = level.checked_sub(2);
            for (ds_idx, ds_layout) in layout.nests.iter().enumerate() {
                for rank in &ds_layout.authblock_lines.ranks {
                    let dims = layout.rank_to_dims.get(rank).cloned().unwrap_or_default();
                    let mut max_factor: u32 = 1;
                    for d in dims {
                        let num = prev1
                            .map(|l| state.cumulatively_product_dimval[l][d])
                            .unwrap_or(1);
                        let den = prev2
                            .map(|l| state.cumulatively_product_dimval[l][d])
                            .unwrap_or(1)
                            .max(1);
                        max_factor = max_factor.saturating_mul((num / den).max(1));
                    }
                    if max_factor > 1 {
                        authblock.push(VariableFactor::new(level, ds_idx, rank.clone(), max_factor));
                    }
                }
            }
        }

        Legal { authblock, splitting, packing }
    }

    /// Decodes `(splitting_id, auth_id, packing_id)` and applies the chosen
    /// divisors/packing moves to a fresh copy of the base concordant layout
    /// (spec §4.3 `ConstructLayout`).
    pub fn construct_layout(
        &self,
        base: &Layouts,
        splitting_id: u64,
        auth_id: u64,
        packing_id: u64,
    ) -> Result<Layouts, LayoutError> {
        let mut layouts = base.clone();

        let splitting_radices: Vec<usize> = self.splitting.iter().map(|v| v.range.len()).collect();
        let splitting_digits = mixed_radix_decode(splitting_id, &splitting_radices)
            .ok_or_else(|| LayoutError::IdOutOfRange(splitting_id, self.splitting_candidates()))?;
        for (v, &digit) in self.splitting.iter().zip(&splitting_digits) {
            let chosen = v.range[digit];
            let level = &mut layouts.levels[v.level];
            let nest = level.nest_mut(v.data_space);
            let total = v.max_factor;
            let interline = total / chosen;
            nest.intraline.set_factor(&v.rank, chosen);
            nest.interline.set_factor(&v.rank, interline);
        }

        let auth_radices: Vec<usize> = self.authblock.iter().map(|v| v.range.len()).collect();
        let auth_digits = mixed_radix_decode(auth_id, &auth_radices)
            .ok_or_else(|| LayoutError::IdOutOfRange(auth_id, self.authblock_candidates()))?;
        for (v, &digit) in self.authblock.iter().zip(&auth_digits) {
            let chosen = v.range[digit];
            let level = &mut layouts.levels[v.level];
            let nest = level.nest_mut(v.data_space);
            nest.authblock_lines.set_factor(&v.rank, chosen);
        }

        let packing_radices: Vec<usize> = self.packing.iter().map(|p| p.radix()).collect();
        let packing_digits = mixed_radix_decode(packing_id, &packing_radices)
            .ok_or_else(|| LayoutError::IdOutOfRange(packing_id, self.packing_candidates()))?;
        for (p, &digit) in self.packing.iter().zip(&packing_digits) {
            if digit == 0 {
                continue;
            }
            let (ds_idx, rank) = &p.candidates[digit - 1];
            let level = &mut layouts.levels[p.level];
            let nest = level.nest_mut(*ds_idx);
            let inter = nest.interline.factor(rank);
            let intra = nest.intraline.factor(rank);
            nest.intraline.set_factor(rank, intra.saturating_mul(inter));
            nest.interline.set_factor(rank, 1);
        }

        Ok(layouts)
    }

    /// Installs dummy authblock factors (all 1) for every DRAM-technology
    /// level, used before the main search loop's phases 1-2 and as the
    /// Phase-3 fallback (spec §4.2 "Final layout search").
    pub fn install_dummy_authblock(layouts: &mut Layouts, arch: &Architecture) {
        for layout in &mut layouts.levels {
            if arch.levels[layout.level].technology != Technology::Dram {
                continue;
            }
            for ds in &mut layout.nests {
                for rank in ds.authblock_lines.ranks.clone() {
                    ds.authblock_lines.set_factor(&rank, 1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{ArithmeticLevel, EnergyModel, StorageLevel};
    use crate::layout::create_concordant_layout;
    use crate::mapping::{LoopDescriptor, LoopNest, Mapping, SpaceTime};
    use crate::shape::{Coefficient, DataSpace, Dimension, Rank, Workload};

    fn workload() -> Workload {
        Workload::new(
            vec![Dimension { name: "M".into(), bound: 8 }],
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
            capacity: Some(4096),
            block_size: block,
            cluster_size: 8,
            instances: 1,
            read_bandwidth: Some(32.0),
            write_bandwidth: Some(32.0),
            shared_bandwidth: None,
            num_ports: 1,
            num_banks: 1,
            technology: tech,
            word_bits: 16,
            energy: EnergyModel::default(),
        };
        Architecture {
            levels: vec![
                level("RF", 2, Technology::Sram),
                level("SRAM", 8, Technology::Sram),
                level("DRAM", 32, Technology::Dram),
            ],
            arithmetic: ArithmeticLevel { name: "MAC".into(), instances: 1, energy_per_op: 1.0 },
        }
    }

    fn mapping() -> Mapping {
        let loops = vec![
            LoopDescriptor { dim: 0, start: 0, end: 2, stride: 1, spacetime: SpaceTime::SpatialX, residual_end: Some(2) },
            LoopDescriptor { dim: 0, start: 0, end: 2, stride: 1, spacetime: SpaceTime::Temporal, residual_end: Some(2) },
            LoopDescriptor { dim: 0, start: 0, end: 2, stride: 1, spacetime: SpaceTime::Temporal, residual_end: Some(2) },
        ];
        Mapping {
            loop_nest: LoopNest { loops, storage_tiling_boundaries: vec![0, 1, 2, 3] },
            datatype_bypass_nest: vec![vec![true, true, true]],
        }
    }

    #[test]
    fn construct_layout_bijects_over_the_declared_range() {
        let w = workload();
        let a = arch();
        let (layouts, state) = create_concordant_layout(&mapping(), &w, &a);
        let legal = Legal::create_space(&layouts, &state, &a);
        let total = legal.num_layout_candidates();
        assert!(total >= 1);

        let mut seen = std::collections::HashSet::new();
        let splitting_radices: Vec<usize> = legal.splitting.iter().map(|v| v.range.len()).collect();
        let auth_radices: Vec<usize> = legal.authblock.iter().map(|v| v.range.len()).collect();
        let packing_radices: Vec<usize> = legal.packing.iter().map(|p| p.radix()).collect();
        let n_split = mixed_radix_size(&splitting_radices);
        let n_auth = mixed_radix_size(&auth_radices);
        let n_pack = mixed_radix_size(&packing_radices);
        for s in 0..n_split {
            for auth in 0..n_auth {
                for p in 0..n_pack {
                    let built = legal.construct_layout(&layouts, s, auth, p).unwrap();
                    assert!(seen.insert(format!("{:?}", (s, auth, p))));
                    let _ = built;
                }
            }
        }
    }

    #[test]
    fn authblock_factor_always_divides_its_max() {
        let w = workload();
        let a = arch();
        let (layouts, state) = create_concordant_layout(&mapping(), &w, &a);
        let legal = Legal::create_space(&layouts, &state, &a);
        for v in &legal.authblock {
            for &d in &v.range {
                assert_eq!(v.max_factor % d, 0);
            }
        }
    }

    #[test]
    fn out_of_range_id_is_rejected() {
        let w = workload();
        let a = arch();
        let (layouts, state) = create_concordant_layout(&mapping(), &w, &a);
        let legal = Legal::create_space(&layouts, &state, &a);
        let huge = legal.splitting_candidates() + 1000;
        assert!(legal.construct_layout(&layouts, huge, 0, 0).is_err());
    }
}
