//! The bank-conflict / latency engine (spec §4.4): per buffer level, scores
//! one `(mapping, layout, crypto)` triple with a *slowdown*
//! (`effective_cycles / ideal_compute_cycles`).
//!
//! Grounded on `src/model/buffer.cpp`'s `ComputeBankConflictSlowdownPerDataSpace`
//! / `ComputeBankConflictSlowdownIndividual`, `FindRankGroupRepresentative`
//! / `GroupRelatedRanks`, and `CountPerGroupTileTypesBase`'s boundary-tile
//! truncation. `group_related_ranks` groups ranks that share a projected
//! dimension so a zero-padding boundary tile is enumerated once per group
//! rather than independently per rank (ranks in the same group must see the
//! same boundary/interior state). Tile-type enumeration is folded into the
//! existing Phase 0 imperfect-factorization cross-product: each
//! zero-padding-eligible group contributes one extra boolean dimension
//! (interior vs. boundary tile) to that same weighted average, rather than
//! the original's full per-dimension recursive enumeration over every tile
//! position — recorded as a simplification in DESIGN.md, not a collapse to
//! a single representative tile. `access_correction_ratio` (Phase 5) is
//! computed from the actual per-assignment demand, not a clamp.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::arch::{StorageLevel, Technology};
use crate::crypto::CryptoConfig;
use crate::error::LayoutError;
use crate::layout::Layout;
use crate::mapping::Mapping;
use crate::shape::{DimId, Workload, WRITE_DATA_SPACE_ID};
use crate::util::ceil_div;

/// Float wrapper giving `BinaryHeap` a total order, for the shared-crypto
/// max-heap drain of spec §4.4 Phase 4. NaN never occurs here: every value
/// that goes in is a `ceil`-ed cycle count.
#[derive(Debug, Clone, Copy, PartialEq)]
struct NotNan(f64);
impl Eq for NotNan {}
impl PartialOrd for NotNan {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for NotNan {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Union-find over a workload's factorized dimensions, used to group ranks
/// that share any projected dimension (spec §4.4 Phase 3, `original_source`
/// `FindRankGroupRepresentative`/`GroupRelatedRanks`).
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Groups `(data_space_index, rank_index)` pairs that project onto a shared
/// factorized dimension, via union-find over the workload's dimensions.
pub fn group_related_ranks(workload: &Workload) -> Vec<Vec<(usize, usize)>> {
    let mut uf = UnionFind::new(workload.dimensions.len().max(1));
    let mut refs: Vec<(usize, usize, Vec<DimId>)> = Vec::new();
    for (ds_idx, ds) in workload.data_spaces.iter().enumerate() {
        for (rank_idx, rank) in ds.ranks.iter().enumerate() {
            let dims: Vec<DimId> = rank.dims().collect();
            for pair in dims.windows(2) {
                uf.union(pair[0], pair[1]);
            }
            refs.push((ds_idx, rank_idx, dims));
        }
    }
    let mut groups: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
    for (ds_idx, rank_idx, dims) in refs {
        let rep = dims.first().map(|&d| uf.find(d)).unwrap_or(0);
        groups.entry(rep).or_default().push((ds_idx, rank_idx));
    }
    let mut out: Vec<_> = groups.into_values().collect();
    out.sort_by_key(|g| g.first().copied().unwrap_or((0, 0)));
    out
}

/// How many times this level's tile is replaced, across time, for a given
/// dimension: the product of all temporal loop extents bound to `dim` at
/// every level above `level_idx` (spec §4.4 Phase 3 `dim_id_to_number_of_tiles`).
fn tiles_along_dim(mapping: &Mapping, level_idx: usize, dim: DimId) -> u32 {
    let mut tiles = 1u32;
    for level in (level_idx + 1)..mapping.loop_nest.num_levels() {
        for l in mapping.loop_nest.level_loops(level) {
            if l.dim == dim && !l.is_spatial() {
                tiles = tiles.saturating_mul(l.extent().max(1));
            }
        }
    }
    tiles.max(1)
}

/// Per-group zero-padding boundary flags (spec §4.4 Phase 3). Each eligible
/// group (one with at least one member rank carrying nonzero zero-padding
/// at a level with more than one tile along its dims) becomes one extra
/// boolean dimension in the Phase 0 weighted average: "boundary tile"
/// (weight `1/tiles`) vs. "interior tile" (weight `(tiles-1)/tiles`).
fn zero_padding_boundary_flags(
    workload: &Workload,
    layout: &Layout,
    mapping: &Mapping,
    level_idx: usize,
    storage: &StorageLevel,
) -> Vec<(Vec<(usize, String, u32)>, u32)> {
    if !layout.assume_zero_padding || storage.technology != Technology::Dram {
        return Vec::new();
    }
    let mut out = Vec::new();
    for group in group_related_ranks(workload) {
        let mut members = Vec::new();
        let mut tiles = 1u32;
        for (ds_idx, rank_idx) in &group {
            let rank = &workload.data_spaces[*ds_idx].ranks[*rank_idx];
            let zp = *layout.rank_to_zero_padding.get(&rank.name).unwrap_or(&0);
            if zp == 0 {
                continue;
            }
            for dim in rank.dims() {
                tiles = tiles.max(tiles_along_dim(mapping, level_idx, dim));
            }
            members.push((*ds_idx, rank.name.clone(), zp));
        }
        if !members.is_empty() && tiles > 1 {
            out.push((members, tiles));
        }
    }
    out
}

/// Averages a per-assignment closure over all `2^k` imperfect-factorization
/// assignments, weighting each by `Π_i (1/outer_i if selected else 1 - 1/outer_i)`
/// (spec §4.4 Phase 0, §8 scenario 6). `eval` receives, for each of the `k`
/// imperfect loops, whether its *residual* extent (`true`) or *full* extent
/// (`false`) was selected for this assignment.
pub fn imperfect_weighted_average<F>(outer_sizes: &[u32], mut eval: F) -> (f64, f64)
where
    F: FnMut(&[bool]) -> (f64, f64),
{
    let k = outer_sizes.len();
    if k == 0 {
        return eval(&[]);
    }
    let mut slowdown_acc = 0.0;
    let mut ratio_acc = 0.0;
    let mut assignment = vec![false; k];
    for mask in 0u32..(1u32 << k) {
        let mut weight = 1.0;
        for (i, outer) in outer_sizes.iter().enumerate() {
            let selected = (mask >> i) & 1 == 1;
            let outer = f64::from((*outer).max(1));
            weight *= if selected { 1.0 / outer } else { 1.0 - 1.0 / outer };
            assignment[i] = selected;
        }
        let (s, r) = eval(&assignment);
        slowdown_acc += weight * s;
        ratio_acc += weight * r;
    }
    (slowdown_acc, ratio_acc)
}

/// Cryptographic latency, in cycles, to authenticate/encrypt one memory line
/// whose authentication block spans `auth_block_size` layout elements (spec
/// §4.4 Phase 4, §8 scenario 5).
pub fn crypto_latency_per_line(crypto: &CryptoConfig, auth_block_size: u32, word_bits: u32) -> f64 {
    let datapath = u64::from(crypto.datapath.max(1));
    let bits = u64::from(auth_block_size) * u64::from(word_bits);
    let cycles = ceil_div(bits, datapath) as f64;
    cycles * f64::from(crypto.auth_cycle_per_datapath + crypto.enc_cycle_per_datapath)
        + f64::from(crypto.auth_additional_cycle_per_block)
}

/// Hash re-reads needed per memory line (spec §4.4 Phase 4, §8 scenario 5).
pub fn crypto_hash_reads_per_line(
    crypto: &CryptoConfig,
    blocks_per_line: u32,
    block_size: u32,
    word_bits: u32,
) -> f64 {
    let denom = f64::from(block_size.max(1)) * f64::from(word_bits.max(1));
    (f64::from(blocks_per_line) * f64::from(crypto.hash_size)) / denom
}

/// Total crypto latency when authentication engines are **not** shared: the
/// per-data-space latency `per_line · ⌈lines/N⌉`, maxed across data spaces
/// (spec §4.4 Phase 4 / SPEC_FULL §14).
pub fn nonshared_crypto_latency(lines: &[u32], per_line: &[f64], engines: u32) -> f64 {
    let engines = u64::from(engines.max(1));
    lines
        .iter()
        .zip(per_line)
        .map(|(&l, &p)| p * ceil_div(u64::from(l), engines) as f64)
        .fold(0.0, f64::max)
}

/// Total crypto latency when authentication engines **are** shared:
/// `⌊total_lines/N⌋` lines served at the slowest per-line rate, plus the
/// `total_lines mod N` remainder drained from a max-heap of per-data-space
/// per-line latencies until exhausted (spec §4.4 Phase 4, SPEC_FULL §14).
pub fn shared_crypto_latency(lines: &[u32], per_line: &[f64], engines: u32) -> f64 {
    let engines = u64::from(engines.max(1));
    let total_lines: u64 = lines.iter().map(|&l| u64::from(l)).sum();
    let base_count = total_lines / engines;
    let mut remainder = total_lines % engines;

    let mut heap: BinaryHeap<NotNan> = per_line.iter().copied().map(NotNan).collect();
    let slowest = heap.peek().map(|n| n.0).unwrap_or(0.0);
    let mut total = slowest * base_count as f64;

    while remainder > 0 {
        match heap.pop() {
            Some(NotNan(p)) => {
                total += p;
                remainder -= 1;
            }
            None => break,
        }
    }
    total
}

/// `max(⌈read/read_ports⌉, ⌈write/write_ports⌉)` (spec §4.4 Phase 4).
pub fn memory_latency(read_lines: f64, write_lines: f64, read_ports: f64, write_ports: f64) -> f64 {
    (read_lines / read_ports.max(1e-9))
        .ceil()
        .max((write_lines / write_ports.max(1e-9)).ceil())
}

/// Outcome of scoring one storage level for one `(mapping, layout)` pair.
#[derive(Debug, Clone)]
pub struct LevelEvaluation {
    pub slowdown: f64,
    /// Bandwidth-model vs. layout-model access correction ratio (spec §4.4
    /// Phase 5, §8 invariant 6).
    pub access_correction_ratio: f64,
    pub cycles: u64,
    /// Lines read/written at this level, feeding the energy model of §4.5.
    pub read_lines: f64,
    pub write_lines: f64,
}

/// Scores one storage level for one `(mapping, layout)` pair: the Phase 0
/// imperfect-factorization average is extended with one extra boolean
/// dimension per zero-padding-eligible rank group (Phase 3 boundary tile),
/// and Phase 5's access correction ratio is computed from the resulting
/// per-assignment demand rather than approximated.
pub fn evaluate_level(
    level_idx: usize,
    storage: &StorageLevel,
    mapping: &Mapping,
    layout: &Layout,
    workload: &Workload,
    crypto: Option<&CryptoConfig>,
) -> Result<LevelEvaluation, LayoutError> {
    let level_loops = mapping.loop_nest.level_loops(level_idx);

    let imperfect: Vec<usize> = level_loops
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_imperfect())
        .map(|(i, _)| i)
        .collect();
    let mut outer_sizes: Vec<u32> = imperfect.iter().map(|&i| level_loops[i].outer_size()).collect();

    let boundary_groups = zero_padding_boundary_flags(workload, layout, mapping, level_idx, storage);
    let num_imperfect = outer_sizes.len();
    outer_sizes.extend(boundary_groups.iter().map(|(_, tiles)| *tiles));

    let mut construction_err: Option<LayoutError> = None;
    let last_lines = std::cell::Cell::new((0.0f64, 0.0f64));
    let (slowdown, access_correction_ratio) = imperfect_weighted_average(&outer_sizes, |selection| {
        let mut subtile_extent = vec![0u32; workload.dimensions.len()];
        for l in level_loops {
            let extent = l.extent();
            subtile_extent[l.dim] = subtile_extent[l.dim].max(1) * extent.max(1);
        }
        for (pos, &loop_idx) in imperfect.iter().enumerate() {
            if selection[pos] {
                let l = &level_loops[loop_idx];
                if let Some(residual) = l.residual_extent() {
                    subtile_extent[l.dim] = residual.max(1);
                }
            }
        }

        // Ranks whose group selected the boundary tile in this assignment
        // lose their zero-padding worth of elements (spec §4.4 Phase 3
        // `num_lines` formula's `- zero_padding` terms).
        let mut active_padding: HashMap<(usize, String), u32> = HashMap::new();
        for (gi, (members, _)) in boundary_groups.iter().enumerate() {
            if selection[num_imperfect + gi] {
                for (ds_idx, rank, zp) in members {
                    active_padding.insert((*ds_idx, rank.clone()), *zp);
                }
            }
        }

        let mut read_lines = 0.0;
        let mut write_lines = 0.0;
        let mut crypto_lines = Vec::new();
        let mut crypto_per_line = Vec::new();
        let mut total_demand = 0u64;

        for (ds_idx, ds_layout) in layout.nests.iter().enumerate() {
            let ranks = &ds_layout.interline.ranks;
            let mut memory_line: u64 = 1;
            let mut auth_factor_product: u64 = 1;
            let mut mapping_parallelism_product: u64 = 1;
            for rank in ranks {
                let intra = ds_layout.intraline.factor(rank);
                let auth = ds_layout.authblock_lines.factor(rank).max(1);
                memory_line *= u64::from(intra.max(1));
                auth_factor_product *= u64::from(auth);

                let dims = layout.rank_to_dims.get(rank).cloned().unwrap_or_default();
                let coeffs = layout
                    .rank_to_coefficient
                    .get(rank)
                    .cloned()
                    .unwrap_or_else(|| vec![1; dims.len()]);
                let mut mp = if dims.len() <= 1 {
                    dims.first().map_or(1, |&d| subtile_extent[d].max(1))
                } else {
                    1 + dims
                        .iter()
                        .zip(&coeffs)
                        .map(|(&d, &c)| (i64::from(subtile_extent[d].max(1)) - 1) * i64::from(c))
                        .sum::<i64>()
                        .max(0) as u32 as u64
                };
                if let Some(&zp) = active_padding.get(&(ds_idx, rank.clone())) {
                    mp = mp.saturating_sub(u64::from(zp)).max(1);
                }
                mapping_parallelism_product *= mp.max(1);
            }

            if memory_line > u64::from(storage.block_size.max(1)) {
                construction_err = Some(LayoutError::BlockSizeExceeded(
                    memory_line as u32,
                    storage.name.clone(),
                    storage.block_size,
                ));
            }
            let auth_block_size = memory_line * auth_factor_product;

            let binding = memory_line.max(1);
            let lines = ceil_div(mapping_parallelism_product, binding).max(1);
            total_demand += mapping_parallelism_product;

            if ds_idx == WRITE_DATA_SPACE_ID.min(layout.nests.len().saturating_sub(1)) {
                write_lines += lines as f64;
            } else {
                read_lines += lines as f64;
            }

            if let Some(crypto_cfg) = crypto {
                let per_line = crypto_latency_per_line(crypto_cfg, auth_block_size as u32, storage.word_bits);
                crypto_lines.push(lines as u32);
                crypto_per_line.push(per_line);
            }
        }

        let (read_ports, write_ports) = storage.derived_ports();
        let mem_latency = memory_latency(read_lines, write_lines, read_ports, write_ports);
        let crypto_latency = crypto.map_or(0.0, |cfg| {
            if cfg.shared {
                shared_crypto_latency(&crypto_lines, &crypto_per_line, cfg.engines())
            } else {
                nonshared_crypto_latency(&crypto_lines, &crypto_per_line, cfg.engines())
            }
        });

        let compute_cycles = 1.0;
        let critical_path = compute_cycles.max(mem_latency).max(crypto_latency).max(1e-9);
        let slowdown = compute_cycles / critical_path;

        let overall_lines = (read_lines + write_lines).max(1e-9);
        let block_size = f64::from(storage.block_size.max(1));
        // Phase 5: bandwidth-model vs. layout-model access correction ratio
        // (spec §4.4 Phase 5, §8 invariant 6), from the actual per-assignment
        // demand. `assume_reuse`/`assume_row_buffer` both legitimately push
        // this above 1 (data served without a fresh line fetch); absent
        // both, the ratio is clamped to the bandwidth-model's own bound.
        let ratio_raw = (total_demand as f64 / block_size) / overall_lines;
        let ratio = if layout.assume_reuse || layout.assume_row_buffer {
            ratio_raw
        } else {
            ratio_raw.min(1.0)
        };
        last_lines.set((read_lines, write_lines));

        (slowdown, ratio)
    });

    if let Some(err) = construction_err {
        return Err(err);
    }

    let (read_lines, write_lines) = last_lines.get();
    Ok(LevelEvaluation {
        slowdown,
        access_correction_ratio,
        cycles: (1.0 / slowdown.max(1e-9)).ceil() as u64,
        read_lines,
        write_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto() -> CryptoConfig {
        CryptoConfig {
            datapath: 128,
            auth_cycle_per_datapath: 4,
            enc_cycle_per_datapath: 6,
            auth_additional_cycle_per_block: 2,
            hash_size: 64,
            ..CryptoConfig::uninitialized()
        }
    }

    #[test]
    fn crypto_latency_matches_worked_scenario() {
        let c = crypto();
        let latency = crypto_latency_per_line(&c, 8, 16);
        assert_eq!(latency, 1.0 * (4.0 + 6.0) + 2.0);
        let hash_reads = crypto_hash_reads_per_line(&c, 1, 4, 16);
        assert_eq!(hash_reads, 1.0);
    }

    #[test]
    fn imperfect_average_matches_worked_scenario() {
        let (slowdown, _) = imperfect_weighted_average(&[4], |selection| {
            if selection[0] {
                (1.0, 0.0)
            } else {
                (2.0, 0.0)
            }
        });
        assert!((slowdown - 1.75).abs() < 1e-9);
    }

    #[test]
    fn nonshared_latency_is_max_across_dataspaces() {
        let latency = nonshared_crypto_latency(&[10, 3], &[2.0, 5.0], 2);
        // ds0: 2.0 * ceil(10/2)=5 -> 10.0 ; ds1: 5.0*ceil(3/2)=2 -> 10.0
        assert_eq!(latency, 10.0);
    }

    #[test]
    fn shared_latency_drains_remainder_from_slowest() {
        let latency = shared_crypto_latency(&[5, 5], &[1.0, 3.0], 2);
        // total_lines=10, engines=2 -> base_count=5, remainder=0
        assert_eq!(latency, 15.0);
    }

    #[test]
    fn group_related_ranks_merges_shared_dimensions() {
        use crate::shape::{Coefficient, DataSpace, Dimension, Rank, Workload};
        let w = Workload::new(
            vec![Dimension { name: "M".into(), bound: 4 }, Dimension { name: "K".into(), bound: 4 }],
            vec![
                DataSpace {
                    name: "A".into(),
                    order: 1,
                    ranks: vec![Rank { name: "M".into(), terms: vec![(0, Coefficient { value: 1 })] }],
                    read_write: false,
                },
                DataSpace {
                    name: "B".into(),
                    order: 1,
                    ranks: vec![Rank { name: "MK".into(), terms: vec![(0, Coefficient { value: 1 }), (1, Coefficient { value: 1 })] }],
                    read_write: false,
                },
            ],
        );
        let groups = group_related_ranks(&w);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn tiles_along_dim_counts_only_outer_temporal_loops() {
        use crate::mapping::{LoopDescriptor, LoopNest, Mapping, SpaceTime};
        let loops = vec![
            // level 0 (innermost)
            LoopDescriptor { dim: 0, start: 0, end: 2, stride: 1, spacetime: SpaceTime::Temporal, residual_end: None },
            // level 1: one temporal factor of 3 and one spatial factor of 2 (spatial must not count)
            LoopDescriptor { dim: 0, start: 0, end: 3, stride: 1, spacetime: SpaceTime::Temporal, residual_end: None },
            LoopDescriptor { dim: 0, start: 0, end: 2, stride: 1, spacetime: SpaceTime::SpatialX, residual_end: None },
        ];
        let mapping = Mapping {
            loop_nest: LoopNest { loops, storage_tiling_boundaries: vec![0, 1, 3] },
            datatype_bypass_nest: vec![vec![true]],
        };
        assert_eq!(tiles_along_dim(&mapping, 0, 0), 3);
        assert_eq!(tiles_along_dim(&mapping, 1, 0), 1);
    }

    #[test]
    fn zero_padding_boundary_flags_empty_without_assume_zero_padding() {
        use crate::arch::{EnergyModel, StorageLevel, Technology};
        use crate::layout::default_layout;
        use crate::mapping::{LoopNest, Mapping};
        use crate::shape::{Coefficient, DataSpace, Dimension, Rank, Workload};
        let w = Workload::new(
            vec![Dimension { name: "M".into(), bound: 4 }],
            vec![DataSpace {
                name: "A".into(),
                order: 1,
                ranks: vec![Rank { name: "M".into(), terms: vec![(0, Coefficient { value: 1 })] }],
                read_write: false,
            }],
        );
        let storage = StorageLevel {
            name: "DRAM".into(),
            capacity: Some(4096),
            block_size: 4,
            cluster_size: 1,
            instances: 1,
            read_bandwidth: Some(16.0),
            write_bandwidth: Some(16.0),
            shared_bandwidth: None,
            num_ports: 1,
            num_banks: 1,
            technology: Technology::Dram,
            word_bits: 16,
            energy: EnergyModel::default(),
        };
        let arch = crate::arch::Architecture {
            levels: vec![storage.clone()],
            arithmetic: crate::arch::ArithmeticLevel { name: "MAC".into(), instances: 1, energy_per_op: 1.0 },
        };
        let layouts = default_layout(&w, &arch);
        let mapping = Mapping { loop_nest: LoopNest::default(), datatype_bypass_nest: vec![vec![true]] };
        // default_layout's rank_to_zero_padding is always 0 (factors aren't
        // known yet), so no group is eligible even though assume_zero_padding
        // is set.
        let flags = zero_padding_boundary_flags(&w, &layouts.levels[0], &mapping, 0, &storage);
        assert!(flags.is_empty());
    }
}
