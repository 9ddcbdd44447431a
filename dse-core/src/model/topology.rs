//! Composes per-level evaluations into aggregate statistics for one
//! `(mapping, layout)` pair (spec §3 C8 Topology/Engine, §4.5).
//!
//! Grounded on the teacher's `device::Context`-style aggregation (one object
//! composing per-device evaluation results into a candidate's total cost)
//! and on `buffer.cpp`'s level-to-level "energy due to overflow" propagation
//! — here simplified to a single reduction pass over already-evaluated
//! levels rather than the original's two-way parent/child traversal, since
//! this engine does not model compressed-tile confidence below 1.0 (spec §9
//! open question 1 is left unresolved, not guessed at).

use crate::arch::Architecture;
use crate::crypto::CryptoConfig;
use crate::error::LayoutError;
use crate::layout::Layouts;
use crate::mapping::Mapping;
use crate::model::buffer::{self, LevelEvaluation};
use crate::shape::Workload;

/// Aggregate statistics for one `(mapping, layout)` evaluation (spec §3
/// `EvaluationResult`).
#[derive(Debug, Clone)]
pub struct Stats {
    pub cycles: u64,
    pub energy_pj: f64,
    pub utilization: f64,
    pub per_level: Vec<LevelEvaluation>,
}

impl Stats {
    /// Energy per unit of useful compute, the metric most phases optimize
    /// (spec §4.2 Phase 1-3 acceptance criteria, §9 "barely-better" cutoff).
    pub fn energy_per_compute(&self, total_ops: u64) -> f64 {
        self.energy_pj / total_ops.max(1) as f64
    }
}

/// Evaluates every storage level for one `(mapping, layout)` pair and
/// reduces them into aggregate `Stats` (spec §4.5 "Performance": reported
/// cycles are `⌈compute_cycles / bank_conflict_slowdown⌉`, using the
/// binding (minimum) slowdown across levels as the overall bottleneck).
pub fn evaluate(
    arch: &Architecture,
    mapping: &Mapping,
    layouts: &Layouts,
    workload: &Workload,
    crypto: Option<&CryptoConfig>,
) -> Result<Stats, LayoutError> {
    let ideal_compute_cycles: u64 = workload.dimensions.iter().map(|d| u64::from(d.bound)).product();

    let mut per_level = Vec::with_capacity(arch.num_levels());
    let mut bottleneck_slowdown = f64::INFINITY;
    let mut energy_pj = 0.0;

    for (level_idx, storage) in arch.levels.iter().enumerate() {
        let layout = &layouts.levels[level_idx];
        let eval = buffer::evaluate_level(level_idx, storage, mapping, layout, workload, crypto)?;
        bottleneck_slowdown = bottleneck_slowdown.min(eval.slowdown.max(1e-12));

        let reads = eval.read_lines;
        let writes = eval.write_lines;
        energy_pj += reads * storage.energy.read
            + writes * storage.energy.write
            + storage.energy.address_generation * (reads + writes)
            + storage.energy.leak * ideal_compute_cycles as f64 * 1e-3;

        per_level.push(eval);
    }

    energy_pj += ideal_compute_cycles as f64 * arch.arithmetic.energy_per_op;

    let cycles = (ideal_compute_cycles as f64 / bottleneck_slowdown.max(1e-12)).ceil() as u64;
    let utilization = bottleneck_slowdown.min(1.0);

    Ok(Stats { cycles, energy_pj, utilization, per_level })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{ArithmeticLevel, EnergyModel, StorageLevel, Technology};
    use crate::layout::create_concordant_layout;
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
            capacity: Some(4096),
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
            energy: EnergyModel { read: 0.5, write: 0.6, leak: 0.001, address_generation: 0.05, compression: 0.0, decompression: 0.0 },
        };
        Architecture {
            levels: vec![level("RF", 4, Technology::Sram), level("DRAM", 16, Technology::Dram)],
            arithmetic: ArithmeticLevel { name: "MAC".into(), instances: 1, energy_per_op: 1.0 },
        }
    }

    fn mapping() -> Mapping {
        let loops = vec![
            LoopDescriptor { dim: 0, start: 0, end: 4, stride: 1, spacetime: SpaceTime::SpatialX, residual_end: Some(4) },
            LoopDescriptor { dim: 0, start: 0, end: 1, stride: 1, spacetime: SpaceTime::Temporal, residual_end: Some(1) },
        ];
        Mapping {
            loop_nest: LoopNest { loops, storage_tiling_boundaries: vec![0, 1, 2] },
            datatype_bypass_nest: vec![vec![true, true]],
        }
    }

    #[test]
    fn evaluate_reports_positive_cycles_and_energy() {
        let w = workload();
        let a = arch();
        let (layouts, _) = create_concordant_layout(&mapping(), &w, &a);
        let stats = evaluate(&a, &mapping(), &layouts, &w, None).unwrap();
        assert!(stats.cycles >= 1);
        assert!(stats.energy_pj > 0.0);
    }

    #[test]
    fn access_correction_ratio_never_exceeds_one_without_reuse_flags() {
        let w = workload();
        let a = arch();
        let (layouts, _) = create_concordant_layout(&mapping(), &w, &a);
        let stats = evaluate(&a, &mapping(), &layouts, &w, None).unwrap();
        for (layout, level) in layouts.levels.iter().zip(&stats.per_level) {
            if !layout.assume_row_buffer && !layout.assume_reuse {
                assert!(level.access_correction_ratio <= 1.0 + 1e-9);
            }
        }
    }
}
