//! End-to-end evaluation of a hand-built dense GEMM mapping against the
//! three-level architecture from spec §8 "Concrete scenarios" item 1:
//! `M=K=N=16`, `{RF(16, block=1), SRAM(512, block=4), DRAM(∞, block=16)}`,
//! read/write/shared bandwidth 16.

use dse_core::arch::{ArithmeticLevel, EnergyModel, StorageLevel, Technology};
use dse_core::shape::{Coefficient, DataSpace, Dimension, Rank};
use dse_core::{create_concordant_layout, evaluate, Architecture, MapSpace, Workload};

fn workload() -> Workload {
    let dims = vec![
        Dimension { name: "M".into(), bound: 16 },
        Dimension { name: "K".into(), bound: 16 },
        Dimension { name: "N".into(), bound: 16 },
    ];
    let data_spaces = vec![
        DataSpace {
            name: "A".into(),
            order: 1,
            ranks: vec![
                Rank { name: "M".into(), terms: vec![(0, Coefficient { value: 1 })] },
                Rank { name: "K".into(), terms: vec![(1, Coefficient { value: 1 })] },
            ],
            read_write: false,
        },
        DataSpace {
            name: "B".into(),
            order: 1,
            ranks: vec![
                Rank { name: "K".into(), terms: vec![(1, Coefficient { value: 1 })] },
                Rank { name: "N".into(), terms: vec![(2, Coefficient { value: 1 })] },
            ],
            read_write: false,
        },
        DataSpace {
            name: "C".into(),
            order: 1,
            ranks: vec![
                Rank { name: "M".into(), terms: vec![(0, Coefficient { value: 1 })] },
                Rank { name: "N".into(), terms: vec![(2, Coefficient { value: 1 })] },
            ],
            read_write: true,
        },
    ];
    Workload::new(dims, data_spaces)
}

fn architecture() -> Architecture {
    let level = |name: &str, capacity: u64, block_size: u32, tech: Technology| StorageLevel {
        name: name.into(),
        capacity: Some(capacity),
        block_size,
        cluster_size: 1,
        instances: 1,
        read_bandwidth: Some(16.0),
        write_bandwidth: Some(16.0),
        shared_bandwidth: Some(16.0),
        num_ports: 1,
        num_banks: 1,
        technology: tech,
        word_bits: 16,
        energy: EnergyModel { read: 0.5, write: 0.6, leak: 0.001, address_generation: 0.05, compression: 0.0, decompression: 0.0 },
    };
    Architecture {
        levels: vec![
            level("RF", 16, 1, Technology::Sram),
            level("SRAM", 512, 4, Technology::Sram),
            level("DRAM", u64::MAX, 16, Technology::Dram),
        ],
        arithmetic: ArithmeticLevel { name: "MAC".into(), instances: 1, energy_per_op: 1.0 },
    }
}

#[test]
fn finds_a_valid_mapping_with_sane_cycle_and_energy_bounds() {
    let workload = workload();
    let arch = architecture();
    let mut map_space = MapSpace::new(&workload, &arch);

    let mut id = 0u64;
    let mut found = None;
    while map_space.next(&mut id) {
        if let Some((mapping, statuses)) = map_space.construct_mapping(id) {
            if statuses.iter().all(|s| s.success) {
                found = Some(mapping);
                break;
            }
        }
    }
    let mapping = found.expect("the factored map-space must contain at least one spatially-feasible mapping");

    let (layouts, _) = create_concordant_layout(&mapping, &workload, &arch);
    let stats = evaluate(&arch, &mapping, &layouts, &workload, None)
        .expect("a freshly-built concordant layout over RF/SRAM/DRAM must satisfy the buffer capacity constraint");

    let total_ops: u64 = workload.dimensions.iter().map(|d| u64::from(d.bound)).product();
    let max_spatial_fanout: u64 = arch
        .levels
        .iter()
        .map(|l| u64::from(l.instances) * u64::from(l.cluster_size.max(1)))
        .product();
    let min_cycles = (total_ops as f64 / max_spatial_fanout.max(1) as f64).ceil() as u64;
    assert!(
        stats.cycles >= min_cycles,
        "cycles {} must be at least {} (compute / max possible spatial fanout)",
        stats.cycles,
        min_cycles
    );

    let min_energy: f64 = arch.levels.iter().map(|l| l.energy.read).sum();
    assert!(
        stats.energy_pj >= min_energy,
        "energy {} must be at least the sum of per-level read energies {}",
        stats.energy_pj,
        min_energy
    );
    assert!(stats.utilization > 0.0 && stats.utilization <= 1.0);
}
