//! Covers spec §8 "Concrete scenarios" item 4 / invariant 8: when two
//! consecutive mappings differ only in their datatype-bypass bits and both
//! fail the buffer capacity check, `penalize_consecutive_bypass_fails =
//! false` must count that run of failures once, not once per mapping.
//!
//! The workload below has zero dimensions, so the map-space's only
//! non-trivial sub-dimension is datatype bypass: every mapping has an
//! identical (empty) loop nest and therefore an identical concordant
//! layout, which is made to always violate the level's tiny capacity. Any
//! two consecutive composite ids are then guaranteed to be "bypass-only"
//! neighbors (`MapSpace::only_bypass_differs`).

use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use dse_core::arch::{ArithmeticLevel, EnergyModel, StorageLevel, Technology};
use dse_core::shape::DataSpace;
use dse_core::{Architecture, MapSpace, Workload};
use dse_explorer::thread::{Best, MapperThread, Metric, ThreadConfig};

fn workload() -> Workload {
    let data_spaces = vec![
        DataSpace { name: "A".into(), order: 1, ranks: vec![], read_write: false },
        DataSpace { name: "B".into(), order: 1, ranks: vec![], read_write: true },
    ];
    Workload::new(vec![], data_spaces)
}

fn architecture() -> Architecture {
    let level = StorageLevel {
        name: "RF".into(),
        capacity: Some(1),
        block_size: 16,
        cluster_size: 1,
        instances: 1,
        read_bandwidth: Some(16.0),
        write_bandwidth: Some(16.0),
        shared_bandwidth: None,
        num_ports: 1,
        num_banks: 1,
        technology: Technology::Sram,
        word_bits: 16,
        energy: EnergyModel::default(),
    };
    Architecture {
        levels: vec![level],
        arithmetic: ArithmeticLevel { name: "MAC".into(), instances: 1, energy_per_op: 1.0 },
    }
}

fn thread_config(penalize_consecutive_bypass_fails: bool) -> ThreadConfig {
    ThreadConfig {
        metrics: vec![Metric::Edp],
        search_size: 0,
        timeout: 1_000,
        victory_condition: 0,
        sync_interval: 1_000,
        max_temporal_loops_in_a_mapping: 0,
        penalize_consecutive_bypass_fails,
        live_status: false,
        log_stats: false,
        phase3_early_exit_threshold: 10,
        phase3_barely_better_epsilon: 0.1,
    }
}

fn run_to_completion(penalize_consecutive_bypass_fails: bool) -> u64 {
    let workload = workload();
    let arch = architecture();
    let map_space = MapSpace::new(&workload, &arch);
    assert_eq!(map_space.size(), 4, "zero dimensions + two data spaces must yield exactly 4 bypass combinations");

    let mut worker = MapperThread::new(0, map_space, &workload, &arch, None, thread_config(penalize_consecutive_bypass_fails));
    let terminate = AtomicBool::new(false);
    let global_best: Mutex<Best> = Mutex::new(Best::default());
    worker.run(&terminate, &global_best, None, None);

    assert_eq!(worker.total_mappings(), 4);
    worker.invalid_eval()
}

#[test]
fn consecutive_bypass_only_failures_count_once_when_not_penalized() {
    assert_eq!(run_to_completion(false), 1);
}

#[test]
fn every_failure_counts_when_penalized() {
    assert_eq!(run_to_completion(true), 4);
}
