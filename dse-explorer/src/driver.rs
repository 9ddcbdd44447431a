//! Constructs the map-space, spawns one worker thread per partition, and
//! merges their results (spec §3 C10 Mapper, §5 Concurrency & Resource
//! Model).
//!
//! Grounded on `telamon-explorer`'s top-level `find_best`/`find_best_ex`
//! driving a pool of workers over `crossbeam`, generalized from Telamon's
//! bandit/MCTS tree search to this system's partitioned map-space sweep. The
//! single global mutex covering `best`, the log stream, and the terminal
//! status grid (spec §5 "Shared state") is realized as one `Mutex<Best>`
//! plus the independently-lockable `StatusGrid` (log lines go through the
//! `log` facade, which serializes internally).

use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use dse_core::layout::Layouts;
use dse_core::mapspace::MapSpace;
use dse_core::{Architecture, CryptoConfig, Workload};
use failure::Fail;
use log::info;

use crate::fail_stats::FailStats;
use crate::logger::StatusGrid;
use crate::thread::{Best, EvaluationResult, MapperThread, ThreadConfig};

/// Cold, fatal errors surfaced by the driver itself (I/O, serialization,
/// and channel failures during the search; spec §11 `DriverError`).
#[derive(Debug, Fail)]
pub enum DriverError {
    #[fail(display = "no valid mappings found within the configured search criteria")]
    NoValidMappings,
    #[fail(display = "failed to serialize search result: {}", _0)]
    Serialization(String),
}

/// The merged outcome of a full search (spec §3 `EvaluationResult` plus
/// aggregated diagnostics).
pub struct SearchOutcome {
    pub best: Option<EvaluationResult>,
    pub fail_stats: FailStats,
    pub total_mappings: u64,
    /// The terminal status grid's final rendering, one line per worker that
    /// reported at least once (spec §4.2 "Progress / statistics"); empty
    /// when `live_status` was never enabled on any worker.
    pub status_lines: Vec<String>,
}

/// Drives the whole search: partitions the map-space across `num_threads`
/// workers, runs them to completion, and merges thread-local bests and
/// failure statistics into one `SearchOutcome` (spec §4.2, §5).
pub struct Mapper<'a> {
    workload: &'a Workload,
    arch: &'a Architecture,
    crypto: Option<&'a CryptoConfig>,
    num_threads: usize,
    thread_config: ThreadConfig,
}

impl<'a> Mapper<'a> {
    pub fn new(
        workload: &'a Workload,
        arch: &'a Architecture,
        crypto: Option<&'a CryptoConfig>,
        num_threads: usize,
        thread_config: ThreadConfig,
    ) -> Self {
        Mapper {
            workload,
            arch,
            crypto,
            num_threads: num_threads.max(1),
            thread_config,
        }
    }

    /// Runs the search. `fixed_layout`, when present, skips the per-mapping
    /// layout search and evaluates every candidate against it directly
    /// (spec §4.2 step 5: "If a user layout was supplied").
    pub fn run(&self, fixed_layout: Option<&Layouts>) -> SearchOutcome {
        let map_space = MapSpace::new(self.workload, self.arch);
        let partitions = map_space.split(self.num_threads);
        info!("starting search across {} worker(s)", partitions.len());

        let terminate = AtomicBool::new(false);
        let global_best: Mutex<Best> = Mutex::new(Best::default());
        let status_grid = StatusGrid::new(partitions.len());

        let mut total_mappings = 0u64;
        let mut merged_fail_stats = FailStats::new();

        crossbeam::scope(|scope| {
            let mut handles = Vec::new();
            for (id, partition) in partitions.into_iter().enumerate() {
                let terminate = &terminate;
                let global_best = &global_best;
                let status_grid = &status_grid;
                let thread_config = self.thread_config.clone();
                let workload = self.workload;
                let arch = self.arch;
                let crypto = self.crypto;
                let fixed_layout = fixed_layout;
                handles.push(scope.spawn(move |_| {
                    let mut worker = MapperThread::new(id, partition, workload, arch, crypto, thread_config);
                    worker.run(terminate, global_best, Some(status_grid), fixed_layout);
                    (worker.total_mappings(), worker.fail_stats)
                }));
            }
            for handle in handles {
                if let Ok((mappings, fail_stats)) = handle.join() {
                    total_mappings += mappings;
                    merged_fail_stats.merge(&fail_stats);
                }
            }
        })
        .expect("worker thread panicked");

        let best = global_best.into_inner().unwrap().result;
        let status_lines = status_grid.render();
        SearchOutcome { best, fail_stats: merged_fail_stats, total_mappings, status_lines }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dse_core::shape::{Coefficient, DataSpace, Dimension, Rank};
    use dse_core::arch::{ArithmeticLevel, EnergyModel, StorageLevel, Technology};

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
        let level = |name: &str, tech: Technology| StorageLevel {
            name: name.into(),
            capacity: Some(4096),
            block_size: 4,
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
            levels: vec![level("RF", Technology::Sram), level("DRAM", Technology::Dram)],
            arithmetic: ArithmeticLevel { name: "MAC".into(), instances: 1, energy_per_op: 1.0 },
        }
    }

    fn thread_config() -> ThreadConfig {
        ThreadConfig {
            metrics: vec![crate::thread::Metric::Edp],
            search_size: 0,
            timeout: 50,
            victory_condition: 0,
            sync_interval: 4,
            max_temporal_loops_in_a_mapping: 0,
            penalize_consecutive_bypass_fails: true,
            live_status: false,
            log_stats: false,
            phase3_early_exit_threshold: 10,
            phase3_barely_better_epsilon: 0.1,
        }
    }

    #[test]
    fn search_finds_a_valid_mapping_for_a_trivial_workload() {
        let w = workload();
        let a = arch();
        let mapper = Mapper::new(&w, &a, None, 1, thread_config());
        let outcome = mapper.run(None);
        assert!(outcome.best.is_some());
    }
}
