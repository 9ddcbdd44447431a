//! One worker's search loop over its map-space partition, plus the
//! post-loop three-phase layout search (spec §4.2 C9 Mapper Thread).
//!
//! Grounded on `MapperThread::Run` in
//! `examples/original_source/include/applications/mapper/mapper-thread.hpp`:
//! a per-iteration pipeline (construct mapping, pre-check, evaluate, update
//! best, periodically sync) bounded by the same five termination conditions,
//! followed by a splitting/packing/auth layout sweep once the loop exits.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dse_core::error::Status;
use dse_core::layout::{self, Layouts};
use dse_core::layoutspace::Legal;
use dse_core::mapping::Mapping;
use dse_core::mapspace::MapSpace;
use dse_core::model::topology::{self, Stats};
use dse_core::{Architecture, CryptoConfig, Workload};

use crate::fail_stats::{FailClass, FailStats};
use crate::logger::{log_best_update, StatusGrid, ThreadStatus};

/// The metrics the search can lexicographically order on (spec §6
/// `mapper.optimization_metric(s)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Delay,
    Energy,
    Edp,
}

impl Metric {
    pub fn parse(name: &str) -> Option<Metric> {
        match name {
            "delay" => Some(Metric::Delay),
            "energy" => Some(Metric::Energy),
            "edp" => Some(Metric::Edp),
            _ => None,
        }
    }

    fn value(self, stats: &Stats) -> f64 {
        match self {
            Metric::Delay => stats.cycles as f64,
            Metric::Energy => stats.energy_pj,
            Metric::Edp => stats.cycles as f64 * stats.energy_pj,
        }
    }
}

/// `(valid, mapping, stats, layouts)` (spec §3 `EvaluationResult`).
#[derive(Clone)]
pub struct EvaluationResult {
    pub mapping: Mapping,
    pub stats: Stats,
    pub layouts: Layouts,
}

fn compare(a: &Stats, b: &Stats, metrics: &[Metric]) -> Ordering {
    for &m in metrics {
        match m.value(a).partial_cmp(&m.value(b)).unwrap_or(Ordering::Equal) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// The shared global best, updated only at sync points (spec §5 "Shared
/// state").
#[derive(Default)]
pub struct Best {
    pub result: Option<EvaluationResult>,
}

impl Best {
    /// Replaces the held result if `candidate` is strictly better under the
    /// metric tuple; never regresses (spec §8 invariant 7).
    pub fn update_if_better(&mut self, candidate: EvaluationResult, metrics: &[Metric]) -> bool {
        let better = match &self.result {
            None => true,
            Some(current) => compare(&candidate.stats, &current.stats, metrics) == Ordering::Less,
        };
        if better {
            self.result = Some(candidate);
        }
        better
    }
}

/// Tunables threaded from `dse_core::config::MapperConfig` into the worker
/// loop (spec §6 `mapper`).
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    pub metrics: Vec<Metric>,
    pub search_size: u64,
    pub timeout: u64,
    pub victory_condition: u64,
    pub sync_interval: u64,
    pub max_temporal_loops_in_a_mapping: usize,
    pub penalize_consecutive_bypass_fails: bool,
    pub live_status: bool,
    pub log_stats: bool,
    pub phase3_early_exit_threshold: u32,
    pub phase3_barely_better_epsilon: f64,
}

pub struct MapperThread<'a> {
    pub id: usize,
    map_space: MapSpace<'a>,
    workload: &'a Workload,
    arch: &'a Architecture,
    crypto: Option<&'a CryptoConfig>,
    config: ThreadConfig,
    rng: StdRng,
    pub fail_stats: FailStats,
    thread_best: Best,
    total_mappings: u64,
    invalid_mapcnstr: u64,
    invalid_eval: u64,
    valid_mappings: u64,
    mappings_since_last_best_update: u64,
    prev_id: Option<u64>,
}

impl<'a> MapperThread<'a> {
    pub fn new(
        id: usize,
        map_space: MapSpace<'a>,
        workload: &'a Workload,
        arch: &'a Architecture,
        crypto: Option<&'a CryptoConfig>,
        config: ThreadConfig,
    ) -> Self {
        MapperThread {
            id,
            map_space,
            workload,
            arch,
            crypto,
            config,
            rng: StdRng::seed_from_u64(id as u64),
            fail_stats: FailStats::new(),
            thread_best: Best::default(),
            total_mappings: 0,
            invalid_mapcnstr: 0,
            invalid_eval: 0,
            valid_mappings: 0,
            mappings_since_last_best_update: 0,
            prev_id: None,
        }
    }

    pub fn total_mappings(&self) -> u64 {
        self.total_mappings
    }

    /// Count of post-construction evaluation failures (spec §7 kind 3; §8
    /// invariant 8 governs how consecutive bypass-only failures count here).
    pub fn invalid_eval(&self) -> u64 {
        self.invalid_eval
    }

    fn termination_reached(&mut self, terminate: &AtomicBool) -> bool {
        if terminate.load(AtomicOrdering::Relaxed) {
            return true;
        }
        if self.config.search_size > 0 && self.valid_mappings >= self.config.search_size {
            return true;
        }
        if self.config.victory_condition > 0
            && self.mappings_since_last_best_update >= self.config.victory_condition
        {
            return true;
        }
        if self.invalid_mapcnstr + self.invalid_eval >= self.config.timeout {
            return true;
        }
        false
    }

    /// Runs the search loop until one of the five termination conditions
    /// fires, then (unless a layout was pinned) the three-phase layout
    /// search (spec §4.2).
    pub fn run(
        &mut self,
        terminate: &AtomicBool,
        global_best: &Mutex<Best>,
        status_grid: Option<&StatusGrid>,
        fixed_layout: Option<&Layouts>,
    ) {
        let mut id = 0u64;
        while !self.termination_reached(terminate) {
            if !self.map_space.next(&mut id) {
                break;
            }
            self.total_mappings += 1;

            let only_bypass_differs = self
                .prev_id
                .map(|prev| self.map_space.only_bypass_differs(prev, id))
                .unwrap_or(false);
            self.prev_id = Some(id);

            let (mapping, statuses) = match self.map_space.construct_mapping(id) {
                Some(v) => v,
                None => {
                    self.invalid_mapcnstr += 1;
                    self.fail_stats
                        .record(&mut self.rng, FailClass::Fanout, 0, id, "id out of range");
                    trace!("worker {}: mapping construction failure for id {}", self.id, id);
                    continue;
                }
            };
            if let Some((level, status)) = first_failure(&statuses) {
                self.invalid_mapcnstr += 1;
                self.fail_stats
                    .record(&mut self.rng, FailClass::Fanout, level, id, status.reason);
                trace!("worker {}: MappingConstructionFailure at level {}: {}", self.id, level, status.reason);
                continue;
            }

            if self.config.max_temporal_loops_in_a_mapping > 0
                && mapping.temporal_loop_count() > self.config.max_temporal_loops_in_a_mapping
            {
                self.invalid_mapcnstr += 1;
                continue;
            }

            let layouts = match fixed_layout {
                Some(l) => l.clone(),
                None => layout::create_concordant_layout(&mapping, self.workload, self.arch).0,
            };
            if let Err(e) = layout::check_buffer_capacity_constraint(&layouts, self.arch) {
                let suppress = only_bypass_differs && !self.config.penalize_consecutive_bypass_fails;
                if !suppress {
                    self.invalid_eval += 1;
                }
                self.fail_stats
                    .record(&mut self.rng, FailClass::Capacity, 0, id, &e.to_string());
                continue;
            }

            // Cheap per-candidate evaluation (spec §4.2 Phase 1(+2)): score
            // the concordant layout with dummy authblock factors, deferring
            // the expensive splitting/packing/auth layout search to a single
            // post-loop pass on the winning mapping.
            let mut candidate_layouts = layouts.clone();
            if fixed_layout.is_none() {
                Legal::install_dummy_authblock(&mut candidate_layouts, self.arch);
            }
            let evaluated = topology::evaluate(self.arch, &mapping, &candidate_layouts, self.workload, self.crypto)
                .map(|stats| (stats, candidate_layouts));

            let (stats, layouts) = match evaluated {
                Ok(v) => v,
                Err(_) => {
                    self.invalid_eval += 1;
                    continue;
                }
            };

            self.valid_mappings += 1;
            let candidate = EvaluationResult { mapping, stats, layouts };
            let previous_metric = self
                .thread_best
                .result
                .as_ref()
                .map(|r| self.config.metrics.first().map_or(0.0, |m| m.value(&r.stats)))
                .unwrap_or(f64::INFINITY);
            if self.thread_best.update_if_better(candidate, &self.config.metrics) {
                self.mappings_since_last_best_update = 0;
                if self.config.log_stats {
                    let new_metric = self
                        .config
                        .metrics
                        .first()
                        .map_or(0.0, |m| m.value(&self.thread_best.result.as_ref().unwrap().stats));
                    log_best_update(self.id, previous_metric, new_metric);
                }
            } else {
                self.mappings_since_last_best_update += 1;
            }

            if self.total_mappings % self.config.sync_interval.max(1) == 0 {
                self.sync_with_global(global_best);
            }
            if self.config.live_status {
                if let Some(grid) = status_grid {
                    grid.update(self.id, self.status());
                }
            }
        }

        debug!("worker {} exiting main loop after {} mappings", self.id, self.total_mappings);

        if fixed_layout.is_none() {
            self.run_final_layout_search();
        }
        self.sync_with_global(global_best);
    }

    /// One-time Phase 1+2+3 layout search (spec §4.2 "Final layout search"),
    /// run once after the main loop exits, only on the thread's winning
    /// mapping rather than on every candidate.
    fn run_final_layout_search(&mut self) {
        let winner = match self.thread_best.result.clone() {
            Some(r) => r,
            None => return,
        };
        let (concordant, _) = layout::create_concordant_layout(&winner.mapping, self.workload, self.arch);
        if let Ok((stats, refined)) = self.search_layout(&winner.mapping, &concordant) {
            if is_strictly_better(&stats, &winner.stats) {
                self.thread_best.result = Some(EvaluationResult { mapping: winner.mapping, stats, layouts: refined });
            }
        }
    }

    fn status(&self) -> ThreadStatus {
        let best = &self.thread_best.result;
        ThreadStatus {
            total_mappings: self.total_mappings,
            invalid_mapcnstr: self.invalid_mapcnstr,
            invalid_eval: self.invalid_eval,
            valid_mappings: self.valid_mappings,
            mappings_since_last_best_update: self.mappings_since_last_best_update,
            best_utilization: best.as_ref().map_or(0.0, |r| r.stats.utilization),
            best_energy_pj: best.as_ref().map_or(0.0, |r| r.stats.energy_pj),
            best_cycles: best.as_ref().map_or(0, |r| r.stats.cycles),
        }
    }

    /// Pulls from, then pushes to, the shared global best (spec §5
    /// "Ordering": "a worker pulls best -> thread_best first, then pushes
    /// thread_best -> best if the global best did not improve it").
    fn sync_with_global(&mut self, global_best: &Mutex<Best>) {
        let mut global = global_best.lock().unwrap();
        if let (Some(g), Some(t)) = (&global.result, &self.thread_best.result) {
            if compare(&g.stats, &t.stats, &self.config.metrics) == Ordering::Less {
                self.thread_best.result = Some(g.clone());
                return;
            }
        }
        if let Some(candidate) = self.thread_best.result.clone() {
            global.update_if_better(candidate, &self.config.metrics);
        }
    }

    /// No-user-layout path: Phase 1 (splitting), Phase 2 (packing), Phase 3
    /// (auth) against the concordant layout's legal space (spec §4.2 "Final
    /// layout search"), run once on the thread's winning mapping after the
    /// main loop exits.
    fn search_layout(&mut self, mapping: &Mapping, concordant: &Layouts) -> Result<(Stats, Layouts), dse_core::LayoutError> {
        let (_, state) = layout::create_concordant_layout(mapping, self.workload, self.arch);
        let legal = Legal::create_space(concordant, &state, self.arch);

        let mut best_layout = concordant.clone();
        let mut best_stats = topology::evaluate(self.arch, mapping, &best_layout, self.workload, self.crypto)?;

        let mut best_splitting = 0u64;
        for splitting_id in 0..legal.splitting_candidates().max(1) {
            let mut candidate = legal.construct_layout(concordant, splitting_id, 0, 0)?;
            candidate.clear_authblock();
            if let Ok(stats) = topology::evaluate(self.arch, mapping, &candidate, self.workload, self.crypto) {
                if is_strictly_better(&stats, &best_stats) {
                    best_stats = stats;
                    best_layout = candidate;
                    best_splitting = splitting_id;
                }
            }
        }

        let mut best_packing = 0u64;
        for packing_id in 0..legal.packing_candidates().max(1) {
            let mut candidate = legal.construct_layout(concordant, best_splitting, 0, packing_id)?;
            candidate.clear_authblock();
            if let Ok(stats) = topology::evaluate(self.arch, mapping, &candidate, self.workload, self.crypto) {
                if is_strictly_better(&stats, &best_stats) {
                    best_stats = stats;
                    best_layout = candidate;
                    best_packing = packing_id;
                }
            }
        }

        let auth_candidates = legal.authblock_candidates();
        if auth_candidates > 1 {
            let mut consecutive_barely_better = 0u32;
            let mut phase3_best_energy = f64::INFINITY;
            for _ in 0..auth_candidates.min(256) {
                let auth_id = self.rng.gen_range(0, auth_candidates);
                if let Ok(candidate) = legal.construct_layout(concordant, best_splitting, auth_id, best_packing) {
                    if let Ok(stats) = topology::evaluate(self.arch, mapping, &candidate, self.workload, self.crypto) {
                        if is_strictly_better(&stats, &best_stats) {
                            let delta = phase3_best_energy - stats.energy_pj;
                            best_stats = stats.clone();
                            best_layout = candidate;
                            if delta.abs() < self.config.phase3_barely_better_epsilon {
                                consecutive_barely_better += 1;
                                if consecutive_barely_better >= self.config.phase3_early_exit_threshold {
                                    break;
                                }
                            } else {
                                consecutive_barely_better = 0;
                            }
                            phase3_best_energy = stats.energy_pj;
                        }
                    }
                }
            }
        }

        Ok((best_stats, best_layout))
    }
}

fn is_strictly_better(candidate: &Stats, current: &Stats) -> bool {
    candidate.cycles < current.cycles
        || (candidate.cycles == current.cycles && candidate.energy_pj < current.energy_pj)
}

fn first_failure(statuses: &[Status]) -> Option<(usize, Status)> {
    statuses.iter().enumerate().find(|(_, s)| !s.success).map(|(i, s)| (i, *s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(cycles: u64, energy: f64) -> Stats {
        Stats { cycles, energy_pj: energy, utilization: 1.0, per_level: Vec::new() }
    }

    #[test]
    fn update_if_better_never_regresses() {
        let mut best = Best::default();
        let metrics = vec![Metric::Edp];
        let a = EvaluationResult {
            mapping: Mapping::default(),
            stats: stats(100, 10.0),
            layouts: Layouts { levels: Vec::new() },
        };
        assert!(best.update_if_better(a, &metrics));
        let worse = EvaluationResult {
            mapping: Mapping::default(),
            stats: stats(200, 20.0),
            layouts: Layouts { levels: Vec::new() },
        };
        assert!(!best.update_if_better(worse, &metrics));
        assert_eq!(best.result.as_ref().unwrap().stats.cycles, 100);
    }
}
