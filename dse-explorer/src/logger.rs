//! Terminal status grid and best-update logging (spec §4.2 "Progress /
//! statistics", SPEC_FULL §10).
//!
//! The `live_status` line is explicit terminal-rendering state, not a `log`
//! record — mirroring how the teacher's `MonitorMessage`/terminal status
//! differs from its `log::{info,debug}` calls (`telamon-explorer/src/lib.rs`,
//! `src/explorer/logger.rs`). `dse-cli` owns actually drawing the grid;
//! this module only owns the shared buffer threads write into.

use std::sync::Mutex;

use log::info;

/// One worker's periodic one-line status (spec §4.2: "total, invalid, valid,
/// consec., last-improvement, opt-utilization, opt-energy, opt-cycles").
#[derive(Debug, Clone, Default)]
pub struct ThreadStatus {
    pub total_mappings: u64,
    pub invalid_mapcnstr: u64,
    pub invalid_eval: u64,
    pub valid_mappings: u64,
    pub mappings_since_last_best_update: u64,
    pub best_utilization: f64,
    pub best_energy_pj: f64,
    pub best_cycles: u64,
}

impl ThreadStatus {
    pub fn render(&self, thread_id: usize) -> String {
        format!(
            "[worker {}] total={} invalid_mapcnstr={} invalid_eval={} valid={} consec={} util={:.3} energy={:.2}pJ cycles={}",
            thread_id,
            self.total_mappings,
            self.invalid_mapcnstr,
            self.invalid_eval,
            self.valid_mappings,
            self.mappings_since_last_best_update,
            self.best_utilization,
            self.best_energy_pj,
            self.best_cycles
        )
    }
}

/// A terminal status grid shared by every worker, one row per thread id.
#[derive(Default)]
pub struct StatusGrid {
    rows: Mutex<Vec<Option<ThreadStatus>>>,
}

impl StatusGrid {
    pub fn new(num_threads: usize) -> Self {
        StatusGrid {
            rows: Mutex::new(vec![None; num_threads]),
        }
    }

    pub fn update(&self, thread_id: usize, status: ThreadStatus) {
        let mut rows = self.rows.lock().unwrap();
        if thread_id < rows.len() {
            rows[thread_id] = Some(status);
        }
    }

    /// Renders every populated row, in thread-id order, for the CLI to print.
    pub fn render(&self) -> Vec<String> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter_map(|(id, status)| status.as_ref().map(|s| s.render(id)))
            .collect()
    }
}

/// Logs a best-update event at the relative improvement over the previous
/// metric value, when `log_stats` is enabled (spec §4.2).
pub fn log_best_update(thread_id: usize, previous_metric: f64, new_metric: f64) {
    let improvement = if previous_metric.is_finite() && previous_metric != 0.0 {
        (previous_metric - new_metric) / previous_metric.abs()
    } else {
        1.0
    };
    info!(
        "worker {} improved best: {:.6} -> {:.6} ({:+.2}%)",
        thread_id,
        previous_metric,
        new_metric,
        improvement * 100.0
    );
}
