//! `dse`: loads a configuration tree, runs the mapper, and prints the four
//! output artifacts of spec §6.
//!
//! Grounded on `telamon-cli/src/bin/tlcli.rs`'s `structopt` subcommand
//! binary shape, simplified to this system's single "search" entry point.

use std::path::PathBuf;
use std::process;

use log::{info, warn};
use structopt::StructOpt;

use dse_cli::{as_config_snippet, layout_yaml, pretty_print, serialize_record, CommonOpt};
use dse_explorer::driver::Mapper;
use dse_explorer::fail_stats::FailClass;
use dse_explorer::thread::{Metric, ThreadConfig};

#[derive(StructOpt)]
struct Opt {
    #[structopt(flatten)]
    common: CommonOpt,

    /// Writes the serialized engine+mapping record to this path instead of
    /// stdout (spec §6 output iii).
    #[structopt(long = "record-out", parse(from_os_str))]
    record_out: Option<PathBuf>,

    /// Writes the layout YAML to this path instead of stdout (spec §6
    /// output iv).
    #[structopt(long = "layout-out", parse(from_os_str))]
    layout_out: Option<PathBuf>,
}

/// Spec §7 "User-visible behavior": on global "no valid mappings", a
/// four-item troubleshooting message (termination reasons, constraint
/// suggestions, search-algorithm suggestions, enabling diagnostics).
fn print_no_valid_mappings(fail_stats: &dse_explorer::fail_stats::FailStats, total_mappings: u64) {
    println!("no valid mappings found within the configured search criteria");
    println!();

    println!("termination reasons:");
    println!("  - {} mapping(s) were attempted before every worker hit a termination condition (search-size, timeout, or victory-condition)", total_mappings);
    let mut classes: Vec<_> = fail_stats.iter().collect();
    classes.sort_by_key(|(&(class, level), _)| (format!("{:?}", class), level));
    for (&(class, level), record) in &classes {
        let label = match class {
            FailClass::Fanout => "mapping construction",
            FailClass::Capacity => "buffer capacity",
        };
        println!(
            "  - {} occurrence(s) of a {} failure at level {} (e.g. mapping {}: {})",
            record.count, label, level, record.sample_mapping_id, record.reason
        );
    }

    println!("constraint suggestions:");
    println!("  - relax `mapspace` dimension factor ranges or bypass constraints");
    println!("  - raise buffer capacities, or widen `block_size`, at the levels named above");

    println!("search-algorithm suggestions:");
    println!("  - raise `mapper.timeout` and `mapper.victory_condition` to search longer before giving up");
    println!("  - increase `mapper.num_threads` to cover more of the map-space per run");

    println!("enabling diagnostics:");
    println!("  - rerun with `RUST_LOG=debug` (or `trace`) to see per-candidate rejection reasons");
    println!("  - set `mapper.live_status = true` to watch per-worker progress while the search runs");
}

fn main() {
    env_logger::init();
    let opt = Opt::from_args();

    let config = match opt.common.config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            process::exit(1);
        }
    };

    let arch = match config.architecture() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            process::exit(1);
        }
    };
    let workload = match config.workload() {
        Ok(w) => w,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            process::exit(1);
        }
    };

    let fixed_layout = match config.fixed_layout(&workload, &arch) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            process::exit(1);
        }
    };
    // A user-supplied layout is evaluated against every candidate mapping
    // as-is (spec §4.2 step 5); an intraline product already exceeding the
    // architecture's block size here is the kind-5 hard invariant (spec §7)
    // rather than a per-candidate capacity miss, so it aborts the run with
    // a precise diagnostic instead of silently skipping candidates.
    if let Some(layouts) = &fixed_layout {
        if let Err(e) = dse_core::layout::check_buffer_capacity_constraint(layouts, &arch) {
            eprintln!("user-supplied layout is infeasible: {}", e);
            process::exit(1);
        }
    }

    let metrics: Vec<Metric> = config
        .mapper
        .optimization_metrics
        .iter()
        .filter_map(|name| match Metric::parse(name) {
            Some(m) => Some(m),
            None => {
                warn!("unsupported optimization metric `{}`, ignoring", name);
                None
            }
        })
        .collect();
    let metrics = if metrics.is_empty() { vec![Metric::Edp] } else { metrics };

    let thread_config = ThreadConfig {
        metrics,
        search_size: config.mapper.search_size,
        timeout: config.mapper.timeout,
        victory_condition: config.mapper.victory_condition,
        sync_interval: config.mapper.sync_interval.max(1),
        max_temporal_loops_in_a_mapping: config.mapper.max_temporal_loops_in_a_mapping,
        penalize_consecutive_bypass_fails: config.mapper.penalize_consecutive_bypass_fails,
        live_status: config.mapper.live_status,
        log_stats: config.mapper.log_stats,
        phase3_early_exit_threshold: config.mapper.phase3_early_exit_threshold,
        phase3_barely_better_epsilon: config.mapper.phase3_barely_better_epsilon,
    };

    let num_threads = config.mapper.num_threads.unwrap_or_else(|| {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    });
    let crypto = config.crypto.as_ref();
    let mapper = Mapper::new(&workload, &arch, crypto, num_threads, thread_config);

    info!("running search over {} storage level(s)", arch.num_levels());
    let outcome = mapper.run(fixed_layout.as_ref());

    if config.mapper.live_status {
        for line in &outcome.status_lines {
            println!("{}", line);
        }
    }

    for (&(class, level), record) in outcome.fail_stats.iter() {
        warn!(
            "{:?} failure at level {}: {} occurrence(s), e.g. mapping {} ({})",
            class, level, record.count, record.sample_mapping_id, record.reason
        );
    }

    let best = match outcome.best {
        Some(b) => b,
        None => {
            print_no_valid_mappings(&outcome.fail_stats, outcome.total_mappings);
            process::exit(0);
        }
    };

    println!("{}", pretty_print(&best, &workload, &arch));
    println!("{}", as_config_snippet(&best.layouts, &arch));

    let record = match serialize_record(&best) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to serialize search result: {}", e);
            process::exit(1);
        }
    };
    match opt.record_out {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &record) {
                eprintln!("failed to write record to {}: {}", path.display(), e);
                process::exit(1);
            }
        }
        None => println!("{}", record),
    }

    let yaml = layout_yaml(&best.layouts, &arch);
    match opt.layout_out {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &yaml) {
                eprintln!("failed to write layout to {}: {}", path.display(), e);
                process::exit(1);
            }
        }
        None => println!("{}", yaml),
    }
}
