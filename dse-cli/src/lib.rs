//! Shared CLI plumbing: argument parsing, config-file loading with CLI
//! overrides, and the four output-artifact formatters (spec §6 "Outputs").
//!
//! Grounded on `telamon-cli/src/lib.rs`'s `CommonOpt`/`Config::from_path`
//! (structopt + TOML, `config.timeout = config.timeout.or(self.timeout)`
//! style CLI-over-file merging).

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use structopt::StructOpt;

use dse_core::arch::Architecture;
use dse_core::config::Config;
use dse_core::layout::Layouts;
use dse_core::mapping::SpaceTime;
use dse_core::shape::Workload;
use dse_explorer::thread::EvaluationResult;

#[derive(StructOpt, Debug)]
pub struct CommonOpt {
    /// Path to the configuration file to use.
    ///
    /// Configuration file must be in TOML format.
    #[structopt(parse(from_os_str), long = "config")]
    pub config_path: PathBuf,

    /// Overrides `mapper.timeout` (max invalid attempts before giving up).
    #[structopt(long = "timeout")]
    pub timeout: Option<u64>,

    /// Overrides `mapper.num_threads`.
    #[structopt(long = "num-threads")]
    pub num_threads: Option<usize>,
}

impl CommonOpt {
    pub fn config(&self) -> io::Result<Config> {
        let text = fs::read_to_string(&self.config_path)?;
        let mut config: Config =
            toml::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if let Some(timeout) = self.timeout {
            config.mapper.timeout = timeout;
        }
        if let Some(num_threads) = self.num_threads {
            config.mapper.num_threads = Some(num_threads);
        }
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        Ok(config)
    }
}

/// (i) Human-readable best-mapping pretty print (spec §6 output i): the
/// one-line summary `utilization | pJ/compute | cycles` (spec §7
/// "User-visible behavior"), followed by the per-level loop nest. The
/// bracketed `pJ/algorithmic-compute` field is omitted: this engine does not
/// distinguish algorithmic op count from ideal compute-op count (spec §9
/// open question), so there is nothing for it to report that `pJ/compute`
/// doesn't already show.
pub fn pretty_print(result: &EvaluationResult, workload: &Workload, arch: &Architecture) -> String {
    let ideal_compute_cycles: u64 = workload.dimensions.iter().map(|d| u64::from(d.bound)).product();
    let pj_per_compute = result.stats.energy_per_compute(ideal_compute_cycles);
    let mut out = String::new();
    out.push_str(&format!(
        "{:.3} | {:.4} | {}\n",
        result.stats.utilization, pj_per_compute, result.stats.cycles
    ));
    for level in 0..arch.num_levels() {
        let level_spec = &arch.levels[level];
        out.push_str(&format!("  [{}]\n", level_spec.name));
        for l in result.mapping.loop_nest.level_loops(level) {
            let dim_name = workload
                .dimensions
                .get(l.dim)
                .map(|d| d.name.as_str())
                .unwrap_or("?");
            let kind = match l.spacetime {
                SpaceTime::Temporal => "for",
                SpaceTime::SpatialX => "parallel-x",
                SpaceTime::SpatialY => "parallel-y",
            };
            out.push_str(&format!(
                "    {} {} in [{}, {}) stride {}\n",
                kind, dim_name, l.start, l.end, l.stride
            ));
        }
        for (ds_idx, ds) in workload.data_spaces.iter().enumerate() {
            let kept = result.mapping.is_kept(ds_idx, level);
            out.push_str(&format!("    {}: {}\n", ds.name, if kept { "keep" } else { "bypass" }));
        }
    }
    out
}

/// (ii) the best mapping formatted as a replayable configuration snippet
/// (spec §6 output ii): one `[[layout]]` TOML entry per (level, data space,
/// kind), in the same `target`/`type`/`factors`/`permutation` shape the
/// `layout` configuration key accepts.
pub fn as_config_snippet(layouts: &Layouts, arch: &Architecture) -> String {
    let mut out = String::new();
    for layout in &layouts.levels {
        let target = &arch.levels[layout.level].name;
        for nest in &layout.nests {
            for (kind, n) in [("interline", &nest.interline), ("intraline", &nest.intraline)] {
                let factors: Vec<String> =
                    n.ranks.iter().map(|r| format!("{}={}", r, n.factor(r))).collect();
                let permutation: String = n.ranks.iter().filter_map(|r| r.chars().next()).collect();
                out.push_str(&format!(
                    "[[layout]]\ntarget = \"{}\"\ntype = \"{}\"\nfactors = \"{}\"\npermutation = \"{}\"\n\n",
                    target,
                    kind,
                    factors.join(" "),
                    permutation
                ));
            }
        }
    }
    out
}

/// A flattened, serializable snapshot of one search result (spec §6 output
/// iii: "serialized engine+mapping record, implementation-defined format").
/// Deliberately a standalone struct rather than `#[derive(Serialize)]` on
/// the domain types themselves, so `dse-core`/`dse-explorer` stay free of
/// presentation concerns.
#[derive(Debug, Serialize)]
pub struct Record {
    pub cycles: u64,
    pub energy_pj: f64,
    pub utilization: f64,
    pub per_level_slowdown: Vec<f64>,
    pub per_level_access_correction_ratio: Vec<f64>,
    pub loops: Vec<LoopRecord>,
    pub bypass: Vec<Vec<bool>>,
}

#[derive(Debug, Serialize)]
pub struct LoopRecord {
    pub dim: usize,
    pub start: u32,
    pub end: u32,
    pub stride: u32,
    pub spacetime: String,
}

impl Record {
    pub fn from_result(result: &EvaluationResult) -> Record {
        Record {
            cycles: result.stats.cycles,
            energy_pj: result.stats.energy_pj,
            utilization: result.stats.utilization,
            per_level_slowdown: result.stats.per_level.iter().map(|l| l.slowdown).collect(),
            per_level_access_correction_ratio: result
                .stats
                .per_level
                .iter()
                .map(|l| l.access_correction_ratio)
                .collect(),
            loops: result
                .mapping
                .loop_nest
                .loops
                .iter()
                .map(|l| LoopRecord {
                    dim: l.dim,
                    start: l.start,
                    end: l.end,
                    stride: l.stride,
                    spacetime: format!("{:?}", l.spacetime),
                })
                .collect(),
            bypass: result.mapping.datatype_bypass_nest.clone(),
        }
    }
}

pub fn serialize_record(result: &EvaluationResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&Record::from_result(result))
}

#[derive(Debug, Serialize)]
struct LayoutYamlEntry {
    target: String,
    data_space: String,
    interline: std::collections::BTreeMap<String, u32>,
    intraline: std::collections::BTreeMap<String, u32>,
    authblock: std::collections::BTreeMap<String, u32>,
}

#[derive(Debug, Serialize)]
struct LayoutYaml {
    layout: Vec<LayoutYamlEntry>,
}

/// (iv) a layout YAML with the final `(splitting, packing, auth)` selection
/// (spec §6 output iv).
pub fn layout_yaml(layouts: &Layouts, arch: &Architecture) -> String {
    let nest_map = |n: &dse_core::layout::Nest| n.ranks.iter().map(|r| (r.clone(), n.factor(r))).collect();
    let entries = layouts
        .levels
        .iter()
        .flat_map(|layout| {
            let target = arch.levels[layout.level].name.clone();
            layout.data_spaces.iter().zip(&layout.nests).map(move |(ds, nest)| LayoutYamlEntry {
                target: target.clone(),
                data_space: ds.clone(),
                interline: nest_map(&nest.interline),
                intraline: nest_map(&nest.intraline),
                authblock: nest_map(&nest.authblock_lines),
            })
        })
        .collect();
    serde_yaml::to_string(&LayoutYaml { layout: entries }).unwrap_or_default()
}
