//! The configuration tree (spec §6 "External Interfaces" / SPEC_FULL §12).
//!
//! Grounded on `telamon-cli/src/lib.rs`'s `Config::from_path` (TOML via
//! `serde`, CLI overrides merged after parsing) generalized from Telamon's
//! single `[mapper]`-shaped struct to the full `architecture`/`problem`/
//! `mapspace`/`mapper`/`sparse_optimizations`/`ERT`/`ART`/`crypto`/`layout`
//! tree named by this system's spec. Unrecognized keys are ignored (serde's
//! default struct behavior); conflicting or legacy keys are caught in
//! [`Config::validate`], not by serde itself, matching the teacher's
//! pattern of deserializing permissively and validating afterward.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::arch::{ArithmeticLevel, Architecture, EnergyModel, StorageLevel, Technology};
use crate::crypto::CryptoConfig;
use crate::error::ConfigError;
use crate::layout::{self, Layouts};
use crate::shape::{Coefficient, DataSpace, Dimension, Rank, Workload};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageLevelConfig {
    pub name: String,
    pub capacity: Option<u64>,
    pub block_size: u32,
    pub cluster_size: u32,
    pub instances: u32,
    pub read_bandwidth: Option<f64>,
    pub write_bandwidth: Option<f64>,
    pub shared_bandwidth: Option<f64>,
    pub num_ports: u32,
    pub num_banks: u32,
    pub technology: String,
    pub word_bits: u32,
}

impl Default for StorageLevelConfig {
    fn default() -> Self {
        StorageLevelConfig {
            name: String::new(),
            capacity: None,
            block_size: 1,
            cluster_size: 1,
            instances: 1,
            read_bandwidth: None,
            write_bandwidth: None,
            shared_bandwidth: None,
            num_ports: 1,
            num_banks: 1,
            technology: "SRAM".into(),
            word_bits: 8,
        }
    }
}

impl StorageLevelConfig {
    fn into_storage_level(self) -> StorageLevel {
        let technology = if self.technology.eq_ignore_ascii_case("dram") {
            Technology::Dram
        } else {
            Technology::Sram
        };
        StorageLevel {
            name: self.name,
            capacity: self.capacity,
            block_size: self.block_size.max(1),
            cluster_size: self.cluster_size.max(1),
            instances: self.instances.max(1),
            read_bandwidth: self.read_bandwidth,
            write_bandwidth: self.write_bandwidth,
            shared_bandwidth: self.shared_bandwidth,
            num_ports: self.num_ports.max(1),
            num_banks: self.num_banks.max(1),
            technology,
            word_bits: self.word_bits.max(1),
            energy: EnergyModel::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ArithmeticLevelConfig {
    pub name: String,
    pub instances: u32,
    pub energy_per_op: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ArchitectureConfig {
    pub levels: Vec<StorageLevelConfig>,
    pub arithmetic: ArithmeticLevelConfig,
    /// Legacy key; presence alone is a hard configuration error (spec §6).
    pub nodes: Option<toml::Value>,
}

impl ArchitectureConfig {
    fn into_architecture(self) -> Result<Architecture, ConfigError> {
        if self.nodes.is_some() {
            return Err(ConfigError::LegacyNodesKey);
        }
        Ok(Architecture {
            levels: self.levels.into_iter().map(StorageLevelConfig::into_storage_level).collect(),
            arithmetic: ArithmeticLevel {
                name: self.arithmetic.name,
                instances: self.arithmetic.instances.max(1),
                energy_per_op: self.arithmetic.energy_per_op,
            },
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DimensionConfig {
    pub name: String,
    pub bound: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RankConfig {
    pub name: String,
    /// `(dimension name, coefficient)` pairs, in declaration order.
    pub terms: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DataSpaceConfig {
    pub name: String,
    pub order: usize,
    pub ranks: Vec<RankConfig>,
    pub read_write: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProblemConfig {
    pub dimensions: Vec<DimensionConfig>,
    pub data_spaces: Vec<DataSpaceConfig>,
}

impl ProblemConfig {
    fn into_workload(self) -> Result<Workload, ConfigError> {
        let name_index: HashMap<String, usize> = self
            .dimensions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        let dimensions = self
            .dimensions
            .into_iter()
            .map(|d| Dimension { name: d.name, bound: d.bound })
            .collect();

        let mut data_spaces = Vec::with_capacity(self.data_spaces.len());
        for ds in self.data_spaces {
            let mut ranks = Vec::with_capacity(ds.ranks.len());
            for rank in ds.ranks {
                let mut terms = Vec::with_capacity(rank.terms.len());
                for (dim_name, coeff) in rank.terms {
                    let dim_id = name_index
                        .get(&dim_name)
                        .copied()
                        .ok_or_else(|| ConfigError::UnknownDimension(rank.name.clone(), dim_name.clone()))?;
                    terms.push((dim_id, Coefficient { value: coeff.max(1) }));
                }
                ranks.push(Rank { name: rank.name, terms });
            }
            data_spaces.push(DataSpace {
                name: ds.name,
                order: ds.order.max(1),
                ranks,
                read_write: ds.read_write,
            });
        }

        let workload = Workload::new(dimensions, data_spaces);
        workload.validate()?;
        Ok(workload)
    }
}

/// `{num_threads, optimization_metric(s), search_size, timeout,
/// victory_condition, sync_interval, log_interval,
/// max_temporal_loops_in_a_mapping, live_status, diagnostics, log_*}`
/// (spec §6). Defaults resolve REDESIGN note §9.3's magic numbers into named
/// fields (SPEC_FULL §12).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MapperConfig {
    pub num_threads: Option<usize>,
    pub optimization_metrics: Vec<String>,
    pub search_size: u64,
    pub timeout: u64,
    pub victory_condition: u64,
    pub sync_interval: u64,
    pub log_interval: u64,
    pub max_temporal_loops_in_a_mapping: usize,
    pub live_status: bool,
    pub diagnostics: bool,
    pub log_stats: bool,
    pub penalize_consecutive_bypass_fails: bool,
    /// Phase-3 early-exit threshold on consecutive "barely-better"
    /// acceptances (was `LESS_IMPROVEMENT_COUNTER_THRESHOLD = 10`, §9.3).
    pub phase3_early_exit_threshold: u32,
    /// Energy-per-compute delta below which a Phase-3 acceptance counts as
    /// "barely better" (was the `0.1` pJ/compute magic number, §9.3).
    pub phase3_barely_better_epsilon: f64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        MapperConfig {
            num_threads: None,
            optimization_metrics: vec!["edp".into()],
            search_size: 0,
            timeout: 10_000,
            victory_condition: 0,
            sync_interval: 1_000,
            log_interval: 10_000,
            max_temporal_loops_in_a_mapping: 0,
            live_status: false,
            diagnostics: false,
            log_stats: false,
            penalize_consecutive_bypass_fails: true,
            phase3_early_exit_threshold: 10,
            phase3_barely_better_epsilon: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LayoutEntryConfig {
    pub target: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub factors: String,
    pub permutation: String,
    pub num_read_ports: Option<u32>,
    pub num_write_ports: Option<u32>,
}

/// The full top-level configuration tree (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "arch")]
    pub architecture: Option<ArchitectureConfig>,
    pub problem: Option<ProblemConfig>,
    pub mapspace: Option<toml::Value>,
    pub mapspace_constraints: Option<toml::Value>,
    pub mapper: MapperConfig,
    pub sparse_optimizations: Option<toml::Value>,
    #[serde(rename = "ERT")]
    pub ert: Option<toml::Value>,
    #[serde(rename = "ART")]
    pub art: Option<toml::Value>,
    pub crypto: Option<CryptoConfig>,
    pub layout: Vec<LayoutEntryConfig>,
}

impl Config {
    /// Rejects conflicting/legacy keys (spec §6/§7 kind 1) before building
    /// the domain objects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mapspace.is_some() && self.mapspace_constraints.is_some() {
            return Err(ConfigError::ConflictingKeys(
                "mapspace".into(),
                "mapspace_constraints".into(),
            ));
        }
        Ok(())
    }

    pub fn architecture(&self) -> Result<Architecture, ConfigError> {
        self.validate()?;
        self.architecture
            .clone()
            .ok_or_else(|| ConfigError::MissingKey("architecture".into()))?
            .into_architecture()
    }

    pub fn workload(&self) -> Result<Workload, ConfigError> {
        self.validate()?;
        self.problem
            .clone()
            .ok_or_else(|| ConfigError::MissingKey("problem".into()))?
            .into_workload()
    }

    /// Builds the pinned layout from the `layout` configuration entries
    /// (spec §6), or `None` when the key is absent so the mapper runs its
    /// normal per-mapping layout search (spec §4.2 step 5).
    pub fn fixed_layout(&self, workload: &Workload, arch: &Architecture) -> Result<Option<Layouts>, ConfigError> {
        if self.layout.is_empty() {
            return Ok(None);
        }
        let mut layouts = layout::default_layout(workload, arch);
        layout::apply_layout_entries(&mut layouts, arch, &self.layout)?;
        Ok(Some(layouts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_mapspace_keys_are_rejected() {
        let mut config = Config::default();
        config.mapspace = Some(toml::Value::Boolean(true));
        config.mapspace_constraints = Some(toml::Value::Boolean(true));
        assert!(config.validate().is_err());
    }

    #[test]
    fn legacy_nodes_key_is_rejected() {
        let mut arch = ArchitectureConfig::default();
        arch.nodes = Some(toml::Value::Boolean(true));
        assert!(arch.into_architecture().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.mapper.timeout, config.mapper.timeout);
    }
}
