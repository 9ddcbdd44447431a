//! Optional cryptographic-authentication model for off-chip memory (spec §6
//! `crypto`, §4.4 Phase 4, and §14 of SPEC_FULL.md — the full field set is
//! carried over from `examples/original_source/include/crypto/crypto.hpp`
//! even though spec.md only lists the keys by name).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub datapath: u32,
    pub auth_cycle_per_datapath: u32,
    pub auth_energy_per_datapath: f64,
    pub enc_cycle_per_datapath: u32,
    pub enc_energy_per_datapath: f64,
    pub auth_additional_cycle_per_block: u32,
    pub auth_additional_energy_per_block: f64,
    pub auth_enc_parallel: bool,
    pub hash_size: u32,
    pub xor_cycle: u32,
    pub xor_energy_per_datapath: f64,
    pub name: String,
    pub family: String,
    /// Whether crypto engines are shared across data spaces (spec §4.4
    /// Phase 4: shared engines drain a max-heap of residual latencies,
    /// non-shared engines are maxed across data spaces).
    pub shared: bool,
    pub number_engines: u32,
    #[serde(skip)]
    pub initialized: bool,
}

impl CryptoConfig {
    pub fn uninitialized() -> Self {
        CryptoConfig::default()
    }

    pub fn engines(&self) -> u32 {
        self.number_engines.max(1)
    }
}
