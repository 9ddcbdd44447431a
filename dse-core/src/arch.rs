//! Architecture specification: per-level storage specs and the arithmetic
//! level (spec §3 C2).
//!
//! Grounded on the teacher's `device::Device` trait (`src/device/mod.rs`),
//! which exposes `hw_pressure`/`thread_rates`/`block_rates` as per-device
//! queries over a fixed spec; here the "device" is data, not a trait object,
//! since the spec has no backend-specific code generation to dispatch on.

/// Storage technology, used to decide whether authentication/DRAM-only
/// behavior (crypto, row-buffer assumptions) applies to a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technology {
    Sram,
    Dram,
}

/// Per-operation energies for one storage level, either the architecture's
/// default (PAT-style) model or overridden by an imported ERT table
/// (spec §6 `ERT`).
#[derive(Debug, Clone, Default)]
pub struct EnergyModel {
    pub read: f64,
    pub write: f64,
    pub leak: f64,
    pub address_generation: f64,
    pub compression: f64,
    pub decompression: f64,
}

/// One level of the storage hierarchy.
#[derive(Debug, Clone)]
pub struct StorageLevel {
    pub name: String,
    /// `None` models an effectively infinite level (e.g. main memory).
    pub capacity: Option<u64>,
    /// Block size in elements; the width of one memory line.
    pub block_size: u32,
    pub cluster_size: u32,
    pub instances: u32,
    pub read_bandwidth: Option<f64>,
    pub write_bandwidth: Option<f64>,
    pub shared_bandwidth: Option<f64>,
    pub num_ports: u32,
    pub num_banks: u32,
    pub technology: Technology,
    pub word_bits: u32,
    pub energy: EnergyModel,
}

impl StorageLevel {
    pub fn capacity_or_infinite(&self) -> u64 {
        self.capacity.unwrap_or(u64::MAX)
    }

    /// Read/write port counts derived from declared bandwidths, following
    /// `buffer.cpp`'s `CheckTileTypesBase`: `ports = bandwidth / block_size`,
    /// with a shared-bandwidth spec overriding both directions.
    pub fn derived_ports(&self) -> (f64, f64) {
        let block_size = f64::from(self.block_size.max(1));
        let mut read_ports = self.read_bandwidth.map_or(1.0, |bw| bw / block_size);
        let mut write_ports = self.write_bandwidth.map_or(1.0, |bw| bw / block_size);
        if let Some(shared) = self.shared_bandwidth {
            read_ports = shared / block_size;
            write_ports = shared / block_size;
        }
        (read_ports.max(1e-9), write_ports.max(1e-9))
    }
}

/// The compute level terminating the innermost end of the storage hierarchy.
#[derive(Debug, Clone)]
pub struct ArithmeticLevel {
    pub name: String,
    pub instances: u32,
    pub energy_per_op: f64,
}

/// The full, immutable architecture description.
#[derive(Debug, Clone)]
pub struct Architecture {
    /// Storage levels, innermost (closest to the arithmetic level) first.
    pub levels: Vec<StorageLevel>,
    pub arithmetic: ArithmeticLevel,
}

impl Architecture {
    pub fn level_id(&self, name: &str) -> Option<usize> {
        self.levels.iter().position(|l| l.name == name)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn dram_level(&self) -> Option<usize> {
        self.levels.iter().position(|l| l.technology == Technology::Dram)
    }
}
