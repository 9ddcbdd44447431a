//! Error types for the design-space explorer core.
//!
//! Hot per-iteration failures (spec §7 kinds 2-4: mapping construction,
//! pre-evaluation capacity check, layout id decoding) use [`Status`], a
//! copy-able, non-allocating result, mirroring how
//! `search_space::SearchSpace::apply_decisions` in the teacher returns
//! `Result<(), ()>` rather than a heavyweight error on the common
//! "infeasible" path. Cold, user-facing errors use `failure::Fail` enums.

use failure::Fail;

/// Lightweight per-iteration failure status for the search hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub success: bool,
    pub reason: &'static str,
}

impl Status {
    pub const OK: Status = Status {
        success: true,
        reason: "",
    };

    pub fn fail(reason: &'static str) -> Self {
        Status {
            success: false,
            reason,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::OK
    }
}

/// Errors raised while parsing or validating the configuration tree (spec §6/§7 kind 1).
#[derive(Debug, Fail)]
pub enum ConfigError {
    #[fail(display = "missing required configuration key `{}`", _0)]
    MissingKey(String),
    #[fail(
        display = "conflicting configuration keys: `{}` and `{}` may not both be present",
        _0, _1
    )]
    ConflictingKeys(String, String),
    #[fail(display = "unsupported class name `{}` for key `{}`", _1, _0)]
    UnsupportedClass(String, String),
    #[fail(display = "legacy `nodes` sub-key is no longer supported under `architecture`")]
    LegacyNodesKey,
    #[fail(
        display = "dimension `{}` referenced by rank `{}` is not declared in the workload",
        _1, _0
    )]
    UnknownDimension(String, String),
    #[fail(display = "level `{}` referenced by layout target is not part of the architecture", _0)]
    UnknownLevel(String),
}

/// Errors raised constructing or validating a layout (spec §7 kinds 4-5).
#[derive(Debug, Fail)]
pub enum LayoutError {
    #[fail(display = "layout id {} is out of range [0, {})", _0, _1)]
    IdOutOfRange(u64, u64),
    #[fail(
        display = "factor {} does not divide max factor {} for rank `{}` at level {}",
        _0, _1, _2, _3
    )]
    NotADivisor(u32, u32, String, usize),
    #[fail(
        display = "intraline product {} at level `{}` exceeds the block size {} of the architecture",
        _0, _1, _2
    )]
    BlockSizeExceeded(u32, String, u32),
    #[fail(
        display = "buffer capacity exceeded at level `{}`: required {} > capacity {}",
        _0, _1, _2
    )]
    CapacityExceeded(String, u64, u64),
    #[fail(display = "storage level `{}` not found", _0)]
    UnknownLevel(String),
}
