//! `dse-core`: the immutable data model, map-space traversal, layout and
//! legal-layout-space construction, and the layout-aware buffer-level
//! performance model (spec components C1-C8). No knowledge of threads, CLI
//! argument parsing, or file formats lives here — those are
//! `dse-explorer`/`dse-cli`'s concern.

pub mod arch;
pub mod config;
pub mod crypto;
pub mod error;
pub mod layout;
pub mod layoutspace;
pub mod mapping;
pub mod mapspace;
pub mod model;
pub mod shape;
pub mod util;

pub use arch::Architecture;
pub use config::Config;
pub use crypto::CryptoConfig;
pub use error::{ConfigError, LayoutError, Status};
pub use layout::{create_concordant_layout, Layout, Layouts};
pub use layoutspace::Legal;
pub use mapping::Mapping;
pub use mapspace::MapSpace;
pub use model::topology::{evaluate, Stats};
pub use shape::Workload;
