//! `dse-explorer`: the multi-threaded mapper driver built on top of
//! `dse-core`'s map-space, layout-space, and performance model (spec
//! components C9-C10). Owns thread scheduling, the shared global-best
//! mutex, failure-sampling statistics, and terminal status reporting.
//! No argument parsing or file I/O lives here; that is `dse-cli`'s job.

pub mod driver;
pub mod fail_stats;
pub mod logger;
pub mod thread;

pub use driver::{DriverError, Mapper, SearchOutcome};
pub use fail_stats::{FailClass, FailRecord, FailStats};
pub use logger::{log_best_update, StatusGrid, ThreadStatus};
pub use thread::{Best, EvaluationResult, MapperThread, Metric, ThreadConfig};
