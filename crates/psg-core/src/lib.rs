//! Core types shared by the request dispatcher and its collaborators:
//! ids, status vocabulary, collaborator traits, the fatal-config error
//! type, a lightweight spinlock, env helpers and logging macros.
//!
//! This crate carries no business logic of its own — `psg-dispatch` and
//! `psg-runtime` build the dispatcher and loop binder on top of it.

pub mod config;
pub mod env;
pub mod error;
pub mod ids;
pub mod log;
pub mod spinlock;
pub mod status;
pub mod traits;

pub use config::RequestTimeoutSeconds;
pub use env::{env_get, env_get_bool};
pub use error::{DispatchError, Result};
pub use ids::RequestId;
pub use log::{set_log_level, LogLevel};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use status::{DispatchStatus, ProcessorStatus, SignalSource, StartProcessingResult};
pub use traits::{DispatcherCallback, FlushMode, Processor, ProcessorFactory, Reply, Request};

/// Compile-time bound on the number of registered processor classes
/// (spec §3, §9 open question: kept fixed for index-stable counters).
pub const MAX_PROCESSOR_CLASSES: usize = 32;

/// Number of buckets the processor-group registry is partitioned into
/// (spec §4.4.1, "Bucketing").
pub const PROC_BUCKETS: usize = 100;
