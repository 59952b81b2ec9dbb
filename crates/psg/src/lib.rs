//! # psg - request dispatcher and processor lifecycle core
//!
//! A per-request fan-out dispatcher: given one inbound request, it starts a
//! processor per registered backend class, lets the fastest one win, cancels
//! the rest, and retires the request once every processor has reported in.
//!
//! Three layers, one crate each:
//!
//! - [`psg_core`] — ids, status vocabulary, the `Request`/`Reply`/`Processor`
//!   collaborator traits, logging, a spinlock.
//! - [`psg_runtime`] — the Loop Binder and deadline timer heap that give
//!   each worker thread a single-threaded event loop.
//! - [`psg_dispatch`] — the Concurrency Registry, Processor Group, and the
//!   `Dispatcher` itself.
//!
//! ## Quick start
//!
//! ```ignore
//! use psg::prelude::*;
//!
//! let mut builder = ConcurrencyRegistry::builder();
//! builder.register("cassandra", 10, my_cassandra_factory)?;
//! let dispatcher = Dispatcher::new(builder.build(), Duration::from_millis(2000));
//!
//! let processors = dispatcher.dispatch_request(&request, reply, worker_id);
//! for p in processors {
//!     p.process();
//! }
//! ```

pub use psg_core::{
    dlog_debug, dlog_error, dlog_trace, dlog_warn, env_get, env_get_bool, set_log_level,
    DispatchError, DispatchStatus, DispatcherCallback, FlushMode, LogLevel, Processor,
    ProcessorFactory, ProcessorStatus, Reply, Request, RequestId, RequestTimeoutSeconds, Result,
    SignalSource, SpinLock, StartProcessingResult, MAX_PROCESSOR_CLASSES, PROC_BUCKETS,
};

pub use psg_runtime::{current_worker_id, DeadlineHeap, GroupLiveness, LoopBinder, LoopWorker, Notifier, SocketHandlers, TimerHandle};

pub use psg_dispatch::{
    ClassSnapshot, ConcurrencyRegistry, ConcurrencyRegistryBuilder, Dispatcher, DispatcherCounters,
    DispatcherSnapshot, ProcessorGroup, ProcessorSlot,
};

/// Re-exports everything a typical embedder needs in one `use` line.
pub mod prelude {
    pub use crate::{
        ConcurrencyRegistry, DispatchError, DispatchStatus, Dispatcher, DispatcherCallback,
        FlushMode, Processor, ProcessorFactory, ProcessorStatus, Reply, Request, RequestId,
        RequestTimeoutSeconds, SignalSource, StartProcessingResult,
    };
    pub use std::sync::Arc;
    pub use std::time::Duration;
}
