//! The request-processing dispatcher: the Concurrency Registry, Processor
//! Groups, and the `Dispatcher` that ties them to the Loop Binder and
//! deadline timer heap from `psg-runtime`.

pub mod counters;
pub mod dispatcher;
pub mod group;
pub mod registry;

pub use counters::{DispatcherCounters, DispatcherSnapshot};
pub use dispatcher::Dispatcher;
pub use group::{ProcessorGroup, ProcessorSlot};
pub use registry::{ClassSnapshot, ConcurrencyRegistry, ConcurrencyRegistryBuilder};
