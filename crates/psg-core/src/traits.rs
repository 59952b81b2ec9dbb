//! Collaborator interfaces (spec §4.2, §6).
//!
//! Everything in this module is implemented by someone *outside* the core:
//! the transport layer supplies `Request`/`Reply`, a processor author
//! implements `Processor` and registers a `ProcessorFactory`. The core only
//! consumes these traits and, in return, exposes `DispatcherCallback` for
//! processors to call back into.
//!
//! # Implementors
//!
//! - `Request`/`Reply`: the HTTP/transport layer (out of scope here).
//! - `Processor`/`ProcessorFactory`: individual backend processors
//!   (Cassandra, LMDB, resolver, ...), also out of scope here.
//! - `DispatcherCallback`: `psg_dispatch::Dispatcher`.

use crate::ids::RequestId;
use crate::status::{ProcessorStatus, SignalSource, StartProcessingResult};
use std::sync::Arc;

/// How a reply chunk should be pushed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush whatever data chunks are ready, stream stays open.
    Partial,
    /// Final flush: no more data will follow.
    Final,
}

/// The inbound request handle. Minimal: the core only needs the id to key
/// its processor-group map, everything else (headers, seq-id, ...) is the
/// transport layer's concern.
pub trait Request: Send + Sync {
    fn request_id(&self) -> RequestId;
}

/// The outbound reply/response handle, shared by every processor in a
/// group and by the dispatcher. Implementations perform their own
/// synchronization — the dispatcher never assumes exclusive access.
pub trait Reply: Send + Sync {
    /// At least one chunk is buffered and ready to be written out.
    fn is_output_ready(&self) -> bool;
    /// The stream has been flushed-and-closed via the normal path.
    fn is_finished(&self) -> bool;
    /// The stream is fully drained on the wire (post-`is_finished`).
    fn is_completed(&self) -> bool;

    /// Push buffered chunks to the client.
    fn flush(&self, mode: FlushMode);
    /// Write the terminal completion chunk carrying the HTTP status.
    fn prepare_reply_completion(&self, http_code: u16, start_ts_mks: u64);
    /// Write a "timed out due to prolonged backend inactivity" message.
    fn prepare_request_timeout_message(&self, text: &str);
    /// Write a plain status/error message chunk.
    fn prepare_reply_message(&self, text: &str, http_code: u16, code: i32, severity: &str);

    /// Microseconds since the reply last saw activity (a chunk write).
    fn get_timespan_from_last_activity_mks(&self) -> u64;
    /// Emit a trace line; by contract this never counts as activity.
    fn send_trace(&self, text: &str, start_ts_mks: u64, update_last_activity: bool);

    /// Correlation id for log messages about this reply's items.
    fn get_item_id(&self) -> u64;
}

/// A unit of work attempting to fulfil one request against one backend.
///
/// Trait objects are shared (`Arc<dyn Processor>`) between the dispatcher's
/// `ProcessorSlot` and the executor that drives them; both must be able to
/// call every method from any thread.
pub trait Processor: Send + Sync {
    /// The request this processor instance belongs to. Lets the dispatcher
    /// locate the owning group/slot from just an `Arc<dyn Processor>`
    /// without a reverse index.
    fn request_id(&self) -> RequestId;

    /// Begin work. May schedule asynchronous I/O but must return promptly.
    fn process(&self);

    /// Cooperative stop request. Must be idempotent and callable from any
    /// thread, including from inside a call the dispatcher is itself making
    /// (e.g. a nested `signal_finish_processing`).
    fn cancel(&self);

    /// Current status. Any value other than `InProgress` is terminal.
    fn get_status(&self) -> ProcessorStatus;

    fn get_name(&self) -> &str;
    fn get_group_name(&self) -> &str;
    fn get_priority(&self) -> i32;

    /// Invoked by the dispatcher when the loop binder delivers a wakeup for
    /// this processor's registered socket, so it can poll its loaders.
    fn process_event(&self) {}
}

/// A registered processor class: a factory capable of producing processor
/// instances for requests it recognizes.
pub trait ProcessorFactory: Send + Sync {
    /// Case-insensitive class name. Must be unique across the registry.
    fn class_name(&self) -> &str;

    /// Attempt to build a processor for this request. Returning `None`
    /// declines the request for this class; it is not an error.
    fn try_create(
        &self,
        request: &dyn Request,
        reply: Arc<dyn Reply>,
        priority: i32,
    ) -> Option<Arc<dyn Processor>>;
}

/// The callback surface a `Processor` uses to report progress back to the
/// dispatcher (spec §6, "From processors").
pub trait DispatcherCallback: Send + Sync {
    fn signal_start_processing(&self, processor: &Arc<dyn Processor>) -> StartProcessingResult;
    fn signal_finish_processing(&self, processor: &Arc<dyn Processor>, source: SignalSource);
}
