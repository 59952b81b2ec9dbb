//! Event-loop plumbing: the Loop Binder, the deadline timer heap, and the
//! worker thread that ties them together. No dispatcher logic lives here —
//! `psg-dispatch` consumes these as collaborators.

pub mod binder;
pub mod notify;
pub mod timer;
pub mod worker_loop;

pub use binder::{GroupLiveness, LoopBinder, SocketHandlers};
pub use notify::Notifier;
pub use timer::{DeadlineHeap, TimerHandle};
pub use worker_loop::{current_worker_id, LoopWorker};
