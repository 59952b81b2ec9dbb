//! Loop Binder (spec §4.1).
//!
//! Each worker thread owns exactly one `LoopBinder`. Any thread can hand it
//! a callback; the callback runs exactly once, on the worker thread, before
//! the loop next blocks. The queue is a lock-free MPSC (`crossbeam_queue::
//! SegQueue`) so `postpone_invoke` never blocks the caller — only the
//! worker's own wakeup primitive is a lock, and it is held only long enough
//! to flip a flag and notify (spec §5: "no long-held locks").

use crate::notify::Notifier;
use psg_core::ids::RequestId;
use psg_core::{dlog_trace, dlog_warn};
use crossbeam_queue::SegQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Asked by `postpone_invoke_for_request` before firing a callback: is the
/// request's processor group still alive? Implemented by the dispatcher so
/// the binder never needs to know about groups itself.
pub trait GroupLiveness: Send + Sync {
    fn is_alive(&self, request_id: RequestId) -> bool;
}

type Callback = Box<dyn FnOnce() + Send>;

enum QueuedItem {
    Plain(Callback),
    ForRequest(RequestId, Callback),
}

/// Handlers registered for one fd via `set_socket_callback`.
pub struct SocketHandlers {
    pub on_event: Box<dyn FnMut() + Send>,
    pub on_timeout: Box<dyn FnMut() + Send>,
    pub on_error: Box<dyn FnMut() + Send>,
}

struct SocketEntry {
    request_id: RequestId,
    handlers: SocketHandlers,
    /// `Some(n)` once `unregister`/removal has scheduled this entry for
    /// closure; counts down loop iterations before the entry is dropped,
    /// mirroring the original's "two loop iterations typical" cleanup.
    closing_in: Option<u8>,
}

/// Per-worker bridge letting any thread schedule a callback onto that
/// worker's single-threaded loop.
pub struct LoopBinder {
    worker_id: u32,
    queue: SegQueue<QueuedItem>,
    notifier: Arc<Notifier>,
    liveness: Arc<dyn GroupLiveness>,
    accepting: AtomicBool,
    unregistered: AtomicBool,
    dropped_stale_callbacks: AtomicU64,
    sockets: Mutex<HashMap<i32, SocketEntry>>,
}

impl LoopBinder {
    pub fn new(worker_id: u32, liveness: Arc<dyn GroupLiveness>, notifier: Arc<Notifier>) -> Self {
        LoopBinder {
            worker_id,
            queue: SegQueue::new(),
            notifier,
            liveness,
            accepting: AtomicBool::new(true),
            unregistered: AtomicBool::new(false),
            dropped_stale_callbacks: AtomicU64::new(0),
            sockets: Mutex::new(HashMap::new()),
        }
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// Enqueue a callback. Fires exactly once, FIFO within this caller, on
    /// the worker thread, before the loop next blocks.
    pub fn postpone_invoke<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            dlog_warn!("loop-binder[{}]: postpone_invoke after unregister, dropping", self.worker_id);
            return;
        }
        self.queue.push(QueuedItem::Plain(Box::new(callback)));
        self.notifier.notify();
    }

    /// Same as `postpone_invoke`, but checked for group liveness on the
    /// worker thread right before firing.
    pub fn postpone_invoke_for_request<F>(&self, request_id: RequestId, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            dlog_warn!("loop-binder[{}]: postpone_invoke_for_request after unregister, dropping", self.worker_id);
            return;
        }
        self.queue
            .push(QueuedItem::ForRequest(request_id, Box::new(callback)));
        self.notifier.notify();
    }

    /// Register a socket's readiness/timeout/error handlers.
    pub fn set_socket_callback(&self, fd: i32, request_id: RequestId, handlers: SocketHandlers) {
        let mut sockets = self.sockets.lock().unwrap();
        sockets.insert(
            fd,
            SocketEntry {
                request_id,
                handlers,
                closing_in: None,
            },
        );
    }

    /// Drive the `on_event` handler for `fd`, as the transport layer's own
    /// poller would on readiness. Test doubles call this directly.
    pub fn fire_socket_ready(&self, fd: i32) {
        let mut sockets = self.sockets.lock().unwrap();
        if let Some(entry) = sockets.get_mut(&fd) {
            if entry.closing_in.is_none() {
                (entry.handlers.on_event)();
            }
        }
    }

    pub fn fire_socket_timeout(&self, fd: i32) {
        let mut sockets = self.sockets.lock().unwrap();
        if let Some(entry) = sockets.get_mut(&fd) {
            if entry.closing_in.is_none() {
                (entry.handlers.on_timeout)();
            }
        }
    }

    pub fn fire_socket_error(&self, fd: i32) {
        let mut sockets = self.sockets.lock().unwrap();
        if let Some(entry) = sockets.get_mut(&fd) {
            if entry.closing_in.is_none() {
                (entry.handlers.on_error)();
            }
        }
    }

    /// Deregister a socket. Cleanup is deferred: the entry stops firing
    /// immediately but is only dropped after two further `run_once` ticks,
    /// matching the original's "two loop iterations typical".
    pub fn close_socket(&self, fd: i32) {
        let mut sockets = self.sockets.lock().unwrap();
        if let Some(entry) = sockets.get_mut(&fd) {
            entry.closing_in = Some(2);
        }
    }

    /// Number of callbacks dropped because their group was already gone.
    pub fn dropped_stale_callbacks(&self) -> u64 {
        self.dropped_stale_callbacks.load(Ordering::Relaxed)
    }

    /// Stop accepting new work and schedule closure of every still-open
    /// socket registration. Callable exactly once per binder.
    pub fn unregister(&self) {
        if self.unregistered.swap(true, Ordering::SeqCst) {
            dlog_warn!("loop-binder[{}]: unregister called twice", self.worker_id);
            return;
        }
        self.accepting.store(false, Ordering::Release);
        let mut sockets = self.sockets.lock().unwrap();
        for entry in sockets.values_mut() {
            entry.closing_in = Some(2);
        }
    }

    pub fn is_unregistered(&self) -> bool {
        self.unregistered.load(Ordering::Acquire)
    }

    /// True once every socket registration has finished its close
    /// countdown — part of the group/binder teardown predicate.
    pub fn all_sockets_closed(&self) -> bool {
        self.sockets.lock().unwrap().is_empty()
    }

    /// Drain the *entire* queued-callback list, running each callback on
    /// the calling (worker) thread. This must drain everything queued so
    /// far in one go — the original's prepare callback fires once per loop
    /// iteration regardless of how many wakeups were coalesced into it.
    /// Returns the number of callbacks actually run.
    pub fn run_once(&self) -> usize {
        let mut ran = 0usize;
        while let Some(item) = self.queue.pop() {
            match item {
                QueuedItem::Plain(cb) => {
                    cb();
                    ran += 1;
                }
                QueuedItem::ForRequest(request_id, cb) => {
                    if self.liveness.is_alive(request_id) {
                        cb();
                        ran += 1;
                    } else {
                        self.dropped_stale_callbacks.fetch_add(1, Ordering::Relaxed);
                        dlog_trace!(
                            "loop-binder[{}]: dropped stale callback for request {}",
                            self.worker_id,
                            request_id
                        );
                    }
                }
            }
        }
        self.tick_socket_closures();
        ran
    }

    fn tick_socket_closures(&self) {
        let mut sockets = self.sockets.lock().unwrap();
        sockets.retain(|_, entry| match entry.closing_in {
            None => true,
            Some(0) => false,
            Some(n) => {
                entry.closing_in = Some(n - 1);
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysAlive;
    impl GroupLiveness for AlwaysAlive {
        fn is_alive(&self, _: RequestId) -> bool {
            true
        }
    }

    struct NeverAlive;
    impl GroupLiveness for NeverAlive {
        fn is_alive(&self, _: RequestId) -> bool {
            false
        }
    }

    fn binder(liveness: Arc<dyn GroupLiveness>) -> LoopBinder {
        LoopBinder::new(0, liveness, Arc::new(Notifier::new()))
    }

    #[test]
    fn plain_callbacks_run_in_order() {
        let b = binder(Arc::new(AlwaysAlive));
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            b.postpone_invoke(move || order.lock().unwrap().push(i));
        }
        assert_eq!(b.run_once(), 5);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn drains_whole_queue_in_one_tick() {
        let b = binder(Arc::new(AlwaysAlive));
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let count = Arc::clone(&count);
            b.postpone_invoke(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        let ran = b.run_once();
        assert_eq!(ran, 100);
        assert_eq!(count.load(Ordering::SeqCst), 100);
        assert_eq!(b.run_once(), 0);
    }

    #[test]
    fn for_request_drops_when_group_dead() {
        let b = binder(Arc::new(NeverAlive));
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        b.postpone_invoke_for_request(RequestId::from_raw(1), move || {
            fired2.store(true, Ordering::SeqCst)
        });
        assert_eq!(b.run_once(), 0);
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(b.dropped_stale_callbacks(), 1);
    }

    #[test]
    fn unregister_is_idempotent_and_stops_intake() {
        let b = binder(Arc::new(AlwaysAlive));
        b.unregister();
        assert!(b.is_unregistered());
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        b.postpone_invoke(move || fired2.store(true, Ordering::SeqCst));
        b.run_once();
        assert!(!fired.load(Ordering::SeqCst));
        b.unregister(); // second call must not panic
    }

    #[test]
    fn socket_close_is_deferred_two_ticks() {
        let b = binder(Arc::new(AlwaysAlive));
        b.set_socket_callback(
            7,
            RequestId::from_raw(1),
            SocketHandlers {
                on_event: Box::new(|| {}),
                on_timeout: Box::new(|| {}),
                on_error: Box::new(|| {}),
            },
        );
        assert!(!b.all_sockets_closed());
        b.close_socket(7);
        b.run_once();
        assert!(!b.all_sockets_closed());
        b.run_once();
        assert!(!b.all_sockets_closed());
        b.run_once();
        assert!(b.all_sockets_closed());
    }
}
