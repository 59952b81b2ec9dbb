//! Deadline timer heap backing the per-request rolling deadline (spec
//! §4.4.4). One dispatcher-wide heap serves every worker; each entry
//! carries the request id it belongs to so `on_request_timer` can be
//! dispatched without a separate per-request OS timer.

use psg_core::ids::RequestId;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone)]
struct Entry {
    deadline: Instant,
    handle: TimerHandle,
    request_id: RequestId,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.handle == other.handle
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse so BinaryHeap (a max-heap) pops the earliest deadline first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.handle.0.cmp(&self.handle.0))
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    cancelled: HashSet<TimerHandle>,
}

/// A min-heap of `(deadline, request_id)` with lazy cancellation: a
/// cancelled handle is just marked and skipped when it's popped, avoiding
/// an O(n) removal from the heap.
pub struct DeadlineHeap {
    inner: Mutex<Inner>,
}

impl DeadlineHeap {
    pub fn new() -> Self {
        DeadlineHeap {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                cancelled: HashSet::new(),
            }),
        }
    }

    /// Arm a one-shot timer `duration` from now for `request_id`.
    pub fn arm(&self, request_id: RequestId, duration: Duration) -> TimerHandle {
        let handle = TimerHandle::new();
        let entry = Entry {
            deadline: Instant::now() + duration,
            handle,
            request_id,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.heap.push(entry);
        handle
    }

    /// Cancel a timer. No-op (returns `false`) if it already fired or was
    /// already cancelled.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.cancelled.insert(handle)
    }

    /// Pop every entry whose deadline is `<= now`, skipping cancelled ones.
    pub fn poll_expired(&self, now: Instant) -> Vec<(TimerHandle, RequestId)> {
        let mut inner = self.inner.lock().unwrap();
        let mut fired = Vec::new();
        while let Some(top) = inner.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = inner.heap.pop().unwrap();
            if inner.cancelled.remove(&entry.handle) {
                continue;
            }
            fired.push((entry.handle, entry.request_id));
        }
        if inner.heap.is_empty() {
            inner.cancelled.clear();
        }
        fired
    }

    /// Deadline of the next not-yet-cancelled timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock().unwrap();
        inner
            .heap
            .iter()
            .filter(|e| !inner.cancelled.contains(&e.handle))
            .map(|e| e.deadline)
            .min()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.heap.len().saturating_sub(inner.cancelled.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeadlineHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let heap = DeadlineHeap::new();
        let r1 = RequestId::from_raw(1);
        let r2 = RequestId::from_raw(2);
        heap.arm(r2, Duration::from_millis(20));
        heap.arm(r1, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(30));
        let fired = heap.poll_expired(Instant::now());
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].1, r1);
        assert_eq!(fired[1].1, r2);
    }

    #[test]
    fn cancel_suppresses_firing() {
        let heap = DeadlineHeap::new();
        let r1 = RequestId::from_raw(1);
        let handle = heap.arm(r1, Duration::from_millis(5));
        assert!(heap.cancel(handle));
        std::thread::sleep(Duration::from_millis(10));
        let fired = heap.poll_expired(Instant::now());
        assert!(fired.is_empty());
    }

    #[test]
    fn not_yet_due_entries_stay() {
        let heap = DeadlineHeap::new();
        heap.arm(RequestId::from_raw(1), Duration::from_secs(10));
        let fired = heap.poll_expired(Instant::now());
        assert!(fired.is_empty());
        assert_eq!(heap.len(), 1);
    }
}
