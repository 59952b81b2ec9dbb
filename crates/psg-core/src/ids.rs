//! Request identifiers.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque request identifier, unique for the lifetime of the process.
///
/// Allocated by [`RequestId::next`]; never reused, never `0`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Sentinel used where "no request" must be representable.
    pub const NONE: RequestId = RequestId(0);

    /// Allocate the next process-wide unique id.
    #[inline]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        RequestId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw value. Used by tests and by collaborators that need
    /// deterministic ids.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        RequestId(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Index of the bucket this request belongs to in a `buckets`-way
    /// partitioned map.
    #[inline]
    pub fn bucket(self, buckets: usize) -> usize {
        (self.0 as usize) % buckets
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        RequestId::NONE
    }
}
