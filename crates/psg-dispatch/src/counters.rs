//! Observable counters (spec §6): groups live/retired, deadline firings,
//! destroyed-processor-callback drops, plus the per-class snapshot from the
//! Concurrency Registry. The original tracks these for its status page;
//! here they're a plain struct a caller can format however it likes, since
//! response serialization is out of scope.

use crate::registry::ClassSnapshot;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct DispatcherCounters {
    pub(crate) groups_live: AtomicI64,
    pub(crate) groups_retired: AtomicU64,
    pub(crate) deadline_firings: AtomicU64,
    pub(crate) rejections: AtomicU64,
}

impl DispatcherCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherSnapshot {
    pub classes: Vec<ClassSnapshot>,
    pub groups_live: i64,
    pub groups_retired: u64,
    pub deadline_firings: u64,
    pub rejections: u64,
    pub destroyed_processor_callback_drops: u64,
}

pub(crate) fn load(counters: &DispatcherCounters, classes: Vec<ClassSnapshot>, drops: u64) -> DispatcherSnapshot {
    DispatcherSnapshot {
        classes,
        groups_live: counters.groups_live.load(Ordering::Relaxed),
        groups_retired: counters.groups_retired.load(Ordering::Relaxed),
        deadline_firings: counters.deadline_firings.load(Ordering::Relaxed),
        rejections: counters.rejections.load(Ordering::Relaxed),
        destroyed_processor_callback_drops: drops,
    }
}
