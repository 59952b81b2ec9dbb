//! Concurrency Registry (spec §4.3): the process-wide table mapping each
//! registered processor class to its configured cap and in-flight count.

use psg_core::{DispatchError, ProcessorFactory, Result, SpinLock, MAX_PROCESSOR_CLASSES};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Counter {
    limit: usize,
    current: usize,
}

struct ClassEntry {
    name: String,
    factory: Arc<dyn ProcessorFactory>,
    counter: SpinLock<Counter>,
    total_acquired: AtomicU64,
    total_rejected: AtomicU64,
}

/// Point-in-time view of one class, for observability.
#[derive(Debug, Clone)]
pub struct ClassSnapshot {
    pub name: String,
    pub limit: usize,
    pub current_count: usize,
    pub total_acquired: u64,
    pub total_rejected: u64,
}

/// Append-only during startup; read-only (besides the per-class counters)
/// once built. Classes are iterated in registration order, which is also
/// descending priority order (`priority = N - class_index`, spec §4.4.1).
pub struct ConcurrencyRegistry {
    classes: Vec<ClassEntry>,
}

impl ConcurrencyRegistry {
    pub fn builder() -> ConcurrencyRegistryBuilder {
        ConcurrencyRegistryBuilder { classes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn class_name(&self, class_index: usize) -> &str {
        &self.classes[class_index].name
    }

    pub fn factory(&self, class_index: usize) -> &Arc<dyn ProcessorFactory> {
        &self.classes[class_index].factory
    }

    /// Priority of a class for `dispatch_request`'s iteration (spec §4.4.1).
    pub fn priority_of(&self, class_index: usize) -> i32 {
        (self.classes.len() - class_index) as i32
    }

    /// Under the class's lock: if `current < limit`, increment and return
    /// true; else return false. O(1).
    pub fn try_acquire(&self, class_index: usize) -> bool {
        let entry = &self.classes[class_index];
        let mut counter = entry.counter.lock();
        if counter.current < counter.limit {
            counter.current += 1;
            drop(counter);
            entry.total_acquired.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            drop(counter);
            entry.total_rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Under the class's lock: decrement. Must not underflow — every
    /// `release` corresponds to exactly one prior successful `try_acquire`.
    pub fn release(&self, class_index: usize) {
        let entry = &self.classes[class_index];
        let mut counter = entry.counter.lock();
        debug_assert!(
            counter.current > 0,
            "concurrency counter underflow for class '{}'",
            entry.name
        );
        counter.current = counter.current.saturating_sub(1);
    }

    pub fn snapshot(&self) -> Vec<ClassSnapshot> {
        self.classes
            .iter()
            .map(|e| {
                let counter = e.counter.lock();
                ClassSnapshot {
                    name: e.name.clone(),
                    limit: counter.limit,
                    current_count: counter.current,
                    total_acquired: e.total_acquired.load(Ordering::Relaxed),
                    total_rejected: e.total_rejected.load(Ordering::Relaxed),
                }
            })
            .collect()
    }
}

pub struct ConcurrencyRegistryBuilder {
    classes: Vec<ClassEntry>,
}

impl ConcurrencyRegistryBuilder {
    /// Register a processor class. Fails fatally (spec §7) if
    /// `MAX_PROCESSOR_CLASSES` would be exceeded or `name` (case
    /// insensitively) is already registered. `limit = 0` is valid and means
    /// the class declines every request.
    pub fn register(
        &mut self,
        name: &str,
        limit: usize,
        factory: Arc<dyn ProcessorFactory>,
    ) -> Result<usize> {
        if self.classes.len() >= MAX_PROCESSOR_CLASSES {
            return Err(DispatchError::TooManyProcessorClasses {
                limit: MAX_PROCESSOR_CLASSES,
            });
        }
        let lower = name.to_ascii_lowercase();
        if self.classes.iter().any(|c| c.name.to_ascii_lowercase() == lower) {
            return Err(DispatchError::DuplicateProcessorClass {
                name: name.to_string(),
            });
        }
        let index = self.classes.len();
        self.classes.push(ClassEntry {
            name: name.to_string(),
            factory,
            counter: SpinLock::new(Counter { limit, current: 0 }),
            total_acquired: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        });
        Ok(index)
    }

    pub fn build(self) -> ConcurrencyRegistry {
        ConcurrencyRegistry {
            classes: self.classes,
        }
    }
}
