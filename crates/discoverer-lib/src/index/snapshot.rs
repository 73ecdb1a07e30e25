//! Atomically replaceable immutable snapshots

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle to the latest published version of one index.
///
/// Writers always hand over a freshly built value; a published value is
/// never mutated. Readers get an `Arc` to the current value without taking
/// a lock and can keep using it after a newer version is published.
#[derive(Debug)]
pub struct Snapshot<T> {
    current: ArcSwapOption<T>,
    generation: AtomicU64,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Snapshot<T> {
    /// Create a handle with nothing published yet
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
        }
    }

    /// Install a new version, returning its generation number
    pub fn publish(&self, value: T) -> u64 {
        self.current.store(Some(Arc::new(value)));
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Currently installed version, `None` until the first publish
    pub fn current(&self) -> Option<Arc<T>> {
        self.current.load_full()
    }

    /// Number of publishes so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_published(&self) -> bool {
        self.current.load().is_some()
    }
}
