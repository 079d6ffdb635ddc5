use std::fmt;
use std::time::{Duration, Instant};

use super::store::CacheValue;

/// A cached value with its write timestamp and staleness.
#[derive(Clone)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub updated_at: Instant,
    pub is_stale: bool,
}

impl CacheEntry {
    pub fn new(value: CacheValue) -> Self {
        Self {
            value,
            updated_at: Instant::now(),
            is_stale: false,
        }
    }

    /// Marks the entry stale once `stale_time` has passed since the last write.
    pub fn check_staleness(&mut self, stale_time: Duration) -> bool {
        if self.updated_at.elapsed() >= stale_time {
            self.is_stale = true;
        }
        self.is_stale
    }

    pub const fn mark_stale(&mut self) {
        self.is_stale = true;
    }

    /// Replaces the value, resetting timestamp and staleness.
    pub fn update(&mut self, value: CacheValue) {
        self.value = value;
        self.updated_at = Instant::now();
        self.is_stale = false;
    }

    pub fn should_gc(&self, cache_time: Duration) -> bool {
        self.updated_at.elapsed() > cache_time
    }

    /// Returns a copy of the value if it holds a `T`.
    pub fn downcast<T: Clone + 'static>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("updated_at", &self.updated_at)
            .field("is_stale", &self.is_stale)
            .finish_non_exhaustive()
    }
}
