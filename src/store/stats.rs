use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of a [`crate::MemoryStore`] since the previous call to
/// [`crate::MemoryStore::stats`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct StoreStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub expired_count: u64,
    pub eviction_count: u64,
    pub millis_elapsed: u128,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    expired_count: AtomicU64,
    eviction_count: AtomicU64,
}

impl Counters {
    pub(crate) fn increment_hit_count(&self) {
        self.hit_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn increment_miss_count(&self) {
        self.miss_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn add_expired_count(&self, count: usize) {
        if count > 0 {
            self.expired_count.fetch_add(count as u64, Ordering::AcqRel);
        }
    }

    pub(crate) fn add_eviction_count(&self, count: usize) {
        if count > 0 {
            self.eviction_count.fetch_add(count as u64, Ordering::AcqRel);
        }
    }

    /// Reads and resets all counters.
    pub(crate) fn take(&self, millis_elapsed: u128) -> StoreStats {
        StoreStats {
            hit_count: self.hit_count.swap(0, Ordering::AcqRel),
            miss_count: self.miss_count.swap(0, Ordering::AcqRel),
            expired_count: self.expired_count.swap(0, Ordering::AcqRel),
            eviction_count: self.eviction_count.swap(0, Ordering::AcqRel),
            millis_elapsed,
        }
    }
}
