use std::sync::atomic::{AtomicU64, Ordering};

/// What a [`crate::StampedeCache`] did since the previous call to
/// [`crate::StampedeCache::stats`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Stats {
    /// Calls answered from a fresh entry without taking the key lock.
    pub fresh_hit_count: u64,
    /// Stale entries whose hard expiration was extended.
    pub bump_count: u64,
    /// Calls that found no entry at all.
    pub miss_count: u64,
    /// Calls that waited for the key lock and then found a fresh entry.
    pub coalesced_count: u64,
    pub load_count: u64,
    pub load_failure_count: u64,
    pub millis_elapsed: u128,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    fresh_hit_count: AtomicU64,
    bump_count: AtomicU64,
    miss_count: AtomicU64,
    coalesced_count: AtomicU64,
    load_count: AtomicU64,
    load_failure_count: AtomicU64,
}

impl Counters {
    pub(crate) fn increment_fresh_hit_count(&self) {
        self.fresh_hit_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn increment_bump_count(&self) {
        self.bump_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn increment_miss_count(&self) {
        self.miss_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn increment_coalesced_count(&self) {
        self.coalesced_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn increment_load_count(&self) {
        self.load_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn increment_load_failure_count(&self) {
        self.load_failure_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Reads and resets all counters.
    pub(crate) fn take(&self, millis_elapsed: u128) -> Stats {
        Stats {
            fresh_hit_count: self.fresh_hit_count.swap(0, Ordering::AcqRel),
            bump_count: self.bump_count.swap(0, Ordering::AcqRel),
            miss_count: self.miss_count.swap(0, Ordering::AcqRel),
            coalesced_count: self.coalesced_count.swap(0, Ordering::AcqRel),
            load_count: self.load_count.swap(0, Ordering::AcqRel),
            load_failure_count: self.load_failure_count.swap(0, Ordering::AcqRel),
            millis_elapsed,
        }
    }
}
