//! The backing key-value store the stampede controller reads from and publishes to.
//!
//! Any process-wide or distributed cache can serve as a backend by implementing [`EntryStore`].
//! The crate ships [`MemoryStore`], a sharded in-process store with hard expiration and
//! priority-aware eviction.

use crate::config::Priority;
use crate::error::StoreError;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use memory::MemoryStore;
pub use stats::StoreStats;

mod memory;
mod shard;
pub(crate) mod stats;

/// One cached value together with its soft and hard expiration.
///
/// The soft expiration marks the value stale, the hard expiration is when the store drops it.
/// `soft_expiration <= hard_expiration` holds for every entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<V> {
    value: V,
    soft_expiration: Instant,
    hard_expiration: Instant,
}

impl<V> CacheEntry<V> {
    /// Creates an entry that is fresh for `base_expiration` and kept for another
    /// `extra_expiration_window` after that.
    pub fn new(
        value: V,
        now: Instant,
        base_expiration: Duration,
        extra_expiration_window: Duration,
    ) -> Self {
        let soft_expiration = now + base_expiration;
        Self {
            value,
            soft_expiration,
            hard_expiration: soft_expiration + extra_expiration_window,
        }
    }

    /// Reassembles an entry read back from a backend. A hard expiration earlier than the soft
    /// one is raised to the soft expiration.
    pub fn from_parts(value: V, soft_expiration: Instant, hard_expiration: Instant) -> Self {
        Self {
            value,
            soft_expiration,
            hard_expiration: hard_expiration.max(soft_expiration),
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn soft_expiration(&self) -> Instant {
        self.soft_expiration
    }

    pub fn hard_expiration(&self) -> Instant {
        self.hard_expiration
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now >= self.soft_expiration
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.hard_expiration
    }
}

impl<V> CacheEntry<V>
where
    V: Clone,
{
    /// Returns a copy with the hard expiration pushed out by `window`. The soft expiration is
    /// left untouched, so the copy is still stale.
    pub fn bumped(&self, window: Duration) -> Self {
        Self {
            value: self.value.clone(),
            soft_expiration: self.soft_expiration,
            hard_expiration: self.hard_expiration + window,
        }
    }
}

/// What [`EntryStore::bump`] found and did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BumpOutcome<V> {
    /// The entry that was read got its hard expiration extended.
    Extended(CacheEntry<V>),
    /// The store kept what it had: a newer entry, or one already extended further.
    Unchanged(CacheEntry<V>),
    /// The key is gone or past its hard expiration.
    Missing,
}

/// Storage the controller reads entries from and publishes entries to.
///
/// Implementations must be safe to call from many threads at once. Reads are never guarded by
/// the controller's per-key locks.
pub trait EntryStore<V>: Send + Sync {
    /// Returns the entry for `key`, or [`None`] on a miss or once its hard expiration passed.
    fn get(&self, key: &str) -> Option<CacheEntry<V>>;

    /// Stores `entry` so that [`EntryStore::get`] returns it until `hard_expiration`.
    fn insert(
        &self,
        key: &str,
        entry: CacheEntry<V>,
        hard_expiration: Instant,
        priority: Priority,
    ) -> Result<(), StoreError>;

    /// Extends the hard expiration of the stale entry `stale` by `window` and reports what the
    /// store holds for `key` afterwards.
    ///
    /// The default writes [`CacheEntry::bumped`] with [`EntryStore::insert`]. Stores that can
    /// compare and write atomically should only extend the entry if it is still the one that
    /// was read, and otherwise return whatever superseded it as [`BumpOutcome::Unchanged`].
    fn bump(
        &self,
        key: &str,
        stale: &CacheEntry<V>,
        window: Duration,
        priority: Priority,
    ) -> Result<BumpOutcome<V>, StoreError>
    where
        V: Clone,
    {
        let bumped = stale.bumped(window);
        self.insert(key, bumped.clone(), bumped.hard_expiration, priority)?;
        Ok(BumpOutcome::Extended(bumped))
    }
}

impl<V, T> EntryStore<V> for Arc<T>
where
    T: EntryStore<V> + ?Sized,
{
    fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        (**self).get(key)
    }

    fn insert(
        &self,
        key: &str,
        entry: CacheEntry<V>,
        hard_expiration: Instant,
        priority: Priority,
    ) -> Result<(), StoreError> {
        (**self).insert(key, entry, hard_expiration, priority)
    }

    fn bump(
        &self,
        key: &str,
        stale: &CacheEntry<V>,
        window: Duration,
        priority: Priority,
    ) -> Result<BumpOutcome<V>, StoreError>
    where
        V: Clone,
    {
        (**self).bump(key, stale, window, priority)
    }
}

impl<V, T> EntryStore<V> for &T
where
    T: EntryStore<V> + ?Sized,
{
    fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        (**self).get(key)
    }

    fn insert(
        &self,
        key: &str,
        entry: CacheEntry<V>,
        hard_expiration: Instant,
        priority: Priority,
    ) -> Result<(), StoreError> {
        (**self).insert(key, entry, hard_expiration, priority)
    }

    fn bump(
        &self,
        key: &str,
        stale: &CacheEntry<V>,
        window: Duration,
        priority: Priority,
    ) -> Result<BumpOutcome<V>, StoreError>
    where
        V: Clone,
    {
        (**self).bump(key, stale, window, priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingStore {
        entries: Mutex<HashMap<String, (CacheEntry<&'static str>, Instant, Priority)>>,
    }

    impl EntryStore<&'static str> for RecordingStore {
        fn get(&self, key: &str) -> Option<CacheEntry<&'static str>> {
            self.entries.lock().get(key).map(|(entry, _, _)| entry.clone())
        }

        fn insert(
            &self,
            key: &str,
            entry: CacheEntry<&'static str>,
            hard_expiration: Instant,
            priority: Priority,
        ) -> Result<(), StoreError> {
            self.entries
                .lock()
                .insert(key.to_owned(), (entry, hard_expiration, priority));
            Ok(())
        }
    }

    #[test]
    fn it_computes_hard_expiration_from_soft_expiration() {
        // given
        let now = Instant::now();

        // when
        let entry = CacheEntry::new("v1", now, Duration::from_secs(60), Duration::from_secs(10));

        // then
        assert_eq!(entry.soft_expiration(), now + Duration::from_secs(60));
        assert_eq!(entry.hard_expiration(), now + Duration::from_secs(70));
        assert!(!entry.is_stale(now + Duration::from_secs(59)));
        assert!(entry.is_stale(now + Duration::from_secs(60)));
        assert!(!entry.is_expired(now + Duration::from_secs(69)));
        assert!(entry.is_expired(now + Duration::from_secs(70)));
    }

    #[test]
    fn it_keeps_soft_expiration_when_bumped() {
        // given
        let now = Instant::now();
        let entry = CacheEntry::new("v1", now, Duration::from_secs(60), Duration::from_secs(10));

        // when
        let bumped = entry.bumped(Duration::from_secs(10)).bumped(Duration::from_secs(10));

        // then
        assert_eq!(bumped.value(), &"v1");
        assert_eq!(bumped.soft_expiration(), entry.soft_expiration());
        assert_eq!(bumped.hard_expiration(), now + Duration::from_secs(90));
    }

    #[test]
    fn it_never_builds_an_entry_with_hard_before_soft() {
        // given
        let now = Instant::now();

        // when
        let entry = CacheEntry::from_parts("v1", now + Duration::from_secs(5), now);

        // then
        assert_eq!(entry.hard_expiration(), entry.soft_expiration());
    }

    #[test]
    fn it_bumps_through_insert_by_default() {
        // given
        let store = RecordingStore::default();
        let now = Instant::now();
        let entry = CacheEntry::new("v1", now, Duration::from_secs(60), Duration::from_secs(10));
        store
            .insert("k", entry.clone(), entry.hard_expiration(), Priority::Normal)
            .unwrap();

        // when
        let outcome = store
            .bump("k", &entry, Duration::from_secs(10), Priority::High)
            .unwrap();

        // then
        let BumpOutcome::Extended(bumped) = outcome else {
            panic!("the default bump always extends");
        };
        assert_eq!(bumped.hard_expiration(), now + Duration::from_secs(80));
        let (stored, hard_expiration, priority) = store.entries.lock()["k"].clone();
        assert_eq!(stored, bumped);
        assert_eq!(hard_expiration, now + Duration::from_secs(80));
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn it_forwards_through_arc_and_references() {
        // given
        let store = Arc::new(RecordingStore::default());
        let now = Instant::now();
        let entry = CacheEntry::new("v1", now, Duration::from_secs(60), Duration::from_secs(10));

        // when
        EntryStore::insert(&store, "k", entry.clone(), entry.hard_expiration(), Priority::Low)
            .unwrap();

        // then
        let by_ref: &RecordingStore = &store;
        assert_eq!(EntryStore::get(&by_ref, "k"), Some(entry));
    }
}
