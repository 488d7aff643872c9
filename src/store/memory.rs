use crate::RandomState;
use crate::clock::{Clock, SystemClock};
use crate::config::Priority;
use crate::error::StoreError;
use crate::store::shard::{Lookup, Shard};
use crate::store::stats::Counters;
use crate::store::{BumpOutcome, CacheEntry, EntryStore, StoreStats};
use parking_lot::{Mutex, RwLock};
use std::hash::BuildHasher;
use std::num::NonZero;
use std::time::{Duration, Instant};
use std::{cmp, thread};

/// Thread-safe in-process [`EntryStore`] with hard expiration.
///
/// The key space is divided into shards to reduce contention during concurrent access. Entries
/// disappear from reads once their hard expiration passes and are purged by the next write to
/// their shard. A bounded store evicts in insertion order, passing over entries according to their
/// [`Priority`]; entries marked [`Priority::NotRemovable`] are only ever removed by expiration.
#[derive(Debug)]
pub struct MemoryStore<V, C = SystemClock, S = RandomState> {
    hash_builder: S,
    shards: Vec<RwLock<Shard<V, S>>>,
    clock: C,
    counters: Counters,
    stats_last_accessed: Mutex<Instant>,
}

impl<V> MemoryStore<V, SystemClock, RandomState> {
    /// Creates an unbounded store reading time from the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<V> Default for MemoryStore<V, SystemClock, RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, C> MemoryStore<V, C, RandomState>
where
    C: Clock,
{
    /// Creates an unbounded store reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self::build(None, clock, RandomState::default())
    }

    /// Creates a store holding at least `capacity` entries.
    ///
    /// The actual capacity may be slightly higher due to sharding and rounding. A store with
    /// zero capacity rejects every insert.
    pub fn with_capacity(capacity: usize, clock: C) -> Self {
        Self::build(Some(capacity), clock, RandomState::default())
    }
}

impl<V, C, S> MemoryStore<V, C, S>
where
    C: Clock,
    S: BuildHasher + Clone,
{
    /// Creates a store holding at least `capacity` entries, using `hash_builder` to hash keys.
    pub fn with_capacity_and_hasher(capacity: usize, clock: C, hash_builder: S) -> Self {
        Self::build(Some(capacity), clock, hash_builder)
    }

    fn build(capacity: Option<usize>, clock: C, hash_builder: S) -> Self {
        let available_parallelism = thread::available_parallelism()
            .map(NonZero::get)
            .unwrap_or(1);

        let number_of_shards = match capacity {
            Some(capacity) => cmp::min(available_parallelism * 4, capacity),
            None => available_parallelism * 4,
        };

        let capacity_per_shard =
            capacity.map(|capacity| capacity.div_ceil(cmp::max(number_of_shards, 1)));

        let shards = (0..number_of_shards)
            .map(|_| {
                RwLock::new(Shard::with_capacity_and_hasher(
                    capacity_per_shard,
                    hash_builder.clone(),
                ))
            })
            .collect();

        Self {
            hash_builder,
            shards,
            clock,
            counters: Counters::default(),
            stats_last_accessed: Mutex::new(Instant::now()),
        }
    }
}

impl<V, C, S> MemoryStore<V, C, S>
where
    C: Clock,
    S: BuildHasher,
{
    /// Number of entries held, including expired ones that were not purged yet.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry whose hard expiration has passed and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let purged = self
            .shards
            .iter()
            .map(|shard| shard.write().purge_expired(now))
            .sum();
        self.counters.add_expired_count(purged);
        purged
    }

    /// Returns the counters collected since the last call and resets them.
    pub fn stats(&self) -> StoreStats {
        let millis_elapsed = {
            let mut guard = self.stats_last_accessed.lock();
            let millis_elapsed = guard.elapsed().as_millis();
            *guard = Instant::now();
            millis_elapsed
        };

        self.counters.take(millis_elapsed)
    }

    fn get_shard(&self, key: &str) -> Option<&RwLock<Shard<V, S>>> {
        if self.shards.is_empty() {
            return None;
        }
        let hash = self.hash_builder.hash_one(key);
        self.shards.get(hash as usize % self.shards.len())
    }
}

impl<V, C, S> EntryStore<V> for MemoryStore<V, C, S>
where
    V: Clone + Send + Sync,
    C: Clock,
    S: BuildHasher + Send + Sync,
{
    fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let Some(shard) = self.get_shard(key) else {
            self.counters.increment_miss_count();
            return None;
        };

        match shard.read().get(key, self.clock.now()) {
            Lookup::Hit(entry) => {
                self.counters.increment_hit_count();
                Some(entry)
            }
            Lookup::Expired | Lookup::Miss => {
                self.counters.increment_miss_count();
                None
            }
        }
    }

    fn insert(
        &self,
        key: &str,
        entry: CacheEntry<V>,
        hard_expiration: Instant,
        priority: Priority,
    ) -> Result<(), StoreError> {
        let shard = self
            .get_shard(key)
            .ok_or_else(|| StoreError::CapacityExhausted {
                key: key.to_owned(),
            })?;

        let housekeeping =
            shard
                .write()
                .insert(key, entry, hard_expiration, priority, self.clock.now())?;

        self.counters.add_expired_count(housekeeping.expired);
        self.counters.add_eviction_count(housekeeping.evicted);
        Ok(())
    }

    fn bump(
        &self,
        key: &str,
        stale: &CacheEntry<V>,
        window: Duration,
        _priority: Priority,
    ) -> Result<BumpOutcome<V>, StoreError>
    where
        V: Clone,
    {
        let Some(shard) = self.get_shard(key) else {
            return Ok(BumpOutcome::Missing);
        };

        Ok(shard.write().bump(key, stale, window, self.clock.now()))
    }
}
