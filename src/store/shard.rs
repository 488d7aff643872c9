use crate::config::Priority;
use crate::error::StoreError;
use crate::store::{BumpOutcome, CacheEntry};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::BuildHasher;
use std::time::{Duration, Instant};

/// Upper bound of [`Priority::survival_passes`] over all removable priorities.
const MAX_SURVIVAL_PASSES: usize = 3;

pub(crate) enum Lookup<V> {
    Hit(CacheEntry<V>),
    Expired,
    Miss,
}

/// Entries removed as a side effect of an insert.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Housekeeping {
    pub(crate) expired: usize,
    pub(crate) evicted: usize,
}

#[derive(Debug)]
struct Slot<V> {
    entry: CacheEntry<V>,
    hard_expiration: Instant,
    passes_left: Option<u8>,
    seq: u64,
}

/// A slice of the key space. Insertion order is tracked through a sequence number so the
/// oldest entry can be found for eviction; re-inserting a key moves it to the back. Entries are
/// also indexed by hard expiration so every write can drop the ones that are due.
#[derive(Debug)]
pub(crate) struct Shard<V, S> {
    slots: HashMap<String, Slot<V>, S>,
    order: BTreeMap<u64, String>,
    expiries: BTreeSet<(Instant, String)>,
    next_seq: u64,
    capacity: Option<usize>,
}

impl<V, S> Shard<V, S>
where
    S: BuildHasher,
{
    pub(crate) fn with_capacity_and_hasher(capacity: Option<usize>, hash_builder: S) -> Self {
        Self {
            slots: HashMap::with_capacity_and_hasher(capacity.unwrap_or_default(), hash_builder),
            order: BTreeMap::new(),
            expiries: BTreeSet::new(),
            next_seq: 0,
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn insert(
        &mut self,
        key: &str,
        entry: CacheEntry<V>,
        hard_expiration: Instant,
        priority: Priority,
        now: Instant,
    ) -> Result<Housekeeping, StoreError> {
        let mut housekeeping = Housekeeping {
            expired: self.purge_expired(now),
            evicted: 0,
        };

        if self.remove_slot(key).is_none() && self.is_full() {
            self.evict_one(key)?;
            housekeeping.evicted = 1;
        }

        let seq = self.push_order(key.to_owned());
        self.expiries.insert((hard_expiration, key.to_owned()));
        self.slots.insert(
            key.to_owned(),
            Slot {
                entry,
                hard_expiration,
                passes_left: priority.survival_passes(),
                seq,
            },
        );

        Ok(housekeeping)
    }

    /// Removes every entry whose hard expiration is at or before `now`.
    pub(crate) fn purge_expired(&mut self, now: Instant) -> usize {
        let mut purged = 0;

        while self
            .expiries
            .first()
            .is_some_and(|(hard_expiration, _)| now >= *hard_expiration)
        {
            let Some((_, key)) = self.expiries.pop_first() else {
                break;
            };
            if let Some(slot) = self.slots.remove(&key) {
                self.order.remove(&slot.seq);
                purged += 1;
            }
        }

        purged
    }

    fn remove_slot(&mut self, key: &str) -> Option<Slot<V>> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.seq);
        self.expiries.remove(&(slot.hard_expiration, key.to_owned()));
        Some(slot)
    }

    fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|capacity| self.slots.len() >= capacity)
    }

    fn push_order(&mut self, key: String) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key);
        seq
    }

    /// Walks the insertion order from the front. Entries with passes left are moved to the
    /// back with one pass less; the first entry without passes is removed.
    fn evict_one(&mut self, incoming: &str) -> Result<(), StoreError> {
        let max_steps = self.order.len() * (MAX_SURVIVAL_PASSES + 1);

        for _ in 0..max_steps {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            let Some(slot) = self.slots.get_mut(&key) else {
                continue;
            };

            let passes_left = slot.passes_left;
            match passes_left {
                Some(0) => {
                    let hard_expiration = slot.hard_expiration;
                    self.slots.remove(&key);
                    self.expiries.remove(&(hard_expiration, key));
                    return Ok(());
                }
                Some(passes) => slot.passes_left = Some(passes - 1),
                None => {}
            }

            let seq = self.next_seq;
            self.next_seq += 1;
            slot.seq = seq;
            self.order.insert(seq, key);
        }

        Err(StoreError::CapacityExhausted {
            key: incoming.to_owned(),
        })
    }
}

impl<V, S> Shard<V, S>
where
    V: Clone,
    S: BuildHasher,
{
    pub(crate) fn get(&self, key: &str, now: Instant) -> Lookup<V> {
        match self.slots.get(key) {
            Some(slot) if now >= slot.hard_expiration => Lookup::Expired,
            Some(slot) => Lookup::Hit(slot.entry.clone()),
            None => Lookup::Miss,
        }
    }

    /// Extends the entry for `key` if it is still the generation `stale` was read from. A newer
    /// entry is returned untouched, and the hard expiration never moves backwards.
    pub(crate) fn bump(
        &mut self,
        key: &str,
        stale: &CacheEntry<V>,
        window: Duration,
        now: Instant,
    ) -> BumpOutcome<V> {
        let Some(slot) = self.slots.get_mut(key) else {
            return BumpOutcome::Missing;
        };

        if now >= slot.hard_expiration {
            return BumpOutcome::Missing;
        }

        let bumped = stale.bumped(window);
        let same_generation = slot.entry.soft_expiration() == stale.soft_expiration();
        if !same_generation || bumped.hard_expiration() <= slot.entry.hard_expiration() {
            return BumpOutcome::Unchanged(slot.entry.clone());
        }

        let previous_hard_expiration = slot.hard_expiration;
        slot.hard_expiration = bumped.hard_expiration();
        slot.entry = bumped.clone();
        self.expiries.remove(&(previous_hard_expiration, key.to_owned()));
        self.expiries.insert((bumped.hard_expiration(), key.to_owned()));

        BumpOutcome::Extended(bumped)
    }
}
