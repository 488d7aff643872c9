use crate::Stats;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ConfigError};
use crate::error::{Error, StoreError};
use crate::key::CachedMethod;
use crate::lock::KeyLocks;
use crate::store::{BumpOutcome, CacheEntry, EntryStore, MemoryStore};
use parking_lot::Mutex;
use stats::Counters;
use std::marker::PhantomData;
use std::time::Instant;
use tracing::{debug, trace, warn};

pub(crate) mod stats;

/// Serves cached values and makes sure only one caller per key recomputes a stale or missing
/// value.
///
/// Fresh entries are returned without any locking. Once an entry turns stale its hard
/// expiration is extended right away, so concurrent readers keep finding it, and the caller
/// that gets the key's lock first recomputes it. Everybody who waited behind that caller
/// re-reads the store before deciding to recompute.
///
/// The loader runs while the key's lock is held. A slow loader therefore delays every other
/// caller that found the same key stale or missing; there is no timeout at this layer.
#[derive(Debug)]
pub struct StampedeCache<V, S = MemoryStore<V>, C = SystemClock> {
    store: S,
    locks: KeyLocks,
    config: Config,
    clock: C,
    counters: Counters,
    stats_last_accessed: Mutex<Instant>,
    _value: PhantomData<fn() -> V>,
}

impl<V, S> StampedeCache<V, S, SystemClock>
where
    V: Clone,
    S: EntryStore<V>,
{
    /// Creates a cache over `store` that reads time from the system clock.
    pub fn new(store: S, config: Config) -> Result<Self, ConfigError> {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<V, S, C> StampedeCache<V, S, C>
where
    V: Clone,
    S: EntryStore<V>,
    C: Clock,
{
    /// Creates a cache over `store` that reads time from `clock`.
    pub fn with_clock(store: S, config: Config, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            store,
            locks: KeyLocks::new(),
            config,
            clock,
            counters: Counters::default(),
            stats_last_accessed: Mutex::new(Instant::now()),
            _value: PhantomData,
        })
    }

    /// The validated configuration this cache was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The backing store, for housekeeping and inspection.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the value cached for `key`, calling `loader` if it is missing or stale.
    ///
    /// While one caller recomputes a stale value, others arriving at the same key either keep
    /// receiving the stale value or wait for the recomputation; `loader` is not called again once
    /// a fresh value was published. A loader error is returned to the caller that ran it and
    /// leaves the stale entry in place, so the next call tries again.
    pub fn get_data<F, E>(&self, key: &str, loader: F) -> Result<V, Error<E>>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let (entry, bumped) = self.get_cached_object(key).map_err(|source| Error::Store {
            key: key.to_owned(),
            source,
        })?;

        match entry {
            Some(entry) if !bumped => {
                self.counters.increment_fresh_hit_count();
                trace!(key, "serving fresh entry");
                return Ok(entry.into_value());
            }
            Some(_) => {}
            None => self.counters.increment_miss_count(),
        }

        let _guard = self.locks.lock(key);
        trace!(key, bumped, "acquired recomputation lock");

        let current = self.recheck(key, bumped).map_err(|source| Error::Store {
            key: key.to_owned(),
            source,
        })?;

        if let Some(entry) = current {
            self.counters.increment_coalesced_count();
            debug!(key, "fresh entry published while waiting for the lock");
            return Ok(entry.into_value());
        }

        self.load_and_publish(key, loader)
    }

    /// Runs [`StampedeCache::get_data`] for a [`CachedMethod`], keyed by
    /// [`CachedMethod::cache_key`].
    pub fn get_method<M>(&self, method: &M) -> Result<V, Error<M::Error>>
    where
        M: CachedMethod<Output = V> + ?Sized,
    {
        let key = method.cache_key();
        self.get_data(key.as_str(), || method.load())
    }

    /// Returns the counters collected since the last call and resets them.
    pub fn stats(&self) -> Stats {
        let millis_elapsed = {
            let mut guard = self.stats_last_accessed.lock();
            let millis_elapsed = guard.elapsed().as_millis();
            *guard = Instant::now();
            millis_elapsed
        };

        self.counters.take(millis_elapsed)
    }

    /// Reads the entry for `key` and bumps it if it is stale. The flag is `true` if the returned
    /// entry is stale and its bump was attempted on this read, whether or not the store extended
    /// it.
    fn get_cached_object(&self, key: &str) -> Result<(Option<CacheEntry<V>>, bool), StoreError> {
        let Some(entry) = self.store.get(key) else {
            return Ok((None, false));
        };

        let now = self.clock.now();
        if !entry.is_stale(now) {
            return Ok((Some(entry), false));
        }

        let outcome = self
            .store
            .bump(
                key,
                &entry,
                self.config.extra_expiration_window,
                self.config.priority,
            )
            .inspect_err(|error| warn!(key, %error, "failed to extend stale entry"))?;

        match outcome {
            BumpOutcome::Extended(bumped) => {
                self.counters.increment_bump_count();
                debug!(
                    key,
                    hard_expiration = ?bumped.hard_expiration(),
                    "extended stale entry"
                );
                Ok((Some(bumped), true))
            }
            BumpOutcome::Unchanged(current) if !current.is_stale(now) => Ok((Some(current), false)),
            BumpOutcome::Unchanged(current) => {
                debug!(key, "stale entry was already extended");
                Ok((Some(current), true))
            }
            BumpOutcome::Missing => Ok((None, false)),
        }
    }

    /// Looks for a fresh entry once the key lock is held. A caller that has not bumped yet
    /// repeats the read-and-bump; one that already bumped only reads, so it does not extend the
    /// same entry twice.
    fn recheck(&self, key: &str, bumped: bool) -> Result<Option<CacheEntry<V>>, StoreError> {
        if bumped {
            let now = self.clock.now();
            return Ok(self.store.get(key).filter(|entry| !entry.is_stale(now)));
        }

        match self.get_cached_object(key)? {
            (Some(entry), false) => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    fn load_and_publish<F, E>(&self, key: &str, loader: F) -> Result<V, Error<E>>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.counters.increment_load_count();
        debug!(key, "recomputing value");

        let value = loader().map_err(|source| {
            self.counters.increment_load_failure_count();
            debug!(key, "loader failed, keeping previous entry");
            Error::Load {
                key: key.to_owned(),
                source,
            }
        })?;

        let entry = CacheEntry::new(
            value.clone(),
            self.clock.now(),
            self.config.base_expiration,
            self.config.extra_expiration_window,
        );
        let hard_expiration = entry.hard_expiration();

        self.store
            .insert(key, entry, hard_expiration, self.config.priority)
            .map_err(|source| {
                warn!(key, error = %source, "failed to publish recomputed value");
                Error::Store {
                    key: key.to_owned(),
                    source,
                }
            })?;

        debug!(key, ?hard_expiration, "published recomputed value");
        Ok(value)
    }
}
