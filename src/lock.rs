//! Per-key mutual exclusion.
//!
//! [`KeyLocks`] hands out one lock per cache key. Requests for equal keys serialize, requests for
//! different keys never contend on each other's lock. A key's slot lives only as long as some
//! caller holds or waits for its lock, so the registry does not grow with every key ever seen.

use crate::RandomState;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::num::NonZero;
use std::sync::Arc;
use std::{fmt, thread};

type KeyLock = Arc<Mutex<()>>;

pub struct KeyLocks<S = RandomState> {
    hash_builder: S,
    shards: Vec<Mutex<HashMap<String, KeyLock, S>>>,
}

impl KeyLocks<RandomState> {
    /// Creates an empty registry sharded by the available parallelism.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::default())
    }
}

impl Default for KeyLocks<RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> KeyLocks<S>
where
    S: BuildHasher + Clone,
{
    /// Creates an empty registry that uses `hash_builder` to pick a key's shard.
    pub fn with_hasher(hash_builder: S) -> Self {
        let available_parallelism = thread::available_parallelism()
            .map(NonZero::get)
            .unwrap_or(1);

        let shards = (0..available_parallelism * 4)
            .map(|_| Mutex::new(HashMap::with_hasher(hash_builder.clone())))
            .collect();

        Self {
            hash_builder,
            shards,
        }
    }
}

impl<S> KeyLocks<S>
where
    S: BuildHasher,
{
    /// Blocks until the lock for `key` is acquired.
    ///
    /// The lock is released when the returned guard is dropped, including during unwinding.
    pub fn lock(&self, key: &str) -> KeyLockGuard<'_, S> {
        let shard = self.shard(key);
        let lock = Self::checkout(shard, key);
        let guard = lock.lock_arc();

        KeyLockGuard {
            shard,
            key: key.to_owned(),
            lock,
            guard: Some(guard),
        }
    }

    /// Acquires the lock for `key` if nobody else holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyLockGuard<'_, S>> {
        let shard = self.shard(key);
        let lock = Self::checkout(shard, key);

        match lock.try_lock_arc() {
            Some(guard) => Some(KeyLockGuard {
                shard,
                key: key.to_owned(),
                lock,
                guard: Some(guard),
            }),
            None => {
                release_slot(shard, key, &lock);
                None
            }
        }
    }

    /// Number of keys that currently have a holder or a waiter.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Whether no key is currently locked or waited for.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, KeyLock, S>> {
        let hash = self.hash_builder.hash_one(key);
        &self.shards[hash as usize % self.shards.len()]
    }

    /// Returns the lock for `key`, creating it if needed. The reference count is raised while
    /// the shard is held so a concurrent release cannot drop the slot underneath us.
    fn checkout(shard: &Mutex<HashMap<String, KeyLock, S>>, key: &str) -> KeyLock {
        let mut locks = shard.lock();
        match locks.get(key) {
            Some(lock) => Arc::clone(lock),
            None => {
                let lock = KeyLock::default();
                locks.insert(key.to_owned(), Arc::clone(&lock));
                lock
            }
        }
    }
}

impl<S> fmt::Debug for KeyLocks<S>
where
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLocks")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

/// Drops the map slot for `key` if `lock` is the last reference besides the map's own.
fn release_slot<S>(shard: &Mutex<HashMap<String, KeyLock, S>>, key: &str, lock: &KeyLock)
where
    S: BuildHasher,
{
    let mut locks = shard.lock();
    let unused = locks
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, lock) && Arc::strong_count(lock) == 2);
    if unused {
        locks.remove(key);
    }
}

/// Holds the lock for one key.
pub struct KeyLockGuard<'a, S = RandomState>
where
    S: BuildHasher,
{
    shard: &'a Mutex<HashMap<String, KeyLock, S>>,
    key: String,
    lock: KeyLock,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl<S> KeyLockGuard<'_, S>
where
    S: BuildHasher,
{
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<S> Drop for KeyLockGuard<'_, S>
where
    S: BuildHasher,
{
    fn drop(&mut self) {
        // unlock first so a waiter can proceed while the slot is being released
        drop(self.guard.take());
        release_slot(self.shard, &self.key, &self.lock);
    }
}

impl<S> fmt::Debug for KeyLockGuard<'_, S>
where
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLockGuard")
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn it_serializes_equal_keys() {
        // given
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        // when
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let _guard = locks.lock("key");
                    let now_inside = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now_inside, Ordering::SeqCst);
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // then
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn it_does_not_block_different_keys() {
        // given
        let locks = Arc::new(KeyLocks::new());
        let _held = locks.lock("a");
        let (sender, receiver) = mpsc::channel();

        // when
        let other = Arc::clone(&locks);
        let handle = thread::spawn(move || {
            let guard = other.lock("b");
            sender.send(guard.key().to_owned()).unwrap();
        });

        // then
        let key = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(key, "b");
        handle.join().unwrap();
    }

    #[test]
    fn it_blocks_equal_keys_until_released() {
        // given
        let locks = Arc::new(KeyLocks::new());
        let held = locks.lock("a");
        let (sender, receiver) = mpsc::channel();

        // when
        let other = Arc::clone(&locks);
        let handle = thread::spawn(move || {
            let _guard = other.lock("a");
            sender.send(()).unwrap();
        });

        // then
        assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());
        drop(held);
        assert!(receiver.recv_timeout(Duration::from_secs(5)).is_ok());
        handle.join().unwrap();
        assert!(locks.is_empty());
    }

    #[test]
    fn it_reclaims_slots_once_unused() {
        // given
        let locks = KeyLocks::new();

        // when
        let first = locks.lock("a");
        let second = locks.lock("b");

        // then
        assert_eq!(locks.len(), 2);
        drop(first);
        assert_eq!(locks.len(), 1);
        drop(second);
        assert!(locks.is_empty());
    }

    #[test]
    fn it_keeps_the_slot_while_someone_waits() {
        // given
        let locks = Arc::new(KeyLocks::new());
        let held = locks.lock("a");
        let barrier = Arc::new(Barrier::new(2));

        // when
        let other = Arc::clone(&locks);
        let waiter_barrier = Arc::clone(&barrier);
        let handle = thread::spawn(move || {
            waiter_barrier.wait();
            let _guard = other.lock("a");
        });
        barrier.wait();
        // map, holder and its guard, plus the waiter's checkout
        while Arc::strong_count(&held.lock) < 4 {
            thread::yield_now();
        }
        drop(held);

        // then
        handle.join().unwrap();
        assert!(locks.is_empty());
    }

    #[test]
    fn it_tries_to_lock_without_blocking() {
        // given
        let locks = KeyLocks::new();
        let held = locks.lock("a");

        // when
        let contended = locks.try_lock("a");
        let free = locks.try_lock("b");

        // then
        assert!(contended.is_none());
        assert!(free.is_some());
        assert_eq!(locks.len(), 2);
        drop(held);
        drop(free);
        assert!(locks.is_empty());
    }

    #[test]
    fn it_releases_the_lock_on_panic() {
        // given
        let locks = Arc::new(KeyLocks::new());

        // when
        let panicking = Arc::clone(&locks);
        let result = thread::spawn(move || {
            let _guard = panicking.lock("a");
            panic!("loader blew up");
        })
        .join();

        // then
        assert!(result.is_err());
        assert!(locks.try_lock("a").is_some());
        assert!(locks.is_empty());
    }
}
