//! Cache-stampede avoidance for expensive, deterministic computations.
//!
//! When many threads ask for the same value and its cached copy has just expired, only one of
//! them recomputes it. The others keep receiving the stale copy or wait for the recomputation
//! instead of all hitting the slow backend at once.
//!
//! Every entry carries two deadlines:
//!
//! - the *soft expiration*, after which the value is stale and due for recomputation,
//! - the *hard expiration*, after which the backing store drops it.
//!
//! The first reader that sees a stale entry pushes its hard expiration out by the extra
//! expiration window and then competes for the key's lock. The lock holder recomputes the value;
//! everybody queued behind it re-reads the store and picks up the fresh value instead of
//! computing it again.
//!
//! # Features
//!
//! - Lock-free fast path for fresh entries
//! - One recomputation per key and staleness episode, independent keys never contend
//! - Pluggable backing store via [`EntryStore`], with the sharded [`MemoryStore`] included
//! - Loader errors are returned to the caller, the stale entry is kept for the next attempt
//! - No unsafe code
//!
//! # Examples
//!
//! ```rust
//! use stampede_cache::{Config, MemoryStore, StampedeCache};
//! use std::convert::Infallible;
//!
//! let cache = StampedeCache::new(MemoryStore::new(), Config::default())?;
//!
//! // The loader only runs on a miss or once the entry turned stale.
//! let value = cache.get_data("report-2024", || {
//!     Ok::<_, Infallible>(String::from("expensive result"))
//! })?;
//! assert_eq!(value, "expensive result");
//!
//! let cached = cache.get_data("report-2024", || -> Result<String, Infallible> {
//!     unreachable!("the entry is still fresh")
//! })?;
//! assert_eq!(cached, "expensive result");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Sharing one cache between threads:
//!
//! ```rust
//! use stampede_cache::{Config, MemoryStore, StampedeCache};
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::thread;
//!
//! let cache: Arc<StampedeCache<u64>> =
//!     Arc::new(StampedeCache::new(MemoryStore::new(), Config::from_secs(30, 5)).unwrap());
//! let loads = Arc::new(AtomicUsize::new(0));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let cache = Arc::clone(&cache);
//!         let loads = Arc::clone(&loads);
//!         thread::spawn(move || {
//!             cache
//!                 .get_data("answer", || {
//!                     loads.fetch_add(1, Ordering::SeqCst);
//!                     Ok::<_, Infallible>(42)
//!                 })
//!                 .unwrap()
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     assert_eq!(handle.join().unwrap(), 42);
//! }
//! assert_eq!(loads.load(Ordering::SeqCst), 1);
//! ```
//!
//! Configuration can be deserialized, durations are written in a human-readable form:
//!
//! ```rust
//! use stampede_cache::{Config, Priority};
//! use std::time::Duration;
//!
//! let config: Config = serde_yaml::from_str("base_expiration: 5m\npriority: high").unwrap();
//! assert_eq!(config.base_expiration, Duration::from_secs(300));
//! assert_eq!(config.extra_expiration_window, Duration::from_secs(10));
//! assert_eq!(config.priority, Priority::High);
//! ```

#![forbid(unsafe_code)]
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod lock;
pub mod store;

pub use cache::StampedeCache;
pub use cache::stats::Stats;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError, Priority};
pub use error::{Error, StoreError};
pub use key::{CacheKey, CachedMethod};
pub use lock::{KeyLockGuard, KeyLocks};
pub use store::{BumpOutcome, CacheEntry, EntryStore, MemoryStore, StoreStats};

pub(crate) type RandomState = ahash::RandomState;
