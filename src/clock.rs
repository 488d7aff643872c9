use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the current time for expiration checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time backed by [`Instant::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Share it between a [`crate::StampedeCache`] and its store by wrapping it in an
/// [`Arc`], then travel through time with [`ManualClock::advance`].
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            origin,
            now: Mutex::new(origin),
        }
    }

    /// The instant this clock started at.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Moves the clock to `origin + offset`. Moving backwards is allowed.
    pub fn set(&self, offset: Duration) {
        *self.now.lock() = self.origin + offset;
    }

    pub fn elapsed(&self) -> Duration {
        self.now.lock().duration_since(self.origin)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

impl<C> Clock for Arc<C>
where
    C: Clock + ?Sized,
{
    fn now(&self) -> Instant {
        (**self).now()
    }
}
