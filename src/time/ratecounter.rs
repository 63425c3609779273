use crate::counter::AtomicCounter;
use crate::scheduler::{self, Decrement, Scheduler};
use std::sync::Arc;
use std::time::Duration;

///
/// This object is for tracking how many events occurred within a trailing window of time. You
/// initialize it with the window length, and then every time an event happens, you call
/// ``incr()``. Any time you call ``rate()`` it will give you the sum of the deltas passed to
/// ``incr()`` over the last ``interval``.
///
/// No log of events is kept. Instead, every increment schedules its own compensating
/// decrement for ``interval`` later, and ``rate()`` is just a read of the running total.
/// The scheduler can fire a decrement a little late, but never early, so an event may be
/// counted slightly past the end of its window and is never dropped before it.
///
/// A zero ``interval`` is allowed: decrements are then fired as soon as the scheduler gets
/// to them, and the rate only reflects increments that are still in flight.
///
pub struct RateCounter {
    counter: Arc<AtomicCounter>,
    interval: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl RateCounter {
    /// Create a rate counter that uses the process-wide time wheel
    pub fn new(interval: Duration) -> RateCounter {
        Self::with_scheduler(interval, scheduler::shared())
    }

    pub fn with_scheduler(interval: Duration, scheduler: Arc<dyn Scheduler>) -> RateCounter {
        RateCounter {
            counter: Arc::new(AtomicCounter::new()),
            interval,
            scheduler,
        }
    }

    pub fn incr(&self, delta: i64) {
        self.counter.incr(delta);
        self.scheduler
            .schedule(self.interval, Decrement::new(self.counter.clone(), delta));
    }

    pub fn rate(&self) -> i64 {
        self.counter.value()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl std::fmt::Display for RateCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.rate())
    }
}

impl std::fmt::Debug for RateCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateCounter")
            .field("rate", &self.rate())
            .field("interval", &self.interval)
            .finish()
    }
}
