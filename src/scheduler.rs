use crate::constants::{DEFAULT_TICK, DRIVER_THREAD_NAME};
use crate::counter::AtomicCounter;
use crate::timewheel::TimeWheel;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::Thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Something that can run a [`Decrement`] once `delay` has elapsed.
///
/// Implementations are called concurrently from every thread that increments
/// a rate counter. They may fire a decrement late, but never early.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, delay: Duration, decrement: Decrement);
}

/// A pending compensating decrement: undoes one increment on a counter.
///
/// Holds its own reference to the counter, so the counter stays alive until
/// every decrement scheduled against it has fired or been dropped.
#[derive(Debug)]
pub struct Decrement {
    counter: Arc<AtomicCounter>,
    delta: i64,
}

impl Decrement {
    pub fn new(counter: Arc<AtomicCounter>, delta: i64) -> Self {
        Decrement { counter, delta }
    }

    /// The increment this decrement undoes
    pub fn delta(&self) -> i64 {
        self.delta
    }

    pub fn fire(self) {
        // wrapping_neg(i64::MIN) == i64::MIN, which still cancels under wrapping addition
        self.counter.incr(self.delta.wrapping_neg());
    }
}

/// Process-wide [`WheelScheduler`], started on first use.
pub fn shared() -> Arc<dyn Scheduler> {
    static SHARED: OnceLock<Arc<WheelScheduler>> = OnceLock::new();
    let wheel = SHARED.get_or_init(|| {
        Arc::new(WheelScheduler::new().expect("failed to spawn time wheel driver thread"))
    });
    wheel.clone()
}

///
/// Runs decrements off a timing wheel, driven by one background thread.
///
/// The driver sleeps from tick to tick while there is anything in the wheel,
/// and parks when the wheel is empty. Each scheduled decrement costs one small
/// allocation in the wheel until it fires, so the memory held is proportional
/// to (increment rate) x (window length); see `pending()`.
///
/// Dropping the scheduler stops the driver and discards whatever is still pending.
///
pub struct WheelScheduler {
    shared: Arc<Shared>,
}

struct Shared {
    wheel: TimeWheel<Decrement>,
    driver: OnceLock<Thread>,
}

impl WheelScheduler {
    pub fn new() -> Result<WheelScheduler, SchedulerError> {
        Self::with_tick(DEFAULT_TICK)
    }

    pub fn with_tick(tick: Duration) -> Result<WheelScheduler, SchedulerError> {
        if tick.is_zero() {
            return Err(SchedulerError::ZeroTick);
        }
        let shared = Arc::new(Shared {
            wheel: TimeWheel::new(tick),
            driver: OnceLock::new(),
        });
        let weak = Arc::downgrade(&shared);
        let handle = std::thread::Builder::new()
            .name(DRIVER_THREAD_NAME.to_owned())
            .spawn(move || drive(weak, tick))?;
        let _ = shared.driver.set(handle.thread().clone());
        Ok(WheelScheduler { shared })
    }

    /// Number of decrements that have been scheduled but not yet fired
    pub fn pending(&self) -> usize {
        self.shared.wheel.len()
    }

    pub fn tick_duration(&self) -> Duration {
        self.shared.wheel.tick_duration()
    }
}

impl Shared {
    fn wake_driver(&self) {
        if let Some(driver) = self.driver.get() {
            driver.unpark();
        }
    }
}

// By the time this runs the driver can no longer upgrade its reference,
// so waking it up makes it exit.
impl Drop for Shared {
    fn drop(&mut self) {
        self.wake_driver();
    }
}

impl Scheduler for WheelScheduler {
    fn schedule(&self, delay: Duration, decrement: Decrement) {
        if self.shared.wheel.insert(Instant::now(), delay, decrement) {
            self.shared.wake_driver();
        }
    }
}

impl std::fmt::Debug for WheelScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WheelScheduler")
            .field("tick", &self.tick_duration())
            .field("pending", &self.pending())
            .finish()
    }
}

fn drive(shared: Weak<Shared>, tick: Duration) {
    debug!("Time wheel driver started, tick={:?}", tick);
    let mut next_tick = Instant::now() + tick;
    loop {
        let shared = match shared.upgrade() {
            Some(shared) => shared,
            None => break,
        };

        if shared.wheel.is_empty() {
            drop(shared);
            std::thread::park();
            next_tick = Instant::now() + tick;
            continue;
        }

        let now = Instant::now();
        if now < next_tick {
            std::thread::sleep(next_tick - now);
        }

        let due = shared.wheel.tick(Instant::now());
        if !due.is_empty() {
            trace!("Firing {} decrements, {} pending", due.len(), shared.wheel.len());
        }
        for decrement in due {
            decrement.fire();
        }
        next_tick += tick;
    }
    debug!("Time wheel driver stopped");
}

/// Runs each decrement as a task on a tokio runtime.
///
/// Tokio's own timer is a hierarchical wheel, so this is about as cheap as
/// the `WheelScheduler` but ties the decrements to the runtime's lifetime:
/// if the runtime shuts down, pending decrements are dropped without firing.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        TokioScheduler { handle }
    }

    /// Use the runtime we're currently running inside of
    pub fn current() -> Result<TokioScheduler, SchedulerError> {
        Ok(Self::new(tokio::runtime::Handle::try_current()?))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, decrement: Decrement) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            decrement.fire();
        });
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Tick duration must be nonzero")]
    ZeroTick,

    #[error("Unable to spawn driver thread: {0}")]
    DriverSpawn(
        #[source]
        #[from]
        std::io::Error,
    ),

    #[error("{0}")]
    NoRuntime(
        #[source]
        #[from]
        tokio::runtime::TryCurrentError,
    ),
}

#[cfg(test)]
mod test {
    use super::*;

    fn wait_for(counter: &AtomicCounter, expected: i64, limit: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if counter.value() == expected {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        counter.value() == expected
    }

    #[test]
    fn test_decrement_fire() {
        let c = Arc::new(AtomicCounter::new());
        c.incr(5);
        let d = Decrement::new(c.clone(), 5);
        assert_eq!(d.delta(), 5);
        d.fire();
        assert_eq!(c.value(), 0);
    }

    #[test]
    fn test_decrement_of_min_cancels() {
        let c = Arc::new(AtomicCounter::new());
        c.incr(i64::MIN);
        Decrement::new(c.clone(), i64::MIN).fire();
        assert_eq!(c.value(), 0);
    }

    #[test]
    fn test_zero_tick_rejected() {
        assert!(matches!(
            WheelScheduler::with_tick(Duration::ZERO),
            Err(SchedulerError::ZeroTick)
        ));
    }

    #[test]
    fn test_wheel_scheduler_fires_after_delay() {
        let scheduler = WheelScheduler::new().unwrap();
        let c = Arc::new(AtomicCounter::new());
        let start = Instant::now();
        c.incr(3);
        scheduler.schedule(Duration::from_millis(100), Decrement::new(c.clone(), 3));
        assert_eq!(scheduler.pending(), 1);

        assert!(wait_for(&c, 0, Duration::from_secs(2)));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_wheel_scheduler_wakes_after_idle() {
        let scheduler = WheelScheduler::with_tick(Duration::from_millis(2)).unwrap();
        let c = Arc::new(AtomicCounter::new());
        for _ in 0..3 {
            c.incr(1);
            scheduler.schedule(Duration::from_millis(10), Decrement::new(c.clone(), 1));
            assert!(wait_for(&c, 0, Duration::from_secs(2)));
            // let the driver go back to sleep on an empty wheel
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_zero_delay_inserts_racing_the_driver() {
        let scheduler = Arc::new(WheelScheduler::with_tick(Duration::from_millis(10)).unwrap());
        let counters: Vec<_> = (0..8).map(|_| Arc::new(AtomicCounter::new())).collect();
        let writers: Vec<_> = counters
            .iter()
            .map(|c| {
                let c = c.clone();
                let scheduler = scheduler.clone();
                std::thread::spawn(move || {
                    for _ in 0..20_000 {
                        c.incr(1);
                        scheduler.schedule(Duration::ZERO, Decrement::new(c.clone(), 1));
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        // a decrement dropped into a slot that was already drained would sit
        // there for a whole revolution, 2.56s with this tick
        let start = Instant::now();
        while counters.iter().any(|c| c.value() != 0) && start.elapsed() < Duration::from_secs(1) {
            std::thread::sleep(Duration::from_millis(5));
        }
        for c in &counters {
            assert_eq!(c.value(), 0);
        }
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_dropping_scheduler_releases_counter() {
        let scheduler = WheelScheduler::new().unwrap();
        let c = Arc::new(AtomicCounter::new());
        scheduler.schedule(Duration::from_secs(3600), Decrement::new(c.clone(), 1));
        assert_eq!(Arc::strong_count(&c), 2);
        drop(scheduler);

        // the driver may be mid-tick and holding the wheel for a moment longer
        let start = Instant::now();
        while Arc::strong_count(&c) > 1 && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(Arc::strong_count(&c), 1);
    }

    #[test]
    fn test_tokio_scheduler_outside_runtime() {
        assert!(matches!(
            TokioScheduler::current(),
            Err(SchedulerError::NoRuntime(_))
        ));
    }

    #[tokio::test]
    async fn test_tokio_scheduler_fires_after_delay() {
        let scheduler = TokioScheduler::current().unwrap();
        let c = Arc::new(AtomicCounter::new());
        c.incr(2);
        scheduler.schedule(Duration::from_millis(50), Decrement::new(c.clone(), 2));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(c.value(), 2);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(c.value(), 0);
    }
}
