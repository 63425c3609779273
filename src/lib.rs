//! Concurrency-safe counters: a plain atomic counter, and a rate counter that
//! reports the sum of its increments over a trailing window of time.

mod constants;
pub mod counter;
pub mod logging;
pub mod scheduler;
pub mod time;
pub mod timewheel;

pub use counter::AtomicCounter;
pub use scheduler::{Decrement, Scheduler, SchedulerError, TokioScheduler, WheelScheduler};
pub use time::ratecounter::RateCounter;
