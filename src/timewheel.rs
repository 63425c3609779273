use crate::constants::NUM_SLOTS;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

// The cursor is a u8 and slot indices wrap with it.
const _: () = assert!(NUM_SLOTS == 256);

// Anything longer than this is treated as this long.
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug)]
struct Timer<Entry> {
    deadline: Instant,
    rounds: u64,
    entry: Entry,
}

/// Hashed timing wheel. Entries are bucketed by the tick on which they
/// become due; delays longer than one revolution wait out extra `rounds`.
///
/// The wheel doesn't know what time it is. Whoever drives it calls `tick`
/// once per `tick_duration`, and entries are only handed back once their
/// deadline has actually passed, so a driver that runs fast (or an insert
/// that races with a tick) can make entries late but never early.
#[derive(Debug)]
pub struct TimeWheel<Entry> {
    current: AtomicU8,
    slots: Vec<Mutex<Vec<Timer<Entry>>>>,
    tick: Duration,
    len: AtomicUsize,
}

impl<Entry> TimeWheel<Entry> {
    /// Create a new empty TimeWheel. Panics if `tick` is zero.
    pub fn new(tick: Duration) -> Self {
        assert!(!tick.is_zero(), "tick duration must be nonzero");
        TimeWheel {
            slots: std::iter::from_fn(|| Some(Mutex::new(Vec::new())))
                .take(NUM_SLOTS)
                .collect(),
            current: AtomicU8::new(0u8),
            tick,
            len: AtomicUsize::new(0),
        }
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick
    }

    /// Time covered by one full revolution of the wheel
    pub fn horizon(&self) -> Duration {
        self.tick.saturating_mul(NUM_SLOTS as u32)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an entry into the wheel, due `delay` after `now`. Returns true
    /// if the wheel was empty before this insert.
    pub fn insert(&self, now: Instant, delay: Duration, e: Entry) -> bool {
        let delay = delay.min(MAX_DELAY);
        let was_empty = self.len.fetch_add(1, Ordering::SeqCst) == 0;
        self.place(delay, now + delay, e);
        was_empty
    }

    /// Move the wheel by one tick and return all entries that are due at `now`
    pub fn tick(&self, now: Instant) -> Vec<Entry> {
        let old = self.current.fetch_add(1u8, Ordering::SeqCst);
        let index = old.wrapping_add(1u8) as usize;

        let mut due = Vec::new();
        let mut not_yet = Vec::new();
        {
            let mut slot = self.slots[index]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for mut timer in std::mem::take(&mut *slot) {
                if timer.rounds > 0 {
                    timer.rounds -= 1;
                    slot.push(timer);
                } else if timer.deadline > now {
                    not_yet.push(timer);
                } else {
                    due.push(timer.entry);
                }
            }
        }

        for timer in not_yet {
            self.place(timer.deadline - now, timer.deadline, timer.entry);
        }
        self.len.fetch_sub(due.len(), Ordering::SeqCst);
        due
    }

    fn place(&self, delay: Duration, deadline: Instant, entry: Entry) {
        // One extra tick because the current tick is already partly over, and
        // never the very next slot: a concurrent tick may already be draining it.
        let ticks = (delay.as_nanos().div_ceil(self.tick.as_nanos()).max(1) + 1) as u64;
        let rounds = (ticks - 1) / NUM_SLOTS as u64;
        let offset = (ticks % NUM_SLOTS as u64) as u8;
        let index = self.current.load(Ordering::SeqCst).wrapping_add(offset) as usize;

        self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Timer {
                deadline,
                rounds,
                entry,
            });
    }
}
