use std::sync::atomic::{AtomicI64, Ordering};

/// A signed 64-bit counter that can be shared between threads.
///
/// Every operation is a single atomic instruction, so concurrent calls to
/// `incr` never lose updates and `value` never observes a torn value.
/// Arithmetic wraps on overflow.
pub struct AtomicCounter {
    value: AtomicI64,
}

impl AtomicCounter {
    pub const fn new() -> Self {
        AtomicCounter {
            value: AtomicI64::new(0),
        }
    }

    /// Add `delta` (which may be negative) to the counter
    pub fn incr(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::SeqCst);
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AtomicCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl std::fmt::Debug for AtomicCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicCounter")
            .field("value", &self.value())
            .finish()
    }
}
