//! Monotonic time sources.
//!
//! Leak decay in the throttle is a pure function of elapsed monotonic time.
//! Time is read through the `Clock` trait so tests can advance it by hand
//! instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic time source, in nanoseconds.
///
/// Implementations must never go backwards between two calls on the same
/// instance; callers measure elapsed time as the delta between samples.
pub trait Clock: Send + Sync {
    /// Returns the current monotonic time in nanoseconds.
    fn now_ns(&self) -> u64;
}

/// Wall clock backed by `std::time::Instant`, anchored at construction.
#[derive(Debug)]
pub struct MonotonicClock {
    anchor: Instant,
}

impl MonotonicClock {
    /// Creates a clock reading zero at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        // Saturates after ~584 years of uptime.
        u64::try_from(self.anchor.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Manually-advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    /// Creates a manual clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock by `delta_ns` nanoseconds.
    pub fn advance_ns(&self, delta_ns: u64) {
        self.now_ns.fetch_add(delta_ns, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    ///
    /// # Panics
    /// Panics if this would move the clock backwards.
    pub fn set_ns(&self, now_ns: u64) {
        let previous = self.now_ns.swap(now_ns, Ordering::SeqCst);
        assert!(previous <= now_ns, "manual clock moved backwards");
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}
