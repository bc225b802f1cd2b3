//! Dirty-work counters.
//!
//! The admission queue reports dirty-object, dirty-io, and dirty-byte deltas
//! through this seam at exactly the points it mutates its own accounting.
//! The sink is fire-and-forget: implementations must be infallible and must
//! never call back into the queue.

use std::sync::Mutex;

/// Sink for dirty-work counter deltas.
pub trait DirtyMetrics: Send + Sync {
    /// A new distinct object became dirty.
    fn object_dirtied(&self);
    /// A dirty object was flushed or cleared.
    fn object_cleared(&self);
    /// Operation units were added to the pending set.
    fn ios_dirtied(&self, ios: f64);
    /// Operation units left the pending set.
    fn ios_cleared(&self, ios: f64);
    /// Bytes were added to the pending set.
    fn bytes_dirtied(&self, bytes: u64);
    /// Bytes left the pending set.
    fn bytes_cleared(&self, bytes: u64);
}

/// Metrics sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl DirtyMetrics for NoopMetrics {
    fn object_dirtied(&self) {}
    fn object_cleared(&self) {}
    fn ios_dirtied(&self, _ios: f64) {}
    fn ios_cleared(&self, _ios: f64) {}
    fn bytes_dirtied(&self, _bytes: u64) {}
    fn bytes_cleared(&self, _bytes: u64) {}
}

/// Net dirty-work totals, as tracked by [`CounterMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DirtyTotals {
    /// Distinct dirty objects.
    pub objects: u64,
    /// Pending operation units.
    pub ios: f64,
    /// Pending dirty bytes.
    pub bytes: u64,
}

/// Metrics sink keeping net totals, for tests and simple embedders.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    totals: Mutex<DirtyTotals>,
}

impl CounterMetrics {
    /// Creates a sink with all totals at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current totals.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn totals(&self) -> DirtyTotals {
        *self.totals.lock().expect("metrics lock poisoned")
    }

    fn update(&self, apply: impl FnOnce(&mut DirtyTotals)) {
        apply(&mut self.totals.lock().expect("metrics lock poisoned"));
    }
}

impl DirtyMetrics for CounterMetrics {
    fn object_dirtied(&self) {
        self.update(|t| t.objects += 1);
    }

    fn object_cleared(&self) {
        self.update(|t| t.objects = t.objects.saturating_sub(1));
    }

    fn ios_dirtied(&self, ios: f64) {
        self.update(|t| t.ios += ios);
    }

    fn ios_cleared(&self, ios: f64) {
        self.update(|t| t.ios = (t.ios - ios).max(0.0));
    }

    fn bytes_dirtied(&self, bytes: u64) {
        self.update(|t| t.bytes += bytes);
    }

    fn bytes_cleared(&self, bytes: u64) {
        self.update(|t| t.bytes = t.bytes.saturating_sub(bytes));
    }
}
