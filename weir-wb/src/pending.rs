//! Coalesced pending-write record.

/// Accumulated, not-yet-flushed work for one object.
///
/// Repeated writes to the same object merge into a single record before the
/// flusher sees it: accounting stays proportional to distinct dirty objects,
/// not raw write call count, and the flusher persists each object once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingWrite {
    /// Accumulated operation units.
    pub ios: f64,
    /// Accumulated dirty bytes.
    pub size: u64,
    /// Whether any contributing write asked for its cache pages to be
    /// dropped after flush. The queue only carries the flag; acting on it
    /// is the flusher's business.
    pub nocache: bool,
}

impl PendingWrite {
    /// Record for the first write to an object.
    #[must_use]
    pub const fn new(len: u64, nocache: bool) -> Self {
        Self {
            ios: 1.0,
            size: len,
            nocache,
        }
    }

    /// Folds one more write into the record.
    pub fn merge(&mut self, len: u64, nocache: bool) {
        self.ios += 1.0;
        self.size += len;
        self.nocache |= nocache;
    }
}
