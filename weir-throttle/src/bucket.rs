//! Leaky bucket primitive.
//!
//! A leaky bucket fills as operations are accounted and drains at a fixed
//! sustained rate. The `max` field is a pool of work the caller may issue
//! without being throttled at all; throttling engages once the level exceeds
//! it, and the required wait is exactly the decay time back to the cap.

/// Nanoseconds per second, for rate math.
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Number of throttled metrics.
pub const BUCKET_COUNT: usize = 6;

/// The six throttled metrics: bytes and operations, each total/read/write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    /// Combined byte throughput.
    BpsTotal,
    /// Read byte throughput.
    BpsRead,
    /// Write byte throughput.
    BpsWrite,
    /// Combined operation rate.
    OpsTotal,
    /// Read operation rate.
    OpsRead,
    /// Write operation rate.
    OpsWrite,
}

impl BucketKind {
    /// All bucket kinds, in storage order.
    pub const ALL: [Self; BUCKET_COUNT] = [
        Self::BpsTotal,
        Self::BpsRead,
        Self::BpsWrite,
        Self::OpsTotal,
        Self::OpsRead,
        Self::OpsWrite,
    ];

    /// Index of this kind into a bucket array.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The four buckets that can delay an operation in one direction.
    ///
    /// A read is gated by the two total buckets plus the two read buckets;
    /// a write by the totals plus the two write buckets.
    #[must_use]
    pub const fn checked_for(is_write: bool) -> [Self; 4] {
        if is_write {
            [Self::BpsTotal, Self::OpsTotal, Self::BpsWrite, Self::OpsWrite]
        } else {
            [Self::BpsTotal, Self::OpsTotal, Self::BpsRead, Self::OpsRead]
        }
    }
}

/// Per-metric leaky bucket state.
///
/// All fields are non-negative. `avg == 0` disables the bucket entirely:
/// it never produces a wait, regardless of level.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LeakyBucket {
    /// Sustained rate in units per second.
    pub avg: f64,
    /// Burst capacity in units.
    pub max: f64,
    /// Current fill level in units.
    pub level: f64,
}

impl LeakyBucket {
    /// Drains the bucket proportionally to elapsed time.
    ///
    /// Never drives the level below zero; a zero delta is a no-op.
    #[allow(clippy::cast_precision_loss)] // Elapsed deltas are far below 2^53 ns.
    pub fn leak(&mut self, elapsed_ns: u64) {
        let leaked = self.avg * (elapsed_ns as f64) / NANOS_PER_SEC;
        self.level = (self.level - leaked).max(0.0);
    }

    /// Seconds of decay needed before the level is back under the burst cap.
    ///
    /// Returns `0.0` when the bucket is disabled (`avg == 0`) or the level
    /// is already at or under the cap; the operation may proceed.
    #[must_use]
    pub fn compute_wait(&self) -> f64 {
        if self.avg == 0.0 {
            return 0.0;
        }
        // Extra units blocking the I/O, beyond the burst pool.
        let extra = self.level - self.max;
        if extra <= 0.0 {
            return 0.0;
        }
        extra / self.avg
    }
}
