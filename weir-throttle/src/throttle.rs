//! Rate throttle over the six leaky buckets.
//!
//! `RateThrottle` performs the per-operation accounting, the wall-clock
//! decay, and the timer-based release of delayed directions. One exclusive
//! lock guards all mutable state; decay happens only in the timer path
//! (`schedule_timer` and the internal re-check when a timer fires), never
//! in `account`.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tracing::{debug, info};

use weir_core::{Clock, Error, Result};

use crate::bucket::{BucketKind, LeakyBucket, BUCKET_COUNT};
use crate::timer::TimerService;

/// Callback invoked to release a throttled direction once its wait expires.
///
/// Called on the timer thread, outside the throttle lock; it may re-enter
/// any public throttle operation.
pub type ReleaseFn = Arc<dyn Fn() + Send + Sync>;

const READ: usize = 0;
const WRITE: usize = 1;

const fn dir_index(is_write: bool) -> usize {
    if is_write {
        WRITE
    } else {
        READ
    }
}

const fn dir_name(is_write: bool) -> &'static str {
    if is_write {
        "write"
    } else {
        "read"
    }
}

/// All mutable throttle state, guarded by one lock.
struct ThrottleState {
    /// The six leaky buckets, indexed by [`BucketKind::index`].
    buckets: [LeakyBucket; BUCKET_COUNT],
    /// Reference I/O size in bytes; sizes above it count as fractional ops.
    op_size: u64,
    /// Monotonic timestamp of the last decay pass.
    previous_leak_ns: u64,
    /// True iff any bucket has a non-zero sustained rate.
    enabled: bool,
    /// Whether a release timer is already armed, per direction.
    timer_pending: [bool; 2],
    /// Release hooks, per direction.
    release: [Option<ReleaseFn>; 2],
}

/// Leaky-bucket rate throttle for one I/O endpoint.
///
/// # Usage
///
/// The I/O path calls [`account`](Self::account) for every operation, then
/// [`schedule_timer`](Self::schedule_timer); a `true` return means the
/// operation must park until the direction's release hook fires. When the
/// armed timer expires the throttle re-checks the buckets under its own
/// lock: if decay has caught up it invokes the release hook, otherwise it
/// re-arms for the remaining wait.
///
/// # Thread safety
///
/// All operations serialize on one internal lock. The timer callback
/// re-enters through that same lock on the timer thread, so release hooks
/// are always invoked with the lock released.
pub struct RateThrottle {
    state: Mutex<ThrottleState>,
    timer: Arc<dyn TimerService>,
    clock: Arc<dyn Clock>,
}

impl RateThrottle {
    /// Creates a throttle with all buckets disabled.
    ///
    /// `op_size` is the reference I/O size in bytes used to convert
    /// byte-sized operations into fractional operation units; zero disables
    /// the conversion (every operation counts as one unit).
    #[must_use]
    pub fn new(
        op_size: u64,
        timer: Arc<dyn TimerService>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let previous_leak_ns = clock.now_ns();
        Arc::new(Self {
            state: Mutex::new(ThrottleState {
                buckets: [LeakyBucket::default(); BUCKET_COUNT],
                op_size,
                previous_leak_ns,
                enabled: false,
                timer_pending: [false; 2],
                release: [None, None],
            }),
            timer,
            clock,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().expect("throttle lock poisoned")
    }

    /// Configures one bucket's sustained rate and burst capacity.
    ///
    /// A zero `avg` or `max` leaves the corresponding committed field
    /// unchanged. On success the committed burst capacity is raised to at
    /// least the sustained rate: a non-zero rate with no burst room would
    /// throttle every operation.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `avg` or `max` is negative or
    ///   non-finite.
    /// - [`Error::ConflictingLimits`] if the change would give a total
    ///   bucket and a per-direction bucket of the same family non-zero
    ///   limits simultaneously.
    ///
    /// Rejection leaves all state untouched.
    pub fn configure(&self, kind: BucketKind, avg: f64, max: f64) -> Result<()> {
        if !avg.is_finite() || avg < 0.0 {
            return Err(Error::InvalidArgument {
                name: "avg",
                reason: "must be non-negative and finite",
            });
        }
        if !max.is_finite() || max < 0.0 {
            return Err(Error::InvalidArgument {
                name: "max",
                reason: "must be non-negative and finite",
            });
        }

        let mut state = self.lock();

        // Trial copy: commit is all-or-nothing.
        let mut trial = state.buckets;
        if avg != 0.0 {
            trial[kind.index()].avg = avg;
        }
        if max != 0.0 {
            trial[kind.index()].max = max;
        }
        if let Some(family) = conflicting(&trial) {
            return Err(Error::ConflictingLimits { family });
        }

        state.buckets[kind.index()].avg = trial[kind.index()].avg;
        state.buckets[kind.index()].max = trial[kind.index()].avg.max(trial[kind.index()].max);
        state.enabled = state.buckets.iter().any(|bucket| bucket.avg > 0.0);

        info!(
            ?kind,
            avg = state.buckets[kind.index()].avg,
            max = state.buckets[kind.index()].max,
            enabled = state.enabled,
            "throttle configured"
        );
        Ok(())
    }

    /// Returns a copy of all six buckets.
    ///
    /// Read-only: no decay is performed, so levels reflect the last decay
    /// pass plus accounting since.
    #[must_use]
    pub fn config_snapshot(&self) -> [LeakyBucket; BUCKET_COUNT] {
        self.lock().buckets
    }

    /// True iff any bucket has a non-zero sustained rate.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Sets the reference I/O size in bytes.
    pub fn set_op_size(&self, op_size: u64) {
        self.lock().op_size = op_size;
    }

    /// Returns the reference I/O size in bytes.
    #[must_use]
    pub fn op_size(&self) -> u64 {
        self.lock().op_size
    }

    /// Accounts one operation against the buckets.
    ///
    /// Adds the byte count to the total and direction byte buckets, and the
    /// operation's unit count to the total and direction ops buckets. An
    /// operation larger than `op_size` contributes `size / op_size`
    /// fractional units; otherwise exactly one unit. No decay happens here.
    #[allow(clippy::cast_precision_loss)] // I/O sizes are far below 2^53.
    pub fn account(&self, is_write: bool, size_bytes: u64) {
        let mut state = self.lock();

        let units = if state.op_size == 0 || size_bytes <= state.op_size {
            1.0
        } else {
            size_bytes as f64 / state.op_size as f64
        };
        let size = size_bytes as f64;

        state.buckets[BucketKind::BpsTotal.index()].level += size;
        state.buckets[BucketKind::OpsTotal.index()].level += units;
        if is_write {
            state.buckets[BucketKind::BpsWrite.index()].level += size;
            state.buckets[BucketKind::OpsWrite.index()].level += units;
        } else {
            state.buckets[BucketKind::BpsRead.index()].level += size;
            state.buckets[BucketKind::OpsRead.index()].level += units;
        }
    }

    /// Decays all buckets, then arms a release timer if the direction must
    /// wait.
    ///
    /// Returns `false` when no throttling is needed and the operation may
    /// proceed immediately. Returns `true` when the caller must park until
    /// the direction's release hook fires; if a timer is already pending
    /// for the direction none is re-armed.
    pub fn schedule_timer(self: &Arc<Self>, is_write: bool) -> bool {
        let mut state = self.lock();
        self.leak_all(&mut state);

        let wait_secs = compute_wait_for(&state.buckets, is_write);
        if wait_secs == 0.0 {
            return false;
        }

        self.arm(&mut state, is_write, wait_secs);
        true
    }

    /// Registers the release hooks invoked when each direction's timer
    /// expires with no remaining wait. Previously attached hooks are
    /// dropped.
    pub fn attach_release(&self, reader: ReleaseFn, writer: ReleaseFn) {
        let mut state = self.lock();
        state.release = [Some(reader), Some(writer)];
    }

    /// Shuts down the timer service; pending release timers never fire.
    pub fn shutdown(&self) {
        self.timer.shutdown();
    }

    /// Arms the direction's release timer. Caller holds the lock.
    fn arm(self: &Arc<Self>, state: &mut ThrottleState, is_write: bool, wait_secs: f64) {
        let dir = dir_index(is_write);
        if state.timer_pending[dir] {
            return;
        }
        state.timer_pending[dir] = true;

        debug!(
            direction = dir_name(is_write),
            wait_secs, "arming throttle release timer"
        );
        let this = Arc::downgrade(self);
        self.timer.schedule_once(
            Duration::from_secs_f64(wait_secs),
            Box::new(move || Self::timer_fired(&this, is_write)),
        );
    }

    /// Timer expiry path: re-check the direction and either release or
    /// re-arm.
    ///
    /// Runs on the timer thread. Re-enters through the public lock, so a
    /// concurrently running `account` or `configure` serializes cleanly
    /// against it. The release hook is invoked only after the lock is
    /// dropped.
    fn timer_fired(this: &Weak<Self>, is_write: bool) {
        let Some(throttle) = this.upgrade() else {
            return; // Throttle torn down while the timer was in flight.
        };

        let release = {
            let mut state = throttle.lock();
            state.timer_pending[dir_index(is_write)] = false;
            throttle.leak_all(&mut state);

            let wait_secs = compute_wait_for(&state.buckets, is_write);
            if wait_secs > 0.0 {
                // Decay has not caught up yet; keep the caller parked.
                throttle.arm(&mut state, is_write, wait_secs);
                return;
            }
            state.release[dir_index(is_write)].clone()
        };

        if let Some(release) = release {
            debug!(direction = dir_name(is_write), "releasing throttled direction");
            release();
        }
    }

    /// Leaks every bucket by the time elapsed since the previous pass.
    /// Caller holds the lock. A zero delta performs no leak.
    fn leak_all(&self, state: &mut ThrottleState) {
        let now_ns = self.clock.now_ns();
        let elapsed_ns = now_ns.saturating_sub(state.previous_leak_ns);
        state.previous_leak_ns = now_ns;
        if elapsed_ns == 0 {
            return;
        }
        for bucket in &mut state.buckets {
            bucket.leak(elapsed_ns);
        }
    }
}

impl Drop for RateThrottle {
    fn drop(&mut self) {
        self.timer.shutdown();
    }
}

/// Returns the family name of a conflicting configuration, if any.
///
/// A total bucket and a per-direction bucket of the same family may not both
/// carry a non-zero `avg`, nor both a non-zero `max`.
fn conflicting(buckets: &[LeakyBucket; BUCKET_COUNT]) -> Option<&'static str> {
    let avg = |kind: BucketKind| buckets[kind.index()].avg != 0.0;
    let max = |kind: BucketKind| buckets[kind.index()].max != 0.0;

    let bps_conflict = (avg(BucketKind::BpsTotal)
        && (avg(BucketKind::BpsRead) || avg(BucketKind::BpsWrite)))
        || (max(BucketKind::BpsTotal) && (max(BucketKind::BpsRead) || max(BucketKind::BpsWrite)));
    if bps_conflict {
        return Some("bps");
    }

    let ops_conflict = (avg(BucketKind::OpsTotal)
        && (avg(BucketKind::OpsRead) || avg(BucketKind::OpsWrite)))
        || (max(BucketKind::OpsTotal) && (max(BucketKind::OpsRead) || max(BucketKind::OpsWrite)));
    if ops_conflict {
        return Some("ops");
    }

    None
}

/// Maximum wait across the four buckets gating one direction.
fn compute_wait_for(buckets: &[LeakyBucket; BUCKET_COUNT], is_write: bool) -> f64 {
    BucketKind::checked_for(is_write)
        .iter()
        .map(|kind| buckets[kind.index()].compute_wait())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use weir_core::ManualClock;

    use super::*;
    use crate::timer::ManualTimer;

    fn throttle_with(op_size: u64) -> (Arc<RateThrottle>, Arc<ManualTimer>, Arc<ManualClock>) {
        let timer = Arc::new(ManualTimer::new());
        let clock = Arc::new(ManualClock::new());
        let throttle = RateThrottle::new(
            op_size,
            Arc::clone(&timer) as Arc<dyn TimerService>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (throttle, timer, clock)
    }

    #[test]
    fn test_disabled_by_default() {
        let (throttle, _timer, _clock) = throttle_with(0);
        assert!(!throttle.enabled());
        assert!(!throttle.schedule_timer(false));
        assert!(!throttle.schedule_timer(true));
    }

    #[test]
    fn test_configure_enables() {
        let (throttle, _timer, _clock) = throttle_with(0);
        throttle
            .configure(BucketKind::BpsTotal, 100.0, 200.0)
            .unwrap();
        assert!(throttle.enabled());

        let snapshot = throttle.config_snapshot();
        assert_eq!(snapshot[BucketKind::BpsTotal.index()].avg, 100.0);
        assert_eq!(snapshot[BucketKind::BpsTotal.index()].max, 200.0);
    }

    #[test]
    fn test_configure_rejects_negative() {
        let (throttle, _timer, _clock) = throttle_with(0);
        assert!(matches!(
            throttle.configure(BucketKind::BpsTotal, -1.0, 0.0),
            Err(Error::InvalidArgument { name: "avg", .. })
        ));
        assert!(matches!(
            throttle.configure(BucketKind::BpsTotal, 1.0, -1.0),
            Err(Error::InvalidArgument { name: "max", .. })
        ));
        assert!(!throttle.enabled());
    }

    #[test]
    fn test_configure_max_auto_raised_to_avg() {
        let (throttle, _timer, _clock) = throttle_with(0);
        throttle
            .configure(BucketKind::OpsWrite, 50.0, 0.0)
            .unwrap();

        let snapshot = throttle.config_snapshot();
        assert_eq!(snapshot[BucketKind::OpsWrite.index()].avg, 50.0);
        assert_eq!(snapshot[BucketKind::OpsWrite.index()].max, 50.0);
    }

    #[test]
    fn test_conflict_total_then_direction() {
        let (throttle, _timer, _clock) = throttle_with(0);
        throttle
            .configure(BucketKind::BpsTotal, 100.0, 0.0)
            .unwrap();

        let err = throttle
            .configure(BucketKind::BpsRead, 50.0, 0.0)
            .unwrap_err();
        assert_eq!(err, Error::ConflictingLimits { family: "bps" });

        // Rejection left the read bucket untouched.
        let snapshot = throttle.config_snapshot();
        assert_eq!(snapshot[BucketKind::BpsRead.index()].avg, 0.0);
    }

    #[test]
    fn test_conflict_max_only() {
        let (throttle, _timer, _clock) = throttle_with(0);
        throttle
            .configure(BucketKind::OpsTotal, 10.0, 20.0)
            .unwrap();
        let err = throttle
            .configure(BucketKind::OpsWrite, 0.0, 5.0)
            .unwrap_err();
        assert_eq!(err, Error::ConflictingLimits { family: "ops" });
    }

    #[test]
    fn test_per_direction_without_total_is_fine() {
        let (throttle, _timer, _clock) = throttle_with(0);
        throttle
            .configure(BucketKind::OpsRead, 100.0, 0.0)
            .unwrap();
        throttle
            .configure(BucketKind::OpsWrite, 100.0, 0.0)
            .unwrap();
        // Byte family is independent of the ops family.
        throttle
            .configure(BucketKind::BpsTotal, 1000.0, 0.0)
            .unwrap();
    }

    #[test]
    fn test_account_byte_levels() {
        let (throttle, _timer, _clock) = throttle_with(0);
        throttle
            .configure(BucketKind::BpsTotal, 150.0, 15.0)
            .unwrap();

        throttle.account(true, 512);
        throttle.account(false, 512);

        let snapshot = throttle.config_snapshot();
        assert_eq!(snapshot[BucketKind::BpsTotal.index()].level, 1024.0);
        assert_eq!(snapshot[BucketKind::BpsRead.index()].level, 512.0);
        assert_eq!(snapshot[BucketKind::BpsWrite.index()].level, 512.0);
    }

    #[test]
    fn test_account_fractional_op_units() {
        let op_size = 13 * 512;
        let (throttle, _timer, _clock) = throttle_with(op_size);

        throttle.account(true, 64 * 512);
        throttle.account(false, 64 * 512);

        let units = 64.0 / 13.0;
        let snapshot = throttle.config_snapshot();
        assert!((snapshot[BucketKind::OpsWrite.index()].level - units).abs() < 1e-9);
        assert!((snapshot[BucketKind::OpsRead.index()].level - units).abs() < 1e-9);
        assert!((snapshot[BucketKind::OpsTotal.index()].level - 2.0 * units).abs() < 1e-9);
    }

    #[test]
    fn test_account_small_op_is_one_unit() {
        let (throttle, _timer, _clock) = throttle_with(13 * 512);
        throttle.account(false, 512);

        let snapshot = throttle.config_snapshot();
        assert_eq!(snapshot[BucketKind::OpsRead.index()].level, 1.0);
        assert_eq!(snapshot[BucketKind::OpsTotal.index()].level, 1.0);
        // Byte buckets always take the raw size.
        assert_eq!(snapshot[BucketKind::BpsRead.index()].level, 512.0);
    }

    #[test]
    fn test_schedule_timer_arms_once() {
        let (throttle, timer, _clock) = throttle_with(0);
        throttle
            .configure(BucketKind::BpsWrite, 100.0, 10.0)
            .unwrap();

        throttle.account(true, 1000);
        assert!(throttle.schedule_timer(true));
        assert_eq!(timer.pending(), 1);

        // A second throttled call reuses the pending timer.
        assert!(throttle.schedule_timer(true));
        assert_eq!(timer.pending(), 1);

        // The read direction is not throttled by write buckets.
        assert!(!throttle.schedule_timer(false));
    }

    #[test]
    fn test_timer_release_after_decay() {
        let (throttle, timer, clock) = throttle_with(0);
        throttle
            .configure(BucketKind::BpsWrite, 100.0, 10.0)
            .unwrap();
        let released = Arc::new(Mutex::new(0_u32));
        let on_release = Arc::clone(&released);
        throttle.attach_release(
            Arc::new(|| {}),
            Arc::new(move || {
                *on_release.lock().unwrap() += 1;
            }),
        );

        throttle.account(true, 110);
        assert!(throttle.schedule_timer(true));
        // (110 - 10) / 100 = 1 second of decay needed.
        assert_eq!(timer.next_delay(), Some(Duration::from_secs_f64(1.0)));

        clock.advance_ns(1_000_000_000);
        assert!(timer.fire_next());

        assert_eq!(*released.lock().unwrap(), 1);
        assert_eq!(timer.pending(), 0);
        // Fully decayed: no further throttling.
        assert!(!throttle.schedule_timer(true));
    }

    #[test]
    fn test_timer_rearms_when_still_over_cap() {
        let (throttle, timer, clock) = throttle_with(0);
        throttle
            .configure(BucketKind::BpsWrite, 100.0, 10.0)
            .unwrap();
        let released = Arc::new(Mutex::new(0_u32));
        let on_release = Arc::clone(&released);
        throttle.attach_release(
            Arc::new(|| {}),
            Arc::new(move || {
                *on_release.lock().unwrap() += 1;
            }),
        );

        throttle.account(true, 210);
        assert!(throttle.schedule_timer(true));

        // Fire early: only half the needed decay has elapsed.
        clock.advance_ns(1_000_000_000);
        assert!(timer.fire_next());
        assert_eq!(*released.lock().unwrap(), 0);
        assert_eq!(timer.pending(), 1);

        // Remaining wait shrank to (210 - 100 - 10) / 100 = 1 second.
        assert_eq!(timer.next_delay(), Some(Duration::from_secs_f64(1.0)));
        clock.advance_ns(1_000_000_000);
        assert!(timer.fire_next());
        assert_eq!(*released.lock().unwrap(), 1);
    }

    #[test]
    fn test_attach_release_replaces_previous() {
        let (throttle, timer, clock) = throttle_with(0);
        throttle
            .configure(BucketKind::OpsRead, 1.0, 1.0)
            .unwrap();

        let first = Arc::new(Mutex::new(0_u32));
        let second = Arc::new(Mutex::new(0_u32));
        let on_first = Arc::clone(&first);
        throttle.attach_release(
            Arc::new(move || {
                *on_first.lock().unwrap() += 1;
            }),
            Arc::new(|| {}),
        );
        let on_second = Arc::clone(&second);
        throttle.attach_release(
            Arc::new(move || {
                *on_second.lock().unwrap() += 1;
            }),
            Arc::new(|| {}),
        );

        throttle.account(false, 1);
        throttle.account(false, 1);
        assert!(throttle.schedule_timer(false));

        clock.advance_ns(10_000_000_000);
        assert!(timer.fire_next());

        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
    }

    #[test]
    fn test_drop_shuts_down_timer() {
        let (throttle, timer, _clock) = throttle_with(0);
        throttle
            .configure(BucketKind::BpsTotal, 100.0, 10.0)
            .unwrap();
        throttle.account(true, 1000);
        assert!(throttle.schedule_timer(true));
        assert_eq!(timer.pending(), 1);

        // Teardown shuts the timer service down; the armed release never
        // fires.
        drop(throttle);
        assert_eq!(timer.pending(), 0);
        assert!(!timer.fire_next());
    }

    #[test]
    fn test_zero_elapsed_decay_is_idempotent() {
        let (throttle, _timer, _clock) = throttle_with(0);
        throttle
            .configure(BucketKind::BpsTotal, 100.0, 1000.0)
            .unwrap();
        throttle.account(true, 500);

        // No time passes between calls: levels must not move.
        assert!(!throttle.schedule_timer(true));
        let first = throttle.config_snapshot();
        assert!(!throttle.schedule_timer(true));
        let second = throttle.config_snapshot();
        assert_eq!(
            first[BucketKind::BpsTotal.index()].level,
            second[BucketKind::BpsTotal.index()].level
        );
    }
}
