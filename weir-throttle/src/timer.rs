//! One-shot timer service.
//!
//! The throttle arms a timer to release a delayed direction once its wait
//! expires. Timers sit behind the [`TimerService`] trait so production code
//! can run a real timer thread while tests fire callbacks deterministically.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// A boxed timer callback, invoked at most once.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// One-shot timer scheduling.
pub trait TimerService: Send + Sync {
    /// Invokes `callback` exactly once, at least `delay` after this call,
    /// on an arbitrary thread.
    ///
    /// After [`shutdown`](Self::shutdown) the callback is dropped without
    /// running.
    fn schedule_once(&self, delay: Duration, callback: TimerCallback);

    /// Cancels all pending callbacks and rejects new ones.
    ///
    /// Idempotent. Pending callbacks are dropped, never invoked late.
    fn shutdown(&self);
}

// -----------------------------------------------------------------------------
// ThreadTimer
// -----------------------------------------------------------------------------

/// An armed timer entry. Ordered by deadline, then arm order.
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct TimerState {
    queue: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// Timer service backed by a dedicated worker thread.
///
/// The worker sleeps until the earliest deadline, fires the callback on its
/// own thread, and goes back to sleep. Arming a timer never blocks on
/// callback execution.
pub struct ThreadTimer {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl ThreadTimer {
    /// Spawns the timer worker thread.
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                queue: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("weir-timer".to_owned())
            .spawn(move || Self::run(&worker_shared))
            .expect("failed to spawn timer thread");
        let worker_id = handle.thread().id();

        Self {
            shared,
            worker: Mutex::new(Some(handle)),
            worker_id,
        }
    }

    /// Worker loop: sleep to the earliest deadline, fire, repeat.
    fn run(shared: &TimerShared) {
        let mut state = shared.state.lock().expect("timer lock poisoned");
        loop {
            if state.shutdown {
                state.queue.clear();
                return;
            }

            let now = Instant::now();
            let next_deadline = state.queue.peek().map(|entry| entry.0.deadline);
            match next_deadline {
                None => {
                    state = shared.cond.wait(state).expect("timer lock poisoned");
                }
                Some(deadline) if deadline <= now => {
                    let entry = state.queue.pop().expect("peeked entry vanished").0;
                    // Fire outside the lock: the callback may re-arm.
                    drop(state);
                    (entry.callback)();
                    state = shared.state.lock().expect("timer lock poisoned");
                }
                Some(deadline) => {
                    let (guard, _) = shared
                        .cond
                        .wait_timeout(state, deadline - now)
                        .expect("timer lock poisoned");
                    state = guard;
                }
            }
        }
    }
}

impl Default for ThreadTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for ThreadTimer {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) {
        let mut state = self.shared.state.lock().expect("timer lock poisoned");
        if state.shutdown {
            warn!("timer armed after shutdown; callback dropped");
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Reverse(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
            callback,
        }));
        drop(state);
        self.shared.cond.notify_one();
    }

    fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().expect("timer lock poisoned");
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.shared.cond.notify_all();

        // Joining from the worker itself (a callback dropping the last
        // handle) would deadlock; the flag alone stops the loop there.
        if thread::current().id() != self.worker_id {
            if let Some(handle) = self.worker.lock().expect("timer lock poisoned").take() {
                let _ = handle.join();
            }
        }
        debug!("timer service shut down");
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// -----------------------------------------------------------------------------
// ManualTimer
// -----------------------------------------------------------------------------

/// Timer test double: records armed callbacks and fires them on demand.
///
/// Callbacks fire in arm order when [`fire_next`](Self::fire_next) or
/// [`fire_all`](Self::fire_all) is called, on the calling thread. This lets
/// tests walk the wait/release cycle one step at a time.
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    armed: VecDeque<(Duration, TimerCallback)>,
    shutdown: bool,
}

impl ManualTimer {
    /// Creates an empty manual timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of armed, unfired callbacks.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().expect("manual timer lock poisoned").armed.len()
    }

    /// Delay the earliest-armed callback was scheduled with.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn next_delay(&self) -> Option<Duration> {
        self.state
            .lock()
            .expect("manual timer lock poisoned")
            .armed
            .front()
            .map(|(delay, _)| *delay)
    }

    /// Fires the earliest-armed callback. Returns `false` if none is armed.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    pub fn fire_next(&self) -> bool {
        let entry = self
            .state
            .lock()
            .expect("manual timer lock poisoned")
            .armed
            .pop_front();
        match entry {
            Some((_, callback)) => {
                // Outside the lock: the callback may re-arm.
                callback();
                true
            }
            None => false,
        }
    }

    /// Fires every currently armed callback, in arm order.
    ///
    /// Callbacks armed *during* the sweep are left pending. Returns the
    /// number fired.
    ///
    /// # Panics
    /// Panics if the internal lock is poisoned.
    pub fn fire_all(&self) -> usize {
        let batch: Vec<TimerCallback> = {
            let mut state = self.state.lock().expect("manual timer lock poisoned");
            state.armed.drain(..).map(|(_, callback)| callback).collect()
        };
        let fired = batch.len();
        for callback in batch {
            callback();
        }
        fired
    }
}

impl TimerService for ManualTimer {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) {
        let mut state = self.state.lock().expect("manual timer lock poisoned");
        if state.shutdown {
            return;
        }
        state.armed.push_back((delay, callback));
    }

    fn shutdown(&self) {
        let mut state = self.state.lock().expect("manual timer lock poisoned");
        state.shutdown = true;
        state.armed.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn test_manual_timer_fires_in_arm_order() {
        let timer = ManualTimer::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            timer.schedule_once(
                Duration::from_secs(i),
                Box::new(move || order.lock().unwrap().push(i)),
            );
        }

        assert_eq!(timer.pending(), 3);
        assert_eq!(timer.next_delay(), Some(Duration::from_secs(0)));
        assert_eq!(timer.fire_all(), 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_manual_timer_shutdown_drops_pending() {
        let timer = ManualTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_cb = Arc::clone(&fired);
        timer.schedule_once(
            Duration::from_secs(1),
            Box::new(move || {
                fired_cb.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        );

        timer.shutdown();
        assert_eq!(timer.pending(), 0);
        assert!(!timer.fire_next());
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);

        // New arms after shutdown are dropped too.
        timer.schedule_once(Duration::ZERO, Box::new(|| {}));
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_manual_timer_callback_can_rearm() {
        let timer = Arc::new(ManualTimer::new());
        let rearm = Arc::clone(&timer);
        timer.schedule_once(
            Duration::ZERO,
            Box::new(move || rearm.schedule_once(Duration::ZERO, Box::new(|| {}))),
        );

        assert!(timer.fire_next());
        assert_eq!(timer.pending(), 1);
    }

    #[test]
    fn test_thread_timer_fires_callback() {
        let timer = ThreadTimer::new();
        let (tx, rx) = mpsc::channel();

        timer.schedule_once(
            Duration::from_millis(5),
            Box::new(move || {
                tx.send(()).unwrap();
            }),
        );

        rx.recv_timeout(Duration::from_secs(5))
            .expect("timer never fired");
    }

    #[test]
    fn test_thread_timer_fires_in_deadline_order() {
        let timer = ThreadTimer::new();
        let (tx, rx) = mpsc::channel();

        let tx_late = tx.clone();
        timer.schedule_once(
            Duration::from_millis(40),
            Box::new(move || {
                tx_late.send("late").unwrap();
            }),
        );
        timer.schedule_once(
            Duration::from_millis(5),
            Box::new(move || {
                tx.send("early").unwrap();
            }),
        );

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "early");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "late");
    }

    #[test]
    fn test_thread_timer_shutdown_drops_pending() {
        let timer = ThreadTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_cb = Arc::clone(&fired);
        timer.schedule_once(
            Duration::from_secs(3600),
            Box::new(move || {
                fired_cb.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        );

        timer.shutdown();
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);

        // Arming after shutdown is a no-op.
        timer.schedule_once(Duration::ZERO, Box::new(|| {}));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn test_thread_timer_shutdown_is_idempotent() {
        let timer = ThreadTimer::new();
        timer.shutdown();
        timer.shutdown();
    }
}
