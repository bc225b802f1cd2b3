//! The write-back admission queue.
//!
//! Producers report dirty writes through [`WriteBackQueue::enqueue`]; a
//! dedicated flusher thread blocks in [`WriteBackQueue::dequeue_next`] until
//! pending work exceeds a soft limit, then drains the least-recently-queued
//! object. Repeated writes to one object coalesce into a single pending
//! record, so the flusher persists each dirty object once.
//!
//! One mutex guards the map, the LRU ordering, and the counters; one condvar
//! carries the wake protocol. Blocking is deliberate: the queue batches work
//! under light load and applies backpressure under heavy load, it never
//! rejects.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{debug, info, trace};

use weir_core::{ObjectId, WriteBackLimits};

use crate::lru::LruList;
use crate::metrics::{DirtyMetrics, NoopMetrics};
use crate::pending::PendingWrite;

/// Queue state guarded by the lock.
struct Inner<H> {
    /// Pending record and handle reference per dirty object.
    pending: HashMap<ObjectId, (PendingWrite, H)>,
    /// Dequeue order: head is least recently queued.
    lru: LruList,
    /// Sum of `PendingWrite::ios` over all entries.
    cur_ios: f64,
    /// Sum of `PendingWrite::size` over all entries.
    cur_size: u64,
    /// Set by [`WriteBackQueue::stop`]; consumers return `None` on wake.
    stopping: bool,
    /// Identity currently being force-cleared, serializing concurrent
    /// clears of the same object.
    clearing: Option<ObjectId>,
}

/// LRU-ordered admission queue for dirty writes.
///
/// Generic over the file-handle reference type `H` (typically an `Arc`):
/// the queue carries the reference for the flusher but never owns, closes,
/// or frees the handle. The caller guarantees the handle outlives the
/// pending entry.
///
/// # Invariants
///
/// At every point observable under the lock: `cur_ios` and `cur_size` equal
/// the sums over live entries, and the LRU ordering holds exactly the map's
/// key set.
pub struct WriteBackQueue<H: Clone> {
    inner: Mutex<Inner<H>>,
    cond: Condvar,
    limits: WriteBackLimits,
    metrics: Arc<dyn DirtyMetrics>,
}

impl<H: Clone> WriteBackQueue<H> {
    /// Creates a queue with the given soft limits and no metrics sink.
    #[must_use]
    pub fn new(limits: WriteBackLimits) -> Self {
        Self::with_metrics(limits, Arc::new(NoopMetrics))
    }

    /// Creates a queue reporting dirty-work deltas to `metrics`.
    #[must_use]
    pub fn with_metrics(limits: WriteBackLimits, metrics: Arc<dyn DirtyMetrics>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                lru: LruList::new(),
                cur_ios: 0.0,
                cur_size: 0,
                stopping: false,
                clearing: None,
            }),
            cond: Condvar::new(),
            limits,
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<H>> {
        self.inner.lock().expect("write-back queue lock poisoned")
    }

    /// True once any soft limit is met or exceeded.
    fn over_limit(inner: &Inner<H>, limits: &WriteBackLimits) -> bool {
        inner.cur_ios >= limits.io_soft_limit
            || inner.pending.len() >= limits.fd_soft_limit
            || inner.cur_size >= limits.size_soft_limit
    }

    /// Records one dirty write against `id`.
    ///
    /// A first write inserts a fresh record at the LRU tail; a repeated
    /// write merges into the existing record and refreshes its position.
    /// Wakes a blocked consumer.
    pub fn enqueue(&self, id: ObjectId, handle: H, len: u64, nocache: bool) {
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if let Some((pending, _)) = inner.pending.get_mut(&id) {
                pending.merge(len, nocache);
                let touched = inner.lru.touch(id);
                assert!(touched, "pending entry missing from lru: {id}");
            } else {
                inner.pending.insert(id, (PendingWrite::new(len, nocache), handle));
                inner.lru.push_back(id);
                self.metrics.object_dirtied();
            }
            inner.cur_ios += 1.0;
            inner.cur_size += len;
            self.metrics.ios_dirtied(1.0);
            self.metrics.bytes_dirtied(len);

            trace!(%id, len, nocache, cur_size = inner.cur_size, "queued dirty write");
            self.check_invariants(inner);
        }
        self.cond.notify_one();
    }

    /// Blocks until pending work exceeds a soft limit, then returns the
    /// least-recently-queued entry.
    ///
    /// The wake condition is backpressure, not mere non-emptiness: under
    /// light load the queue batches dirty work rather than flushing each
    /// write eagerly. Returns `None` once [`stop`](Self::stop) has been
    /// called — the queue's only way of saying "no more work".
    pub fn dequeue_next(&self) -> Option<(ObjectId, H, PendingWrite)> {
        let mut guard = self.lock();
        while !guard.stopping && !Self::over_limit(&guard, &self.limits) {
            guard = self.cond.wait(guard).expect("write-back queue lock poisoned");
        }
        if guard.stopping {
            return None;
        }

        let inner = &mut *guard;
        // Over a limit with nothing pending means the counters diverged
        // from the entry set.
        assert!(
            !inner.pending.is_empty(),
            "woken over limit with no pending writes"
        );
        let id = inner.lru.pop_front().expect("lru empty while map non-empty");
        let (pending, handle) = inner
            .pending
            .remove(&id)
            .expect("lru head missing from pending map");

        inner.cur_ios -= pending.ios;
        inner.cur_size -= pending.size;
        self.metrics.object_cleared();
        self.metrics.ios_cleared(pending.ios);
        self.metrics.bytes_cleared(pending.size);

        debug!(%id, ios = pending.ios, size = pending.size, "dequeued for flush");
        self.check_invariants(inner);
        Some((id, handle, pending))
    }

    /// Forcibly removes `id`'s pending entry, if any.
    ///
    /// If another caller is force-clearing the same identity, waits for it
    /// to finish before re-checking. A missing entry is a no-op, so the
    /// operation is idempotent.
    pub fn clear_object(&self, id: ObjectId) {
        {
            let mut guard = self.lock();
            while guard.clearing == Some(id) {
                guard = self.cond.wait(guard).expect("write-back queue lock poisoned");
            }
            if !guard.pending.contains_key(&id) {
                return;
            }

            guard.clearing = Some(id);
            let inner = &mut *guard;
            let (pending, _handle) = inner
                .pending
                .remove(&id)
                .expect("presence checked above");
            let removed = inner.lru.remove(id);
            assert!(removed, "pending entry missing from lru: {id}");

            inner.cur_ios -= pending.ios;
            inner.cur_size -= pending.size;
            inner.clearing = None;
            self.metrics.object_cleared();
            self.metrics.ios_cleared(pending.ios);
            self.metrics.bytes_cleared(pending.size);

            debug!(%id, ios = pending.ios, size = pending.size, "cleared pending object");
            self.check_invariants(inner);
        }
        self.cond.notify_all();
    }

    /// Forcibly removes every pending entry and zeroes the counters.
    ///
    /// Intended for shutdown or full cache invalidation. Blocked consumers
    /// are woken; combined with [`stop`](Self::stop) they observe an empty
    /// queue and return.
    pub fn clear(&self) {
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let drained = inner.pending.len();
            for (_, (pending, _)) in inner.pending.drain() {
                self.metrics.object_cleared();
                self.metrics.ios_cleared(pending.ios);
                self.metrics.bytes_cleared(pending.size);
            }
            inner.lru.clear();
            inner.cur_ios = 0.0;
            inner.cur_size = 0;

            info!(drained, "write-back queue cleared");
            self.check_invariants(inner);
        }
        self.cond.notify_all();
    }

    /// Tells blocked consumers to exit their wait loop and return `None`.
    ///
    /// Cooperative: consumers observe it on their next wake, not
    /// instantaneously. Pending entries are left in place; pair with
    /// [`clear`](Self::clear) to drop them.
    pub fn stop(&self) {
        {
            let mut guard = self.lock();
            guard.stopping = true;
            info!("write-back queue stopping");
        }
        self.cond.notify_all();
    }

    /// True once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.lock().stopping
    }

    /// Pending record for `id`, if present.
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<PendingWrite> {
        self.lock().pending.get(&id).map(|(pending, _)| *pending)
    }

    /// Number of distinct dirty objects.
    #[must_use]
    pub fn pending_objects(&self) -> usize {
        self.lock().pending.len()
    }

    /// Sum of pending operation units.
    #[must_use]
    pub fn cur_ios(&self) -> f64 {
        self.lock().cur_ios
    }

    /// Sum of pending dirty bytes.
    #[must_use]
    pub fn cur_size(&self) -> u64 {
        self.lock().cur_size
    }

    /// Returns the configured soft limits.
    #[must_use]
    pub const fn limits(&self) -> &WriteBackLimits {
        &self.limits
    }

    /// Debug-build consistency check: counters match the live entry set and
    /// the LRU holds exactly the map's keys.
    #[cfg(debug_assertions)]
    fn check_invariants(&self, inner: &Inner<H>) {
        let ios: f64 = inner.pending.values().map(|(p, _)| p.ios).sum();
        let size: u64 = inner.pending.values().map(|(p, _)| p.size).sum();
        assert!(
            (inner.cur_ios - ios).abs() < 1e-6,
            "cur_ios {} diverged from entry sum {ios}",
            inner.cur_ios
        );
        assert_eq!(inner.cur_size, size, "cur_size diverged from entry sum");
        assert_eq!(inner.lru.len(), inner.pending.len(), "lru and map diverged");
        for id in inner.pending.keys() {
            assert!(inner.lru.contains(*id), "map key missing from lru: {id}");
        }
    }

    #[cfg(not(debug_assertions))]
    #[allow(clippy::unused_self)]
    fn check_invariants(&self, _inner: &Inner<H>) {}
}
