//! Weir WB - LRU-ordered write-back admission queue.
//!
//! This crate bounds how much dirty (not-yet-persisted) write work may
//! accumulate in front of a storage backend. It includes:
//!
//! - **Coalescing**: repeated writes to one object merge into a single
//!   pending record, so the flusher persists each dirty object once.
//! - **Soft-limit backpressure**: the flusher sleeps until pending work
//!   exceeds a configured limit, batching flushes under light load.
//! - **LRU ordering**: the least-recently-queued object is flushed first.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      WriteBackQueue                        │
//! │                                                            │
//! │  enqueue ──▶ ┌─────────────────┐      ┌────────────────┐   │
//! │  (merge)     │ pending map     │◀────▶│ LRU (arena +   │   │
//! │              │ id → (wb, fd)   │      │ index map)     │   │
//! │              └─────────────────┘      └────────────────┘   │
//! │                      │ soft limit exceeded                 │
//! │                      ▼                                     │
//! │              dequeue_next ──▶ flusher thread               │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use weir_core::{ObjectId, WriteBackLimits};
//! use weir_wb::WriteBackQueue;
//!
//! let queue: WriteBackQueue<u32> = WriteBackQueue::new(WriteBackLimits::for_testing());
//!
//! // Two writes to the same object coalesce into one pending record.
//! queue.enqueue(ObjectId::new(1), 7, 100, false);
//! queue.enqueue(ObjectId::new(1), 7, 50, false);
//!
//! let pending = queue.get(ObjectId::new(1)).unwrap();
//! assert_eq!(pending.ios, 2.0);
//! assert_eq!(pending.size, 150);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod lru;
mod metrics;
mod pending;
mod queue;

pub use lru::LruList;
pub use metrics::{CounterMetrics, DirtyMetrics, DirtyTotals, NoopMetrics};
pub use pending::PendingWrite;
pub use queue::WriteBackQueue;
