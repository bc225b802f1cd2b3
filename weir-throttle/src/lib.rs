//! Weir Throttle - leaky-bucket rate limiting for storage I/O.
//!
//! This crate gates each I/O against six leaky buckets (bytes and operations,
//! each total/read/write). An operation that would exceed a burst cap is not
//! rejected; instead the caller parks and a one-shot timer releases it once
//! decay has brought the bucket back under its cap.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      RateThrottle                        │
//! │                                                          │
//! │  ┌─────────────────┐   ┌───────────┐   ┌─────────────┐   │
//! │  │ 6 LeakyBuckets  │──▶│ max wait  │──▶│ TimerService│   │
//! │  │ (bps/ops × dir) │   │ per dir   │   │ (one-shot)  │   │
//! │  └─────────────────┘   └───────────┘   └─────────────┘   │
//! │          ▲                                    │          │
//! │          │            timer fires             │          │
//! │          └──── leak + re-check, release ◀─────┘          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Deterministic testing
//!
//! Time is read through [`weir_core::Clock`] and timers run through
//! [`TimerService`]; pairing [`weir_core::ManualClock`] with [`ManualTimer`]
//! drives the whole wait/release cycle without sleeping.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use weir_core::ManualClock;
//! use weir_throttle::{BucketKind, ManualTimer, RateThrottle};
//!
//! let clock = Arc::new(ManualClock::new());
//! let timer = Arc::new(ManualTimer::new());
//! let throttle = RateThrottle::new(0, timer, clock);
//!
//! // 150 bytes/s sustained, 15 bytes of burst.
//! throttle.configure(BucketKind::BpsTotal, 150.0, 15.0).unwrap();
//!
//! throttle.account(true, 512);
//! // Over the burst cap: a timer is armed for the computed wait.
//! assert!(throttle.schedule_timer(true));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod bucket;
mod throttle;
mod timer;

pub use bucket::{BucketKind, LeakyBucket, BUCKET_COUNT};
pub use throttle::{RateThrottle, ReleaseFn};
pub use timer::{ManualTimer, ThreadTimer, TimerCallback, TimerService};
