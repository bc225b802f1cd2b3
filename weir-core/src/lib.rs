//! Weir Core - shared types for the weir I/O admission-control layer.
//!
//! This crate provides the pieces the throttle and write-back queue crates
//! have in common: the error type, the strongly-typed object identity used
//! to key pending writes, the monotonic `Clock` seam, and the queue's soft
//! limits.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: prevent mixing an object identity with a raw
//!   counter
//! - **Explicit limits**: every admission threshold is a named, validated
//!   field
//! - **Injected time**: decay logic reads time through `Clock` so tests can
//!   drive it deterministically
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod clock;
mod config;
mod error;
mod types;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::WriteBackLimits;
pub use error::{Error, Result};
pub use types::ObjectId;
