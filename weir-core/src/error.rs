//! Error types for weir admission control.
//!
//! All errors must be handled explicitly. Configuration is the only fallible
//! surface: the runtime operations (accounting, enqueue, dequeue) are total
//! over their preconditions and signal contract violations by asserting, not
//! by returning errors.

/// The result type for weir operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when configuring admission control.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An invalid argument was provided.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// Aggregate and per-direction limits overlap for one metric family.
    ///
    /// A total limit and a read/write limit for the same family (bytes or
    /// operations) cannot both be non-zero: the combined configuration would
    /// be ambiguous about which bucket gates an operation.
    #[error("conflicting {family} limits: total and per-direction limits are mutually exclusive")]
    ConflictingLimits {
        /// The metric family, `"bps"` or `"ops"`.
        family: &'static str,
    },

    /// The component has been shut down.
    #[error("shutdown in progress")]
    Shutdown,
}
