//! Admission-queue soft limits.
//!
//! Put limits on everything: every queue and counter has an explicit,
//! validated maximum. These are *soft* limits: crossing any one of them
//! wakes the flusher rather than rejecting the write.

use crate::error::{Error, Result};

/// Soft limits for the write-back admission queue.
///
/// The flusher sleeps while pending work is below all three thresholds and
/// wakes as soon as any one is exceeded. Nothing is ever rejected; producers
/// are bounded only by the flusher draining.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteBackLimits {
    /// Pending operation units above which the flusher is woken.
    pub io_soft_limit: f64,
    /// Pending distinct dirty objects above which the flusher is woken.
    pub fd_soft_limit: usize,
    /// Pending dirty bytes above which the flusher is woken.
    pub size_soft_limit: u64,
}

impl WriteBackLimits {
    /// Creates limits with safe defaults.
    ///
    /// Defaults are conservative: 500 pending operations, 500 dirty objects,
    /// 40 MB of dirty bytes. Production deployments should tune these to the
    /// backing device.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            io_soft_limit: 500.0,
            fd_soft_limit: 500,
            size_soft_limit: 40 * 1024 * 1024,
        }
    }

    /// Creates tight limits for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            io_soft_limit: 4.0,
            fd_soft_limit: 4,
            size_soft_limit: 4096,
        }
    }

    /// Validates that all limits are usable.
    ///
    /// # Errors
    /// Returns an error if any limit is zero or non-finite: a zero soft
    /// limit would wake the flusher permanently and defeat batching.
    pub fn validate(&self) -> Result<()> {
        if !self.io_soft_limit.is_finite() || self.io_soft_limit <= 0.0 {
            return Err(Error::InvalidArgument {
                name: "io_soft_limit",
                reason: "must be positive and finite",
            });
        }
        if self.fd_soft_limit == 0 {
            return Err(Error::InvalidArgument {
                name: "fd_soft_limit",
                reason: "must be positive",
            });
        }
        if self.size_soft_limit == 0 {
            return Err(Error::InvalidArgument {
                name: "size_soft_limit",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for WriteBackLimits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        assert!(WriteBackLimits::new().validate().is_ok());
        assert!(WriteBackLimits::for_testing().validate().is_ok());
    }

    #[test]
    fn test_zero_io_limit_rejected() {
        let mut limits = WriteBackLimits::new();
        limits.io_soft_limit = 0.0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_nan_io_limit_rejected() {
        let mut limits = WriteBackLimits::new();
        limits.io_soft_limit = f64::NAN;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_zero_fd_limit_rejected() {
        let mut limits = WriteBackLimits::new();
        limits.fd_soft_limit = 0;
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_zero_size_limit_rejected() {
        let mut limits = WriteBackLimits::new();
        limits.size_soft_limit = 0;
        assert!(limits.validate().is_err());
    }
}
