//! # Observatory Error Types
//!
//! ## Design Principles
//!
//! 1. **Categorized Taxonomy**: Every error belongs to exactly one of five
//!    categories (crash, network, request, backend, saturation) so callers
//!    can branch on recoverability without matching every variant.
//! 2. **Non-propagating**: Errors here are contained at the boundary that
//!    produced them (interceptor, consumer task, ring queue). There is no
//!    process-wide failure channel.
//! 3. **Retry Hints**: `category().is_retryable()` tells backpressure logic
//!    whether to back off or give up.

use std::fmt;

/// Result type used across observatory components.
pub type ObsResult<T> = std::result::Result<T, ObsError>;

/// High-level category for grouping observatory errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ObsErrorCategory {
    /// Unhandled failure inside a request handler.
    Crash,
    /// Socket/upgrade failure on the live-log stream.
    Network,
    /// Malformed caller input (bad query, path escape).
    Request,
    /// Disk-backed store I/O failure.
    Backend,
    /// Ring queue persistently full.
    Saturation,
}

impl ObsErrorCategory {
    /// Returns true if the category is safe to retry.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Saturation)
    }
}

/// Errors surfaced by the observatory's core and server crates.
#[derive(thiserror::Error, Debug)]
pub enum ObsError {
    /// A request handler panicked; contained by the interceptor.
    #[error("handler panicked: {message}")]
    Crash {
        message: String,
        /// Up to 10 formatted stack frames, innermost first.
        stack: Vec<String>,
    },

    /// Socket upgrade or read/write failure on the live-log stream.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed query: missing file, file escaping the log root, etc.
    #[error("bad request: {0}")]
    Request(String),

    /// Disk-heap I/O failure; the owning aggregator is marked degraded.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Ring queue persistently full past the drop threshold.
    #[error("queue saturated for {call_site}, dropped {dropped} samples")]
    Saturation { call_site: String, dropped: u64 },
}

impl ObsError {
    /// Returns the coarse category of this error.
    pub const fn category(&self) -> ObsErrorCategory {
        match self {
            ObsError::Crash { .. } => ObsErrorCategory::Crash,
            ObsError::Network(_) => ObsErrorCategory::Network,
            ObsError::Request(_) => ObsErrorCategory::Request,
            ObsError::Backend(_) => ObsErrorCategory::Backend,
            ObsError::Saturation { .. } => ObsErrorCategory::Saturation,
        }
    }
}

/// Lightweight display helper for logging a short one-line error summary.
pub struct ErrSummary<'a>(pub &'a ObsError);

impl fmt::Display for ErrSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.0.category(), self.0)
    }
}
