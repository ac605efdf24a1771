//! # Sample and Call-Site Types
//!
//! ## Design Principles
//!
//! 1. **Clamped, Not Rejected**: A sample above the histogram's top bound
//!    is clamped into the top bucket but still counted exactly in
//!    min/max/sum, keeping exact accumulators alongside approximate
//!    percentiles.
//! 2. **Interned Names**: `CallSiteName` wraps an `Arc<str>` so cloning it
//!    into a queued job or a registry key is a refcount bump, not a copy.

use std::fmt;
use std::sync::Arc;

/// Upper bound (exclusive) of the histogram's value range, in milliseconds.
pub const HISTOGRAM_CEILING: u32 = 65536;

/// A non-negative integer duration in milliseconds.
///
/// Values above [`HISTOGRAM_CEILING`] are legal — they are clamped into the
/// top histogram bucket by [`obs_engine`] but still contribute to
/// min/max/sum/count exactly. `obs_engine` is not a dependency of this
/// crate, so that clamping happens at the histogram, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sample(pub u32);

impl Sample {
    /// Wraps a duration already measured in milliseconds.
    pub const fn from_millis(millis: u32) -> Self {
        Sample(millis)
    }

    pub const fn millis(self) -> u32 {
        self.0
    }
}

impl From<std::time::Duration> for Sample {
    fn from(d: std::time::Duration) -> Self {
        Sample(d.as_millis().min(u32::MAX as u128) as u32)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A stable name identifying a call site (typically a fully qualified
/// function name). Two probes with the same name share one aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSiteName(Arc<str>);

impl CallSiteName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        CallSiteName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallSiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallSiteName {
    fn from(s: &str) -> Self {
        CallSiteName::new(s)
    }
}

impl From<String> for CallSiteName {
    fn from(s: String) -> Self {
        CallSiteName::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sample_from_duration_truncates_to_millis() {
        let s = Sample::from(Duration::from_micros(2_500));
        assert_eq!(s.millis(), 2);
    }

    #[test]
    fn call_site_names_compare_by_value() {
        let a = CallSiteName::new("pkg::handler");
        let b = CallSiteName::new("pkg::handler".to_string());
        assert_eq!(a, b);
    }
}
