// obs-common - shared types and configuration for the latency observatory
//
// This crate has no async runtime dependency and no knowledge of queues,
// heaps, or HTTP; it is the vocabulary every other crate in the workspace
// shares.

pub mod config;
pub mod error;
pub mod sample;

// Re-export for convenience
pub use config::{DropThresholds, ObservatoryConfig, StoreBackend};
pub use error::{ObsError, ObsErrorCategory, ObsResult};
pub use sample::{CallSiteName, Sample, HISTOGRAM_CEILING};
