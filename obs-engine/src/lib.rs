//! obs-engine - the aggregation core of the latency observatory.
//!
//! This crate owns everything between "a duration was measured" and "a
//! percentile can be read back": the bounded-growth ordered stores, the
//! tail-latency histogram, per-call-site aggregation, the concurrent
//! registry of call sites, per-task trace context, and the RAII timing
//! probe that ties a measured scope to all of the above. It has no
//! knowledge of HTTP, logging destinations, or the wire format readers
//! use to pull data out — that lives in `obs-server`.

pub mod aggregator;
pub mod histogram;
pub mod probe;
pub mod registry;
pub mod store;
pub mod trace;

use std::sync::Arc;

use obs_common::{CallSiteName, ObservatoryConfig, Sample};

pub use aggregator::{AggregatorSnapshot, LatencyAggregator};
pub use histogram::{BucketHistogram, HistogramSnapshot};
pub use probe::TimingProbe;
pub use registry::AggregatorRegistry;
pub use store::{MemoryHeap, OrderedStore, Polarity};

#[cfg(feature = "disk-store")]
pub use store::DiskHeap;

/// Bundles a call-site registry with the configuration it was built
/// from. The explicit alternative to a bare process-wide global: every
/// piece of ambient state an observer needs lives on this one struct,
/// constructed once at process startup (or once per test).
pub struct Observatory {
    config: ObservatoryConfig,
    registry: Arc<AggregatorRegistry>,
}

impl Observatory {
    pub fn new(config: ObservatoryConfig) -> Self {
        let registry = Arc::new(AggregatorRegistry::new(&config));
        Observatory { config, registry }
    }

    pub fn config(&self) -> &ObservatoryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AggregatorRegistry> {
        &self.registry
    }

    /// Records one latency sample for `call_site` directly, without
    /// holding a probe open for the measured duration.
    pub fn record(&self, call_site: impl Into<CallSiteName>, sample: Sample) {
        self.registry.record(&call_site.into(), sample);
    }

    /// Starts a [`TimingProbe`] that records into this observatory's
    /// registry when dropped.
    pub fn probe(&self, call_site: impl Into<CallSiteName>) -> TimingProbe {
        TimingProbe::start(self.registry.clone(), call_site)
    }

    pub fn snapshot(&self, call_site: &CallSiteName) -> Option<AggregatorSnapshot> {
        self.registry.snapshot(call_site)
    }

    pub fn call_sites(&self) -> Vec<CallSiteName> {
        self.registry.call_sites()
    }

    /// Stops accepting submissions and drains every call site's backlog,
    /// bounded by `deadline`. See [`AggregatorRegistry::shutdown`].
    pub async fn shutdown(&self, deadline: std::time::Duration) -> bool {
        self.registry.shutdown(deadline).await
    }
}

impl Default for Observatory {
    fn default() -> Self {
        Observatory::new(ObservatoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn observatory_probe_and_snapshot_round_trip() {
        let obs = Observatory::default();
        let name = CallSiteName::new("svc.RoundTrip");

        {
            let _probe = obs.probe(name.clone());
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        for _ in 0..200 {
            if obs.snapshot(&name).map(|s| s.count).unwrap_or(0) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        assert_eq!(obs.snapshot(&name).unwrap().count, 1);
        assert_eq!(obs.call_sites(), vec![name]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn direct_record_bypasses_the_probe() {
        let obs = Observatory::default();
        obs.record("svc.Direct", Sample::from_millis(42));

        let name = CallSiteName::new("svc.Direct");
        for _ in 0..200 {
            if obs.snapshot(&name).map(|s| s.count).unwrap_or(0) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert_eq!(obs.snapshot(&name).unwrap().min_ms, Some(42));
    }
}
