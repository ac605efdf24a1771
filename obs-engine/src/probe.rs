//! # TimingProbe
//!
//! Measures the lifetime of a scope and records it as one latency
//! sample when the scope ends.
//!
//! Grounded on `apitime.go`'s `ApiTime(fnName string) func()` and
//! `log.go`'s `TracingTime(funcName string) func()`: both capture
//! `time.Now()` and return a closure the caller must remember to invoke
//! with `defer` at the end of the measured function. Rust's `Drop` makes
//! the closing half of that pattern automatic and impossible to forget
//! — a `TimingProbe` records on drop, whether the scope exits normally,
//! via `?`, or by panicking through an unwind boundary.

use std::sync::Arc;
use std::time::Instant;

use obs_common::{CallSiteName, Sample};

use crate::registry::AggregatorRegistry;

/// RAII guard that records one latency sample into its call site's
/// aggregator when dropped.
///
/// Construct one at the top of a measured function with [`TimingProbe::start`]
/// or the [`timing_probe!`] macro and let it fall out of scope.
pub struct TimingProbe {
    registry: Arc<AggregatorRegistry>,
    call_site: CallSiteName,
    started_at: Instant,
}

impl TimingProbe {
    /// Starts timing `call_site` against `registry`. The elapsed time is
    /// recorded when the returned guard is dropped.
    pub fn start(registry: Arc<AggregatorRegistry>, call_site: impl Into<CallSiteName>) -> Self {
        TimingProbe {
            registry,
            call_site: call_site.into(),
            started_at: Instant::now(),
        }
    }

    /// Elapsed time so far, without ending the probe.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

impl Drop for TimingProbe {
    fn drop(&mut self) {
        let sample = Sample::from(self.started_at.elapsed());
        self.registry.record(&self.call_site, sample);

        // Also surface the measurement on the current task's trace
        // context, if one is open, so a caller dumping the context with
        // `trace::to_json()` sees every probed call site's latency
        // alongside whatever else was recorded during the request.
        crate::trace::set(format!("{}_ms", self.call_site), sample.millis());
    }
}

/// Starts a [`TimingProbe`] named after the enclosing function.
///
/// `apitime.go` derives the call-site name from `runtime.Caller` at the
/// point `ApiTime` is invoked; Rust has no stable equivalent that
/// resolves to a clean function path at runtime without a proc-macro
/// crate, so this macro captures `module_path!()` plus an explicit
/// label instead, which is resolved at compile time and costs nothing
/// at the call site.
#[macro_export]
macro_rules! timing_probe {
    ($registry:expr, $label:expr) => {
        $crate::probe::TimingProbe::start(
            $registry,
            ::std::concat!(::std::module_path!(), "::", $label),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use obs_common::ObservatoryConfig;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropping_the_probe_records_one_sample() {
        let registry = Arc::new(AggregatorRegistry::new(&ObservatoryConfig::default()));
        let name = CallSiteName::new("svc.Probed");

        {
            let _probe = TimingProbe::start(registry.clone(), name.clone());
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        for _ in 0..200 {
            if registry.snapshot(&name).map(|s| s.count).unwrap_or(0) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        let snap = registry.snapshot(&name).unwrap();
        assert_eq!(snap.count, 1);
        assert!(snap.min_ms.unwrap() >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn macro_expands_to_a_module_qualified_call_site() {
        let registry = Arc::new(AggregatorRegistry::new(&ObservatoryConfig::default()));
        {
            let _probe = timing_probe!(registry.clone(), "macro_expands_to_a_module_qualified_call_site");
        }
        for _ in 0..200 {
            if !registry.call_sites().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        let sites = registry.call_sites();
        assert_eq!(sites.len(), 1);
        assert!(sites[0].as_str().ends_with("macro_expands_to_a_module_qualified_call_site"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn probe_still_records_when_scope_unwinds_via_early_return() {
        let registry = Arc::new(AggregatorRegistry::new(&ObservatoryConfig::default()));
        let name = CallSiteName::new("svc.EarlyReturn");

        async fn inner(registry: Arc<AggregatorRegistry>, name: CallSiteName) -> bool {
            let _probe = TimingProbe::start(registry, name);
            if true {
                return false;
            }
            true
        }

        inner(registry.clone(), name.clone()).await;

        for _ in 0..200 {
            if registry.snapshot(&name).map(|s| s.count).unwrap_or(0) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        assert_eq!(registry.snapshot(&name).unwrap().count, 1);
    }
}
