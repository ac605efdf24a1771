//! # LatencyAggregator
//!
//! Per-call-site accumulator: running min/max/count/sum, a running median
//! via dual heaps, and a [`BucketHistogram`] for tail percentiles. One
//! instance lives per distinct call-site name inside an
//! [`crate::registry::AggregatorRegistry`] and is owned exclusively by
//! that registry's consumer task.
//!
//! ## Design Principles
//!
//! 1. **Single Lock, Whole Struct**: the dual heap and the scalar
//!    accumulators are guarded by one `parking_lot::Mutex` rather than
//!    separate atomics, because the median update must see a consistent
//!    view of both heaps — splitting the lock would let a reader observe
//!    a half-rebalanced state.
//! 2. **Rebalance, Don't Resort**: adding a value touches at most one
//!    heap push/pop/push triple, following `ApiTimeParse.Add`'s "keep the
//!    low side no more than one longer" invariant.
//! 3. **Degrade, Don't Crash**: a disk-store I/O failure marks the
//!    aggregator `degraded` and stops touching the heap for that sample,
//!    but counters and the histogram (which never touch disk) keep
//!    recording.

use parking_lot::Mutex;

use obs_common::{ObsErrorCategory, Sample};

use crate::histogram::{BucketHistogram, HistogramSnapshot};
use crate::store::{MemoryHeap, OrderedStore, Polarity};

struct Heaps {
    /// Max-heap over the lower half of observed values. Kept at least as
    /// long as `high`, and never more than one longer.
    low: Box<dyn OrderedStore>,
    /// Min-heap over the upper half of observed values.
    high: Box<dyn OrderedStore>,
    min: i64,
    max: i64,
    count: u64,
    sum: i64,
    /// Set once any disk-heap operation returns an error. Once degraded,
    /// an aggregator stops attempting heap updates (counters and the
    /// histogram are unaffected) until the registry rebuilds it.
    degraded: bool,
}

impl Heaps {
    fn new(low: Box<dyn OrderedStore>, high: Box<dyn OrderedStore>) -> Self {
        Heaps {
            low,
            high,
            min: i64::MAX,
            max: i64::MIN,
            count: 0,
            sum: 0,
            degraded: false,
        }
    }

    /// Mirrors `ApiTimeParse.Add`: keep `low` the same length as `high`,
    /// or exactly one longer, so the median is always either `low`'s top
    /// or the average of both tops.
    fn add(&mut self, val: i64) {
        if self.degraded {
            return;
        }

        let result: Result<(), obs_common::ObsError> = (|| {
            if self.low.len() == self.high.len() {
                if self.low.is_empty() {
                    self.low.push(val)?;
                    return Ok(());
                }
                let low_top = self.low.peek().ok_or_else(|| {
                    obs_common::ObsError::Backend("low heap peek returned None on a non-empty heap".to_string())
                })?;
                if val <= low_top {
                    self.low.push(val)?;
                } else {
                    let moved = self.high.pop()?;
                    self.low.push(moved)?;
                    self.high.push(val)?;
                }
            } else {
                let low_top = self.low.peek().ok_or_else(|| {
                    obs_common::ObsError::Backend("low heap peek returned None on a non-empty heap".to_string())
                })?;
                if val >= low_top {
                    self.high.push(val)?;
                } else {
                    let moved = self.low.pop()?;
                    self.high.push(moved)?;
                    self.low.push(val)?;
                }
            }
            Ok(())
        })();

        if result.is_err() {
            self.degraded = true;
        }
    }

    fn median(&self) -> Option<f64> {
        if self.low.is_empty() && self.high.is_empty() {
            return None;
        }
        if self.low.len() > self.high.len() {
            return self.low.peek().map(|v| v as f64);
        }
        match (self.low.peek(), self.high.peek()) {
            (Some(a), Some(b)) => Some((a + b) as f64 / 2.0),
            (Some(a), None) => Some(a as f64),
            (None, Some(b)) => Some(b as f64),
            (None, None) => None,
        }
    }
}

/// Point-in-time snapshot of a [`LatencyAggregator`].
#[derive(Debug, Clone)]
pub struct AggregatorSnapshot {
    pub count: u64,
    pub min_ms: Option<i64>,
    pub max_ms: Option<i64>,
    pub sum_ms: i64,
    pub avg_ms: Option<f64>,
    pub median_ms: Option<f64>,
    pub histogram: HistogramSnapshot,
    pub degraded: bool,
}

impl AggregatorSnapshot {
    pub fn tp50(&self) -> Option<u32> {
        self.histogram.percentile(0.50)
    }
    pub fn tp99(&self) -> Option<u32> {
        self.histogram.percentile(0.99)
    }
    pub fn tp999(&self) -> Option<u32> {
        self.histogram.percentile(0.999)
    }
}

/// Accumulates latency observations for one call site.
pub struct LatencyAggregator {
    heaps: Mutex<Heaps>,
    histogram: BucketHistogram,
}

impl LatencyAggregator {
    /// Builds an aggregator backed by in-memory heaps.
    pub fn in_memory() -> Self {
        LatencyAggregator::new(
            Box::new(MemoryHeap::new(Polarity::Max)),
            Box::new(MemoryHeap::new(Polarity::Min)),
        )
    }

    /// Builds an aggregator over arbitrary [`OrderedStore`] implementations,
    /// e.g. a disk-backed pair from [`crate::store`]'s `disk-store` feature.
    pub fn new(low: Box<dyn OrderedStore>, high: Box<dyn OrderedStore>) -> Self {
        LatencyAggregator {
            heaps: Mutex::new(Heaps::new(low, high)),
            histogram: BucketHistogram::new(),
        }
    }

    /// Records one latency sample. Never blocks on I/O: disk-heap errors
    /// set the `degraded` flag instead of propagating.
    pub fn record(&self, sample: Sample) {
        self.histogram.insert(sample);

        let mut heaps = self.heaps.lock();
        heaps.count += 1;
        let val = sample.millis() as i64;
        heaps.sum += val;
        if val < heaps.min {
            heaps.min = val;
        }
        if val > heaps.max {
            heaps.max = val;
        }
        heaps.add(val);
    }

    pub fn snapshot(&self) -> AggregatorSnapshot {
        let heaps = self.heaps.lock();
        let count = heaps.count;
        AggregatorSnapshot {
            count,
            min_ms: (count > 0).then_some(heaps.min),
            max_ms: (count > 0).then_some(heaps.max),
            sum_ms: heaps.sum,
            avg_ms: (count > 0).then_some(heaps.sum as f64 / count as f64),
            median_ms: heaps.median(),
            histogram: self.histogram.snapshot(),
            degraded: heaps.degraded,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.heaps.lock().degraded
    }

    /// Returns the retry hint category most relevant to a degraded
    /// aggregator: callers treat this as non-retryable storage failure.
    pub fn degraded_category(&self) -> Option<ObsErrorCategory> {
        self.is_degraded().then_some(ObsErrorCategory::Backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_min_max_count_sum() {
        let agg = LatencyAggregator::in_memory();
        for v in [5u32, 1, 9, 3] {
            agg.record(Sample::from_millis(v));
        }
        let snap = agg.snapshot();
        assert_eq!(snap.count, 4);
        assert_eq!(snap.min_ms, Some(1));
        assert_eq!(snap.max_ms, Some(9));
        assert_eq!(snap.sum_ms, 18);
        assert_eq!(snap.avg_ms, Some(4.5));
    }

    #[test]
    fn median_of_odd_count_is_middle_element() {
        let agg = LatencyAggregator::in_memory();
        for v in [1u32, 2, 3] {
            agg.record(Sample::from_millis(v));
        }
        assert_eq!(agg.snapshot().median_ms, Some(2.0));
    }

    #[test]
    fn median_of_even_count_is_average_of_middle_two() {
        let agg = LatencyAggregator::in_memory();
        for v in [1u32, 2, 3, 4] {
            agg.record(Sample::from_millis(v));
        }
        assert_eq!(agg.snapshot().median_ms, Some(2.5));
    }

    #[test]
    fn median_tracks_sliding_window_of_random_order_insertions() {
        let agg = LatencyAggregator::in_memory();
        let mut values: Vec<u32> = vec![40, 10, 50, 20, 30, 5, 45];
        for &v in &values {
            agg.record(Sample::from_millis(v));
        }
        values.sort_unstable();
        let expected_median = values[values.len() / 2] as f64;
        assert_eq!(agg.snapshot().median_ms, Some(expected_median));
    }

    #[test]
    fn empty_aggregator_reports_no_median_and_zero_count() {
        let agg = LatencyAggregator::in_memory();
        let snap = agg.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.median_ms, None);
        assert_eq!(snap.min_ms, None);
    }

    #[test]
    fn percentiles_are_reachable_through_the_snapshot() {
        let agg = LatencyAggregator::in_memory();
        for _ in 0..1000 {
            agg.record(Sample::from_millis(10));
        }
        let snap = agg.snapshot();
        assert_eq!(snap.tp50(), Some(8));
        assert_eq!(snap.tp99(), Some(8));
    }
}
