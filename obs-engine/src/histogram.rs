//! # BucketHistogram
//!
//! Fixed, logarithmically-spaced latency histogram used to estimate
//! TP50/TP99/TP99.9 without storing individual samples.
//!
//! ## Design Principles
//!
//! 1. **Fixed Buckets**: Bucket boundaries are known at construction time
//!    and never resized, keeping the whole array cache-resident.
//! 2. **Doubling Bounds**: Bucket `i` covers `[2^i, 2^(i+1))` milliseconds
//!    (bucket 0 covers `[0, 1)`), trading precision at the tail for a
//!    small, constant bucket count across a 16-bit millisecond range.
//! 3. **Binary Search Selection**: bucket lookup is `O(log B)` via
//!    `partition_point`, an upgrade over a linear scan once the bucket
//!    count grows past a handful of entries.

use std::sync::atomic::{AtomicU64, Ordering};

use obs_common::{Sample, HISTOGRAM_CEILING};

/// Number of buckets: one per power-of-two doubling from 1ms up to
/// [`HISTOGRAM_CEILING`] (2^16), plus the `[0,1)` bucket.
const NUM_BUCKETS: usize = 17;

/// Upper bound (exclusive) of bucket `i`, for `i` in `0..NUM_BUCKETS`.
/// Bucket 0 is `[0, 1)`; bucket `i >= 1` is `[2^(i-1), 2^i)`.
fn bucket_upper_bound(i: usize) -> u32 {
    if i == 0 {
        1
    } else {
        1u32 << i
    }
}

/// Lower bound (inclusive) of bucket `i`: 0 for bucket 0, otherwise the
/// upper bound of the previous bucket.
fn bucket_lower_bound(i: usize) -> u32 {
    if i == 0 {
        0
    } else {
        bucket_upper_bound(i - 1)
    }
}

/// Point-in-time snapshot of a [`BucketHistogram`].
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// Exclusive upper bound of each bucket, in milliseconds.
    pub upper_bounds_ms: [u32; NUM_BUCKETS],
    /// Count of samples landing in each bucket.
    pub counts: [u64; NUM_BUCKETS],
    pub samples: u64,
    pub sum_ms: u64,
}

impl HistogramSnapshot {
    /// Estimates the `p`-th percentile (0.0..=1.0) by walking buckets in
    /// order and returning the lower bound of the bucket containing the
    /// target rank. Returns `None` if no samples were recorded.
    pub fn percentile(&self, p: f64) -> Option<u32> {
        if self.samples == 0 {
            return None;
        }
        let target = ((p.clamp(0.0, 1.0)) * self.samples as f64).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target.max(1) {
                return Some(bucket_lower_bound(i));
            }
        }
        Some(bucket_lower_bound(NUM_BUCKETS - 1))
    }
}

/// Thread-safe, fixed-bucket latency histogram.
///
/// Grounded on `hkv-server::metrics::LatencyHistogram`: atomic bucket
/// counters, `sum`/`samples` fields, and a `snapshot()` that clones into
/// plain values so readers never hold a lock against the writer.
pub struct BucketHistogram {
    buckets: [AtomicU64; NUM_BUCKETS],
    upper_bounds_ms: [u32; NUM_BUCKETS],
    sum_ms: AtomicU64,
    samples: AtomicU64,
}

impl BucketHistogram {
    pub fn new() -> Self {
        let upper_bounds_ms = std::array::from_fn(bucket_upper_bound);
        BucketHistogram {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            upper_bounds_ms,
            sum_ms: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    /// Returns the index of the bucket that `value_ms` falls into, via
    /// binary search over the ascending upper-bound array. Values at or
    /// above [`HISTOGRAM_CEILING`] land in the last bucket.
    fn bucket_index(&self, value_ms: u32) -> usize {
        if value_ms >= HISTOGRAM_CEILING {
            return NUM_BUCKETS - 1;
        }
        self.upper_bounds_ms
            .partition_point(|&bound| bound <= value_ms)
            .min(NUM_BUCKETS - 1)
    }

    /// Records one sample.
    pub fn insert(&self, sample: Sample) {
        let value = sample.millis();
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(value as u64, Ordering::Relaxed);
        let idx = self.bucket_index(value);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut counts = [0u64; NUM_BUCKETS];
        for (i, b) in self.buckets.iter().enumerate() {
            counts[i] = b.load(Ordering::Relaxed);
        }
        HistogramSnapshot {
            upper_bounds_ms: self.upper_bounds_ms,
            counts,
            samples: self.samples.load(Ordering::Relaxed),
            sum_ms: self.sum_ms.load(Ordering::Relaxed),
        }
    }

    /// Resets every bucket and the accumulators to zero.
    pub fn reset(&self) {
        for b in &self.buckets {
            b.store(0, Ordering::Relaxed);
        }
        self.sum_ms.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
    }
}

impl Default for BucketHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_zero_covers_sub_millisecond_samples() {
        let h = BucketHistogram::new();
        h.insert(Sample::from_millis(0));
        let snap = h.snapshot();
        assert_eq!(snap.counts[0], 1);
    }

    #[test]
    fn values_at_ceiling_land_in_last_bucket() {
        let h = BucketHistogram::new();
        h.insert(Sample::from_millis(HISTOGRAM_CEILING));
        h.insert(Sample::from_millis(u32::MAX));
        let snap = h.snapshot();
        assert_eq!(snap.counts[NUM_BUCKETS - 1], 2);
        // Exact accumulators are unaffected by clamping.
        assert_eq!(snap.sum_ms, HISTOGRAM_CEILING as u64 + u32::MAX as u64);
    }

    #[test]
    fn doubling_bounds_place_values_in_expected_buckets() {
        let h = BucketHistogram::new();
        h.insert(Sample::from_millis(0)); // bucket 0: [0,1)
        h.insert(Sample::from_millis(1)); // bucket 1: [1,2)
        h.insert(Sample::from_millis(3)); // bucket 2: [2,4)
        h.insert(Sample::from_millis(4)); // bucket 3: [4,8)
        let snap = h.snapshot();
        assert_eq!(snap.counts[0], 1);
        assert_eq!(snap.counts[1], 1);
        assert_eq!(snap.counts[2], 1);
        assert_eq!(snap.counts[3], 1);
    }

    #[test]
    fn percentile_returns_none_when_empty() {
        let h = BucketHistogram::new();
        assert_eq!(h.snapshot().percentile(0.5), None);
    }

    #[test]
    fn percentile_p50_matches_uniform_distribution() {
        let h = BucketHistogram::new();
        for _ in 0..100 {
            h.insert(Sample::from_millis(1)); // bucket 1: [1,2)
        }
        for _ in 0..100 {
            h.insert(Sample::from_millis(100)); // bucket 7: [64,128)
        }
        let snap = h.snapshot();
        let p50 = snap.percentile(0.5).unwrap();
        assert_eq!(p50, 1);
        let p99 = snap.percentile(0.99).unwrap();
        assert_eq!(p99, 64);
    }
}
