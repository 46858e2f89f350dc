//! Fixed-bucket latency histogram.
//!
//! Additive detail beyond the required hit/miss EMAs: a coarse bucket
//! distribution that the `/metrics` endpoint can render without pulling
//! in a percentile/quantile dependency.

use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bound (inclusive, milliseconds) of each histogram bucket. The
/// final bucket catches everything above the last boundary.
const BUCKET_BOUNDS_MS: [u64; 7] = [1, 5, 10, 25, 50, 100, 500];

/// A fixed-bucket latency histogram updated with plain atomic increments.
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; BUCKET_BOUNDS_MS.len() + 1],
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: Default::default(),
        }
    }
}

impl LatencyHistogram {
    /// Create an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation, assigning it to the first bucket whose
    /// bound it does not exceed.
    pub fn record(&self, duration_ms: u64) {
        let idx = BUCKET_BOUNDS_MS
            .iter()
            .position(|&bound| duration_ms <= bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of `(upper_bound_ms, count)` pairs; the final entry's
    /// bound is `None` (unbounded).
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Option<u64>, u64)> {
        let mut out = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            let bound = BUCKET_BOUNDS_MS.get(i).copied();
            out.push((bound, bucket.load(Ordering::Relaxed)));
        }
        out
    }
}
