//! The metrics registry itself: atomic counters, EMA latency tracking,
//! and a small map of rarely-updated gauges.
//!
//! Grounded on the same shape as a server's request-metrics struct: one
//! `AtomicU64` per counter, CAS loops for min/max, and a
//! `parking_lot::RwLock`-guarded map for values that don't need to be
//! lock-free because they change orders of magnitude less often than the
//! hot-path counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use crate::histogram::LatencyHistogram;
use crate::snapshot::MetricsSnapshot;

/// Which latency series an observation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyBucket {
    /// Served from cache.
    Hit,
    /// Required an upstream fetch.
    Miss,
}

/// Smoothing factor for the exponential moving averages (`alpha = 0.1`
/// per spec).
const EMA_ALPHA: f64 = 0.1;

/// Lock-free counters, EMA latency tracking, and gauges for the
/// optimization engine.
#[derive(Debug)]
pub struct MetricsRegistry {
    started_at: Instant,

    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
    breaker_open_events: AtomicU64,

    // EMAs stored as f64 bit patterns behind a CAS loop.
    ema_hit_ms_bits: AtomicU64,
    ema_miss_ms_bits: AtomicU64,

    cache_entries: AtomicU64,
    cache_bytes: AtomicU64,
    memory_usage_mb_bits: AtomicU64,

    hit_histogram: LatencyHistogram,
    miss_histogram: LatencyHistogram,

    breaker_states: RwLock<HashMap<String, String>>,
    custom_gauges: RwLock<HashMap<String, f64>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Construct a fresh registry with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            breaker_open_events: AtomicU64::new(0),
            ema_hit_ms_bits: AtomicU64::new(0f64.to_bits()),
            ema_miss_ms_bits: AtomicU64::new(0f64.to_bits()),
            cache_entries: AtomicU64::new(0),
            cache_bytes: AtomicU64::new(0),
            memory_usage_mb_bits: AtomicU64::new(0f64.to_bits()),
            hit_histogram: LatencyHistogram::new(),
            miss_histogram: LatencyHistogram::new(),
            breaker_states: RwLock::new(HashMap::new()),
            custom_gauges: RwLock::new(HashMap::new()),
        }
    }

    /// Increment the total-requests-admitted counter.
    pub fn inc_total_requests(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the cache-hit counter.
    pub fn inc_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the cache-miss counter.
    pub fn inc_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the eviction counter (LRU or TTL).
    pub fn inc_evictions(&self, by: u64) {
        self.evictions.fetch_add(by, Ordering::Relaxed);
    }

    /// Increment the error counter.
    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that a circuit breaker transitioned to `Open`.
    pub fn inc_breaker_open_events(&self) {
        self.breaker_open_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the EMA and histogram for a latency observation.
    pub fn observe_latency(&self, bucket: LatencyBucket, duration_ms: f64) {
        let (ema_bits, histogram) = match bucket {
            LatencyBucket::Hit => (&self.ema_hit_ms_bits, &self.hit_histogram),
            LatencyBucket::Miss => (&self.ema_miss_ms_bits, &self.miss_histogram),
        };
        histogram.record(duration_ms as u64);

        let mut current = ema_bits.load(Ordering::Relaxed);
        loop {
            let current_ema = f64::from_bits(current);
            let updated = if current_ema == 0.0 {
                duration_ms
            } else {
                EMA_ALPHA * duration_ms + (1.0 - EMA_ALPHA) * current_ema
            };
            match ema_bits.compare_exchange_weak(
                current,
                updated.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Set the current cache-entries gauge.
    pub fn set_cache_entries(&self, value: u64) {
        self.cache_entries.store(value, Ordering::Relaxed);
    }

    /// Set the current cache-bytes gauge.
    pub fn set_cache_bytes(&self, value: u64) {
        self.cache_bytes.store(value, Ordering::Relaxed);
    }

    /// Set the process memory-usage gauge, in megabytes.
    pub fn set_memory_usage_mb(&self, value: f64) {
        self.memory_usage_mb_bits
            .store(value.to_bits(), Ordering::Relaxed);
    }

    /// Record the current state string (`closed`/`open`/`half_open`)
    /// for one upstream.
    pub fn set_breaker_state(&self, upstream: impl Into<String>, state: impl Into<String>) {
        self.breaker_states.write().insert(upstream.into(), state.into());
    }

    /// Set an arbitrary named gauge not otherwise modeled by this struct.
    pub fn set_gauge(&self, name: impl Into<String>, value: f64) {
        self.custom_gauges.write().insert(name.into(), value);
    }

    /// A point-in-time read of every counter, gauge, and EMA.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            cache_entries: self.cache_entries.load(Ordering::Relaxed),
            cache_bytes: self.cache_bytes.load(Ordering::Relaxed),
            breaker_open_events: self.breaker_open_events.load(Ordering::Relaxed),
            memory_usage_mb: f64::from_bits(self.memory_usage_mb_bits.load(Ordering::Relaxed)),
            avg_latency_hit_ms: f64::from_bits(self.ema_hit_ms_bits.load(Ordering::Relaxed)),
            avg_latency_miss_ms: f64::from_bits(self.ema_miss_ms_bits.load(Ordering::Relaxed)),
            breaker_states: self.breaker_states.read().clone(),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// Flattens a metrics snapshot into wire-format-agnostic `name -> value`
/// pairs, keyed exactly as the `/metrics` JSON response names them.
pub trait MetricsCollector {
    /// Produce the flattened numeric view.
    fn collect(&self) -> HashMap<String, f64>;
}

impl MetricsCollector for MetricsRegistry {
    fn collect(&self) -> HashMap<String, f64> {
        let snap = self.snapshot();
        let mut out = HashMap::new();
        out.insert("total_requests".to_string(), snap.total_requests as f64);
        out.insert("cache_hits".to_string(), snap.cache_hits as f64);
        out.insert("cache_misses".to_string(), snap.cache_misses as f64);
        out.insert("evictions".to_string(), snap.evictions as f64);
        out.insert("errors".to_string(), snap.errors as f64);
        out.insert("cache_entries".to_string(), snap.cache_entries as f64);
        out.insert("cache_bytes".to_string(), snap.cache_bytes as f64);
        out.insert("breaker_open_events".to_string(), snap.breaker_open_events as f64);
        out.insert("memory_usage_mb".to_string(), snap.memory_usage_mb);
        out.insert("avg_latency_hit_ms".to_string(), snap.avg_latency_hit_ms);
        out.insert("avg_latency_miss_ms".to_string(), snap.avg_latency_miss_ms);
        for (name, value) in self.custom_gauges.read().iter() {
            out.insert(name.clone(), *value);
        }
        out
    }
}
