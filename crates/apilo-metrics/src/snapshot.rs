//! The point-in-time read returned by [`MetricsRegistry::snapshot`](crate::MetricsRegistry::snapshot).

use std::collections::HashMap;
use std::time::Duration;

/// A consistent-ish snapshot of the registry: each counter is read
/// independently and is individually monotonically non-decreasing, but
/// the snapshot as a whole is not a cross-counter transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Total requests admitted to the dispatcher.
    pub total_requests: u64,
    /// Total cache hits.
    pub cache_hits: u64,
    /// Total cache misses.
    pub cache_misses: u64,
    /// Total evictions (LRU + TTL).
    pub evictions: u64,
    /// Total errors surfaced to callers.
    pub errors: u64,
    /// Current number of live cache entries.
    pub cache_entries: u64,
    /// Current approximate byte usage of the cache.
    pub cache_bytes: u64,
    /// Total times a circuit breaker rejected a call while open.
    pub breaker_open_events: u64,
    /// Most recently sampled process memory usage, in megabytes.
    pub memory_usage_mb: f64,
    /// Exponential moving average latency for cache hits, in milliseconds.
    pub avg_latency_hit_ms: f64,
    /// Exponential moving average latency for cache misses, in milliseconds.
    pub avg_latency_miss_ms: f64,
    /// Current circuit breaker state per upstream (`host:port -> state`).
    pub breaker_states: HashMap<String, String>,
    /// Time since the registry (and thus the daemon) started.
    pub uptime: Duration,
}
