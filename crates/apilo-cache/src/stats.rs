//! Cache-level counters returned by `Stats()`.

/// Point-in-time counters for one cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of live entries.
    pub entry_count: usize,
    /// Current approximate byte usage across all live entries.
    pub byte_usage: u64,
    /// Total hits since construction.
    pub hits: u64,
    /// Total misses since construction.
    pub misses: u64,
    /// Total evictions (LRU + TTL) since construction.
    pub evictions: u64,
    /// Evictions specifically attributable to TTL expiry (subset of `evictions`).
    pub evictions_by_ttl: u64,
}
