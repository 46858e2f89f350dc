//! Cache tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default per-entry size ceiling (status + headers + body): 10 MiB.
///
/// No single canonical value to inherit; fixed here as a required
/// configuration parameter (see `DESIGN.md` for the reasoning).
pub const DEFAULT_MAX_ENTRY_BYTES: usize = 10 * 1024 * 1024;

/// Configuration for one [`Cache`](crate::Cache) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total byte ceiling across all live entries.
    pub max_memory_bytes: u64,

    /// Maximum number of live entries, independent of byte usage.
    pub max_entries: usize,

    /// Per-entry size ceiling; entries larger than this are rejected by
    /// `Put`/`GetOrCompute` without being an error.
    pub max_entry_bytes: usize,

    /// Default time-to-live applied when a caller does not override it.
    pub default_ttl: Duration,

    /// How often the background TTL sweep runs.
    pub sweep_interval: Duration,

    /// Maximum number of entries the sweep inspects per tick, to bound
    /// tail latency on large caches.
    pub sweep_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 100 * 1024 * 1024,
            max_entries: 10_000,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            default_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            sweep_batch: 256,
        }
    }
}
