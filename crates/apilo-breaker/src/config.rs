//! Circuit breaker tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one circuit breaker registry (shared across all
/// upstream hosts; each host gets its own state machine under this
/// configuration).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Whether the breaker is active. When `false`, `admit` always
    /// succeeds and outcomes are not tracked.
    pub enabled: bool,

    /// Consecutive failures required to trip `Closed -> Open`.
    ///
    /// The rolling window is count-based: consecutive failures, reset to
    /// zero on any success, rather than a sliding window over the last N
    /// outcomes or a time-bucketed rate. See `DESIGN.md` for why this
    /// crate picked the simpler of the two permitted designs.
    pub failure_threshold: u32,

    /// How long an `Open` breaker stays open before becoming eligible
    /// for `HalfOpen`.
    pub open_timeout: Duration,

    /// Number of probe requests admitted while `HalfOpen`.
    pub half_open_max_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
        }
    }
}
