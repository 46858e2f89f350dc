//! Egress client tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for one [`crate::EgressClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressConfig {
    /// Idle connections kept open per upstream host.
    pub max_idle_conns_per_host: usize,

    /// How long an idle pooled connection is kept before being closed.
    pub idle_conn_timeout: Duration,

    /// Ceiling on the TLS handshake phase.
    pub tls_handshake_timeout: Duration,

    /// Ceiling on the whole request/response round trip, independent of
    /// any per-request deadline passed to `Do`. The tighter of the two
    /// governs.
    pub overall_timeout: Duration,

    /// Attempt ALPN `h2`, falling back to HTTP/1.1 when the upstream does
    /// not negotiate it.
    pub force_http2: bool,

    /// Ceiling on time-to-first-byte of the response headers.
    pub response_header_timeout: Duration,

    /// Maximum requests in flight to a single upstream at once. `None`
    /// means unbounded (reqwest's own pool ceiling still applies).
    pub max_inflight_per_upstream: Option<usize>,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            max_idle_conns_per_host: 32,
            idle_conn_timeout: Duration::from_secs(90),
            tls_handshake_timeout: Duration::from_secs(10),
            overall_timeout: Duration::from_secs(30),
            force_http2: false,
            response_header_timeout: Duration::from_secs(10),
            max_inflight_per_upstream: Some(64),
        }
    }
}
