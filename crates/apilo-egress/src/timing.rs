//! Per-request timing breakdown.

/// Timing for one egress round trip.
///
/// `reqwest` (and the `hyper` pool underneath it) does not expose
/// per-phase hooks for DNS/connect/TLS, so those three fields are
/// best-effort: on a connection the pool had to establish fresh, the
/// full pre-response-headers latency is attributed to `connect_ms` and
/// `dns_ms`/`tls_ms` are left at zero; on a reused pooled connection all
/// three are zero and the client infers reuse from whether this process
/// has already talked to the upstream host before.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    /// DNS resolution time, milliseconds. Best-effort; see struct docs.
    pub dns_ms: u64,
    /// TCP connect time, milliseconds. Best-effort; see struct docs.
    pub connect_ms: u64,
    /// TLS handshake time, milliseconds. Best-effort; see struct docs.
    pub tls_ms: u64,
    /// Time from request start to the first response byte, milliseconds.
    pub ttfb_ms: u64,
    /// Time spent reading the response body after headers, milliseconds.
    pub read_ms: u64,
    /// Whether this request reused an already-established connection.
    pub reused: bool,
}

impl Timing {
    /// All-zero timing, used for cache hits where the egress client is
    /// never consulted.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            dns_ms: 0,
            connect_ms: 0,
            tls_ms: 0,
            ttfb_ms: 0,
            read_ms: 0,
            reused: false,
        }
    }

    /// Total observed latency across all phases.
    #[must_use]
    pub const fn total_ms(&self) -> u64 {
        self.dns_ms + self.connect_ms + self.tls_ms + self.ttfb_ms + self.read_ms
    }
}
