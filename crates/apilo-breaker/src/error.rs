//! Breaker error vocabulary.

use thiserror::Error;

/// Errors surfaced by the circuit breaker.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The breaker for this upstream is open; no egress attempt was made.
    #[error("circuit breaker open for upstream {upstream}")]
    Open {
        /// The upstream (`host:port`) that is currently rejecting requests.
        upstream: String,
    },
}

impl BreakerError {
    /// Stable machine-readable token surfaced to callers as the `reason` field.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Open { .. } => "breaker_open",
        }
    }
}
