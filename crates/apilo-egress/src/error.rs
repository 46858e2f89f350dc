//! Egress failure vocabulary, surfaced to the dispatcher.

use thiserror::Error;

/// Errors the egress client can return. Non-2xx statuses are *not*
/// represented here; they arrive as an ordinary [`crate::EgressResponse`]
/// and the dispatcher decides cacheability.
#[derive(Debug, Error)]
pub enum EgressError {
    /// The request's deadline (or `overall_timeout`) elapsed before a
    /// response was fully received.
    #[error("upstream {upstream} timed out")]
    Timeout {
        /// The `host:port` the request was addressed to.
        upstream: String,
    },

    /// DNS resolution, connect, TLS handshake, or an I/O error mid-stream.
    #[error("transport error reaching {upstream}: {reason}")]
    Transport {
        /// The `host:port` the request was addressed to.
        upstream: String,
        /// Underlying failure description.
        reason: String,
    },

    /// The upstream negotiated or spoke a protocol the client could not
    /// parse (malformed HTTP/1.1 framing, an HTTP/2 stream reset, etc).
    #[error("upstream {upstream} violated HTTP protocol: {reason}")]
    UpstreamProto {
        /// The `host:port` the request was addressed to.
        upstream: String,
        /// Underlying failure description.
        reason: String,
    },
}

impl EgressError {
    /// Stable machine-readable token surfaced to callers as the `reason` field.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "upstream_timeout",
            Self::Transport { .. } | Self::UpstreamProto { .. } => "upstream_transport",
        }
    }

    /// The upstream this error was raised against.
    #[must_use]
    pub fn upstream(&self) -> &str {
        match self {
            Self::Timeout { upstream }
            | Self::Transport { upstream, .. }
            | Self::UpstreamProto { upstream, .. } => upstream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_tokens_are_stable() {
        assert_eq!(
            EgressError::Timeout { upstream: "x".into() }.reason(),
            "upstream_timeout"
        );
        assert_eq!(
            EgressError::Transport { upstream: "x".into(), reason: "boom".into() }.reason(),
            "upstream_transport"
        );
    }
}
