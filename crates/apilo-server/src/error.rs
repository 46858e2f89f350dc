//! Dispatcher error vocabulary: maps the lower crates' errors (and this
//! crate's own validation failures) onto HTTP status codes and stable
//! `reason` tokens.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use apilo_breaker::BreakerError;
use apilo_cache::CacheError;
use apilo_core::CoreError;
use apilo_egress::EgressError;

/// Result type for dispatcher-level operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors the dispatcher can surface to an IPC caller.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Malformed input: bad URL, unknown method, oversized inbound body.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// `PUT /config` rejected one field; carries the offending field
    /// name separately so the response can name it.
    #[error("invalid config field {field}: {message}")]
    InvalidConfig {
        /// The rejected field's name.
        field: String,
        /// Why it was rejected.
        message: String,
    },

    /// The circuit breaker rejected admission; no egress attempt was made.
    #[error("breaker open for {upstream}")]
    BreakerOpen {
        /// The upstream that is currently rejecting requests.
        upstream: String,
    },

    /// The egress deadline elapsed before a response was fully received.
    #[error("upstream {upstream} timed out")]
    UpstreamTimeout {
        /// The upstream the request was addressed to.
        upstream: String,
    },

    /// DNS/connect/TLS/read error, or a malformed upstream response.
    #[error("transport error reaching {upstream}: {reason}")]
    UpstreamTransport {
        /// The upstream the request was addressed to.
        upstream: String,
        /// Underlying failure description.
        reason: String,
    },

    /// The inbound worker pool's bounded queue is full.
    #[error("server overloaded")]
    ServerOverloaded,

    /// An invariant was violated or an unexpected internal failure
    /// occurred. Never produced by a normal hit/miss.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Stable machine-readable token returned as the response's `reason` field.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::BadRequest(_) | Self::InvalidConfig { .. } => "bad_request",
            Self::BreakerOpen { .. } => "breaker_open",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamTransport { .. } => "upstream_transport",
            Self::ServerOverloaded => "server_overloaded",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status code this error maps to.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
            Self::BreakerOpen { .. } | Self::ServerOverloaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamTransport { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = if let Self::InvalidConfig { field, message } = &self {
            json!({ "error": message, "field": field })
        } else {
            json!({ "error": self.to_string(), "reason": self.reason() })
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ServerError {
    fn from(e: CoreError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<CacheError> for ServerError {
    fn from(e: CacheError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<BreakerError> for ServerError {
    fn from(e: BreakerError) -> Self {
        match e {
            BreakerError::Open { upstream } => Self::BreakerOpen { upstream },
        }
    }
}

impl From<EgressError> for ServerError {
    fn from(e: EgressError) -> Self {
        match e {
            EgressError::Timeout { upstream } => Self::UpstreamTimeout { upstream },
            EgressError::Transport { upstream, reason } | EgressError::UpstreamProto { upstream, reason } => {
                Self::UpstreamTransport { upstream, reason }
            }
        }
    }
}

/// The error a single-flighted `compute` closure can fail with. This is
/// `apilo_cache::Cache<E>`'s `E`; single-flight broadcasts it to every
/// waiter behind an `Arc`, so it need not be `Clone`, only constructed
/// once per miss.
#[derive(Debug, thiserror::Error)]
pub enum MissError {
    /// The breaker rejected admission.
    #[error(transparent)]
    Breaker(#[from] BreakerError),
    /// The egress call failed.
    #[error(transparent)]
    Egress(#[from] EgressError),
}

impl MissError {
    /// Convert by reference, since single-flight waiters only ever see
    /// this error behind a shared `Arc`.
    #[must_use]
    pub fn to_server_error(&self) -> ServerError {
        match self {
            Self::Breaker(BreakerError::Open { upstream }) => ServerError::BreakerOpen {
                upstream: upstream.clone(),
            },
            Self::Egress(e) => match e {
                EgressError::Timeout { upstream } => ServerError::UpstreamTimeout {
                    upstream: upstream.clone(),
                },
                EgressError::Transport { upstream, reason }
                | EgressError::UpstreamProto { upstream, reason } => ServerError::UpstreamTransport {
                    upstream: upstream.clone(),
                    reason: reason.clone(),
                },
            },
        }
    }
}
