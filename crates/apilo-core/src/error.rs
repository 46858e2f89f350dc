//! Shared error vocabulary for the optimization engine.
//!
//! Each higher crate (`apilo-cache`, `apilo-breaker`, `apilo-egress`,
//! `apilo-server`) defines its own `thiserror` enum and wraps `CoreError`
//! via `#[from]`; this keeps canonicalization failures (the only thing
//! that can go wrong in this crate) representable everywhere without
//! forcing every crate to depend on every other crate's error type.

use thiserror::Error;

/// Result type alias used throughout `apilo-core`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced while building or canonicalizing core types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The supplied URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The supplied HTTP method is not a recognized token.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// A header name or value contained bytes that cannot be represented.
    #[error("invalid header {name}: {reason}")]
    InvalidHeader {
        /// Offending header name.
        name: String,
        /// Human-readable reason the header was rejected.
        reason: String,
    },
}

impl CoreError {
    /// Stable machine-readable token mirroring the dispatcher's `reason` field.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) | Self::InvalidMethod(_) | Self::InvalidHeader { .. } => {
                "bad_request"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_tokens_are_stable() {
        assert_eq!(CoreError::InvalidUrl("x".into()).reason(), "bad_request");
        assert_eq!(
            CoreError::InvalidMethod("FOO BAR".into()).reason(),
            "bad_request"
        );
    }
}
