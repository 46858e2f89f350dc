//! Cache error vocabulary.
//!
//! The cache never fails a `Get` or `Put` beyond the "too-large-to-cache"
//! signal (which is a `bool`, not an error). The only true error this
//! crate raises is a malformed invalidation glob.

use thiserror::Error;

/// Errors surfaced by the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// `InvalidatePattern` was given a glob that failed to compile.
    #[error("malformed invalidation pattern {pattern:?}: {reason}")]
    BadPattern {
        /// The pattern string the caller supplied.
        pattern: String,
        /// Why `globset` rejected it.
        reason: String,
    },
}

impl CacheError {
    /// Stable machine-readable token surfaced to callers as the `reason` field.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::BadPattern { .. } => "bad_request",
        }
    }
}
