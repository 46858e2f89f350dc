//! The three breaker states.

use serde::{Deserialize, Serialize};

/// Circuit breaker state for one upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Admitting all requests.
    Closed,
    /// Rejecting all requests without attempting egress.
    Open,
    /// Admitting a bounded number of probe requests.
    HalfOpen,
}

impl CircuitState {
    /// The wire token used in `/optimize`'s `upstream_state` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
