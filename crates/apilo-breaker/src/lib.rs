//! # apilo-breaker
//!
//! Per-upstream (`host:port`) three-state circuit breaker protecting the
//! egress path from cascading upstream failure. Grounded on the same
//! closed/open/half-open state machine a server's security middleware
//! keeps per endpoint, generalized here into an RAII admission token.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod config;
mod error;
mod registry;
mod state;

pub use config::BreakerConfig;
pub use error::BreakerError;
pub use registry::{classify_status, BreakerOutcome, BreakerToken, CircuitBreakerRegistry};
pub use state::CircuitState;
