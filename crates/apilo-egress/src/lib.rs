//! # apilo-egress
//!
//! The outbound HTTP client the dispatcher calls on a cache miss: pooled
//! connections, HTTP/2 where negotiable, per-call timing, and bounded
//! per-upstream concurrency.
//!
//! ```text
//! apilo-egress/
//! ├── client/   # EgressClient: Do(request, deadline) -> (response, timing, cacheable)
//! ├── config/   # EgressConfig
//! ├── timing/   # Timing
//! └── error/    # EgressError
//! ```

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
    clippy::cast_possible_truncation,
    clippy::must_use_candidate
)]

mod client;
mod config;
mod error;
mod timing;

pub use client::{EgressClient, EgressResponse, OutboundRequest};
pub use config::EgressConfig;
pub use error::EgressError;
pub use timing::Timing;
