//! # apilo-metrics
//!
//! Lock-free counters, latency EMAs, and gauges consumed by the
//! `/metrics` and `/status` endpoints. All hot-path operations are
//! `O(1)` and non-blocking; the only lock in this crate guards the
//! rarely-touched per-upstream breaker-state and custom-gauge maps.

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
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::must_use_candidate
)]

mod histogram;
mod registry;
mod snapshot;

pub use histogram::LatencyHistogram;
pub use registry::{LatencyBucket, MetricsCollector, MetricsRegistry};
pub use snapshot::MetricsSnapshot;
