//! # apilo-cache
//!
//! The memory-bounded, single-flight response cache sitting between the
//! dispatcher and the egress client.
//!
//! ```text
//! apilo-cache/
//! ├── cache/    # Cache<E>: get/put/invalidate/stats, single-flight, TTL sweep
//! ├── lru/      # intrusive doubly-linked LRU list over a slab
//! ├── config/   # CacheConfig
//! ├── stats/    # CacheStats
//! └── error/    # CacheError
//! ```
//!
//! All cache state lives under one `parking_lot::Mutex`, consistent with
//! this workspace's policy that a single well-contended lock beats several
//! locks whose ordering must be proven safe. Locked sections never `.await`.

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
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::must_use_candidate,
    clippy::significant_drop_tightening,
    clippy::missing_panics_doc
)]

mod cache;
mod config;
mod error;
mod lru;
mod stats;

pub use cache::Cache;
pub use config::{CacheConfig, DEFAULT_MAX_ENTRY_BYTES};
pub use error::CacheError;
pub use stats::CacheStats;
