//! # apilo-core
//!
//! Foundation crate for the apilo optimization daemon: the canonical cache
//! key and cached-response types, the per-request context threaded through
//! the call chain, and the shared error vocabulary the other crates build
//! their own error enums around.
//!
//! ## Architecture
//!
//! ```text
//! apilo-core/
//! ├── key/      # CacheKey canonicalization
//! ├── cached/   # CachedResponse storage artifact
//! ├── context/  # RequestContext (deadline + cancellation)
//! └── error/    # shared error vocabulary
//! ```
//!
//! This crate is not used directly; it is imported by `apilo-cache`,
//! `apilo-breaker`, `apilo-egress`, and `apilo-server`.

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
    clippy::return_self_not_must_use,
    clippy::struct_excessive_bools,
    clippy::missing_panics_doc,
    clippy::default_trait_access,
    clippy::significant_drop_tightening,
    clippy::used_underscore_binding
)]

pub mod cached;
pub mod context;
pub mod error;
pub mod key;

pub use cached::CachedResponse;
pub use context::RequestContext;
pub use error::{CoreError, Result};
pub use key::{upstream_host, CacheKey};

/// Default inbound body ceiling before a request is rejected as `bad_request` (16 MiB).
pub const MAX_INBOUND_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Default per-call timeout when a caller omits `timeout_seconds`.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
