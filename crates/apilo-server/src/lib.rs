//! # apilo-server
//!
//! The apilo optimization daemon: a loopback-only axum surface in front
//! of the cache, circuit breaker, and egress client. One binary target,
//! `apilod`, binds `127.0.0.1` and serves the `/optimize`, `/health`,
//! `/status`, `/metrics`, `/cache/stats`, `/cache/invalidate`, and
//! `/config` routes described on the wire in [`wire`].
//!
//! ## Architecture
//!
//! ```text
//! apilo-server/
//! ├── config/     # AppConfig, env overlay
//! ├── wire/       # JSON request/response schema
//! ├── error/      # ServerError, MissError, HTTP status mapping
//! ├── engine/     # Engine: composes cache + breaker + egress + metrics
//! ├── handlers/   # axum handlers
//! ├── server/     # router assembly, admission control, serve loop
//! ├── lifecycle/  # ServerLifecycle, health tracking, shutdown signal
//! └── pidfile/    # single-instance interlock
//! ```

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::struct_excessive_bools,
    clippy::missing_panics_doc,
    clippy::default_trait_access
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod pidfile;
pub mod server;
pub mod wire;

pub use config::AppConfig;
pub use engine::Engine;
pub use error::{ServerError, ServerResult};
pub use handlers::AppState;
pub use lifecycle::{HealthStatus, ServerLifecycle, ShutdownSignal};

/// Daemon name reported on `/status`.
pub const DAEMON_NAME: &str = "apilod";
/// Daemon version, taken from this crate's `Cargo.toml`.
pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");
