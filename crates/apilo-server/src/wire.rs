//! JSON wire schema for the loopback IPC surface. Every request/response
//! type here is the boundary between the outside world and
//! [`crate::engine::Engine`]; nothing in `engine` depends on serde.

use std::collections::HashMap;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use apilo_core::cached::HeaderMap as CoreHeaderMap;
use apilo_egress::Timing;

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout_seconds() -> u64 {
    apilo_core::DEFAULT_TIMEOUT_SECONDS
}

/// A request header value as the client sent it: either a single string
/// or a list of strings (repeated headers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    /// A single value.
    One(String),
    /// Several values for the same header name.
    Many(Vec<String>),
}

impl HeaderValues {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

/// `POST /optimize` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizeRequest {
    /// Target URL.
    pub url: String,
    /// HTTP method; defaults to `GET`.
    #[serde(default = "default_method")]
    pub method: String,
    /// Request headers, one or many values per name.
    #[serde(default)]
    pub headers: HashMap<String, HeaderValues>,
    /// Request body. Interpreted as UTF-8 text unless `body_encoding` is
    /// `"base64"`; this sibling field disambiguates which one a given
    /// payload is rather than guessing from its content.
    #[serde(default)]
    pub body: Option<String>,
    /// `"utf8"` (default) or `"base64"`, governing how `body` is decoded.
    #[serde(default)]
    pub body_encoding: Option<String>,
    /// Per-call TTL override, in seconds.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    /// Tags to assign to the stored entry, if any.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Skip the cache entirely: run the miss path directly, do not insert.
    #[serde(default)]
    pub no_cache: bool,
    /// Per-call timeout, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl OptimizeRequest {
    /// Flatten the vary-set headers this daemon currently recognizes. The
    /// default vary set is empty, so this returns an empty vec; kept as a
    /// method so a future non-empty vary set has one place to change.
    #[must_use]
    pub fn vary_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Decode the request body to raw bytes per `body_encoding`.
    pub fn body_bytes(&self) -> Result<Vec<u8>, String> {
        let Some(body) = &self.body else {
            return Ok(Vec::new());
        };
        match self.body_encoding.as_deref() {
            Some("base64") => base64::engine::general_purpose::STANDARD
                .decode(body)
                .map_err(|e| format!("invalid base64 body: {e}")),
            Some("utf8") | None => Ok(body.clone().into_bytes()),
            Some(other) => Err(format!("unknown body_encoding {other:?}")),
        }
    }

    /// Headers flattened into request-order `(name, value)` pairs, one
    /// pair per value for multi-valued headers.
    #[must_use]
    pub fn flat_headers(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (name, values) in &self.headers {
            for value in values.clone().into_vec() {
                out.push((name.clone(), value));
            }
        }
        out
    }
}

/// Per-call timing breakdown on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct TimingWire {
    /// DNS resolution time, milliseconds.
    pub dns_ms: u64,
    /// TCP connect time, milliseconds.
    pub connect_ms: u64,
    /// TLS handshake time, milliseconds.
    pub tls_ms: u64,
    /// Time to first response byte, milliseconds.
    pub ttfb_ms: u64,
    /// Time spent reading the response body, milliseconds.
    pub read_ms: u64,
    /// Whether the underlying connection was reused from the pool.
    pub reused: bool,
}

impl From<Timing> for TimingWire {
    fn from(t: Timing) -> Self {
        Self {
            dns_ms: t.dns_ms,
            connect_ms: t.connect_ms,
            tls_ms: t.tls_ms,
            ttfb_ms: t.ttfb_ms,
            read_ms: t.read_ms,
            reused: t.reused,
        }
    }
}

/// `POST /optimize` response body.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeResponse {
    /// Upstream (or cached) HTTP status code.
    pub status: u16,
    /// Response headers, one entry per name with every value.
    pub headers: HashMap<String, Vec<String>>,
    /// Response body. Plain UTF-8 text unless `body_encoding` is
    /// `"base64"`.
    pub body: String,
    /// `"utf8"` or `"base64"`, mirroring [`OptimizeRequest::body_encoding`].
    pub body_encoding: &'static str,
    /// Whether this response was served from the cache.
    pub hit: bool,
    /// Total latency observed by the dispatcher, in milliseconds.
    pub latency_ms: f64,
    /// Per-phase egress timing; all-zero on a cache hit.
    pub timing: TimingWire,
    /// Whether this response was (or, on a hit, originally was) eligible
    /// for caching.
    pub cacheable: bool,
    /// Opaque hex fingerprint of the canonical cache key.
    pub cache_key: String,
    /// Circuit breaker state for the upstream after this call.
    pub upstream_state: &'static str,
}

/// Render a response body as UTF-8 text when possible, falling back to
/// base64 for binary payloads.
#[must_use]
pub fn encode_body(bytes: &[u8]) -> (String, &'static str) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), "utf8"),
        Err(_) => (
            base64::engine::general_purpose::STANDARD.encode(bytes),
            "base64",
        ),
    }
}

/// Convert the core's ordered, case-preserving header multimap into the
/// wire's `name -> [values]` shape.
#[must_use]
pub fn headers_to_wire(headers: &CoreHeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        out.entry(name.to_string()).or_default().push(value.to_string());
    }
    out
}

/// `GET /metrics` response body.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    /// Total requests admitted to the dispatcher.
    pub total_requests: u64,
    /// Total cache hits.
    pub cache_hits: u64,
    /// Total cache misses.
    pub cache_misses: u64,
    /// Total evictions (LRU + TTL).
    pub evictions: u64,
    /// Total errors surfaced to callers.
    pub errors: u64,
    /// Current number of live cache entries.
    pub cache_entries: u64,
    /// Current approximate cache byte usage.
    pub cache_bytes: u64,
    /// Total times a circuit breaker rejected a call while open.
    pub breaker_open_events: u64,
    /// Most recently sampled process memory usage, megabytes.
    pub memory_usage_mb: f64,
    /// EMA latency for cache hits, milliseconds.
    pub avg_latency_hit_ms: f64,
    /// EMA latency for cache misses, milliseconds.
    pub avg_latency_miss_ms: f64,
    /// Circuit breaker state per tracked upstream.
    pub breaker_states: HashMap<String, String>,
    /// Seconds since the daemon started.
    pub uptime_seconds: f64,
}

/// `GET /health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Whether every background task is alive and the server is serving.
    pub healthy: bool,
    /// Human-readable per-check detail.
    pub checks: Vec<HealthCheckWire>,
}

/// One named health check result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckWire {
    /// Check name.
    pub name: String,
    /// Whether this check passed.
    pub healthy: bool,
    /// Optional detail message.
    pub message: Option<String>,
}

/// `GET /status` response body.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Daemon name.
    pub name: String,
    /// Daemon version.
    pub version: String,
    /// Seconds since startup.
    pub uptime_seconds: f64,
    /// Current circuit breaker state per tracked upstream.
    pub breaker_states: HashMap<String, String>,
    /// Current server lifecycle state (`starting`/`running`/`shutting_down`/`stopped`).
    pub state: &'static str,
}

/// `GET /cache/stats` response body (the default JSON shape; `?format=visual`
/// renders a plain-text table instead, handled separately in `handlers.rs`).
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsResponse {
    /// Current number of live entries.
    pub entry_count: usize,
    /// Current approximate byte usage.
    pub byte_usage: u64,
    /// Total hits since construction.
    pub hits: u64,
    /// Total misses since construction.
    pub misses: u64,
    /// Total evictions (LRU + TTL) since construction.
    pub evictions: u64,
}

/// `POST /cache/invalidate` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateRequest {
    /// `"key"`, `"tag"`, `"pattern"`, or `"all"`.
    pub by: String,
    /// The key/tag/pattern to invalidate by; ignored for `"all"`.
    #[serde(default)]
    pub value: String,
}

/// `POST /cache/invalidate` response body.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Number of entries removed.
    pub removed: u64,
}

/// `PUT /config` request body: a bounded, all-optional subset of runtime
/// settings. Unset fields are left unchanged.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigUpdateRequest {
    /// New total cache byte ceiling.
    pub cache_max_bytes: Option<u64>,
    /// New maximum cache entry count.
    pub cache_max_entries: Option<usize>,
    /// New default TTL, in seconds.
    pub default_ttl_seconds: Option<u64>,
    /// New breaker consecutive-failure threshold.
    pub breaker_failure_threshold: Option<u32>,
    /// New breaker open-timeout, in seconds.
    pub breaker_open_timeout_seconds: Option<u64>,
    /// New breaker half-open probe budget.
    pub breaker_half_open_max: Option<u32>,
}

/// `GET /config` / `PUT /config` response body: the current value of
/// every field `ConfigUpdateRequest` can set.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigResponse {
    /// Current total cache byte ceiling.
    pub cache_max_bytes: u64,
    /// Current maximum cache entry count.
    pub cache_max_entries: usize,
    /// Current default TTL, in seconds.
    pub default_ttl_seconds: u64,
    /// Current breaker consecutive-failure threshold.
    pub breaker_failure_threshold: u32,
    /// Current breaker open-timeout, in seconds.
    pub breaker_open_timeout_seconds: u64,
    /// Current breaker half-open probe budget.
    pub breaker_half_open_max: u32,
}
