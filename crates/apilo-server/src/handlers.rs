//! Axum handlers for the loopback IPC surface.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use apilo_core::cached::HeaderMap as CoreHeaderMap;
use apilo_core::RequestContext;

use crate::engine::{Engine, OptimizeCall};
use crate::error::{ServerError, ServerResult};
use crate::lifecycle::{ServerLifecycle, ServerState};
use crate::wire::{
    encode_body, headers_to_wire, CacheStatsResponse, ConfigResponse, ConfigUpdateRequest,
    HealthCheckWire, HealthResponse, InvalidateRequest, InvalidateResponse, MetricsResponse,
    OptimizeRequest, OptimizeResponse, StatusResponse, TimingWire,
};

/// Shared axum state: the engine plus the lifecycle manager handlers read
/// for `/health` and `/status`.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The optimization engine.
    pub engine: Engine,
    /// Lifecycle and health tracking, shared with the shutdown signal task.
    pub lifecycle: std::sync::Arc<ServerLifecycle>,
}

/// `POST /optimize`
pub async fn optimize_handler(
    State(state): State<AppState>,
    Json(req): Json<OptimizeRequest>,
) -> ServerResult<Json<OptimizeResponse>> {
    let body = req
        .body_bytes()
        .map_err(ServerError::BadRequest)?;
    if body.len() > apilo_core::MAX_INBOUND_BODY_BYTES {
        return Err(ServerError::BadRequest(format!(
            "request body of {} bytes exceeds the {}-byte inbound ceiling",
            body.len(),
            apilo_core::MAX_INBOUND_BODY_BYTES
        )));
    }

    let mut headers = CoreHeaderMap::new();
    for (name, value) in req.flat_headers() {
        headers.push(name, value);
    }

    let timeout = Duration::from_secs(req.timeout_seconds);
    let ctx = RequestContext::new(timeout);

    let call = OptimizeCall {
        method: req.method.clone(),
        url: req.url.clone(),
        headers,
        body,
        ttl_override: req.ttl_seconds.map(Duration::from_secs),
        tags: req.tags.clone().unwrap_or_default(),
        no_cache: req.no_cache,
    };

    tracing::debug!(
        request_id = %ctx.request_id(),
        method = %req.method,
        url = %req.url,
        no_cache = req.no_cache,
        "optimize call received"
    );

    let outcome = state.engine.optimize(call, &ctx).await?;

    let (body, body_encoding) = encode_body(&outcome.response.body);
    Ok(Json(OptimizeResponse {
        status: outcome.response.status,
        headers: headers_to_wire(&outcome.response.headers),
        body,
        body_encoding,
        hit: outcome.hit,
        latency_ms: ctx.elapsed().as_secs_f64() * 1000.0,
        timing: TimingWire::from(outcome.timing),
        cacheable: outcome.cacheable,
        cache_key: outcome.cache_key.to_hex(),
        upstream_state: outcome.upstream_state,
    }))
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.lifecycle.health().await;
    Json(HealthResponse {
        healthy: health.healthy,
        checks: health
            .details
            .into_iter()
            .map(|c| HealthCheckWire {
                name: c.name,
                healthy: c.healthy,
                message: c.message,
            })
            .collect(),
    })
}

/// `GET /status`
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let server_state = match state.lifecycle.state().await {
        ServerState::Starting => "starting",
        ServerState::Running => "running",
        ServerState::ShuttingDown => "shutting_down",
        ServerState::Stopped => "stopped",
    };
    let breaker_states = state
        .engine
        .breaker()
        .all_states()
        .into_iter()
        .map(|(upstream, s)| (upstream, s.as_str().to_string()))
        .collect();
    Json(StatusResponse {
        name: crate::DAEMON_NAME.to_string(),
        version: crate::DAEMON_VERSION.to_string(),
        uptime_seconds: state.engine.uptime().as_secs_f64(),
        breaker_states,
        state: server_state,
    })
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsResponse> {
    let snap = state.engine.metrics().snapshot();
    Json(MetricsResponse {
        total_requests: snap.total_requests,
        cache_hits: snap.cache_hits,
        cache_misses: snap.cache_misses,
        evictions: snap.evictions,
        errors: snap.errors,
        cache_entries: snap.cache_entries,
        cache_bytes: snap.cache_bytes,
        breaker_open_events: snap.breaker_open_events,
        memory_usage_mb: snap.memory_usage_mb,
        avg_latency_hit_ms: snap.avg_latency_hit_ms,
        avg_latency_miss_ms: snap.avg_latency_miss_ms,
        breaker_states: snap.breaker_states,
        uptime_seconds: snap.uptime.as_secs_f64(),
    })
}

/// Query parameters accepted by `GET /cache/stats`.
#[derive(Debug, Deserialize)]
pub struct CacheStatsQuery {
    /// `"visual"` renders a plain-text table instead of JSON.
    #[serde(default)]
    pub format: Option<String>,
}

/// `GET /cache/stats`, with an optional `?format=visual` plain-text table.
pub async fn cache_stats_handler(
    State(state): State<AppState>,
    Query(query): Query<CacheStatsQuery>,
) -> axum::response::Response {
    let stats = state.engine.cache().stats();
    if query.format.as_deref() == Some("visual") {
        let hit_rate = if stats.hits + stats.misses > 0 {
            100.0 * stats.hits as f64 / (stats.hits + stats.misses) as f64
        } else {
            0.0
        };
        let table = format!(
            "apilo cache\n\
             -----------\n\
             entries     {:>10}\n\
             bytes       {:>10}\n\
             hits        {:>10}\n\
             misses      {:>10}\n\
             evictions   {:>10}\n\
             hit rate    {:>9.1}%\n",
            stats.entry_count, stats.byte_usage, stats.hits, stats.misses, stats.evictions, hit_rate
        );
        return (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            table,
        )
            .into_response();
    }

    Json(CacheStatsResponse {
        entry_count: stats.entry_count,
        byte_usage: stats.byte_usage,
        hits: stats.hits,
        misses: stats.misses,
        evictions: stats.evictions,
    })
    .into_response()
}

/// `POST /cache/invalidate`
pub async fn cache_invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> ServerResult<Json<InvalidateResponse>> {
    let removed = match req.by.as_str() {
        // `value` is the hex `cache_key` fingerprint a prior `/optimize`
        // response returned; `CacheKey` has no other inverse.
        "key" => {
            let key = apilo_core::CacheKey::from_hex(&req.value)
                .map_err(|e| ServerError::BadRequest(e.to_string()))?;
            state.engine.cache().invalidate_key(&key) as u64
        }
        "tag" => state.engine.cache().invalidate_tag(&req.value) as u64,
        "pattern" => state
            .engine
            .cache()
            .invalidate_pattern(&req.value)
            .map_err(|e| ServerError::BadRequest(e.to_string()))? as u64,
        "all" => state.engine.cache().clear() as u64,
        other => {
            return Err(ServerError::BadRequest(format!(
                "unknown invalidation target {other:?}"
            )))
        }
    };
    Ok(Json(InvalidateResponse { removed }))
}

/// `GET /config`
pub async fn get_config_handler(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(config_snapshot(&state))
}

/// `PUT /config`
pub async fn update_config_handler(
    State(state): State<AppState>,
    Json(req): Json<ConfigUpdateRequest>,
) -> ServerResult<Json<ConfigResponse>> {
    let cache = state.engine.cache();
    let breaker = state.engine.breaker();

    if let Some(v) = req.cache_max_bytes {
        cache.set_max_memory_bytes(v);
    }
    if let Some(v) = req.cache_max_entries {
        cache.set_max_entries(v);
    }
    if let Some(secs) = req.default_ttl_seconds {
        if secs == 0 {
            return Err(ServerError::InvalidConfig {
                field: "default_ttl_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        state.engine.set_default_ttl(Duration::from_secs(secs));
    }
    if let Some(v) = req.breaker_failure_threshold {
        if v == 0 {
            return Err(ServerError::InvalidConfig {
                field: "breaker_failure_threshold".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        breaker.set_failure_threshold(v);
    }
    if let Some(secs) = req.breaker_open_timeout_seconds {
        breaker.set_open_timeout(Duration::from_secs(secs));
    }
    if let Some(v) = req.breaker_half_open_max {
        breaker.set_half_open_max_requests(v);
    }

    Ok(Json(config_snapshot(&state)))
}

fn config_snapshot(state: &AppState) -> ConfigResponse {
    let cache_config = state.engine.cache().config_snapshot();
    let breaker_config = state.engine.breaker().config_snapshot();
    ConfigResponse {
        cache_max_bytes: cache_config.max_memory_bytes,
        cache_max_entries: cache_config.max_entries,
        default_ttl_seconds: state.engine.default_ttl().as_secs(),
        breaker_failure_threshold: breaker_config.failure_threshold,
        breaker_open_timeout_seconds: breaker_config.open_timeout.as_secs(),
        breaker_half_open_max: breaker_config.half_open_max_requests,
    }
}
