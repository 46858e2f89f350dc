//! Router assembly, bounded-concurrency admission, and the serve loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::engine::Engine;
use crate::error::ServerError;
use crate::handlers::{
    cache_invalidate_handler, cache_stats_handler, get_config_handler, health_handler,
    metrics_handler, optimize_handler, status_handler, update_config_handler, AppState,
};
use crate::lifecycle::ServerLifecycle;

/// Bounded admission control over the inbound request queue. Unlike
/// `tower::limit::ConcurrencyLimitLayer`, which queues excess requests,
/// this rejects immediately once `queue_capacity` requests are already
/// waiting for a worker slot, returning `503 server_overloaded`.
#[derive(Clone)]
struct AdmissionControl {
    workers: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    queue_capacity: usize,
}

async fn admission_middleware(
    State(admission): State<AdmissionControl>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let queued_before = admission.queued.fetch_add(1, Ordering::SeqCst);
    if queued_before >= admission.queue_capacity {
        admission.queued.fetch_sub(1, Ordering::SeqCst);
        return Err(ServerError::ServerOverloaded.into_response());
    }

    let permit = admission.workers.clone().acquire_owned().await;
    admission.queued.fetch_sub(1, Ordering::SeqCst);

    let Ok(_permit) = permit else {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response());
    };
    Ok(next.run(request).await)
}

/// Assemble the full axum router: IPC routes, the bounded worker-pool
/// admission layer, then the standard tracing/timeout/compression stack.
pub fn build_router(config: &AppConfig, engine: Engine, lifecycle: Arc<ServerLifecycle>) -> Router {
    let state = AppState { engine, lifecycle };

    let admission = AdmissionControl {
        workers: Arc::new(Semaphore::new(config.worker_pool_size)),
        queued: Arc::new(AtomicUsize::new(0)),
        queue_capacity: config.inbound_queue_capacity,
    };

    Router::new()
        .route("/optimize", post(optimize_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/cache/stats", get(cache_stats_handler))
        .route("/cache/invalidate", post(cache_invalidate_handler))
        .route("/config", get(get_config_handler).put(update_config_handler))
        .fallback(unknown_route_handler)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(apilo_core::MAX_INBOUND_BODY_BYTES))
        .layer(middleware::from_fn_with_state(admission, admission_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.egress.overall_timeout.as_secs().max(1) + 5,
        )))
}

/// Bind the loopback listener and serve until a shutdown signal fires,
/// respecting `shutdown_grace` before the accept loop is torn down.
pub async fn serve(config: &AppConfig, router: Router, lifecycle: Arc<ServerLifecycle>) -> std::io::Result<()> {
    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], crate::config::DEFAULT_PORT)));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "apilod listening");

    install_signal_handlers(Arc::clone(&lifecycle));
    lifecycle.start().await;

    // Two independent subscribers to the same broadcast signal: one feeds
    // axum's own graceful-shutdown drain, the other times how long that
    // drain is allowed to take before we give up waiting on it.
    let mut graceful_rx = lifecycle.shutdown_signal();
    let mut grace_timer_rx = lifecycle.shutdown_signal();
    let shutdown_grace = config.shutdown_grace;

    let serve_future = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            let _ = graceful_rx.recv().await;
            tracing::info!("graceful shutdown: draining in-flight requests");
        },
    );

    tokio::select! {
        result = serve_future => result?,
        () = async {
            let _ = grace_timer_rx.recv().await;
            tokio::time::sleep(shutdown_grace).await;
        } => {
            tracing::warn!(
                grace_seconds = shutdown_grace.as_secs_f64(),
                "shutdown grace period elapsed with connections still draining",
            );
        }
    }

    lifecycle.set_state(crate::lifecycle::ServerState::Stopped).await;
    Ok(())
}

/// Catches any request that matched no declared route, returning the
/// same JSON error shape every other endpoint uses instead of axum's
/// default empty-body 404.
async fn unknown_route_handler() -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({ "error": "no such endpoint", "reason": "not_found" })),
    )
        .into_response()
}

fn install_signal_handlers(lifecycle: Arc<ServerLifecycle>) {
    let sigint_lifecycle = Arc::clone(&lifecycle);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            return;
        }
        tracing::info!("SIGINT received, initiating shutdown");
        sigint_lifecycle.shutdown().await;
    });

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    tracing::info!("SIGTERM received, initiating shutdown");
                    lifecycle.shutdown().await;
                }
                Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn admitted(admission: AdmissionControl) -> StatusCode {
        let router = Router::new()
            .route("/probe", get(|| async { StatusCode::OK }))
            .layer(middleware::from_fn_with_state(admission, admission_middleware));
        let request = axum::http::Request::builder()
            .uri("/probe")
            .body(axum::body::Body::empty())
            .unwrap();
        tower::ServiceExt::oneshot(router, request).await.unwrap().status()
    }

    #[tokio::test]
    async fn admission_rejects_once_queue_is_full() {
        // Zero worker slots and zero queue capacity: the very first
        // request already has `queued_before == 0 >= queue_capacity`.
        let admission = AdmissionControl {
            workers: Arc::new(Semaphore::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
            queue_capacity: 0,
        };
        assert_eq!(admitted(admission).await, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn admission_allows_requests_within_capacity() {
        let admission = AdmissionControl {
            workers: Arc::new(Semaphore::new(1)),
            queued: Arc::new(AtomicUsize::new(0)),
            queue_capacity: 4,
        };
        assert_eq!(admitted(admission).await, StatusCode::OK);
    }
}
