use std::sync::Arc;

use apilo_server::config::AppConfig;
use apilo_server::engine::Engine;
use apilo_server::lifecycle::ServerLifecycle;
use apilo_server::pidfile::PidFile;
use apilo_server::server::{build_router, serve};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env();

    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        bind = %config.bind_addr(),
        worker_pool_size = config.worker_pool_size,
        "starting apilod"
    );

    let _pid_guard = PidFile::acquire(&config.pid_file).map_err(|e| {
        tracing::error!(error = %e, "refusing to start");
        e
    })?;

    let engine = Engine::new(&config)?;
    let lifecycle = Arc::new(ServerLifecycle::new());
    let router = build_router(&config, engine.clone(), Arc::clone(&lifecycle));

    let result = serve(&config, router, lifecycle).await;

    engine.shutdown();
    engine.cache().shutdown();
    engine.cache().clear();

    let snapshot = engine.metrics().snapshot();
    tracing::info!(
        total_requests = snapshot.total_requests,
        cache_hits = snapshot.cache_hits,
        cache_misses = snapshot.cache_misses,
        evictions = snapshot.evictions,
        errors = snapshot.errors,
        breaker_open_events = snapshot.breaker_open_events,
        uptime_seconds = snapshot.uptime.as_secs_f64(),
        "apilod final metrics snapshot"
    );

    result.map_err(Into::into)
}
