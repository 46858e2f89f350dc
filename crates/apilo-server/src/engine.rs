//! The optimization engine: composes the cache, breaker, egress client,
//! and metrics registry into the single `optimize` operation every
//! `/optimize` call drives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use apilo_breaker::{BreakerOutcome, CircuitBreakerRegistry};
use apilo_cache::Cache;
use apilo_core::cached::{CachedResponse, HeaderMap as CoreHeaderMap};
use apilo_core::{upstream_host, CacheKey, RequestContext};
use apilo_egress::{EgressClient, OutboundRequest, Timing};
use apilo_metrics::{LatencyBucket, MetricsRegistry};

use crate::config::AppConfig;
use crate::error::{MissError, ServerError, ServerResult};

/// Per-call metadata that does not fit `apilo_cache::Cache`'s fixed
/// `(CachedResponse, bool)` return type. The compute closure inserts one
/// entry before it returns; `apilo-cache` commits the entry and clears
/// its own in-flight marker strictly before broadcasting to waiters, so
/// by the time any caller observes a result this map is already
/// populated for that key. Swept on every read: entries are single-use.
type MissMetaMap = DashMap<CacheKey, MissMeta>;

#[derive(Debug, Clone)]
struct MissMeta {
    timing: Timing,
}

/// Outcome of one `optimize` call, ready to be rendered onto the wire.
#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    /// The response to return to the caller.
    pub response: CachedResponse,
    /// Whether this was served from the cache.
    pub hit: bool,
    /// Per-phase egress timing; all-zero on a hit.
    pub timing: Timing,
    /// Whether the response was (or originally was) eligible for caching.
    pub cacheable: bool,
    /// Canonical cache key for this request.
    pub cache_key: CacheKey,
    /// Circuit breaker state for the upstream, read after the call.
    pub upstream_state: &'static str,
}

/// One already-validated inbound optimize request.
#[derive(Debug)]
pub struct OptimizeCall {
    /// HTTP method.
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Request headers.
    pub headers: CoreHeaderMap,
    /// Request body.
    pub body: Vec<u8>,
    /// Per-call TTL override, if any.
    pub ttl_override: Option<Duration>,
    /// Tags to assign on insert, if any.
    pub tags: Vec<String>,
    /// Skip the cache entirely.
    pub no_cache: bool,
}

/// Owns every sub-component and exposes the one `optimize` operation the
/// dispatcher's handlers drive. Cheaply cloneable: every field is itself
/// an `Arc` or a cheap-clone handle, so this is held directly in axum's
/// `State<Engine>` rather than behind an extra `Arc`.
#[derive(Clone)]
pub struct Engine {
    cache: Arc<Cache<MissError>>,
    breaker: CircuitBreakerRegistry,
    egress: Arc<EgressClient>,
    metrics: Arc<MetricsRegistry>,
    miss_meta: Arc<MissMetaMap>,
    max_entry_bytes: usize,
    // Lives behind an atomic rather than a plain `Duration` field so
    // `PUT /config`'s `default_ttl_seconds` can retune it without a
    // restart, the same way the cache's own byte/entry ceilings do.
    default_ttl_secs: Arc<AtomicU64>,
    started_at: Instant,
    sampler_shutdown: CancellationToken,
    // The cache tracks its own cumulative eviction count (LRU + TTL); this
    // mirrors the last value folded into `metrics` so each `observe` call
    // can forward only the delta, since `MetricsRegistry::inc_evictions`
    // takes an increment rather than an absolute value.
    last_synced_evictions: AtomicU64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cache_stats", &self.cache.stats())
            .finish()
    }
}

impl Engine {
    /// Build the engine from a fully-resolved configuration. Spawns the
    /// background resource-usage sampler alongside the cache's own TTL
    /// sweep task.
    pub fn new(config: &AppConfig) -> Result<Self, ServerError> {
        let egress = EgressClient::new(config.egress.clone())
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        let metrics = Arc::new(MetricsRegistry::new());
        let sampler_shutdown = CancellationToken::new();
        spawn_resource_sampler(Arc::clone(&metrics), sampler_shutdown.clone());
        Ok(Self {
            cache: Cache::new(config.cache.clone()),
            breaker: CircuitBreakerRegistry::new(config.breaker.clone()),
            egress: Arc::new(egress),
            metrics,
            miss_meta: Arc::new(DashMap::new()),
            max_entry_bytes: config.cache.max_entry_bytes,
            default_ttl_secs: Arc::new(AtomicU64::new(config.cache.default_ttl.as_secs())),
            started_at: Instant::now(),
            sampler_shutdown,
            last_synced_evictions: AtomicU64::new(0),
        })
    }

    /// Stop the background resource-usage sampler. Does not touch the
    /// cache's own sweep task; callers stop that separately via
    /// `self.cache().shutdown()` — the two are independent background
    /// tasks.
    pub fn shutdown(&self) {
        self.sampler_shutdown.cancel();
    }

    /// Shared metrics registry, for handlers and the background sampler.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Shared cache, for `/cache/stats` and `/cache/invalidate`.
    #[must_use]
    pub fn cache(&self) -> &Arc<Cache<MissError>> {
        &self.cache
    }

    /// Shared breaker registry, for `/status` and `/metrics`.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreakerRegistry {
        &self.breaker
    }

    /// Seconds since the engine (and thus the daemon) started.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The default TTL applied when a call does not supply its own.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs.load(Ordering::Relaxed))
    }

    /// Retune the default TTL. Takes effect on the next `/optimize` call
    /// that does not supply a per-call override; existing entries keep
    /// the TTL they were inserted with.
    pub fn set_default_ttl(&self, value: Duration) {
        self.default_ttl_secs.store(value.as_secs(), Ordering::Relaxed);
    }

    /// Resolve one request: cache hit, single-flighted miss through the
    /// breaker and egress client, or a surfaced error.
    pub async fn optimize(&self, call: OptimizeCall, ctx: &RequestContext) -> ServerResult<OptimizeOutcome> {
        self.metrics.inc_total_requests();
        let started = Instant::now();

        let vary_headers = Vec::new(); // default vary set is empty
        let key = CacheKey::build(&call.method, &call.url, &vary_headers, &call.body)?;
        let upstream = upstream_host(&call.url)?;

        if call.no_cache {
            let outcome = self.compute_uncached(&call, &upstream, ctx).await?;
            self.observe(&outcome, started);
            return Ok(outcome);
        }

        let cache = Arc::clone(&self.cache);
        let breaker = self.breaker.clone();
        let egress = Arc::clone(&self.egress);
        let miss_meta = Arc::clone(&self.miss_meta);
        let metrics = Arc::clone(&self.metrics);
        let max_entry_bytes = self.max_entry_bytes;

        let default_ttl = call.ttl_override.unwrap_or_else(|| self.default_ttl());
        let tags = call.tags.clone();
        let method = call.method.clone();
        let url = call.url.clone();
        let headers = call.headers.clone();
        let body = call.body.clone();
        let deadline = ctx.deadline();
        let compute_key = key.clone();
        let compute_upstream = upstream.clone();

        let result = cache
            .get_or_compute(key.clone(), call.url.clone(), move || async move {
                // Runs at most once per single-flight group no matter how
                // many concurrent callers joined it, so this is the one
                // place a miss is counted exactly once.
                metrics.inc_cache_miss();
                let outcome = Self::do_miss(
                    &breaker,
                    &egress,
                    &compute_upstream,
                    method,
                    url,
                    headers,
                    body,
                    deadline,
                    max_entry_bytes,
                )
                .await;
                match outcome {
                    Ok((response, cacheable, timing)) => {
                        miss_meta.insert(compute_key, MissMeta { timing });
                        let mut response = response;
                        response.ttl = default_ttl;
                        response.tags = tags;
                        Ok((response, cacheable))
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

        let upstream_state = self.breaker.current_state(&upstream).as_str();

        match result {
            Ok((response, hit)) => {
                let (timing, cacheable) = if hit {
                    self.metrics.inc_cache_hit();
                    (Timing::zero(), true)
                } else {
                    let meta = self.miss_meta.remove(&key).map(|(_, m)| m);
                    (meta.map_or_else(Timing::zero, |m| m.timing), true)
                };
                let outcome = OptimizeOutcome {
                    response,
                    hit,
                    timing,
                    cacheable,
                    cache_key: key,
                    upstream_state,
                };
                self.observe(&outcome, started);
                Ok(outcome)
            }
            Err(e) => {
                self.record_miss_failure(&e);
                Err(e.to_server_error())
            }
        }
    }

    /// Fold a failed miss into the metrics registry: breaker rejections
    /// get their own counter (spec's "breaker-open events"), everything
    /// else counts as a generic error.
    fn record_miss_failure(&self, e: &MissError) {
        if matches!(e, MissError::Breaker(_)) {
            self.metrics.inc_breaker_open_events();
        } else {
            self.metrics.inc_errors();
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn do_miss(
        breaker: &CircuitBreakerRegistry,
        egress: &EgressClient,
        upstream: &str,
        method: String,
        url: String,
        headers: CoreHeaderMap,
        body: Vec<u8>,
        deadline: Instant,
        max_entry_bytes: usize,
    ) -> Result<(CachedResponse, bool, Timing), MissError> {
        let token = breaker.admit(upstream)?;

        let request = OutboundRequest {
            method,
            url,
            headers,
            body,
        };
        let egress_result = egress
            .do_request(upstream, request, deadline, max_entry_bytes)
            .await;

        match egress_result {
            Ok((response, timing, body_cacheable)) => {
                let outcome = apilo_breaker::classify_status(response.status);
                token.record(outcome);
                let cacheable = body_cacheable
                    && outcome == BreakerOutcome::Success
                    && is_cacheable_status(response.status)
                    && !forbids_storage(&response.headers);
                let cached = CachedResponse::new(
                    response.status,
                    response.headers,
                    response.body,
                    Duration::ZERO,
                    Vec::new(),
                );
                Ok((cached, cacheable, timing))
            }
            Err(e) => {
                token.record(BreakerOutcome::Failure);
                Err(MissError::Egress(e))
            }
        }
    }

    /// `no_cache: true` path: bypass the cache entirely, still through
    /// the breaker, never inserted.
    async fn compute_uncached(
        &self,
        call: &OptimizeCall,
        upstream: &str,
        ctx: &RequestContext,
    ) -> ServerResult<OptimizeOutcome> {
        let key = CacheKey::build(&call.method, &call.url, &[], &call.body)?;
        let result = Self::do_miss(
            &self.breaker,
            &self.egress,
            upstream,
            call.method.clone(),
            call.url.clone(),
            call.headers.clone(),
            call.body.clone(),
            ctx.deadline(),
            self.max_entry_bytes,
        )
        .await;

        self.metrics.inc_cache_miss();
        match result {
            Ok((response, _cacheable, timing)) => Ok(OptimizeOutcome {
                response,
                hit: false,
                timing,
                cacheable: false,
                cache_key: key,
                upstream_state: self.breaker.current_state(upstream).as_str(),
            }),
            Err(e) => {
                self.record_miss_failure(&e);
                Err(e.to_server_error())
            }
        }
    }

    fn observe(&self, outcome: &OptimizeOutcome, started: Instant) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let bucket = if outcome.hit {
            LatencyBucket::Hit
        } else {
            LatencyBucket::Miss
        };
        self.metrics.observe_latency(bucket, elapsed_ms);
        let stats = self.cache.stats();
        self.metrics.set_cache_entries(stats.entry_count as u64);
        self.metrics.set_cache_bytes(stats.byte_usage);
        let previous = self.last_synced_evictions.swap(stats.evictions, Ordering::Relaxed);
        if stats.evictions > previous {
            self.metrics.inc_evictions(stats.evictions - previous);
        }
        for (upstream, state) in self.breaker.all_states() {
            self.metrics.set_breaker_state(upstream, state.as_str());
        }
    }
}

/// How often the resource sampler refreshes the `memory_usage_mb` gauge.
const SAMPLER_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically samples this process's resident memory and publishes it
/// as the `memory_usage_mb` gauge `/metrics` and `/status` read, driven by
/// an external interval rather than self-sampling inline on every request.
fn spawn_resource_sampler(metrics: Arc<MetricsRegistry>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let Ok(pid) = sysinfo::get_current_pid() else {
            tracing::warn!("resource sampler could not determine this process's pid; memory_usage_mb will stay at zero");
            return;
        };
        let mut system = sysinfo::System::new();
        let mut ticker = tokio::time::interval(SAMPLER_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    system.refresh_process(pid);
                    if let Some(process) = system.process(pid) {
                        let mb = process.memory() as f64 / (1024.0 * 1024.0);
                        metrics.set_memory_usage_mb(mb);
                        metrics.set_gauge("cpu_usage_percent", f64::from(process.cpu_usage()));
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }
    });
}

/// Only 2xx/3xx responses are cacheable; 4xx/5xx are returned to the
/// caller but never stored.
const fn is_cacheable_status(status: u16) -> bool {
    status < 400
}

/// A response carrying `Cache-Control: no-store` is never cached. Checked
/// across every `Cache-Control` header instance, since repeated headers
/// are semantically equivalent to one comma-joined value.
fn forbids_storage(headers: &CoreHeaderMap) -> bool {
    headers.get_all("cache-control").any(|v| {
        v.split(',')
            .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cacheable_status_excludes_client_and_server_errors() {
        assert!(is_cacheable_status(200));
        assert!(is_cacheable_status(301));
        assert!(!is_cacheable_status(404));
        assert!(!is_cacheable_status(500));
    }

    #[test]
    fn no_store_directive_forbids_storage() {
        let mut headers = CoreHeaderMap::new();
        headers.push("Cache-Control", "private, no-store");
        assert!(forbids_storage(&headers));

        let mut allowed = CoreHeaderMap::new();
        allowed.push("Cache-Control", "max-age=60");
        assert!(!forbids_storage(&allowed));

        assert!(!forbids_storage(&CoreHeaderMap::new()));
    }

    #[test]
    fn no_store_is_caught_across_repeated_cache_control_headers() {
        let mut headers = CoreHeaderMap::new();
        headers.push("Cache-Control", "private");
        headers.push("Cache-Control", "no-store");
        assert!(forbids_storage(&headers));
    }
}
