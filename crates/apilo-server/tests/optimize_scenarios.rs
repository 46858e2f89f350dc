//! End-to-end scenarios driven over real HTTP against a bound daemon,
//! one test per core cache/breaker/concurrency behavior the daemon promises.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apilo_server::config::AppConfig;
use apilo_server::engine::Engine;
use apilo_server::lifecycle::ServerLifecycle;
use apilo_server::server::build_router;
use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Bind the daemon to an ephemeral loopback port and serve it in the
/// background for the lifetime of the test.
async fn spawn_daemon(config: AppConfig) -> (String, Engine) {
    let engine = Engine::new(&config).expect("engine builds from a valid config");
    let lifecycle = Arc::new(ServerLifecycle::new());
    let router = build_router(&config, engine.clone(), lifecycle);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral loopback port");
    let addr = listener.local_addr().expect("listener has a local addr");
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .expect("daemon serve loop");
    });
    (format!("http://{addr}"), engine)
}

fn test_config(pid_dir: &tempfile::TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.pid_file = pid_dir.path().join("apilod.pid");
    config
}

async fn optimize(client: &reqwest::Client, base: &str, body: Value) -> Value {
    client
        .post(format!("{base}/optimize"))
        .json(&body)
        .send()
        .await
        .expect("optimize request reaches the daemon")
        .json()
        .await
        .expect("optimize response is JSON")
}

async fn optimize_raw(client: &reqwest::Client, base: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("{base}/optimize"))
        .json(&body)
        .send()
        .await
        .expect("optimize request reaches the daemon")
}

/// S1 — cold then warm.
#[tokio::test]
async fn cold_then_warm_hit_is_faster_and_single_entry() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 1024]))
        .mount(&upstream)
        .await;

    let pid_dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(&pid_dir);
    config.cache.max_memory_bytes = 100 * 1024 * 1024;
    config.cache.default_ttl = Duration::from_secs(60);
    let (base, _engine) = spawn_daemon(config).await;
    let client = reqwest::Client::new();
    let url = format!("{}/a", upstream.uri());

    let first = optimize(&client, &base, json!({ "url": url })).await;
    assert_eq!(first["hit"], json!(false));
    assert_eq!(first["timing"]["reused"], json!(false));
    let first_latency = first["latency_ms"].as_f64().expect("latency_ms is a number");

    let second = optimize(&client, &base, json!({ "url": url })).await;
    assert_eq!(second["hit"], json!(true));
    let second_latency = second["latency_ms"].as_f64().expect("latency_ms is a number");
    assert!(
        second_latency < first_latency,
        "warm hit ({second_latency}ms) should be faster than the cold miss ({first_latency}ms)"
    );

    let stats: Value = client
        .get(format!("{base}/cache/stats"))
        .send()
        .await
        .expect("cache/stats request")
        .json()
        .await
        .expect("cache/stats response is JSON");
    assert_eq!(stats["entry_count"], json!(1));
}

/// S2 — invalidation by tag.
#[tokio::test]
async fn invalidate_by_tag_removes_only_tagged_entries() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tagged"))
        .mount(&upstream)
        .await;

    let pid_dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&pid_dir);
    let (base, _engine) = spawn_daemon(config).await;
    let client = reqwest::Client::new();

    let urls: Vec<String> = (0..3)
        .map(|i| format!("{}/user{i}", upstream.uri()))
        .collect();

    for url in &urls {
        let resp = optimize(&client, &base, json!({ "url": url, "tags": ["user:42"] })).await;
        assert_eq!(resp["hit"], json!(false));
    }

    let invalidate: Value = client
        .post(format!("{base}/cache/invalidate"))
        .json(&json!({ "by": "tag", "value": "user:42" }))
        .send()
        .await
        .expect("invalidate request")
        .json()
        .await
        .expect("invalidate response is JSON");
    assert_eq!(invalidate["removed"], json!(3));

    for url in &urls {
        let resp = optimize(&client, &base, json!({ "url": url, "tags": ["user:42"] })).await;
        assert_eq!(resp["hit"], json!(false), "expected a fresh miss for {url} after invalidation");
    }
}

/// Responds with 503 for the first `fail_count` calls, then 200.
struct FlakyThenHealthy {
    calls: AtomicUsize,
    fail_count: usize,
}

impl Respond for FlakyThenHealthy {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200).set_body_string("recovered")
        }
    }
}

/// S3 — breaker trip.
#[tokio::test]
async fn breaker_trips_then_half_open_probe_recovers() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(FlakyThenHealthy {
            calls: AtomicUsize::new(0),
            fail_count: 5,
        })
        .mount(&upstream)
        .await;

    let pid_dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(&pid_dir);
    config.breaker.failure_threshold = 5;
    config.breaker.open_timeout = Duration::from_millis(150);
    config.breaker.half_open_max_requests = 1;
    let (base, _engine) = spawn_daemon(config).await;
    let client = reqwest::Client::new();
    let url = format!("{}/flaky", upstream.uri());

    for _ in 0..5 {
        let resp = optimize(&client, &base, json!({ "url": url })).await;
        assert_eq!(resp["status"], json!(503), "upstream 503 is passed through, not an apilo error");
    }

    for _ in 0..5 {
        let resp = optimize_raw(&client, &base, json!({ "url": url })).await;
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = resp.json().await.expect("error body is JSON");
        assert_eq!(body["reason"], json!("breaker_open"));
    }

    tokio::time::sleep(Duration::from_millis(250)).await;

    let probe = optimize(&client, &base, json!({ "url": url })).await;
    assert_eq!(probe["status"], json!(200));

    let after = optimize(&client, &base, json!({ "url": url })).await;
    assert_eq!(after["upstream_state"], json!("closed"));
}

/// S4 — single-flight convergence.
#[tokio::test]
async fn concurrent_cold_requests_single_flight_to_one_upstream_call() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("single-flighted")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&upstream)
        .await;

    let pid_dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(&pid_dir);
    // Wide enough that none of the 50 concurrent calls below are rejected
    // by admission control regardless of how many cores this runs on.
    config.worker_pool_size = 64;
    config.inbound_queue_capacity = 64;
    let (base, engine) = spawn_daemon(config).await;
    let client = reqwest::Client::new();
    let url = format!("{}/slow", upstream.uri());

    let misses_before = engine.metrics().snapshot().cache_misses;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let client = client.clone();
        let base = base.clone();
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            optimize(&client, &base, json!({ "url": url })).await
        }));
    }
    let mut bodies = Vec::with_capacity(handles.len());
    for handle in handles {
        bodies.push(handle.await.expect("concurrent optimize task"));
    }

    let expected_body = bodies[0]["body"].clone();
    for body in &bodies {
        assert_eq!(body["body"], expected_body);
    }

    let requests = upstream
        .received_requests()
        .await
        .expect("wiremock request recording is enabled by default");
    assert_eq!(requests.len(), 1, "exactly one request should reach the upstream");

    let misses_after = engine.metrics().snapshot().cache_misses;
    assert_eq!(misses_after - misses_before, 1);
}

/// S5 — eviction under pressure.
#[tokio::test]
async fn eviction_keeps_cache_within_memory_ceiling() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'e'; 8 * 1024]))
        .mount(&upstream)
        .await;

    let pid_dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(&pid_dir);
    config.cache.max_memory_bytes = 64 * 1024;
    config.cache.max_entries = 10_000;
    let (base, engine) = spawn_daemon(config).await;
    let client = reqwest::Client::new();

    let first_url = format!("{}/e0", upstream.uri());
    for i in 0..10 {
        let url = format!("{}/e{i}", upstream.uri());
        let resp = optimize(&client, &base, json!({ "url": url })).await;
        assert_eq!(resp["hit"], json!(false));
    }

    assert!(engine.cache().stats().entry_count <= 8);

    let refetch = optimize(&client, &base, json!({ "url": first_url })).await;
    assert_eq!(refetch["hit"], json!(false), "the first-inserted URL should have been evicted");
}

/// S6 — TTL sweep.
#[tokio::test]
async fn ttl_sweep_clears_every_entry_without_any_get_calls() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("short-lived"))
        .mount(&upstream)
        .await;

    let pid_dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(&pid_dir);
    config.cache.default_ttl = Duration::from_secs(1);
    config.cache.sweep_interval = Duration::from_millis(500);
    config.cache.max_memory_bytes = 100 * 1024 * 1024;
    config.cache.max_entries = 10_000;
    let (base, engine) = spawn_daemon(config).await;
    let client = reqwest::Client::new();

    for i in 0..100 {
        let url = format!("{}/t{i}", upstream.uri());
        let resp = optimize(&client, &base, json!({ "url": url })).await;
        assert_eq!(resp["hit"], json!(false));
    }
    assert_eq!(engine.cache().stats().entry_count, 100);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let stats = engine.cache().stats();
    assert_eq!(stats.entry_count, 0);
    assert_eq!(stats.evictions_by_ttl, 100);
}

/// `PUT /config` live-tunes the cache ceiling and the default TTL without
/// a restart, and rejects an out-of-range field with 400.
#[tokio::test]
async fn put_config_retunes_default_ttl_and_rejects_invalid_fields() {
    let pid_dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&pid_dir);
    let (base, engine) = spawn_daemon(config).await;
    let client = reqwest::Client::new();

    let updated: Value = client
        .put(format!("{base}/config"))
        .json(&json!({ "default_ttl_seconds": 120, "cache_max_bytes": 4096 }))
        .send()
        .await
        .expect("put /config request")
        .json()
        .await
        .expect("put /config response is JSON");
    assert_eq!(updated["default_ttl_seconds"], json!(120));
    assert_eq!(updated["cache_max_bytes"], json!(4096));
    assert_eq!(engine.default_ttl(), Duration::from_secs(120));

    let fetched: Value = client
        .get(format!("{base}/config"))
        .send()
        .await
        .expect("get /config request")
        .json()
        .await
        .expect("get /config response is JSON");
    assert_eq!(fetched["default_ttl_seconds"], json!(120));

    let rejected = client
        .put(format!("{base}/config"))
        .json(&json!({ "breaker_failure_threshold": 0 }))
        .send()
        .await
        .expect("put /config request");
    assert_eq!(rejected.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = rejected.json().await.expect("error body is JSON");
    assert_eq!(body["field"], json!("breaker_failure_threshold"));
}
