//! The pooled, timed outbound HTTP client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use apilo_core::cached::HeaderMap;
use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::EgressConfig;
use crate::error::EgressError;
use crate::timing::Timing;

/// A request ready to be sent to an upstream.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method, e.g. `"GET"`.
    pub method: String,
    /// Absolute request URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body; empty for most `GET`/`HEAD` calls.
    pub body: Vec<u8>,
}

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct EgressResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Fully buffered response body.
    pub body: Vec<u8>,
}

/// Outbound HTTP client shared across every request the dispatcher issues.
///
/// Holds one pooled `reqwest::Client` (connection reuse, HTTP/2 ALPN
/// negotiation) plus a per-upstream `tokio::sync::Semaphore` bounding
/// in-flight concurrency, keyed the same way as
/// [`apilo_breaker::CircuitBreakerRegistry`] (`host:port`).
#[derive(Debug)]
pub struct EgressClient {
    http: reqwest::Client,
    config: EgressConfig,
    seen_hosts: DashMap<String, ()>,
    upstream_semaphores: DashMap<String, Arc<Semaphore>>,
}

impl EgressClient {
    /// Build a client from configuration. Fails only if the underlying
    /// TLS backend cannot be initialized.
    pub fn new(config: EgressConfig) -> Result<Self, EgressError> {
        let builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_conns_per_host)
            .pool_idle_timeout(config.idle_conn_timeout)
            .connect_timeout(config.tls_handshake_timeout)
            .timeout(config.overall_timeout);
        if config.force_http2 {
            // rustls already advertises `h2` in its ALPN offer for every
            // HTTPS connection and falls back to HTTP/1.1 when the
            // upstream doesn't negotiate it; `http2_prior_knowledge()`
            // would skip ALPN entirely and has no such fallback, breaking
            // HTTP/1.1-only upstreams outright.
            tracing::debug!("force_http2 set; relying on default ALPN negotiation with HTTP/1.1 fallback");
        }
        let http = builder
            .build()
            .map_err(|e| EgressError::Transport {
                upstream: "<client-init>".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            config,
            seen_hosts: DashMap::new(),
            upstream_semaphores: DashMap::new(),
        })
    }

    /// Issue one request and wait for the full response body.
    ///
    /// `deadline` and the configured `overall_timeout` both bound the
    /// call; whichever is sooner wins. Returns `cacheable = false`
    /// (never an error) when the body exceeds `max_body_bytes`.
    pub async fn do_request(
        &self,
        upstream: &str,
        request: OutboundRequest,
        deadline: Instant,
        max_body_bytes: usize,
    ) -> Result<(EgressResponse, Timing, bool), EgressError> {
        let _permit = self.acquire_permit(upstream).await;

        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            EgressError::Transport {
                upstream: upstream.to_string(),
                reason: e.to_string(),
            }
        })?;
        let mut builder = self.http.request(method, &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let budget = remaining.min(self.config.overall_timeout);
        let header_budget = budget.min(self.config.response_header_timeout);

        let started = Instant::now();
        let response = tokio::time::timeout(header_budget, builder.send())
            .await
            .map_err(|_| EgressError::Timeout {
                upstream: upstream.to_string(),
            })?
            .map_err(|e| Self::classify(upstream, &e))?;
        let ttfb = started.elapsed();

        let reused = self.seen_hosts.insert(upstream.to_string(), ()).is_some();

        let status = response.status().as_u16();
        let headers = Self::convert_headers(response.headers());

        let read_start = Instant::now();
        let body_budget = budget.saturating_sub(ttfb);
        let body = tokio::time::timeout(body_budget, response.bytes())
            .await
            .map_err(|_| EgressError::Timeout {
                upstream: upstream.to_string(),
            })?
            .map_err(|e| Self::classify(upstream, &e))?;
        let read_ms = u64::try_from(read_start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let cacheable = body.len() <= max_body_bytes;
        let timing = Timing {
            dns_ms: 0,
            connect_ms: if reused {
                0
            } else {
                u64::try_from(ttfb.as_millis()).unwrap_or(u64::MAX)
            },
            tls_ms: 0,
            ttfb_ms: u64::try_from(ttfb.as_millis()).unwrap_or(u64::MAX),
            read_ms,
            reused,
        };

        tracing::debug!(
            upstream,
            status,
            total_ms = timing.total_ms(),
            reused,
            "egress round trip complete"
        );

        Ok((
            EgressResponse {
                status,
                headers,
                body: body.to_vec(),
            },
            timing,
            cacheable,
        ))
    }

    async fn acquire_permit(&self, upstream: &str) -> Option<OwnedSemaphorePermit> {
        let limit = self.config.max_inflight_per_upstream?;
        let semaphore = self
            .upstream_semaphores
            .entry(upstream.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone();
        semaphore.acquire_owned().await.ok()
    }

    fn classify(upstream: &str, err: &reqwest::Error) -> EgressError {
        if err.is_timeout() {
            EgressError::Timeout {
                upstream: upstream.to_string(),
            }
        } else if err.is_decode() || err.is_body() {
            EgressError::UpstreamProto {
                upstream: upstream.to_string(),
                reason: err.to_string(),
            }
        } else {
            EgressError::Transport {
                upstream: upstream.to_string(),
                reason: err.to_string(),
            }
        }
    }

    fn convert_headers(src: &reqwest::header::HeaderMap) -> HeaderMap {
        src.iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn far_future_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn happy_path_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let client = EgressClient::new(EgressConfig::default()).unwrap();
        let request = OutboundRequest {
            method: "GET".into(),
            url: format!("{}/ok", server.uri()),
            headers: HeaderMap::new(),
            body: Vec::new(),
        };
        let (response, timing, cacheable) = client
            .do_request("test-upstream", request, far_future_deadline(), 1024)
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
        assert!(cacheable);
        assert!(!timing.reused);
    }

    #[tokio::test]
    async fn second_call_to_same_upstream_is_marked_reused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = EgressClient::new(EgressConfig::default()).unwrap();
        for expect_reused in [false, true] {
            let request = OutboundRequest {
                method: "GET".into(),
                url: format!("{}/ok", server.uri()),
                headers: HeaderMap::new(),
                body: Vec::new(),
            };
            let (_, timing, _) = client
                .do_request("same-upstream", request, far_future_deadline(), 1024)
                .await
                .unwrap();
            assert_eq!(timing.reused, expect_reused);
        }
    }

    #[tokio::test]
    async fn body_over_ceiling_is_flagged_uncacheable_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let client = EgressClient::new(EgressConfig::default()).unwrap();
        let request = OutboundRequest {
            method: "GET".into(),
            url: format!("{}/big", server.uri()),
            headers: HeaderMap::new(),
            body: Vec::new(),
        };
        let (response, _timing, cacheable) = client
            .do_request("test-upstream", request, far_future_deadline(), 8)
            .await
            .unwrap();

        assert_eq!(response.body.len(), 64);
        assert!(!cacheable);
    }

    #[tokio::test]
    async fn non_2xx_status_is_a_response_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = EgressClient::new(EgressConfig::default()).unwrap();
        let request = OutboundRequest {
            method: "GET".into(),
            url: format!("{}/missing", server.uri()),
            headers: HeaderMap::new(),
            body: Vec::new(),
        };
        let (response, _, _) = client
            .do_request("test-upstream", request, far_future_deadline(), 1024)
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn connection_failure_is_classified_as_transport_error() {
        let client = EgressClient::new(EgressConfig::default()).unwrap();
        let request = OutboundRequest {
            method: "GET".into(),
            url: "http://127.0.0.1:1".into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        };
        let err = client
            .do_request("dead-upstream", request, far_future_deadline(), 1024)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "upstream_transport");
    }
}
