//! Per-upstream breaker state machine and the `Admit`/`Record` contract.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::BreakerConfig;
use crate::error::BreakerError;
use crate::state::CircuitState;

/// The result of one egress attempt, as classified by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerOutcome {
    /// 2xx/3xx response.
    Success,
    /// Transport/DNS/TLS error, timeout, or 5xx response.
    Failure,
}

/// Classify an HTTP status code per spec: 5xx is a failure, 4xx is not,
/// 2xx/3xx are successes.
#[must_use]
pub const fn classify_status(status: u16) -> BreakerOutcome {
    if status >= 500 {
        BreakerOutcome::Failure
    } else {
        BreakerOutcome::Success
    }
}

#[derive(Debug)]
struct UpstreamState {
    state: CircuitState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    half_open_remaining: u32,
}

impl UpstreamState {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            open_until: None,
            half_open_remaining: 0,
        }
    }
}

/// Thresholds live behind atomics, not a plain `BreakerConfig`, so
/// a config endpoint can retune a running breaker without a restart.
struct Inner {
    enabled: bool,
    failure_threshold: AtomicU32,
    open_timeout_ms: AtomicU64,
    half_open_max_requests: AtomicU32,
    states: DashMap<String, Mutex<UpstreamState>>,
}

/// A shared, cheaply-cloneable registry of per-upstream circuit breakers.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config_snapshot())
            .field("tracked_upstreams", &self.inner.states.len())
            .finish()
    }
}

impl CircuitBreakerRegistry {
    /// Construct a registry. No upstream is tracked until first admitted.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                enabled: config.enabled,
                failure_threshold: AtomicU32::new(config.failure_threshold),
                open_timeout_ms: AtomicU64::new(
                    u64::try_from(config.open_timeout.as_millis()).unwrap_or(u64::MAX),
                ),
                half_open_max_requests: AtomicU32::new(config.half_open_max_requests),
                states: DashMap::new(),
            }),
        }
    }

    fn failure_threshold(&self) -> u32 {
        self.inner.failure_threshold.load(Ordering::Relaxed)
    }

    fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.open_timeout_ms.load(Ordering::Relaxed))
    }

    fn half_open_max_requests(&self) -> u32 {
        self.inner.half_open_max_requests.load(Ordering::Relaxed)
    }

    /// Retune the consecutive-failure threshold that trips `Closed -> Open`.
    pub fn set_failure_threshold(&self, value: u32) {
        self.inner.failure_threshold.store(value, Ordering::Relaxed);
    }

    /// Retune how long an `Open` breaker stays open before probing.
    pub fn set_open_timeout(&self, value: Duration) {
        self.inner
            .open_timeout_ms
            .store(u64::try_from(value.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Retune the number of probe requests admitted while `HalfOpen`.
    pub fn set_half_open_max_requests(&self, value: u32) {
        self.inner
            .half_open_max_requests
            .store(value, Ordering::Relaxed);
    }

    /// The configuration this registry is currently operating under,
    /// for `/status` and `GET /config`.
    #[must_use]
    pub fn config_snapshot(&self) -> BreakerConfig {
        BreakerConfig {
            enabled: self.inner.enabled,
            failure_threshold: self.failure_threshold(),
            open_timeout: self.open_timeout(),
            half_open_max_requests: self.half_open_max_requests(),
        }
    }

    /// Attempt to admit a request to `upstream`. Returns a token the
    /// caller must finalize with [`BreakerToken::record`]; dropping the
    /// token unrecorded counts as a failure.
    pub fn admit(&self, upstream: &str) -> Result<BreakerToken, BreakerError> {
        if !self.inner.enabled {
            return Ok(BreakerToken {
                registry: self.clone(),
                upstream: upstream.to_string(),
                finished: true,
            });
        }

        let entry = self
            .inner
            .states
            .entry(upstream.to_string())
            .or_insert_with(|| Mutex::new(UpstreamState::new()));
        let mut guard = entry.lock();

        match guard.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let Some(open_until) = guard.open_until else {
                    guard.state = CircuitState::Closed;
                    return Ok(self.token(upstream));
                };
                if Instant::now() < open_until {
                    return Err(BreakerError::Open {
                        upstream: upstream.to_string(),
                    });
                }
                guard.state = CircuitState::HalfOpen;
                guard.half_open_remaining = self.half_open_max_requests();
            }
            CircuitState::HalfOpen => {
                if guard.half_open_remaining == 0 {
                    return Err(BreakerError::Open {
                        upstream: upstream.to_string(),
                    });
                }
            }
        }

        if guard.state == CircuitState::HalfOpen {
            guard.half_open_remaining = guard.half_open_remaining.saturating_sub(1);
        }

        drop(guard);
        Ok(self.token(upstream))
    }

    fn token(&self, upstream: &str) -> BreakerToken {
        BreakerToken {
            registry: self.clone(),
            upstream: upstream.to_string(),
            finished: false,
        }
    }

    fn record(&self, upstream: &str, outcome: BreakerOutcome) {
        let Some(entry) = self.inner.states.get(upstream) else {
            return;
        };
        let mut guard = entry.lock();

        match guard.state {
            CircuitState::Closed => match outcome {
                BreakerOutcome::Success => guard.consecutive_failures = 0,
                BreakerOutcome::Failure => {
                    guard.consecutive_failures += 1;
                    if guard.consecutive_failures >= self.failure_threshold() {
                        guard.state = CircuitState::Open;
                        guard.open_until = Some(Instant::now() + self.open_timeout());
                        guard.consecutive_failures = 0;
                        tracing::warn!(upstream, "circuit breaker tripped open");
                    }
                }
            },
            CircuitState::HalfOpen => match outcome {
                BreakerOutcome::Success => {
                    guard.state = CircuitState::Closed;
                    guard.consecutive_failures = 0;
                    guard.open_until = None;
                    guard.half_open_remaining = 0;
                    tracing::info!(upstream, "circuit breaker recovered, closing");
                }
                BreakerOutcome::Failure => {
                    guard.state = CircuitState::Open;
                    guard.open_until = Some(Instant::now() + self.open_timeout());
                    guard.half_open_remaining = 0;
                    tracing::warn!(upstream, "half-open probe failed, reopening");
                }
            },
            CircuitState::Open => {
                // Defensive: a record arriving for an upstream currently
                // rejecting admits indicates a stale token; ignore.
            }
        }
    }

    /// Current state for one upstream, used by `/status` and the
    /// `upstream_state` field on every `/optimize` response.
    #[must_use]
    pub fn current_state(&self, upstream: &str) -> CircuitState {
        self.inner
            .states
            .get(upstream)
            .map_or(CircuitState::Closed, |entry| entry.lock().state)
    }

    /// Snapshot of every tracked upstream's state, for `/status` and
    /// `/metrics`.
    #[must_use]
    pub fn all_states(&self) -> std::collections::HashMap<String, CircuitState> {
        self.inner
            .states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().state))
            .collect()
    }
}

/// A disposable admission ticket scoped to one egress attempt.
#[derive(Debug)]
pub struct BreakerToken {
    registry: CircuitBreakerRegistry,
    upstream: String,
    finished: bool,
}

impl BreakerToken {
    /// Finalize the token with the observed outcome.
    pub fn record(mut self, outcome: BreakerOutcome) {
        self.registry.record(&self.upstream, outcome);
        self.finished = true;
    }

    /// The upstream this token was issued for.
    #[must_use]
    pub fn upstream(&self) -> &str {
        &self.upstream
    }
}

impl Drop for BreakerToken {
    fn drop(&mut self) {
        if !self.finished {
            self.registry.record(&self.upstream, BreakerOutcome::Failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            open_timeout: Duration::from_millis(20),
            half_open_max_requests: 1,
        }
    }

    #[test]
    fn trips_open_after_threshold_consecutive_failures() {
        let reg = CircuitBreakerRegistry::new(fast_config(3));
        for _ in 0..3 {
            reg.admit("up:1").unwrap().record(BreakerOutcome::Failure);
        }
        assert_eq!(reg.current_state("up:1"), CircuitState::Open);
        assert!(matches!(reg.admit("up:1"), Err(BreakerError::Open { .. })));
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let reg = CircuitBreakerRegistry::new(fast_config(3));
        reg.admit("up:1").unwrap().record(BreakerOutcome::Failure);
        reg.admit("up:1").unwrap().record(BreakerOutcome::Failure);
        reg.admit("up:1").unwrap().record(BreakerOutcome::Success);
        reg.admit("up:1").unwrap().record(BreakerOutcome::Failure);
        reg.admit("up:1").unwrap().record(BreakerOutcome::Failure);
        assert_eq!(reg.current_state("up:1"), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_success_closes_breaker() {
        let reg = CircuitBreakerRegistry::new(fast_config(1));
        reg.admit("up:1").unwrap().record(BreakerOutcome::Failure);
        assert_eq!(reg.current_state("up:1"), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(30));
        let token = reg.admit("up:1").expect("half-open probe admitted");
        token.record(BreakerOutcome::Success);
        assert_eq!(reg.current_state("up:1"), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let reg = CircuitBreakerRegistry::new(fast_config(1));
        reg.admit("up:1").unwrap().record(BreakerOutcome::Failure);
        std::thread::sleep(Duration::from_millis(30));
        let token = reg.admit("up:1").expect("half-open probe admitted");
        token.record(BreakerOutcome::Failure);
        assert_eq!(reg.current_state("up:1"), CircuitState::Open);
    }

    #[test]
    fn dropping_token_without_recording_counts_as_failure() {
        let reg = CircuitBreakerRegistry::new(fast_config(1));
        drop(reg.admit("up:1").unwrap());
        assert_eq!(reg.current_state("up:1"), CircuitState::Open);
    }

    #[test]
    fn disabled_breaker_always_admits() {
        let mut cfg = fast_config(1);
        cfg.enabled = false;
        let reg = CircuitBreakerRegistry::new(cfg);
        for _ in 0..10 {
            reg.admit("up:1").unwrap().record(BreakerOutcome::Failure);
        }
        assert_eq!(reg.current_state("up:1"), CircuitState::Closed);
    }

    #[test]
    fn runtime_threshold_update_takes_effect_immediately() {
        let reg = CircuitBreakerRegistry::new(fast_config(5));
        reg.set_failure_threshold(1);
        reg.admit("up:1").unwrap().record(BreakerOutcome::Failure);
        assert_eq!(reg.current_state("up:1"), CircuitState::Open);
    }
}
