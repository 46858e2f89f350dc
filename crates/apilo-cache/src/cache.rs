//! The memory-bounded, single-flight response cache.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use apilo_core::{CacheKey, CachedResponse};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::lru::LruList;
use crate::stats::CacheStats;

struct Entry {
    response: CachedResponse,
    url: String,
}

/// A message broadcast to every caller single-flighted on the same key.
/// `Arc<E>` is always cheaply cloneable regardless of whether `E` itself
/// implements `Clone` (`Arc::clone` only bumps a refcount).
type FlightResult<E> = Arc<std::result::Result<(CachedResponse, bool), Arc<E>>>;

struct State<E> {
    lru: LruList<Entry>,
    index: std::collections::HashMap<CacheKey, usize>,
    total_bytes: u64,
    stats: CacheStats,
    inflight: std::collections::HashMap<CacheKey, broadcast::Sender<FlightResult<E>>>,
}

impl<E> State<E> {
    fn new() -> Self {
        Self {
            lru: LruList::new(),
            index: std::collections::HashMap::new(),
            total_bytes: 0,
            stats: CacheStats::default(),
            inflight: std::collections::HashMap::new(),
        }
    }
}

/// A memory-bounded cache keyed by [`CacheKey`], generic over the error
/// type its `compute` closures may fail with.
///
/// One instance owns its own background TTL-sweep task; construct with
/// [`Cache::new`] and hold the returned `Arc` for the daemon's lifetime.
pub struct Cache<E> {
    config: CacheConfig,
    // `max_memory_bytes`/`max_entries` live behind atomics rather than
    // inside `config` so a config endpoint can retune a running cache
    // without a restart.
    max_memory_bytes: AtomicU64,
    max_entries: AtomicUsize,
    state: Mutex<State<E>>,
    shutdown: CancellationToken,
}

impl<E> std::fmt::Debug for Cache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config_snapshot())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<E> Cache<E>
where
    E: Send + Sync + 'static,
{
    /// Construct a cache and spawn its background TTL sweep task.
    #[must_use]
    pub fn new(config: CacheConfig) -> Arc<Self> {
        let max_memory_bytes = AtomicU64::new(config.max_memory_bytes);
        let max_entries = AtomicUsize::new(config.max_entries);
        let cache = Arc::new(Self {
            config,
            max_memory_bytes,
            max_entries,
            state: Mutex::new(State::new()),
            shutdown: CancellationToken::new(),
        });
        Arc::clone(&cache).spawn_sweep_task();
        cache
    }

    /// Retune the total byte ceiling. Takes effect on the next `Put` or
    /// `GetOrCompute` commit; does not retroactively evict.
    pub fn set_max_memory_bytes(&self, value: u64) {
        self.max_memory_bytes.store(value, Ordering::Relaxed);
    }

    /// Retune the maximum entry count. Takes effect on the next commit.
    pub fn set_max_entries(&self, value: usize) {
        self.max_entries.store(value, Ordering::Relaxed);
    }

    /// The configuration this cache is currently operating under, for
    /// `/status` and `GET /config`.
    #[must_use]
    pub fn config_snapshot(&self) -> CacheConfig {
        CacheConfig {
            max_memory_bytes: self.max_memory_bytes.load(Ordering::Relaxed),
            max_entries: self.max_entries.load(Ordering::Relaxed),
            ..self.config.clone()
        }
    }

    fn spawn_sweep_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep_once(),
                    () = self.shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Stop the background sweep task. Does not itself release cache
    /// memory; call [`Cache::clear`] for that (the dispatcher does both
    /// as the last two steps of graceful shutdown).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn sweep_once(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let candidates: Vec<usize> = state
            .lru
            .iter_from_tail()
            .take(self.config.sweep_batch)
            .collect();

        let mut removed = 0u64;
        for idx in candidates {
            let expired = state
                .lru
                .get(idx)
                .is_some_and(|e| e.response.is_expired_at(now));
            if expired {
                if let Some(key) = state.lru.key_at(idx).cloned() {
                    Self::remove_index(&mut state, &key, idx);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            state.stats.evictions += removed;
            state.stats.evictions_by_ttl += removed;
            tracing::debug!(removed, "ttl sweep evicted entries");
        }
    }

    /// Look up a key. Returns `Some(response)` on a live hit (updating
    /// last-access and access-count), `None` on miss or expiry. An
    /// expired entry encountered here is removed as a side effect.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        let mut state = self.state.lock();
        let idx = *state.index.get(key)?;
        let now = Instant::now();
        let expired = state
            .lru
            .get(idx)
            .is_none_or(|e| e.response.is_expired_at(now));
        if expired {
            Self::remove_index(&mut state, key, idx);
            state.stats.misses += 1;
            return None;
        }
        state.lru.touch(idx);
        let entry = state.lru.get_mut(idx).expect("index just verified live");
        entry.response.record_hit();
        state.stats.hits += 1;
        Some(entry.response.clone())
    }

    /// Explicitly insert a fully-formed response. Returns `false` without
    /// error if the entry exceeds `max_entry_bytes` (spec's "not cached"
    /// signal); otherwise stores it, evicting as needed.
    pub fn put(&self, key: CacheKey, url: impl Into<String>, response: CachedResponse) -> bool {
        let mut state = self.state.lock();
        Self::commit(
            &mut state,
            key,
            url.into(),
            response,
            self.config.max_entry_bytes,
            self.max_memory_bytes.load(Ordering::Relaxed),
            self.max_entries.load(Ordering::Relaxed),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn commit(
        state: &mut State<E>,
        key: CacheKey,
        url: String,
        mut response: CachedResponse,
        max_entry_bytes: usize,
        max_memory_bytes: u64,
        max_entries: usize,
    ) -> bool {
        let size = response.approx_bytes() as u64;
        if size > max_entry_bytes as u64 {
            return false;
        }
        // Measure TTL from the moment of actual cache insertion, not from
        // whenever the caller constructed the `CachedResponse` value.
        let now = Instant::now();
        response.inserted_at = now;
        response.last_access = now;
        response.access_count = 0;

        if let Some(&idx) = state.index.get(&key) {
            let old_size = state
                .lru
                .get(idx)
                .map_or(0, |e| e.response.approx_bytes() as u64);
            state.total_bytes = state.total_bytes.saturating_sub(old_size) + size;
            if let Some(entry) = state.lru.get_mut(idx) {
                entry.response = response;
                entry.url = url;
            }
            state.lru.touch(idx);
        } else {
            let idx = state.lru.insert_head(key.clone(), Entry { response, url });
            state.index.insert(key.clone(), idx);
            state.total_bytes += size;
        }

        while state.total_bytes > max_memory_bytes || state.lru.len() > max_entries {
            let Some(tail_idx) = state.lru.tail_index() else {
                break;
            };
            let Some(tail_key) = state.lru.key_at(tail_idx).cloned() else {
                break;
            };
            if tail_key == key && state.lru.len() == 1 {
                // The entry we just committed is alone and still over
                // ceiling: configuration error (max_bytes < one entry's
                // size). Leave it rather than evict-then-reinsert forever.
                break;
            }
            Self::remove_index(state, &tail_key, tail_idx);
            state.stats.evictions += 1;
        }

        true
    }

    fn remove_index(state: &mut State<E>, key: &CacheKey, idx: usize) {
        if let Some(entry) = state.lru.remove(idx) {
            state.total_bytes = state
                .total_bytes
                .saturating_sub(entry.response.approx_bytes() as u64);
        }
        state.index.remove(key);
    }

    /// Resolve a key through the cache: a live hit returns immediately;
    /// a cold key runs `compute` at most once no matter how many callers
    /// arrive concurrently, with every caller observing the same result.
    ///
    /// `compute`'s returned `CachedResponse` is expected to already carry
    /// the desired TTL and tags (the caller's closure knows the per-call
    /// override, if any); this function only decides *whether* to store
    /// it, based on the `cacheable` flag `compute` returns alongside it.
    pub async fn get_or_compute<F, Fut>(
        self: &Arc<Self>,
        key: CacheKey,
        url: impl Into<String>,
        compute: F,
    ) -> std::result::Result<(CachedResponse, bool), Arc<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(CachedResponse, bool), E>> + Send + 'static,
    {
        let url = url.into();

        let mut rx = {
            let mut state = self.state.lock();

            if let Some(&idx) = state.index.get(&key) {
                let now = Instant::now();
                let expired = state
                    .lru
                    .get(idx)
                    .is_none_or(|e| e.response.is_expired_at(now));
                if !expired {
                    state.lru.touch(idx);
                    let entry = state.lru.get_mut(idx).expect("index just verified live");
                    entry.response.record_hit();
                    state.stats.hits += 1;
                    return Ok((entry.response.clone(), true));
                }
                Self::remove_index(&mut state, &key, idx);
            }

            if let Some(sender) = state.inflight.get(&key) {
                sender.subscribe()
            } else {
                let (tx, rx) = broadcast::channel(1);
                state.inflight.insert(key.clone(), tx.clone());
                state.stats.misses += 1;
                drop(state);

                let cache = Arc::clone(self);
                let spawn_key = key.clone();
                let spawn_url = url.clone();
                tokio::spawn(async move {
                    let outcome = compute().await;
                    {
                        let mut state = cache.state.lock();
                        state.inflight.remove(&spawn_key);
                        if let Ok((response, true)) = &outcome {
                            Self::commit(
                                &mut state,
                                spawn_key.clone(),
                                spawn_url,
                                response.clone(),
                                cache.config.max_entry_bytes,
                                cache.max_memory_bytes.load(Ordering::Relaxed),
                                cache.max_entries.load(Ordering::Relaxed),
                            );
                        }
                    }
                    let wire = match outcome {
                        Ok(pair) => Ok(pair),
                        Err(e) => Err(Arc::new(e)),
                    };
                    let _ = tx.send(Arc::new(wire));
                });

                rx
            }
        };

        let message = rx
            .recv()
            .await
            .expect("single-flight producer task completed without a panic");
        match message.as_ref() {
            Ok((response, _cacheable)) => Ok((response.clone(), false)),
            Err(e) => Err(Arc::clone(e)),
        }
    }

    /// Remove the live entry for `key`, if any. Idempotent: a repeated
    /// call removes at most one entry in total.
    pub fn invalidate_key(&self, key: &CacheKey) -> usize {
        let mut state = self.state.lock();
        if let Some(idx) = state.index.get(key).copied() {
            Self::remove_index(&mut state, key, idx);
            1
        } else {
            0
        }
    }

    /// Remove every live entry tagged with `tag`.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let mut state = self.state.lock();
        let matches: Vec<(CacheKey, usize)> = state
            .lru
            .iter_from_head()
            .filter_map(|idx| {
                let entry = state.lru.get(idx)?;
                if entry.response.tags.iter().any(|t| t == tag) {
                    state.lru.key_at(idx).cloned().map(|k| (k, idx))
                } else {
                    None
                }
            })
            .collect();
        for (key, idx) in &matches {
            Self::remove_index(&mut state, key, *idx);
        }
        matches.len()
    }

    /// Remove every live entry whose original URL matches `pattern`
    /// (`*` matches a run of non-`/` characters, `**` matches any run).
    pub fn invalidate_pattern(&self, pattern: &str) -> std::result::Result<usize, CacheError> {
        let glob =
            globset::Glob::new(pattern).map_err(|e| CacheError::BadPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        let matcher = glob.compile_matcher();

        let mut state = self.state.lock();
        let matches: Vec<(CacheKey, usize)> = state
            .lru
            .iter_from_head()
            .filter_map(|idx| {
                let entry = state.lru.get(idx)?;
                if matcher.is_match(&entry.url) {
                    state.lru.key_at(idx).cloned().map(|k| (k, idx))
                } else {
                    None
                }
            })
            .collect();
        for (key, idx) in &matches {
            Self::remove_index(&mut state, key, *idx);
        }
        Ok(matches.len())
    }

    /// Remove every live entry.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.lru.len();
        state.lru = LruList::new();
        state.index.clear();
        state.total_bytes = 0;
        n
    }

    /// Point-in-time counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entry_count: state.lru.len(),
            byte_usage: state.total_bytes,
            hits: state.stats.hits,
            misses: state.stats.misses,
            evictions: state.stats.evictions,
            evictions_by_ttl: state.stats.evictions_by_ttl,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use apilo_core::cached::HeaderMap;

    #[derive(Debug)]
    struct MissError(&'static str);

    fn key(path: &str) -> CacheKey {
        CacheKey::build("GET", &format!("http://example.test{path}"), &[], b"").unwrap()
    }

    fn response(ttl: Duration, body: &[u8]) -> CachedResponse {
        CachedResponse::new(200, HeaderMap::new(), body.to_vec(), ttl, vec![])
    }

    #[tokio::test]
    async fn cold_then_warm_hits() {
        let cache: Arc<Cache<MissError>> = Cache::new(CacheConfig::default());
        let k = key("/a");
        let (resp, hit) = cache
            .get_or_compute(k.clone(), "http://example.test/a", || async {
                Ok((response(Duration::from_secs(60), b"hello"), true))
            })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(resp.body, b"hello");

        let (resp2, hit2) = cache
            .get_or_compute(k, "http://example.test/a", || async {
                panic!("compute must not run again on a warm key")
            })
            .await
            .unwrap();
        assert!(hit2);
        assert_eq!(resp2.body, b"hello");
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[tokio::test]
    async fn single_flight_runs_compute_once() {
        let cache: Arc<Cache<MissError>> = Cache::new(CacheConfig::default());
        let k = key("/slow");
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = Arc::clone(&cache);
            let k = k.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(k, "http://example.test/slow", move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok((response(Duration::from_secs(60), b"body"), true))
                        }
                    })
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            let (resp, _) = h.await.unwrap();
            assert_eq!(resp.body, b"body");
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn non_cacheable_compute_is_not_stored() {
        let cache: Arc<Cache<MissError>> = Cache::new(CacheConfig::default());
        let k = key("/nostore");
        let (_resp, hit) = cache
            .get_or_compute(k.clone(), "http://example.test/nostore", || async {
                Ok((response(Duration::from_secs(60), b"x"), false))
            })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(cache.stats().entry_count, 0);
        assert!(cache.get(&k).is_none());
    }

    #[tokio::test]
    async fn compute_error_is_surfaced_to_caller() {
        let cache: Arc<Cache<MissError>> = Cache::new(CacheConfig::default());
        let k = key("/err");
        let err = cache
            .get_or_compute(k, "http://example.test/err", || async {
                Err(MissError("boom"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.0, "boom");
    }

    #[test]
    fn lru_eviction_keeps_most_recent() {
        let mut config = CacheConfig::default();
        config.max_entries = 2;
        config.max_memory_bytes = u64::MAX;
        let cache: Arc<Cache<MissError>> = Cache::new(config);
        cache.put(key("/1"), "http://example.test/1", response(Duration::from_secs(60), b"a"));
        cache.put(key("/2"), "http://example.test/2", response(Duration::from_secs(60), b"b"));
        cache.put(key("/3"), "http://example.test/3", response(Duration::from_secs(60), b"c"));
        assert_eq!(cache.stats().entry_count, 2);
        assert!(cache.get(&key("/1")).is_none());
        assert!(cache.get(&key("/3")).is_some());
    }

    #[test]
    fn oversized_entry_is_rejected_without_error() {
        let mut config = CacheConfig::default();
        config.max_entry_bytes = 4;
        let cache: Arc<Cache<MissError>> = Cache::new(config);
        let stored = cache.put(
            key("/big"),
            "http://example.test/big",
            response(Duration::from_secs(60), b"way too big for this ceiling"),
        );
        assert!(!stored);
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn invalidate_tag_removes_matching_entries_only() {
        let cache: Arc<Cache<MissError>> = Cache::new(CacheConfig::default());
        let tagged = CachedResponse::new(200, HeaderMap::new(), b"a".to_vec(), Duration::from_secs(60), vec!["user:42".into()]);
        let other = CachedResponse::new(200, HeaderMap::new(), b"b".to_vec(), Duration::from_secs(60), vec![]);
        cache.put(key("/1"), "http://example.test/1", tagged.clone());
        cache.put(key("/2"), "http://example.test/2", tagged);
        cache.put(key("/3"), "http://example.test/3", other);
        let removed = cache.invalidate_tag("user:42");
        assert_eq!(removed, 2);
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[test]
    fn invalidate_pattern_matches_by_url_glob() {
        let cache: Arc<Cache<MissError>> = Cache::new(CacheConfig::default());
        cache.put(
            CacheKey::build("GET", "http://example.test/users/1", &[], b"").unwrap(),
            "http://example.test/users/1",
            response(Duration::from_secs(60), b"a"),
        );
        cache.put(
            CacheKey::build("GET", "http://example.test/orders/1", &[], b"").unwrap(),
            "http://example.test/orders/1",
            response(Duration::from_secs(60), b"b"),
        );
        let removed = cache.invalidate_pattern("*://*/users/*").unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn malformed_pattern_is_rejected() {
        let cache: Arc<Cache<MissError>> = Cache::new(CacheConfig::default());
        assert!(cache.invalidate_pattern("[").is_err());
    }

    #[test]
    fn idempotent_invalidation_removes_at_most_one() {
        let cache: Arc<Cache<MissError>> = Cache::new(CacheConfig::default());
        let k = key("/1");
        cache.put(k.clone(), "http://example.test/1", response(Duration::from_secs(60), b"a"));
        assert_eq!(cache.invalidate_key(&k), 1);
        assert_eq!(cache.invalidate_key(&k), 0);
    }
}
