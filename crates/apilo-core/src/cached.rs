//! The stored artifact produced by a cacheable upstream response.

use std::time::{Duration, Instant, SystemTime};

/// An ordered, case-preserving multimap of response headers.
///
/// Lookup is case-insensitive (per spec) while the original casing is
/// retained for emission back to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap(Vec<(String, String)>);

impl HeaderMap {
    /// An empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a header, preserving insertion order and original casing.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Case-insensitive lookup of the first matching header value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a case-insensitively matching header name.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate all name/value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of stored name/value pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map holds no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Approximate byte size of names plus values, used for cache accounting.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        self.0.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A fully buffered upstream response held in the cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, case-insensitive lookup / case-preserving emission.
    pub headers: HeaderMap,
    /// Fully buffered response body.
    pub body: Vec<u8>,
    /// Monotonic instant at insertion, used for TTL and LRU bookkeeping.
    pub inserted_at: Instant,
    /// Wall-clock time at insertion, surfaced for observability only.
    pub inserted_at_wall: SystemTime,
    /// Time-to-live; the entry expires at `inserted_at + ttl`.
    pub ttl: Duration,
    /// Monotonic instant of the most recent hit; updated under the cache lock.
    pub last_access: Instant,
    /// Number of times this entry has been returned as a hit.
    pub access_count: u64,
    /// Tags assigned at insert time, used by `InvalidateTag`.
    pub tags: Vec<String>,
}

impl CachedResponse {
    /// Construct a freshly computed response ready for insertion.
    #[must_use]
    pub fn new(status: u16, headers: HeaderMap, body: Vec<u8>, ttl: Duration, tags: Vec<String>) -> Self {
        let now = Instant::now();
        Self {
            status,
            headers,
            body,
            inserted_at: now,
            inserted_at_wall: SystemTime::now(),
            ttl,
            last_access: now,
            access_count: 0,
            tags,
        }
    }

    /// The instant at which this entry stops being a valid hit.
    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.inserted_at + self.ttl
    }

    /// Whether this entry is expired as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }

    /// Approximate byte size used for cache accounting: status (fixed
    /// overhead) + headers + body.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const STATUS_OVERHEAD: usize = 8;
        STATUS_OVERHEAD + self.headers.approx_bytes() + self.body.len()
    }

    /// Record a hit: bump last-access and access-count. Called under the
    /// cache's exclusive lock.
    pub fn record_hit(&mut self) {
        self.last_access = Instant::now();
        self.access_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive_but_preserves_casing() {
        let mut h = HeaderMap::new();
        h.push("Content-Type", "application/json");
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert_eq!(h.iter().next(), Some(("Content-Type", "application/json")));
    }

    #[test]
    fn expiry_is_based_on_insertion_plus_ttl() {
        let r = CachedResponse::new(200, HeaderMap::new(), vec![1, 2, 3], Duration::from_secs(0), vec![]);
        assert!(r.is_expired_at(Instant::now()));
    }
}
