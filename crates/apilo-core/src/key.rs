//! Canonical cache key construction.
//!
//! A [`CacheKey`] is a deterministic fingerprint of an outbound request:
//! normalized method, normalized URL, the ordered vary-set header pairs,
//! and a stable hash of the body. Two requests that would receive the
//! same response from the same upstream hash to the same key.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{CoreError, Result};

/// Sentinel hashed in place of an empty request body so that "no body"
/// and "body that happens to hash the same as empty" never collide with
/// an attacker-chosen body (there is none here, but it keeps the scheme
/// unambiguous).
const EMPTY_BODY_SENTINEL: &[u8] = b"apilo:empty-body";

/// Opaque, bytewise-comparable fingerprint of a cacheable request.
///
/// `CacheKey` deliberately exposes no structure beyond equality and
/// hashing; the bytes are a SHA-256 digest and are not meant to be
/// decoded back into the original request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    /// Build a canonical key from request components.
    ///
    /// `vary_headers` must already be the subset of request headers that
    /// make up the configured vary set, in the order they should be
    /// hashed; callers are responsible for extracting that subset (the
    /// default vary set is empty per spec).
    pub fn build(
        method: &str,
        url: &str,
        vary_headers: &[(String, String)],
        body: &[u8],
    ) -> Result<Self> {
        let normalized_method = normalize_method(method)?;
        let normalized_url = normalize_url(url)?;

        let mut hasher = Sha256::new();
        hasher.update(normalized_method.as_bytes());
        hasher.update(b"\0");
        hasher.update(normalized_url.as_bytes());
        for (name, value) in vary_headers {
            hasher.update(b"\0");
            hasher.update(name.to_ascii_lowercase().as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        hasher.update(b"\0");
        if body.is_empty() {
            hasher.update(EMPTY_BODY_SENTINEL);
        } else {
            hasher.update(body);
        }

        Ok(Self(hasher.finalize().to_vec()))
    }

    /// Raw fingerprint bytes, suitable for opaque transmission (e.g. as a
    /// hex string in the `/optimize` response's `cache_key` field).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex encoding of the fingerprint.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().fold(String::with_capacity(64), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{b:02x}");
            s
        })
    }

    /// Reconstruct a key from the hex fingerprint a prior `/optimize`
    /// call returned as `cache_key`. Used by `POST /cache/invalidate`
    /// with `by: "key"`; the opaque fingerprint has no other decoding.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() % 2 != 0 || hex.is_empty() {
            return Err(CoreError::InvalidHeader {
                name: "cache_key".to_string(),
                reason: format!("{hex:?} is not a valid hex fingerprint"),
            });
        }
        let mut bytes = Vec::with_capacity(hex.len() / 2);
        let digits = hex.as_bytes();
        for chunk in digits.chunks(2) {
            let pair = std::str::from_utf8(chunk).map_err(|_| CoreError::InvalidHeader {
                name: "cache_key".to_string(),
                reason: format!("{hex:?} is not a valid hex fingerprint"),
            })?;
            let byte = u8::from_str_radix(pair, 16).map_err(|_| CoreError::InvalidHeader {
                name: "cache_key".to_string(),
                reason: format!("{hex:?} is not a valid hex fingerprint"),
            })?;
            bytes.push(byte);
        }
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn normalize_method(method: &str) -> Result<String> {
    let trimmed = method.trim();
    if trimmed.is_empty() || !trimmed.is_ascii() {
        return Err(CoreError::InvalidMethod(method.to_string()));
    }
    Ok(trimmed.to_ascii_uppercase())
}

/// Parse and normalize a URL per spec: scheme lowercased, default ports
/// stripped, path left unchanged, query parameters sorted by name then
/// value, fragment discarded.
pub fn normalize_url(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url).map_err(|e| CoreError::InvalidUrl(format!("{url}: {e}")))?;
    parsed.set_fragment(None);

    let scheme = parsed.scheme().to_ascii_lowercase();
    let is_default_port = matches!(
        (scheme.as_str(), parsed.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        let _ = parsed.set_port(None);
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let host = parsed
        .host_str()
        .ok_or_else(|| CoreError::InvalidUrl(format!("{url}: missing host")))?
        .to_ascii_lowercase();
    let port_suffix = parsed.port().map_or_else(String::new, |p| format!(":{p}"));
    let path = parsed.path();

    let mut normalized = format!("{scheme}://{host}{port_suffix}{path}");
    if !pairs.is_empty() {
        normalized.push('?');
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        normalized.push_str(&query);
    }
    Ok(normalized)
}

/// Extract the `host:port` upstream identity used to key the circuit
/// breaker and per-host egress concurrency limits.
pub fn upstream_host(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| CoreError::InvalidUrl(format!("{url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| CoreError::InvalidUrl(format!("{url}: missing host")))?;
    let port = parsed.port_or_known_default().unwrap_or(0);
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_requests_hash_identically() {
        let a = CacheKey::build("get", "http://Example.test:80/a?b=2&a=1", &[], b"").unwrap();
        let b = CacheKey::build("GET", "http://example.test/a?a=1&b=2", &[], b"").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_bodies_hash_differently() {
        let a = CacheKey::build("POST", "http://example.test/a", &[], b"one").unwrap();
        let b = CacheKey::build("POST", "http://example.test/a", &[], b"two").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_body_is_stable() {
        let a = CacheKey::build("GET", "http://example.test/a", &[], b"").unwrap();
        let b = CacheKey::build("GET", "http://example.test/a", &[], b"").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fragment_is_discarded() {
        let a = CacheKey::build("GET", "http://example.test/a#frag1", &[], b"").unwrap();
        let b = CacheKey::build("GET", "http://example.test/a#frag2", &[], b"").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn upstream_host_includes_default_port() {
        assert_eq!(upstream_host("https://example.test/a").unwrap(), "example.test:443");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(CacheKey::build("GET", "not a url", &[], b"").is_err());
    }

    #[test]
    fn hex_round_trips() {
        let key = CacheKey::build("GET", "http://example.test/a", &[], b"").unwrap();
        let parsed = CacheKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(CacheKey::from_hex("not-hex").is_err());
        assert!(CacheKey::from_hex("").is_err());
        assert!(CacheKey::from_hex("abc").is_err());
    }
}
