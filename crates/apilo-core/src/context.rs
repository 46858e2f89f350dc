//! Explicit per-request context.
//!
//! Replaces the usual thread-local/ambient-deadline approach with a value
//! threaded through the call chain: dispatcher constructs one per inbound
//! request and passes it down through cache, breaker, and egress calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-request deadline and cancellation, carried explicitly instead of
/// through thread-locals or ambient globals.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    started: Instant,
    deadline: Instant,
    cancellation: CancellationToken,
    metadata: Arc<HashMap<String, Value>>,
}

impl RequestContext {
    /// Start a new top-level request context with the given timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            request_id: Uuid::new_v4(),
            started: now,
            deadline: now + timeout,
            cancellation: CancellationToken::new(),
            metadata: Arc::new(HashMap::new()),
        }
    }

    /// Derive a child context (e.g. the egress call inside an `optimize`
    /// request) that shares cancellation with its parent but may carry a
    /// tighter deadline.
    #[must_use]
    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        Self {
            request_id: self.request_id,
            started: self.started,
            deadline: deadline.min(self.deadline),
            cancellation: self.cancellation.child_token(),
            metadata: Arc::clone(&self.metadata),
        }
    }

    /// Attach a metadata entry, copy-on-write over the shared map.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.metadata).insert(key.into(), value.into());
        self
    }

    /// The request's unique identifier, used for log correlation.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Time elapsed since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time remaining until the deadline; zero if already past.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// The absolute deadline instant.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Cooperative cancellation token for this request and its children.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Read a metadata value previously attached with [`with_metadata`](Self::with_metadata).
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_deadline_never_exceeds_parent() {
        let parent = RequestContext::new(Duration::from_millis(50));
        let child = parent.child_with_deadline(Instant::now() + Duration::from_secs(10));
        assert!(child.deadline() <= parent.deadline());
    }

    #[test]
    fn cancelling_parent_cancels_child() {
        let parent = RequestContext::new(Duration::from_secs(5));
        let child = parent.child_with_deadline(Instant::now() + Duration::from_secs(5));
        parent.cancel();
        assert!(child.cancellation().is_cancelled());
    }

    #[test]
    fn metadata_round_trips() {
        let ctx = RequestContext::new(Duration::from_secs(1)).with_metadata("k", "v");
        assert_eq!(ctx.metadata("k"), Some(&Value::String("v".into())));
    }
}
