//! Server lifecycle management and graceful shutdown

use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio::time::Instant;

/// Server lifecycle manager
#[derive(Debug)]
pub struct ServerLifecycle {
    /// Current server state
    state: Arc<RwLock<ServerState>>,
    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,
    /// Health status
    health: Arc<RwLock<HealthStatus>>,
}

/// Server states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Server is starting up
    Starting,
    /// Server is running normally
    Running,
    /// Server is shutting down
    ShuttingDown,
    /// Server has stopped
    Stopped,
}

/// Health status information
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Overall health
    pub healthy: bool,
    /// Health check timestamp
    pub timestamp: Instant,
    /// Health details
    pub details: Vec<HealthCheck>,
}

/// Individual health check
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Check name
    pub name: String,
    /// Check status
    pub healthy: bool,
    /// Check message
    pub message: Option<String>,
    /// Check timestamp
    pub timestamp: Instant,
}

/// Shutdown signal
pub type ShutdownSignal = broadcast::Receiver<()>;

impl ServerLifecycle {
    /// Create a new lifecycle manager
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            state: Arc::new(RwLock::new(ServerState::Starting)),
            shutdown_tx,
            health: Arc::new(RwLock::new(HealthStatus::healthy())),
        }
    }

    /// Get current server state
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Set server state
    pub async fn set_state(&self, state: ServerState) {
        *self.state.write().await = state;
    }

    /// Start the server
    pub async fn start(&self) {
        self.set_state(ServerState::Running).await;
        self.add_health_check(HealthCheck::healthy("listener")).await;
        tracing::info!("Server started");
    }

    /// Initiate graceful shutdown. Marks the server unhealthy immediately
    /// so a caller polling `/health` during the drain sees it flip before
    /// the listener actually stops accepting connections.
    pub async fn shutdown(&self) {
        self.set_state(ServerState::ShuttingDown).await;
        self.update_health(false, vec![HealthCheck::unhealthy("listener", "shutting down")])
            .await;
        let _ = self.shutdown_tx.send(());
        tracing::info!("Server shutdown initiated");
    }

    /// Subscribe to shutdown signals
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown_tx.subscribe()
    }

    /// Get health status
    pub async fn health(&self) -> HealthStatus {
        self.health.read().await.clone()
    }

    /// Update health status
    pub async fn update_health(&self, healthy: bool, details: Vec<HealthCheck>) {
        let mut health = self.health.write().await;
        health.healthy = healthy;
        health.timestamp = Instant::now();
        health.details = details;
    }

    /// Add health check
    pub async fn add_health_check(&self, check: HealthCheck) {
        let mut health = self.health.write().await;
        health.details.push(check);
        health.healthy = health.details.iter().all(|c| c.healthy);
        health.timestamp = Instant::now();
    }
}

impl Default for ServerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStatus {
    /// Create a healthy status
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            timestamp: Instant::now(),
            details: Vec::new(),
        }
    }
}

impl HealthCheck {
    /// Create a healthy check
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            message: None,
            timestamp: Instant::now(),
        }
    }

    /// Create an unhealthy check
    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            message: Some(message.into()),
            timestamp: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starting_adds_a_healthy_listener_check() {
        let lifecycle = ServerLifecycle::new();
        lifecycle.start().await;
        let health = lifecycle.health().await;
        assert!(health.healthy);
        assert_eq!(health.details.len(), 1);
        assert_eq!(health.details[0].name, "listener");
    }

    #[tokio::test]
    async fn shutdown_marks_the_server_unhealthy() {
        let lifecycle = ServerLifecycle::new();
        lifecycle.start().await;
        lifecycle.shutdown().await;
        let health = lifecycle.health().await;
        assert!(!health.healthy);
        assert_eq!(lifecycle.state().await, ServerState::ShuttingDown);
    }
}
