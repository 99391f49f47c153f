//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use peerwire::{PeerId, TransportError};
use peerwire_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer for lifecycle events.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked once the node is listening and bootstrap peers were tried.
    fn bootstrap_succeeded(&self, config: &Config, peer: &PeerId, listen: &SocketEndpoint);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked after a bootstrap peer answered the handshake.
    fn bootstrap_peer_connected(&self, endpoint: &SocketEndpoint, peer: &PeerId);

    /// Invoked when a bootstrap peer could not be reached. Not fatal.
    fn bootstrap_peer_failed(&self, endpoint: &SocketEndpoint, error: &TransportError);

    /// Invoked when shutdown begins, with the signal that caused it.
    fn shutdown_started(&self, signal: Option<i32>);

    /// Invoked after the node has stopped.
    fn shutdown_completed(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config, peer: &PeerId, listen: &SocketEndpoint) {
        (**self).bootstrap_succeeded(config, peer, listen);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn bootstrap_peer_connected(&self, endpoint: &SocketEndpoint, peer: &PeerId) {
        (**self).bootstrap_peer_connected(endpoint, peer);
    }

    fn bootstrap_peer_failed(&self, endpoint: &SocketEndpoint, error: &TransportError) {
        (**self).bootstrap_peer_failed(endpoint, error);
    }

    fn shutdown_started(&self, signal: Option<i32>) {
        (**self).shutdown_started(signal);
    }

    fn shutdown_completed(&self) {
        (**self).shutdown_completed();
    }
}

/// Reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config, peer: &PeerId, listen: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            peer = %peer,
            listen = %listen,
            bootstrap_peers = config.bootstrap_peers().len(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "daemon listening"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn bootstrap_peer_connected(&self, endpoint: &SocketEndpoint, peer: &PeerId) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_peer_connected",
            endpoint = %endpoint,
            peer = %peer,
            "bootstrap peer connected"
        );
    }

    fn bootstrap_peer_failed(&self, endpoint: &SocketEndpoint, error: &TransportError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "bootstrap_peer_failed",
            endpoint = %endpoint,
            error = %error,
            "bootstrap peer unreachable"
        );
    }

    fn shutdown_started(&self, signal: Option<i32>) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_started",
            signal = ?signal,
            "shutting down"
        );
    }

    fn shutdown_completed(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_completed",
            "daemon stopped"
        );
    }
}
