//! Test doubles for the daemon suites.

use std::ffi::OsString;
use std::sync::{Arc, Mutex};

use ortho_config::{OrthoConfig, OrthoError};
use peerwire::{PeerId, TransportError};
use peerwire_config::{Config, SocketEndpoint};
use tempfile::TempDir;

use crate::bootstrap::{BootstrapError, ConfigLoader};
use crate::health::HealthReporter;
use crate::shutdown::{ShutdownError, ShutdownSignal};

/// Lifecycle events captured by [`RecordingHealthReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    PeerConnected(PeerId),
    PeerFailed(SocketEndpoint),
    ShutdownStarted(Option<i32>),
    ShutdownCompleted,
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events.lock().expect("reporter mutex poisoned").clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config, _peer: &PeerId, _listen: &SocketEndpoint) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn bootstrap_peer_connected(&self, _endpoint: &SocketEndpoint, peer: &PeerId) {
        self.record(HealthEvent::PeerConnected(peer.clone()));
    }

    fn bootstrap_peer_failed(&self, endpoint: &SocketEndpoint, _error: &TransportError) {
        self.record(HealthEvent::PeerFailed(endpoint.clone()));
    }

    fn shutdown_started(&self, signal: Option<i32>) {
        self.record(HealthEvent::ShutdownStarted(signal));
    }

    fn shutdown_completed(&self) {
        self.record(HealthEvent::ShutdownCompleted);
    }
}

/// Loader that listens on a Unix socket inside a temporary directory.
pub struct TempSocketLoader {
    dir: TempDir,
    bootstrap_peers: Vec<SocketEndpoint>,
}

impl TempSocketLoader {
    pub fn new(bootstrap_peers: Vec<SocketEndpoint>) -> Self {
        Self {
            dir: TempDir::new().expect("create temporary directory"),
            bootstrap_peers,
        }
    }

    pub fn endpoint(&self) -> SocketEndpoint {
        let path = self.dir.path().join("run").join("peerwired.sock");
        SocketEndpoint::unix(path.to_str().expect("utf-8 socket path"))
    }
}

impl ConfigLoader for TempSocketLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            listen: self.endpoint(),
            bootstrap_peers: self.bootstrap_peers.clone(),
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an invalid listen endpoint on the command line.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load_from_iter([
            OsString::from("peerwired"),
            OsString::from("--listen"),
            OsString::from("invalid://socket"),
        ])
    }
}

/// Shutdown signal that fires at once.
pub struct ImmediateShutdown(pub Option<i32>);

impl ShutdownSignal for ImmediateShutdown {
    fn wait(&self) -> Result<Option<i32>, ShutdownError> {
        Ok(self.0)
    }
}
