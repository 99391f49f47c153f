//! Daemon bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use peerwire::telemetry::{self, TelemetryError, TelemetryHandle};
use peerwire::{MeshError, MeshNode, NodeSettings, Service, ServiceError, ServiceSettings};
use peerwire_config::{Config, EndpointError};
use thiserror::Error;

use crate::diagnostics;
use crate::health::HealthReporter;
use crate::shutdown::{ShutdownError, ShutdownSignal};

/// Loads the daemon configuration.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader failure.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that always yields the same configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps a ready-made configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced while starting or running the daemon.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The socket directory could not be prepared.
    #[error("failed to prepare listen socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: EndpointError,
    },
    /// The mesh node did not start.
    #[error("failed to start mesh node: {source}")]
    Node {
        /// Underlying node error.
        #[source]
        source: MeshError,
    },
    /// The diagnostics service did not start.
    #[error("failed to start diagnostics service: {source}")]
    Diagnostics {
        /// Underlying service error.
        #[source]
        source: ServiceError,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown: {source}")]
    Shutdown {
        /// Underlying listener error.
        #[source]
        source: ShutdownError,
    },
}

/// A running daemon.
pub struct Daemon {
    config: Config,
    node: Arc<MeshNode>,
    diagnostics: Service,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    /// Resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The mesh node, for embedding further services.
    #[must_use]
    pub fn node(&self) -> &Arc<MeshNode> {
        &self.node
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Blocks until `signal` fires, then stops the node.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Shutdown`] when the listener cannot be
    /// installed. The node is stopped either way.
    pub fn run(self, signal: &dyn ShutdownSignal) -> Result<(), BootstrapError> {
        let waited = signal.wait();
        let received = waited.as_ref().ok().copied().flatten();
        self.shutdown(received);
        waited
            .map(|_| ())
            .map_err(|source| BootstrapError::Shutdown { source })
    }

    /// Stops the diagnostics service and the node.
    pub fn shutdown(self, signal: Option<i32>) {
        self.reporter.shutdown_started(signal);
        self.diagnostics.stop();
        self.node.shutdown();
        self.reporter.shutdown_completed();
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Daemon")
            .field("node", &self.node)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}

/// Bootstraps the daemon using the supplied collaborators.
///
/// Unreachable bootstrap peers are reported but do not fail the bootstrap.
///
/// # Errors
///
/// Returns the first failing stage as a [`BootstrapError`], after reporting
/// it through `reporter`.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();
    let fail = |error: BootstrapError| {
        reporter.bootstrap_failed(&error);
        error
    };

    let config = loader
        .load()
        .map_err(|source| fail(BootstrapError::Configuration { source }))?;
    let telemetry = telemetry::initialise(&config)
        .map_err(|source| fail(BootstrapError::Telemetry { source }))?;
    config
        .listen()
        .prepare_filesystem()
        .map_err(|source| fail(BootstrapError::Socket { source }))?;
    let node = MeshNode::start(NodeSettings::from_config(&config))
        .map_err(|source| fail(BootstrapError::Node { source }))?;
    let diagnostics = diagnostics::serve(&node, ServiceSettings::from_config(&config))
        .map_err(|source| fail(BootstrapError::Diagnostics { source }))?;

    for endpoint in config.bootstrap_peers() {
        match node.dial(endpoint) {
            Ok(peer) => reporter.bootstrap_peer_connected(endpoint, &peer),
            Err(error) => reporter.bootstrap_peer_failed(endpoint, &error),
        }
    }
    reporter.bootstrap_succeeded(&config, node.peer_id(), node.listen_endpoint());

    Ok(Daemon {
        config,
        node,
        diagnostics,
        telemetry,
        reporter,
    })
}
