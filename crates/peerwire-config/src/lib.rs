//! Layered configuration shared by peerwire nodes, clients and the daemon.
//!
//! Values resolve in the usual `ortho_config` order: built-in defaults, then a
//! configuration file (`--config-path` or `PEERWIRE_CONFIG_PATH`), then
//! `PEERWIRE_*` environment variables, then command-line flags. Durations are
//! expressed in milliseconds so every layer can supply them as plain integers.

mod defaults;
mod logging;
mod endpoint;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_DISCOVERY_PEER_CAP,
    DEFAULT_DISCOVERY_QUERY_LIMIT, DEFAULT_DISCOVERY_REFRESH_MS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_CONCURRENT_SENDS, DEFAULT_MAX_FRAME_BYTES, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_TCP_PORT, default_listen_endpoint, default_log_filter, default_log_filter_string,
    default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use endpoint::{EndpointError, SocketEndpoint};

/// Resolved configuration for a peerwire node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PEERWIRE")]
pub struct Config {
    /// Endpoint the node listens on for inbound peer connections.
    #[ortho_config(default = default_listen_endpoint())]
    pub listen: SocketEndpoint,
    /// Peers dialled at start-up to seed the peerstore.
    #[ortho_config(merge_strategy = "append")]
    #[serde(default)]
    pub bootstrap_peers: Vec<SocketEndpoint>,
    /// Seed used to derive a stable peer identity. A fresh identity is derived
    /// from the listen endpoint and process id when absent.
    #[serde(default)]
    pub peer_seed: Option<String>,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Overall wall time granted to one command execution.
    #[ortho_config(default = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,
    /// Budget for dialling a peer that is not yet connected.
    #[ortho_config(default = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,
    /// How long an inbound connection may idle before sending its command.
    #[ortho_config(default = DEFAULT_COMMAND_TIMEOUT_MS)]
    pub command_timeout_ms: u64,
    /// Hard cap on peers contacted by a single execution.
    #[ortho_config(default = DEFAULT_MAX_CONCURRENT_SENDS)]
    pub max_concurrent_sends: usize,
    /// Largest accepted command or response frame.
    #[ortho_config(default = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
    /// Interval between discovery refresh cycles.
    #[ortho_config(default = DEFAULT_DISCOVERY_REFRESH_MS)]
    pub discovery_refresh_ms: u64,
    /// Maximum number of discovered candidates retained per client.
    #[ortho_config(default = DEFAULT_DISCOVERY_PEER_CAP)]
    pub discovery_peer_cap: usize,
    /// Result limit passed to active discovery queries.
    #[ortho_config(default = DEFAULT_DISCOVERY_QUERY_LIMIT)]
    pub discovery_query_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_endpoint(),
            bootstrap_peers: Vec::new(),
            peer_seed: None,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            discovery_refresh_ms: DEFAULT_DISCOVERY_REFRESH_MS,
            discovery_peer_cap: DEFAULT_DISCOVERY_PEER_CAP,
            discovery_query_limit: DEFAULT_DISCOVERY_QUERY_LIMIT,
        }
    }
}

impl Config {
    /// Endpoint the node listens on.
    #[must_use]
    pub fn listen(&self) -> &SocketEndpoint {
        &self.listen
    }

    /// Peers dialled during bootstrap.
    #[must_use]
    pub fn bootstrap_peers(&self) -> &[SocketEndpoint] {
        &self.bootstrap_peers
    }

    /// Optional identity seed.
    #[must_use]
    pub fn peer_seed(&self) -> Option<&str> {
        self.peer_seed.as_deref()
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Default execution timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Dial timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Inbound command read timeout.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Cap on concurrently contacted peers.
    #[must_use]
    pub fn max_concurrent_sends(&self) -> usize {
        self.max_concurrent_sends
    }

    /// Frame size limit in bytes.
    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Discovery refresh interval.
    #[must_use]
    pub fn discovery_refresh(&self) -> Duration {
        Duration::from_millis(self.discovery_refresh_ms)
    }

    /// Discovery candidate cap.
    #[must_use]
    pub fn discovery_peer_cap(&self) -> usize {
        self.discovery_peer_cap
    }

    /// Discovery query result limit.
    #[must_use]
    pub fn discovery_query_limit(&self) -> usize {
        self.discovery_query_limit
    }
}
