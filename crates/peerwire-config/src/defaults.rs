use crate::endpoint::SocketEndpoint;
use crate::logging::LogFormat;

/// Default TCP port a daemon listens on.
pub const DEFAULT_TCP_PORT: u16 = 9779;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default wall time for a single command execution, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default dial budget for peers that are not yet connected, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 500;

/// Default time an inbound connection may take to send its command.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

/// Default cap on peers contacted by one execution.
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 16;

/// Default frame size limit (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Default interval between discovery refresh cycles, in milliseconds.
pub const DEFAULT_DISCOVERY_REFRESH_MS: u64 = 30_000;

/// Default number of candidates retained by a discovery loop.
pub const DEFAULT_DISCOVERY_PEER_CAP: usize = 64;

/// Default result limit for active discovery queries.
pub const DEFAULT_DISCOVERY_QUERY_LIMIT: usize = 512;

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Loopback TCP endpoint on the default port.
pub fn default_listen_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}
