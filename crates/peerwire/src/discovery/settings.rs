//! Discovery tuning.

use std::time::Duration;

use peerwire_config::Config;

const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_QUERY_BACKOFF: Duration = Duration::from_secs(1);

/// Tuning knobs for a discovery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySettings {
    /// Time between refresh cycles when nobody asks for more peers.
    pub refresh_interval: Duration,
    /// Most candidates retained at once.
    pub peer_cap: usize,
    /// Result limit passed to active discovery queries.
    pub query_limit: usize,
    /// How long a caller waits for the loop to answer a snapshot request.
    pub snapshot_timeout: Duration,
    /// Minimum gap between active queries started by wake-ups.
    pub query_backoff: Duration,
}

impl DiscoverySettings {
    /// Reads the tuning from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            refresh_interval: config.discovery_refresh(),
            peer_cap: config.discovery_peer_cap(),
            query_limit: config.discovery_query_limit(),
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            query_backoff: DEFAULT_QUERY_BACKOFF,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
