//! Node settings.

use std::time::Duration;

use peerwire_config::{Config, SocketEndpoint};

use crate::identity::PeerId;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for a [`super::MeshNode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    /// Fixed identity; derived from the bound endpoint when absent.
    pub peer_id: Option<PeerId>,
    /// Endpoint to listen on. TCP port `0` picks a free port.
    pub listen: SocketEndpoint,
    /// Budget for establishing a socket to a peer.
    pub connect_timeout: Duration,
    /// Budget for exchanging handshake frames.
    pub handshake_timeout: Duration,
}

impl NodeSettings {
    /// Settings with default timeouts and a derived identity.
    pub fn new(listen: SocketEndpoint) -> Self {
        Self {
            peer_id: None,
            listen,
            connect_timeout: Config::default().connect_timeout(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Reads listen endpoint, identity seed and dial timeout from
    /// configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            peer_id: config.peer_seed().map(PeerId::derive),
            connect_timeout: config.connect_timeout(),
            ..Self::new(config.listen().clone())
        }
    }

    /// Pins the node identity.
    #[must_use]
    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_derives_identity() {
        let config = Config {
            peer_seed: Some("node-a".to_owned()),
            connect_timeout_ms: 750,
            ..Config::default()
        };
        let settings = NodeSettings::from_config(&config);
        assert_eq!(settings.peer_id, Some(PeerId::derive("node-a")));
        assert_eq!(settings.connect_timeout, Duration::from_millis(750));
        assert_eq!(&settings.listen, config.listen());
    }
}
