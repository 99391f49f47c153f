//! Transport seam between the protocol layer and the peer network.
//!
//! The dispatch client consumes a [`PeerTransport`] and the command
//! dispatcher registers itself on a [`StreamHost`]. Both are implemented by
//! [`crate::mesh::MeshNode`]; tests substitute doubles.

mod errors;
mod listener;
#[cfg(test)]
mod listener_tests;
mod stream;
#[cfg(test)]
mod test_utils;

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use peerwire_config::SocketEndpoint;

pub use self::errors::{ListenerError, TransportError};
pub use self::listener::{ListenerHandle, SocketListener};
pub use self::stream::ConnectionStream;
#[cfg(test)]
pub(crate) use self::test_utils::HandOffHandler;

use crate::connection::Connection;
use crate::identity::{PeerAddrInfo, PeerId, ProtocolId};
use crate::wire::FrameReader;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Stream handed out by a transport. Bytes already read past a handshake
/// stay in the reader's buffer.
pub type RawStream = FrameReader<ConnectionStream>;

/// Capabilities the dispatch client needs from the peer network.
#[cfg_attr(test, mockall::automock)]
pub trait PeerTransport: Send + Sync {
    /// Identity of the local peer.
    fn local_peer_id(&self) -> PeerId;

    /// Returns `true` once the transport has shut down for good.
    fn is_closed(&self) -> bool;

    /// Opens a duplex stream to `peer` for `protocol`.
    fn open_stream(&self, peer: &PeerId, protocol: &ProtocolId)
    -> Result<RawStream, TransportError>;

    /// Starts an active search for peers serving `protocol`.
    ///
    /// Results arrive on the returned channel, which closes when the search
    /// is exhausted.
    fn find_peers(
        &self,
        protocol: &ProtocolId,
        limit: usize,
    ) -> Result<Receiver<PeerAddrInfo>, TransportError>;

    /// Peers recorded in the local peer store.
    fn peers(&self) -> Vec<PeerId>;

    /// Protocols a peer has advertised.
    fn known_protocols(&self, peer: &PeerId) -> Vec<ProtocolId>;

    /// Endpoints a peer can be dialled at.
    fn addresses(&self, peer: &PeerId) -> Vec<SocketEndpoint>;

    /// Establishes contact with a peer so later streams can be opened.
    fn connect(&self, info: &PeerAddrInfo) -> Result<(), TransportError>;
}

/// Registry of protocol handlers for inbound streams.
pub trait StreamHost: Send + Sync {
    /// Routes inbound streams for `protocol` to `handler`.
    fn set_stream_handler(
        &self,
        protocol: ProtocolId,
        handler: Arc<dyn ProtocolHandler>,
    ) -> Result<(), TransportError>;

    /// Stops routing inbound streams for `protocol`.
    fn remove_stream_handler(&self, protocol: &ProtocolId);
}

/// Receives inbound connections negotiated for one protocol.
pub trait ProtocolHandler: Send + Sync {
    /// Takes ownership of an inbound connection.
    fn handle(&self, connection: Connection);
}

/// Receives sockets accepted by a [`SocketListener`].
pub trait ConnectionHandler: Send + Sync {
    /// Takes ownership of an accepted socket.
    fn handle(&self, stream: ConnectionStream);
}
