//! Error types for listeners and transports.

use std::io;

use camino::Utf8PathBuf;
use peerwire_config::SocketEndpoint;
use thiserror::Error;

use crate::identity::{PeerId, ProtocolId};
use crate::wire::CodecError;

/// Errors surfaced while binding or running the socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// No socket could be bound for the endpoint.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: SocketEndpoint,
        #[source]
        source: io::Error,
    },
    /// The TCP host resolved to no addresses.
    #[error("{endpoint} resolved to no addresses")]
    NoAddress { endpoint: SocketEndpoint },
    /// Another process is serving the Unix socket.
    #[error("unix socket {path} is already in use")]
    SocketInUse { path: Utf8PathBuf },
    /// The Unix socket path holds something other than a socket.
    #[error("{path} exists and is not a socket")]
    NotASocket { path: Utf8PathBuf },
    /// A leftover Unix socket could not be inspected or removed.
    #[error("cannot reclaim stale unix socket {path}: {source}")]
    StaleSocket {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// Unix sockets are not available on this platform.
    #[error("unix sockets are unsupported for {endpoint}")]
    Unsupported { endpoint: SocketEndpoint },
    /// The bound socket could not be configured for accepting.
    #[error("failed to configure listener: {source}")]
    Setup {
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn listener thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    #[error("listener thread panicked")]
    ThreadPanic,
}

impl ListenerError {
    pub(crate) fn bind(endpoint: &SocketEndpoint, source: io::Error) -> Self {
        Self::Bind {
            endpoint: endpoint.clone(),
            source,
        }
    }
}

/// Errors reported by a peer transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been shut down.
    #[error("transport is closed")]
    Closed,

    /// No address is known for the peer.
    #[error("no known address for peer {peer}")]
    UnknownPeer { peer: PeerId },

    /// No neighbour is available to answer a discovery query.
    #[error("no route to discover peers for {protocol}")]
    NoRoute { protocol: ProtocolId },

    /// Dialling an endpoint failed.
    #[error("failed to dial {endpoint}: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// The handshake frames could not be exchanged.
    #[error("handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: String,
        #[source]
        source: CodecError,
    },

    /// The remote peer does not serve the protocol.
    #[error("peer {peer} does not support {protocol}: {reason}")]
    ProtocolNotSupported {
        peer: PeerId,
        protocol: ProtocolId,
        reason: String,
    },

    /// The endpoint answered with a different identity than expected.
    #[error("expected peer {expected} but {actual} answered")]
    PeerMismatch { expected: PeerId, actual: PeerId },

    /// A handler is already registered for the protocol.
    #[error("protocol {protocol} already has a handler")]
    ProtocolInUse { protocol: ProtocolId },

    /// The listener failed to start.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Socket IO failed outside dialling.
    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Creates a dial error for an endpoint.
    pub fn dial(endpoint: impl ToString, source: io::Error) -> Self {
        Self::Dial {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    /// Creates a handshake error for an endpoint.
    pub fn handshake(endpoint: impl ToString, source: CodecError) -> Self {
        Self::Handshake {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    /// Returns `true` when the transport itself is unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
