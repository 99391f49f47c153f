//! Error types for the dispatch client.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::identity::PeerId;
use crate::transport::TransportError;
use crate::wire::CodecError;

/// Errors that stop a request before or instead of producing results.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The command name is unusable.
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: &'static str },

    /// A threshold of zero was requested.
    #[error("threshold must be at least 1")]
    InvalidThreshold,

    /// The threshold exceeds the concurrent send cap.
    #[error("threshold {threshold} exceeds the limit of {limit} concurrent sends")]
    ThresholdTooHigh { threshold: usize, limit: usize },

    /// The client has been closed.
    #[error("client is closed")]
    Closed,

    /// The transport under the client has shut down.
    #[error("transport is closed")]
    TransportClosed,

    /// The timeout cannot be turned into a deadline.
    #[error("timeout {timeout:?} is too large")]
    InvalidTimeout { timeout: Duration },

    /// Peer discovery could not be started.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// A dispatch thread could not be spawned.
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[source] io::Error),

    /// No result arrived before the request timed out.
    #[error("deadline exceeded before any peer answered")]
    DeadlineExceeded,

    /// The first peer to answer reported a failure.
    #[error("peer {peer} failed: {source}")]
    Peer {
        peer: PeerId,
        #[source]
        source: PeerError,
    },
}

/// Failure of one peer within a request. Siblings are unaffected.
#[derive(Debug, Error)]
pub enum PeerError {
    /// No stream could be opened to the peer.
    #[error("failed to open stream: {0}")]
    Unreachable(#[source] TransportError),

    /// The request deadline passed before the exchange finished.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The client was closed while the exchange was in flight.
    #[error("request cancelled")]
    Cancelled,

    /// Frames could not be written or read.
    #[error("exchange failed: {0}")]
    Codec(#[source] CodecError),

    /// Socket configuration failed.
    #[error("connection error: {0}")]
    Io(#[source] io::Error),

    /// The peer answered with an error response.
    #[error("remote error: {message}")]
    Remote { message: String },
}

impl PeerError {
    pub(crate) fn from_io(error: io::Error) -> Self {
        if matches!(
            error.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ) {
            return Self::DeadlineExceeded;
        }
        Self::Io(error)
    }

    pub(crate) fn from_codec(error: CodecError) -> Self {
        if error.is_timeout() {
            return Self::DeadlineExceeded;
        }
        Self::Codec(error)
    }

    /// Returns `true` when the peer itself reported the failure.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}
