//! Errors raised while tunnelling HTTP.

use std::io;

use thiserror::Error;

use crate::packer::PackerError;

/// Failure of one tunnelled HTTP exchange.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// A head or trailer is not valid HTTP/1.1.
    #[error("malformed http head: {0}")]
    Parse(#[from] httparse::Error),

    /// A parsed head carries a method, URI, status or field the HTTP types
    /// reject.
    #[error("invalid http head: {0}")]
    Http(#[from] http::Error),

    /// A head or trailer grew past the accepted size.
    #[error("http head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    /// The stream ended before a head was complete.
    #[error("stream ended inside an http head")]
    TruncatedHead,

    /// The request uses a feature the tunnel does not carry.
    #[error("unsupported request: {reason}")]
    Unsupported { reason: &'static str },

    /// A frame arrived on a channel that was not expected at that point.
    #[error("unexpected frame on tunnel channel {channel}")]
    UnexpectedFrame { channel: u8 },

    /// The other end gave up and said why.
    #[error("tunnel aborted: {reason}")]
    Aborted { reason: String },

    /// Framing failed.
    #[error(transparent)]
    Packer(#[from] PackerError),

    /// Underlying I/O failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TunnelError {
    /// Maps a close frame with a reason to [`TunnelError::Aborted`].
    pub(super) fn from_packer(error: PackerError) -> Self {
        match error {
            PackerError::Closed {
                reason: Some(reason),
                ..
            } => Self::Aborted { reason },
            other => Self::Packer(other),
        }
    }
}
