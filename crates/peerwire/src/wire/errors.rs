//! Error types for frame encoding and decoding.

use std::io;

use thiserror::Error;

/// Errors surfaced while reading or writing wire frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The remote side closed the stream before any frame byte arrived.
    #[error("stream closed before a frame arrived")]
    Closed,

    /// A frame grew past the configured limit.
    #[error("frame too large: {size} bytes exceeds {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    /// Frame bytes are not valid JSON of the expected shape.
    #[error("malformed frame: {message}")]
    Malformed {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// A command frame parsed but carries no usable name.
    #[error("invalid command: {message}")]
    InvalidCommand { message: String },

    /// Frame decoding was attempted on a connection in raw mode.
    #[error("connection already upgraded to raw streaming")]
    Upgraded,

    /// Serialising an outbound frame failed.
    #[error("failed to serialize frame: {0}")]
    Serialize(#[source] serde_json::Error),

    /// IO error during read or write.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Creates a malformed frame error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::Malformed {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a malformed frame error with a custom message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an invalid command error.
    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    /// Creates a frame size error.
    pub fn frame_too_large(size: usize, limit: usize) -> Self {
        Self::FrameTooLarge { size, limit }
    }

    /// Returns `true` when the error is a socket deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(error) if matches!(
                error.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            )
        )
    }
}
