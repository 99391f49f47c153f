//! Error types for command services.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised while starting a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Two handlers were registered under the same command name.
    #[error("command '{command}' is defined more than once")]
    DuplicateCommand { command: String },

    /// A handler was registered under a blank name.
    #[error("command names must not be empty")]
    EmptyCommandName,

    /// The stream host refused the protocol.
    #[error("failed to register service: {0}")]
    Transport(#[from] TransportError),
}

/// Failure reported by a command handler.
///
/// The message is sent to the caller as the response's error text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// A required body field is absent.
    #[error("missing field '{field}'")]
    MissingField { field: String },

    /// A body field is present but unusable.
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// The handler failed for another reason.
    #[error("{message}")]
    Failed { message: String },
}

impl HandlerError {
    /// Creates a generic handler failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
