//! Error types for the discovery loop.

use std::io;

use thiserror::Error;

/// Errors raised by a discovery handle.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The loop thread could not be spawned.
    #[error("failed to spawn discovery loop: {0}")]
    Spawn(#[source] io::Error),

    /// The loop has stopped.
    #[error("discovery loop has stopped")]
    Stopped,

    /// The loop did not answer a snapshot request in time.
    #[error("discovery loop did not answer within {timeout_ms} ms")]
    SnapshotTimeout { timeout_ms: u128 },
}
