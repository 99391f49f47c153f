//! Termination signal handling.

use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;

/// Blocks the daemon until it should stop.
pub trait ShutdownSignal: Send + Sync {
    /// Waits for shutdown. Returns the signal number when one caused it.
    ///
    /// # Errors
    ///
    /// Fails when the listener cannot be installed.
    fn wait(&self) -> Result<Option<i32>, ShutdownError>;
}

/// Errors reported by shutdown listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Waits for one of a set of process signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemShutdownSignal {
    signals: Vec<i32>,
}

impl SystemShutdownSignal {
    /// Listens for `signals` instead of the default termination set.
    #[must_use]
    pub fn new(signals: Vec<i32>) -> Self {
        Self { signals }
    }
}

impl Default for SystemShutdownSignal {
    fn default() -> Self {
        Self::new(vec![SIGTERM, SIGINT, SIGQUIT, SIGHUP])
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<Option<i32>, ShutdownError> {
        let mut signals =
            Signals::new(&self.signals).map_err(|source| ShutdownError::Install { source })?;
        Ok(signals.forever().next())
    }
}
