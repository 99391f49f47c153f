//! Standalone mesh node.
//!
//! `peerwired` loads [`peerwire_config::Config`], initialises telemetry,
//! starts a [`peerwire::MeshNode`] on the configured endpoint, dials the
//! bootstrap peers, and serves the diagnostics protocol until a termination
//! signal arrives. Lifecycle events flow through a [`HealthReporter`] so
//! operators see each stage as a structured log line.

mod bootstrap;
mod diagnostics;
mod health;
mod shutdown;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use diagnostics::{DIAG_PROTOCOL, diag_protocol};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

#[cfg(test)]
mod tests;
