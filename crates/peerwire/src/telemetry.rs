//! Process-wide tracing setup.
//!
//! Library code only emits `tracing` events under `peerwire::<area>` targets.
//! Binaries and tests call [`initialise`] once to route them to stderr.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use peerwire_config::{Config, LogFormat};
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};

static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// Proof that a subscriber is installed, carrying the format in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Format chosen by the call that installed the subscriber.
    pub fn format(&self) -> LogFormat {
        self.format
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter expression did not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },
    /// Another subscriber already owns the process.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Logging choices, usually read from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    /// `EnvFilter` directive string, such as `info,peerwire::mesh=debug`.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Whether events carry the emitting thread's name. Useful because every
    /// connection, query and dispatch runs on its own named thread.
    pub thread_names: bool,
}

impl TelemetrySettings {
    /// Reads the logging choices from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            filter: config.log_filter().to_owned(),
            format: config.log_format(),
            thread_names: true,
        }
    }
}

/// Installs the global subscriber described by `config`.
///
/// Only the first successful call installs anything; later calls return a
/// handle describing the subscriber already in place.
///
/// ```rust
/// use peerwire_config::Config;
///
/// # fn main() -> Result<(), peerwire::telemetry::TelemetryError> {
/// let config = Config::default();
/// let first = peerwire::telemetry::initialise(&config)?;
/// let again = peerwire::telemetry::initialise(&config)?;
/// assert_eq!(first, again);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Fails when the filter is invalid or a foreign subscriber is installed.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    initialise_with(&TelemetrySettings::from_config(config))
}

/// Installs the global subscriber described by `settings`.
///
/// # Errors
///
/// As for [`initialise`].
pub fn initialise_with(settings: &TelemetrySettings) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install(settings).map(|()| settings.format))
        .map(|format| TelemetryHandle { format: *format })
}

fn install(settings: &TelemetrySettings) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&settings.filter).map_err(|error| TelemetryError::Filter {
        filter: settings.filter.clone(),
        message: error.to_string(),
    })?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(settings.thread_names)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match settings.format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_filter_without_installing() {
        let settings = TelemetrySettings {
            filter: "peerwire=[".to_owned(),
            format: LogFormat::Compact,
            thread_names: false,
        };
        let error = install(&settings).expect_err("bad filter");
        assert!(matches!(error, TelemetryError::Filter { .. }));
    }

    #[test]
    fn settings_follow_config() {
        let settings = TelemetrySettings::from_config(&Config::default());
        assert_eq!(settings.filter, Config::default().log_filter());
        assert_eq!(settings.format, LogFormat::Json);
        assert!(settings.thread_names);
    }
}
