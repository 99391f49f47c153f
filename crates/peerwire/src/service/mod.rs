//! Command dispatcher for inbound connections.
//!
//! A service binds a set of named handlers to one protocol identifier on a
//! [`StreamHost`]. Each inbound connection carries exactly one command. Simple
//! commands are answered and closed; stream commands are answered and then
//! handed to a duplex callback as a raw pipe.
//!
//! ```rust,no_run
//! use std::io::{Read, Write};
//! use std::sync::Arc;
//!
//! use peerwire::{ProtocolId, Response, ServiceBuilder, StreamHost};
//!
//! # fn serve(host: Arc<dyn StreamHost>) -> Result<(), Box<dyn std::error::Error>> {
//! let protocol = ProtocolId::parse("/hello/1.0")?;
//! let service = ServiceBuilder::new("hello", protocol)
//!     .define("hi", |_, _, _| Ok(Response::new().with("message", "HI")))
//!     .define_stream(
//!         "echo",
//!         |_, _, _| Ok(Response::new()),
//!         |_, connection| {
//!             let mut buf = [0_u8; 4096];
//!             while let Ok(read) = connection.read(&mut buf) {
//!                 let chunk = buf.get(..read).unwrap_or_default();
//!                 if chunk.is_empty() || connection.write_all(chunk).is_err() {
//!                     break;
//!                 }
//!             }
//!         },
//!     )
//!     .start(host)?;
//! service.stop();
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod errors;
mod router;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use peerwire_config::Config;
use tracing::info;

use crate::connection::Connection;
use crate::identity::ProtocolId;
use crate::scope::Scope;
use crate::transport::{ProtocolHandler, StreamHost};
use crate::wire::{Body, Response};

pub use self::errors::{HandlerError, ServiceError};
pub use self::router::{CommandHandler, DuplexHandler};

use self::dispatcher::Dispatcher;
use self::router::{Route, Router};

pub(crate) const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

/// Limits applied to inbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    /// How long an inbound connection may take to send its command.
    pub command_timeout: Duration,
    /// Largest accepted command frame.
    pub max_frame_bytes: usize,
}

impl ServiceSettings {
    /// Reads the limits from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            command_timeout: config.command_timeout(),
            max_frame_bytes: config.max_frame_bytes(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Collects handlers before a service starts.
pub struct ServiceBuilder {
    name: String,
    protocol: ProtocolId,
    definitions: Vec<(String, Route)>,
    settings: ServiceSettings,
}

impl ServiceBuilder {
    /// Starts describing a service for `protocol`.
    pub fn new(name: impl Into<String>, protocol: ProtocolId) -> Self {
        Self {
            name: name.into(),
            protocol,
            definitions: Vec::new(),
            settings: ServiceSettings::default(),
        }
    }

    /// Replaces the inbound connection limits.
    #[must_use]
    pub fn settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Registers a command answered with a single response.
    #[must_use]
    pub fn define<F>(mut self, command: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Scope, &Connection, &Body) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.definitions
            .push((command.into(), Route::Simple(Arc::new(handler))));
        self
    }

    /// Registers a command whose connection becomes a raw pipe after the
    /// response is flushed.
    ///
    /// `duplex` runs even when `handler` fails, after the error response has
    /// been sent.
    #[must_use]
    pub fn define_stream<F, D>(mut self, command: impl Into<String>, handler: F, duplex: D) -> Self
    where
        F: Fn(&Scope, &Connection, &Body) -> Result<Response, HandlerError> + Send + Sync + 'static,
        D: Fn(&Scope, &mut Connection) + Send + Sync + 'static,
    {
        self.definitions.push((
            command.into(),
            Route::Stream(Arc::new(handler), Arc::new(duplex)),
        ));
        self
    }

    /// Freezes the handler table and registers it on `host`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::DuplicateCommand`] or
    /// [`ServiceError::EmptyCommandName`] for a bad table, or
    /// [`ServiceError::Transport`] when the host refuses the protocol.
    pub fn start(self, host: Arc<dyn StreamHost>) -> Result<Service, ServiceError> {
        let router = Router::build(self.definitions)?;
        let commands = router
            .commands()
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        let scope = Scope::new();
        let dispatcher: Arc<dyn ProtocolHandler> = Arc::new(Dispatcher::new(
            self.name.clone(),
            router,
            scope.clone(),
            self.settings,
        ));
        host.set_stream_handler(self.protocol.clone(), dispatcher)?;
        info!(
            target: SERVICE_TARGET,
            service = %self.name,
            protocol = %self.protocol,
            commands = ?commands,
            "service started"
        );
        Ok(Service {
            name: self.name,
            protocol: self.protocol,
            host,
            scope,
            commands,
            stopped: AtomicBool::new(false),
        })
    }
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServiceBuilder")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field(
                "commands",
                &self
                    .definitions
                    .iter()
                    .map(|(name, route)| (name.as_str(), route.kind()))
                    .collect::<Vec<_>>(),
            )
            .field("settings", &self.settings)
            .finish()
    }
}

/// A running service. Dropping it stops the service.
pub struct Service {
    name: String,
    protocol: ProtocolId,
    host: Arc<dyn StreamHost>,
    scope: Scope,
    commands: Vec<String>,
    stopped: AtomicBool,
}

impl Service {
    /// Service name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol the service answers on.
    pub fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Scope handed to every handler of this service.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns `true` once [`Service::stop`] has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Unregisters the protocol and resets every connection still being
    /// served, including duplex sessions. Safe to call more than once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.host.remove_stream_handler(&self.protocol);
        let active = self.scope.tracked();
        self.scope.cancel();
        info!(
            target: SERVICE_TARGET,
            service = %self.name,
            protocol = %self.protocol,
            active,
            "service stopped"
        );
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Service")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("commands", &self.commands)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
