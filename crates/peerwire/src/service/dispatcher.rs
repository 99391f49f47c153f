//! Per-connection command dispatch.
//!
//! ```text
//! accepted -> command decoded -> handler invoked -> response sent -> closed
//!                                                \-> response sent -> upgraded -> duplex -> closed
//! ```

use tracing::{debug, warn};

use crate::connection::{Connection, deadline_after};
use crate::scope::Scope;
use crate::transport::ProtocolHandler;
use crate::wire::{Body, CodecError, Command, Response};

use super::SERVICE_TARGET;
use super::ServiceSettings;
use super::router::{CommandHandler, Route, Router};

/// Protocol handler that runs one command per inbound connection.
pub(crate) struct Dispatcher {
    service: String,
    router: Router,
    scope: Scope,
    settings: ServiceSettings,
}

impl Dispatcher {
    pub(crate) fn new(
        service: String,
        router: Router,
        scope: Scope,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            service,
            router,
            scope,
            settings,
        }
    }

    fn dispatch(&self, mut connection: Connection) {
        if self.scope.is_cancelled() {
            return;
        }
        let _tracked = match connection.abort_handle() {
            Ok(handle) => self.scope.track(handle),
            Err(error) => {
                warn!(
                    target: SERVICE_TARGET,
                    service = %self.service,
                    error = %error,
                    "cannot track inbound connection"
                );
                return;
            }
        };

        let Some(command) = self.read_command(&mut connection) else {
            return;
        };
        let (name, body) = command.into_parts();
        debug!(
            target: SERVICE_TARGET,
            service = %self.service,
            peer = %connection.peer(),
            command = %name,
            "dispatching command"
        );

        match self.router.lookup(&name) {
            None => {
                let response = Response::failure(format!("command not found: {name}"));
                self.respond(&mut connection, &response);
            }
            Some(Route::Simple(handler)) => {
                let response = self.invoke(handler, &name, &connection, &body);
                self.respond(&mut connection, &response);
            }
            Some(Route::Stream(handler, duplex)) => {
                let response = self.invoke(handler, &name, &connection, &body);
                if !self.respond(&mut connection, &response) {
                    return;
                }
                connection.upgrade();
                duplex(&self.scope, &mut connection);
                debug!(
                    target: SERVICE_TARGET,
                    service = %self.service,
                    command = %name,
                    "duplex session finished"
                );
            }
        }
    }

    fn read_command(&self, connection: &mut Connection) -> Option<Command> {
        let deadline = deadline_after(self.settings.command_timeout);
        if let Err(error) = connection.set_read_deadline(deadline) {
            warn!(target: SERVICE_TARGET, error = %error, "failed to arm command deadline");
            return None;
        }
        match connection.read_command(self.settings.max_frame_bytes) {
            Ok(command) => match connection.set_read_deadline(None) {
                Ok(()) => Some(command),
                Err(error) => {
                    warn!(target: SERVICE_TARGET, error = %error, "failed to clear command deadline");
                    None
                }
            },
            Err(CodecError::Closed) => {
                debug!(
                    target: SERVICE_TARGET,
                    peer = %connection.peer(),
                    "peer closed without sending a command"
                );
                None
            }
            Err(error) if error.is_timeout() => {
                debug!(
                    target: SERVICE_TARGET,
                    peer = %connection.peer(),
                    "timed out waiting for a command"
                );
                None
            }
            Err(
                error @ (CodecError::Malformed { .. }
                | CodecError::InvalidCommand { .. }
                | CodecError::FrameTooLarge { .. }),
            ) => {
                warn!(
                    target: SERVICE_TARGET,
                    peer = %connection.peer(),
                    error = %error,
                    "rejecting malformed command"
                );
                self.respond(connection, &Response::failure(error.to_string()));
                None
            }
            Err(error) => {
                warn!(
                    target: SERVICE_TARGET,
                    peer = %connection.peer(),
                    error = %error,
                    "failed to read command"
                );
                None
            }
        }
    }

    fn invoke(
        &self,
        handler: &CommandHandler,
        name: &str,
        connection: &Connection,
        body: &Body,
    ) -> Response {
        handler(&self.scope, connection, body).unwrap_or_else(|error| {
            debug!(
                target: SERVICE_TARGET,
                service = %self.service,
                command = %name,
                error = %error,
                "handler failed"
            );
            Response::failure(error.to_string())
        })
    }

    fn respond(&self, connection: &mut Connection, response: &Response) -> bool {
        let deadline = deadline_after(self.settings.command_timeout);
        let written = connection
            .set_write_deadline(deadline)
            .map_err(CodecError::from)
            .and_then(|()| connection.write_response(response))
            .and_then(|()| connection.set_write_deadline(None).map_err(CodecError::from));
        match written {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    target: SERVICE_TARGET,
                    service = %self.service,
                    peer = %connection.peer(),
                    error = %error,
                    "failed to write response"
                );
                false
            }
        }
    }
}

impl ProtocolHandler for Dispatcher {
    fn handle(&self, connection: Connection) {
        self.dispatch(connection);
    }
}
