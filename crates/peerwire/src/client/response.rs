//! Per-peer results of a request.

use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use serde_json::Value;

use crate::connection::Connection;
use crate::identity::PeerId;
use crate::scope::TrackGuard;
use crate::wire::Response;

use super::errors::PeerError;

/// Outcome of one peer, tagged with its identity.
///
/// When the peer answered, the connection stays open so stream commands can
/// continue as a raw duplex pipe through the [`Read`] and [`Write`]
/// implementations.
#[derive(Debug)]
pub struct PeerResponse {
    peer: PeerId,
    response: Option<Response>,
    error: Option<PeerError>,
    connection: Option<Connection>,
    tracked: Option<TrackGuard>,
}

impl PeerResponse {
    pub(crate) fn received(
        peer: PeerId,
        response: Response,
        connection: Connection,
        tracked: TrackGuard,
    ) -> Self {
        let error = response.error().map(|message| PeerError::Remote {
            message: message.to_owned(),
        });
        Self {
            peer,
            response: Some(response),
            error,
            connection: Some(connection),
            tracked: Some(tracked),
        }
    }

    pub(crate) fn failed(peer: PeerId, error: PeerError) -> Self {
        Self {
            peer,
            response: None,
            error: Some(error),
            connection: None,
            tracked: None,
        }
    }

    /// Peer this result belongs to.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Failure, if the exchange did not succeed.
    pub fn error(&self) -> Option<&PeerError> {
        self.error.as_ref()
    }

    /// Returns `true` when the peer answered without an error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Response frame, when one was received (including error responses).
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Looks up a field of the response.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.response.as_ref().and_then(|response| response.get(key))
    }

    /// Looks up a string field of the response.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.response
            .as_ref()
            .and_then(|response| response.get_str(key))
    }

    /// Closes the read direction of the connection.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::NotConnected`] when there is no connection.
    pub fn close_read(&self) -> io::Result<()> {
        self.connection()?.close_read()
    }

    /// Closes the write direction; the peer observes end of stream.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::NotConnected`] when there is no connection.
    pub fn close_write(&self) -> io::Result<()> {
        self.connection()?.close_write()
    }

    /// Aborts the connection.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::NotConnected`] when there is no connection.
    pub fn close(&self) -> io::Result<()> {
        self.connection()?.reset()
    }

    /// Splits off the result, dropping any connection.
    ///
    /// # Errors
    ///
    /// Returns the peer failure, including remote error responses.
    pub fn into_result(self) -> Result<Response, PeerError> {
        match (self.error, self.response) {
            (Some(error), _) => Err(error),
            (None, Some(response)) => Ok(response),
            (None, None) => Err(PeerError::Cancelled),
        }
    }

    /// Takes ownership of the connection. The client no longer resets it on
    /// close.
    pub fn into_connection(self) -> Option<Connection> {
        drop(self.tracked);
        self.connection
    }

    fn connection(&self) -> io::Result<&Connection> {
        self.connection.as_ref().ok_or_else(not_connected)
    }

    fn connection_mut(&mut self) -> io::Result<&mut Connection> {
        self.connection.as_mut().ok_or_else(not_connected)
    }
}

impl Read for PeerResponse {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.connection_mut()?.read(buf)
    }
}

impl Write for PeerResponse {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.connection_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.connection_mut()?.flush()
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "no connection for this result")
}

/// Results of a request in completion order. Ends once every peer has
/// reported or the request deadline passed.
#[derive(Debug)]
pub struct Responses {
    receiver: Receiver<PeerResponse>,
}

impl Responses {
    pub(crate) fn new(receiver: Receiver<PeerResponse>) -> Self {
        Self { receiver }
    }

    /// Blocks for the next result; `None` once the stream has ended.
    pub fn recv(&self) -> Option<PeerResponse> {
        self.receiver.recv().ok()
    }

    /// Waits up to `timeout` for the next result.
    ///
    /// # Errors
    ///
    /// Returns [`RecvTimeoutError::Timeout`] when nothing arrived in time and
    /// [`RecvTimeoutError::Disconnected`] once the stream has ended.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<PeerResponse, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl Iterator for Responses {
    type Item = PeerResponse;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}
