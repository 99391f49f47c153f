//! Connection primitive bound to one remote peer.
//!
//! A connection starts in the [`Phase::Framed`] phase, where commands and
//! responses travel as frames. A stream command moves it to [`Phase::Raw`];
//! from then on reads first drain whatever the frame reader had already
//! pulled off the socket and then continue on the socket itself.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::identity::{PeerId, ProtocolId};
use crate::transport::{ConnectionStream, PeerTransport, RawStream, TransportError};
use crate::wire::{CodecError, Command, FrameReader, Response};

const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

/// Whether a connection still carries frames or has become a raw pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Commands and responses are exchanged as frames.
    Framed,
    /// Bytes are passed through unframed.
    Raw,
}

/// Duplex stream to a single peer.
#[derive(Debug)]
pub struct Connection {
    peer: PeerId,
    reader: RawStream,
    phase: Phase,
}

impl Connection {
    /// Opens a stream to `peer` for `protocol` through the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when the stream cannot be opened.
    pub fn open(
        transport: &dyn PeerTransport,
        peer: &PeerId,
        protocol: &ProtocolId,
    ) -> Result<Self, TransportError> {
        let stream = transport.open_stream(peer, protocol)?;
        Ok(Self::from_raw(peer.clone(), stream))
    }

    /// Wraps an already-open stream.
    pub fn from_raw(peer: PeerId, reader: RawStream) -> Self {
        Self {
            peer,
            reader,
            phase: Phase::Framed,
        }
    }

    /// Identity of the remote peer.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Arms or clears the read deadline.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] when `deadline` has already
    /// passed.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.stream().set_read_timeout(remaining(deadline)?)
    }

    /// Arms or clears the write deadline.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] when `deadline` has already
    /// passed.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) -> io::Result<()> {
        self.stream().set_write_timeout(remaining(deadline)?)
    }

    /// Closes the read direction. Writes remain possible.
    pub fn close_read(&self) -> io::Result<()> {
        self.stream().shutdown(Shutdown::Read)
    }

    /// Closes the write direction; the peer observes end of stream.
    pub fn close_write(&self) -> io::Result<()> {
        self.stream().shutdown(Shutdown::Write)
    }

    /// Aborts both directions.
    pub fn reset(&self) -> io::Result<()> {
        self.stream().shutdown(Shutdown::Both)
    }

    /// Switches the connection to raw streaming.
    pub fn upgrade(&mut self) {
        if self.phase == Phase::Raw {
            return;
        }
        let carried = self.reader.buffered().len();
        if carried > 0 {
            debug!(
                target: CONNECTION_TARGET,
                peer = %self.peer,
                carried,
                "raw stream starts with read-ahead bytes"
            );
        }
        self.phase = Phase::Raw;
    }

    /// Returns a second handle onto the socket so one thread can write while
    /// another reads through this connection.
    ///
    /// Bytes already pulled into the frame reader stay with the connection.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket handle cannot be duplicated.
    pub fn try_clone_writer(&self) -> io::Result<ConnectionStream> {
        self.stream().try_clone()
    }

    /// Returns a handle that can reset this connection from another thread.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket handle cannot be duplicated.
    pub fn abort_handle(&self) -> io::Result<AbortHandle> {
        let stream = self.stream().try_clone()?;
        Ok(AbortHandle {
            stream: Arc::new(stream),
        })
    }

    /// Reads the next command frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Upgraded`] on a raw connection, otherwise any
    /// decoding error.
    pub fn read_command(&mut self, limit: usize) -> Result<Command, CodecError> {
        self.ensure_framed()?;
        Command::decode(&mut self.reader, limit)
    }

    /// Reads the next response frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Upgraded`] on a raw connection, otherwise any
    /// decoding error.
    pub fn read_response(&mut self, limit: usize) -> Result<Response, CodecError> {
        self.ensure_framed()?;
        Response::decode(&mut self.reader, limit)
    }

    /// Writes a command frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Upgraded`] on a raw connection, otherwise any
    /// encoding error.
    pub fn write_command(&mut self, command: &Command) -> Result<(), CodecError> {
        self.ensure_framed()?;
        command.encode(self.reader.get_mut())
    }

    /// Writes a response frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Upgraded`] on a raw connection, otherwise any
    /// encoding error.
    pub fn write_response(&mut self, response: &Response) -> Result<(), CodecError> {
        self.ensure_framed()?;
        response.encode(self.reader.get_mut())
    }

    fn ensure_framed(&self) -> Result<(), CodecError> {
        match self.phase {
            Phase::Framed => Ok(()),
            Phase::Raw => Err(CodecError::Upgraded),
        }
    }

    fn stream(&self) -> &ConnectionStream {
        self.reader.get_ref()
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.reader.get_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.reader.get_mut().flush()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Duplicated handles held for aborts would otherwise keep the socket
        // open past this point.
        shutdown_both(self.stream(), "connection close failed");
    }
}

/// Resets a connection from outside the thread that owns it.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    stream: Arc<ConnectionStream>,
}

impl AbortHandle {
    /// Shuts down both directions, unblocking pending reads and writes.
    pub fn reset(&self) {
        shutdown_both(&self.stream, "connection reset failed");
    }
}

/// Absolute deadline `timeout` from now, or `None` when it lies beyond what
/// [`Instant`] can represent. `None` clears a connection deadline, which is
/// the same as waiting without limit.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// A socket the peer already tore down reports `NotConnected`; that is not
/// worth a log line.
fn shutdown_both(stream: &ConnectionStream, failure: &'static str) {
    if let Err(error) = stream.shutdown(Shutdown::Both)
        && error.kind() != io::ErrorKind::NotConnected
    {
        debug!(target: CONNECTION_TARGET, error = %error, "{failure}");
    }
}

fn remaining(deadline: Option<Instant>) -> io::Result<Option<Duration>> {
    let Some(deadline) = deadline else {
        return Ok(None);
    };
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "deadline already passed",
        ));
    }
    Ok(Some(left))
}

/// Builds a framed reader over a fresh stream.
pub(crate) fn raw_stream(stream: ConnectionStream) -> RawStream {
    FrameReader::new(stream)
}
