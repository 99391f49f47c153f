//! Serving side: turns an upgraded connection back into an HTTP exchange.

use std::io::{self, BufWriter, Read, Write};

use http::header::HeaderMap;
use http::{Method, StatusCode, Uri, request};
use tracing::debug;

use crate::connection::Connection;
use crate::packer::{Header, PackerError};
use crate::transport::ConnectionStream;

use super::errors::TunnelError;
use super::{
    BODY, CHUNK_BYTES, HEAD, PACKER, TRAILER, TUNNEL_TARGET, expect_block, head, into_io,
    read_block, send_block,
};

/// Reads the request head from `connection`.
///
/// The returned request reads the body through `connection`; the writer
/// answers over a second handle onto the same socket, so both may be used
/// from different threads.
///
/// # Errors
///
/// Fails when the socket handle cannot be duplicated, the frontend aborts,
/// or the head is not valid HTTP/1.1.
pub fn backend(
    connection: &mut Connection,
) -> Result<(TunneledRequest<'_>, ResponseWriter), TunnelError> {
    let writer = connection.try_clone_writer()?;
    let block = expect_block(connection, HEAD)?;
    let (parts, _) = head::parse_request(&block)?.ok_or(TunnelError::TruncatedHead)?;
    debug!(
        target: TUNNEL_TARGET,
        peer = %connection.peer(),
        method = %parts.method,
        uri = %parts.uri,
        "tunnelled request arrived"
    );
    let request = TunneledRequest {
        head: parts,
        connection,
        remaining: 0,
        body_done: false,
        trailer: None,
    };
    Ok((request, ResponseWriter::new(writer)))
}

/// A request received through a tunnel. Reading it yields the body.
pub struct TunneledRequest<'a> {
    head: request::Parts,
    connection: &'a mut Connection,
    /// Unread bytes of the current body frame.
    remaining: u64,
    body_done: bool,
    trailer: Option<HeaderMap>,
}

impl TunneledRequest<'_> {
    /// Request method.
    pub fn method(&self) -> &Method {
        &self.head.method
    }

    /// Request target.
    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    /// Request header fields.
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Discards any unread body and returns the trailer fields.
    ///
    /// # Errors
    ///
    /// Fails when the frontend aborts or the trailer is malformed.
    pub fn trailer(&mut self) -> Result<&HeaderMap, TunnelError> {
        io::copy(self, &mut io::sink())?;
        if self.trailer.is_none() {
            let mut trailer = HeaderMap::new();
            loop {
                match PACKER.next(&mut *self.connection) {
                    Ok(Header {
                        channel: TRAILER,
                        length,
                    }) => {
                        let block = read_block(&mut *self.connection, length)?;
                        trailer.extend(head::parse_fields(&block)?);
                    }
                    Ok(Header { channel, .. }) => {
                        return Err(TunnelError::UnexpectedFrame { channel });
                    }
                    Err(PackerError::Closed {
                        channel: TRAILER,
                        reason: None,
                    }) => break,
                    Err(error) => return Err(TunnelError::from_packer(error)),
                }
            }
            self.trailer = Some(trailer);
        }
        Ok(self.trailer.get_or_insert_default())
    }

    fn next_frame(&mut self) -> Result<(), TunnelError> {
        match PACKER.next(&mut *self.connection) {
            Ok(Header {
                channel: BODY,
                length,
            }) => self.remaining = length,
            Ok(Header { channel, .. }) => return Err(TunnelError::UnexpectedFrame { channel }),
            Err(PackerError::Closed {
                channel: BODY,
                reason: None,
            }) => self.body_done = true,
            Err(error) => return Err(TunnelError::from_packer(error)),
        }
        Ok(())
    }
}

impl Read for TunneledRequest<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.remaining == 0 {
            if self.body_done {
                return Ok(0);
            }
            self.next_frame().map_err(into_io)?;
        }
        let limit = usize::try_from(self.remaining).map_or(buf.len(), |left| left.min(buf.len()));
        let Some(window) = buf.get_mut(..limit) else {
            return Ok(0);
        };
        let read = self.connection.read(window)?;
        if read == 0 && !window.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "tunnel closed inside a body frame",
            ));
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}

/// Answers a [`TunneledRequest`].
///
/// The head goes out with the first body write, on [`ResponseWriter::flush`]
/// or on [`ResponseWriter::finish`]; status and header changes after that
/// are ignored. Dropping the writer unfinished aborts the exchange.
pub struct ResponseWriter {
    out: BufWriter<ConnectionStream>,
    status: StatusCode,
    headers: HeaderMap,
    trailer: HeaderMap,
    head_sent: bool,
    finished: bool,
}

impl ResponseWriter {
    fn new(writer: ConnectionStream) -> Self {
        Self {
            out: BufWriter::new(writer),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            trailer: HeaderMap::new(),
            head_sent: false,
            finished: false,
        }
    }

    /// Sets the response status. Defaults to `200 OK`.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Response header fields.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Trailer fields, sent after the body.
    pub fn trailer_mut(&mut self) -> &mut HeaderMap {
        &mut self.trailer
    }

    /// Ends the body and sends the trailer.
    ///
    /// # Errors
    ///
    /// Returns the write failure.
    pub fn finish(mut self) -> Result<(), TunnelError> {
        self.finished = true;
        self.send_head()?;
        PACKER.send_close(BODY, &mut self.out, None)?;
        if !self.trailer.is_empty() {
            let mut block = Vec::new();
            head::encode_fields(&mut block, &self.trailer);
            send_block(&mut self.out, TRAILER, &block)?;
        }
        PACKER.send_close(TRAILER, &mut self.out, None)?;
        self.out.flush()?;
        Ok(())
    }

    fn send_head(&mut self) -> Result<(), TunnelError> {
        if self.head_sent {
            return Ok(());
        }
        self.head_sent = true;
        head::strip_hop_by_hop(&mut self.headers);
        let block = head::encode_response(self.status, &self.headers);
        send_block(&mut self.out, HEAD, &block)
    }

    fn abandon(&mut self) -> Result<(), TunnelError> {
        PACKER.send_close(BODY, &mut self.out, Some("response abandoned"))?;
        self.out.flush()?;
        Ok(())
    }
}

impl Write for ResponseWriter {
    /// Sends up to one frame of body bytes and flushes it.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.send_head().map_err(into_io)?;
        let payload = buf.get(..buf.len().min(CHUNK_BYTES)).unwrap_or_default();
        send_block(&mut self.out, BODY, payload).map_err(into_io)?;
        self.out.flush()?;
        Ok(payload.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_head().map_err(into_io)?;
        self.out.flush()
    }
}

impl Drop for ResponseWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(error) = self.abandon() {
            debug!(target: TUNNEL_TARGET, error = %error, "failed to abort tunnelled response");
        }
    }
}
