//! Caller side: relays one HTTP exchange from a local socket through a tunnel.

use std::io::{self, BufWriter, Cursor, Read, Write};
use std::thread;

use http::header::{CONNECTION, CONTENT_LENGTH, HeaderMap, HeaderValue, TRANSFER_ENCODING};
use http::{StatusCode, request};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::packer::{Header, PackerError};
use crate::transport::ConnectionStream;

use super::errors::TunnelError;
use super::{
    BODY, CHUNK_BYTES, HEAD, MAX_HEAD_BYTES, PACKER, TRAILER, TUNNEL_TARGET, expect_block, head,
    read_block, send_block,
};

/// What came back through the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relayed {
    /// Status the backend answered with.
    pub status: StatusCode,
    /// Response body bytes written to the local socket.
    pub body_bytes: u64,
    /// Trailer fields the backend sent after the body.
    pub trailer: HeaderMap,
}

/// Reads one HTTP/1.1 request from `source`, sends it through `tunnel` and
/// writes the response to `sink`.
///
/// The request body streams to the backend while the response streams
/// back. Request bodies need a `Content-Length`. The response keeps the
/// backend's `Content-Length` when it sets one; otherwise it is sent chunked
/// with the backend's trailer. Either way the response asks the client to
/// close the connection afterwards.
///
/// # Errors
///
/// Returns [`TunnelError::Unsupported`] for chunked request bodies, parse
/// errors for a malformed request or response head,
/// [`TunnelError::Aborted`] when the backend gives up, or the I/O failure.
pub fn frontend<R, W>(
    mut source: R,
    mut sink: W,
    mut tunnel: Connection,
) -> Result<Relayed, TunnelError>
where
    R: Read + Send,
    W: Write,
{
    let (mut request, leftover) = read_request_head(&mut source)?;
    let length = body_length(&request.headers)?;
    head::strip_hop_by_hop(&mut request.headers);
    debug!(
        target: TUNNEL_TARGET,
        peer = %tunnel.peer(),
        method = %request.method,
        uri = %request.uri,
        length,
        "tunnelling request"
    );
    let block = head::encode_request(&request);
    let writer = tunnel.try_clone_writer()?;
    let body = ExactBody {
        inner: Cursor::new(leftover).chain(source),
        remaining: length,
    };

    thread::scope(|scope| {
        let sender = scope.spawn(move || send_request(writer, &block, body));
        let relayed = relay_response(&mut tunnel, &mut sink);
        if relayed.is_err()
            && let Err(error) = tunnel.reset()
        {
            debug!(target: TUNNEL_TARGET, error = %error, "tunnel reset failed");
        }
        let sent = sender.join().unwrap_or_else(|_| {
            Err(TunnelError::Aborted {
                reason: "request sender panicked".to_owned(),
            })
        });
        let relayed = relayed?;
        if let Err(error) = sent {
            debug!(target: TUNNEL_TARGET, error = %error, "request body not fully sent");
        }
        Ok(relayed)
    })
}

fn read_request_head<R>(source: &mut R) -> Result<(request::Parts, Vec<u8>), TunnelError>
where
    R: Read + ?Sized,
{
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        if let Some((parts, consumed)) = head::parse_request(&buf)? {
            let leftover = buf.split_off(consumed);
            return Ok((parts, leftover));
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Err(TunnelError::HeadTooLarge {
                limit: MAX_HEAD_BYTES,
            });
        }
        let read = source.read(&mut chunk)?;
        if read == 0 {
            return Err(TunnelError::TruncatedHead);
        }
        buf.extend_from_slice(chunk.get(..read).unwrap_or_default());
    }
}

fn body_length(headers: &HeaderMap) -> Result<u64, TunnelError> {
    if headers.contains_key(TRANSFER_ENCODING) {
        return Err(TunnelError::Unsupported {
            reason: "chunked request bodies",
        });
    }
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(0);
    };
    value
        .to_str()
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .ok_or(TunnelError::Unsupported {
            reason: "unreadable content length",
        })
}

fn send_request<R>(writer: ConnectionStream, block: &[u8], mut body: R) -> Result<(), TunnelError>
where
    R: Read,
{
    let mut out = BufWriter::new(writer);
    send_block(&mut out, HEAD, block)?;
    out.flush()?;
    PACKER.stream(BODY, &mut out, &mut body, CHUNK_BYTES)?;
    PACKER.send_close(TRAILER, &mut out, None)?;
    out.flush()?;
    Ok(())
}

fn relay_response<W>(tunnel: &mut Connection, sink: &mut W) -> Result<Relayed, TunnelError>
where
    W: Write,
{
    let block = expect_block(tunnel, HEAD)?;
    let (status, mut headers) = head::parse_response(&block)?;
    head::strip_hop_by_hop(&mut headers);
    let chunked = !headers.contains_key(CONTENT_LENGTH);
    if chunked {
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    }
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    sink.write_all(&head::encode_response(status, &headers))?;

    let mut body_bytes = 0_u64;
    let mut trailer = HeaderMap::new();
    let mut body_open = true;
    let mut trailer_open = true;
    while body_open || trailer_open {
        match PACKER.next(tunnel) {
            Ok(Header {
                channel: BODY,
                length,
            }) => {
                if chunked {
                    write!(sink, "{length:x}\r\n")?;
                }
                let copied = io::copy(&mut (&mut *tunnel).take(length), sink)?;
                if copied < length {
                    return Err(TunnelError::Io(io::ErrorKind::UnexpectedEof.into()));
                }
                if chunked {
                    sink.write_all(b"\r\n")?;
                }
                body_bytes += copied;
            }
            Ok(Header {
                channel: TRAILER,
                length,
            }) => {
                let block = read_block(tunnel, length)?;
                trailer.extend(head::parse_fields(&block)?);
            }
            Ok(Header { channel, .. }) => return Err(TunnelError::UnexpectedFrame { channel }),
            Err(PackerError::Closed {
                channel: BODY,
                reason: None,
            }) => body_open = false,
            Err(PackerError::Closed {
                channel: TRAILER,
                reason: None,
            }) => trailer_open = false,
            Err(error) => {
                let error = TunnelError::from_packer(error);
                warn!(target: TUNNEL_TARGET, error = %error, body_bytes, "response relay failed");
                return Err(error);
            }
        }
    }
    if chunked {
        let mut tail = b"0\r\n".to_vec();
        head::encode_fields(&mut tail, &trailer);
        sink.write_all(&tail)?;
    }
    sink.flush()?;
    Ok(Relayed {
        status,
        body_bytes,
        trailer,
    })
}

/// Yields exactly `remaining` bytes and fails if `inner` runs dry first.
struct ExactBody<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> Read for ExactBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let limit = usize::try_from(self.remaining).map_or(buf.len(), |left| left.min(buf.len()));
        let Some(window) = buf.get_mut(..limit) else {
            return Ok(0);
        };
        let read = self.inner.read(window)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "request body ended early",
            ));
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}
