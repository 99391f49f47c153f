//! HTTP/1.1 carried over an upgraded connection.
//!
//! A stream command leaves both ends holding a raw pipe. [`frontend`] reads
//! one HTTP request from a local socket, relays it through the pipe and
//! writes the answer back; [`backend`] turns the far end of the pipe into a
//! [`TunneledRequest`] and a [`ResponseWriter`].
//!
//! Both directions use a [`Packer`] with three channels:
//!
//! | channel   | carries                                              |
//! |-----------|------------------------------------------------------|
//! | `HEAD`    | one frame holding the request or response head       |
//! | `BODY`    | body bytes, ended by a close frame                   |
//! | `TRAILER` | an optional block of trailer fields, then a close    |
//!
//! Heads and trailers travel in their HTTP/1.1 text form. A close frame with
//! a reason on any channel aborts the exchange.

mod backend;
mod errors;
mod frontend;
mod head;

use std::io::{self, Read, Write};

use crate::packer::{Packer, PackerError};

pub use self::backend::{ResponseWriter, TunneledRequest, backend};
pub use self::errors::TunnelError;
pub use self::frontend::{Relayed, frontend};

pub(crate) const TUNNEL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::tunnel");

const PACKER: Packer = Packer::new(*b"ht", 1);

const HEAD: u8 = 0;
const BODY: u8 = 1;
const TRAILER: u8 = 2;

/// Largest head or trailer block accepted from either side.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Body bytes per data frame.
const CHUNK_BYTES: usize = 16 * 1024;

/// Reads the next frame, which must be a data frame on `channel`.
fn expect_block<R>(reader: &mut R, channel: u8) -> Result<Vec<u8>, TunnelError>
where
    R: Read + ?Sized,
{
    match PACKER.next(reader) {
        Ok(header) if header.channel == channel => read_block(reader, header.length),
        Ok(header) => Err(TunnelError::UnexpectedFrame {
            channel: header.channel,
        }),
        Err(error) => Err(TunnelError::from_packer(error)),
    }
}

fn read_block<R>(reader: &mut R, length: u64) -> Result<Vec<u8>, TunnelError>
where
    R: Read + ?Sized,
{
    if length > MAX_HEAD_BYTES as u64 {
        return Err(TunnelError::HeadTooLarge {
            limit: MAX_HEAD_BYTES,
        });
    }
    let mut block = Vec::new();
    reader.take(length).read_to_end(&mut block)?;
    if (block.len() as u64) < length {
        return Err(TunnelError::TruncatedHead);
    }
    Ok(block)
}

fn send_block<W>(writer: &mut W, channel: u8, block: &[u8]) -> Result<(), TunnelError>
where
    W: Write + ?Sized,
{
    PACKER.send(channel, writer, block, block.len() as u64)?;
    Ok(())
}

/// Surfaces a tunnel failure through an [`io::Error`] for `Read`/`Write`
/// implementations, unwrapping plain I/O errors.
fn into_io(error: TunnelError) -> io::Error {
    match error {
        TunnelError::Io(error) | TunnelError::Packer(PackerError::Io(error)) => error,
        other => io::Error::other(other),
    }
}
