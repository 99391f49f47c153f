//! Channel-tagged framing for upgraded connections.
//!
//! After a stream command hands over the raw pipe, both ends may multiplex
//! several logical streams (a body and its trailer, say) by wrapping each
//! chunk in a small header:
//!
//! | field   | type      |
//! |---------|-----------|
//! | magic   | `[u8; 2]` |
//! | version | `u16`     |
//! | kind    | `u8`      |
//! | length  | `i64`     |
//! | channel | `u8`      |
//!
//! Integers are little-endian. `length` payload bytes follow the header. A
//! close frame ends a channel; its payload, when present, is the reason the
//! sender gave up.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;
use tracing::debug;

const KIND_DATA: u8 = 0;
const KIND_CLOSE: u8 = 1;

/// Longest close reason accepted from a peer.
const MAX_REASON_BYTES: u64 = 64 * 1024;

/// Errors raised while packing or unpacking frames.
#[derive(Debug, Error)]
pub enum PackerError {
    /// The header did not start with the expected magic bytes.
    #[error("wrong packer magic {found:02x?}")]
    WrongMagic { found: [u8; 2] },

    /// The header carried another version.
    #[error("wrong packer version {found} (expected {expected})")]
    WrongVersion { expected: u16, found: u16 },

    /// The header named an unknown frame kind.
    #[error("unknown frame kind {kind}")]
    UnknownKind { kind: u8 },

    /// The header carried a negative payload length.
    #[error("negative frame length {length}")]
    NegativeLength { length: i64 },

    /// A payload length does not fit the header.
    #[error("frame length {length} does not fit the header")]
    LengthOverflow { length: u64 },

    /// The source ran dry before `expected` bytes were copied.
    #[error("short write: copied {written} of {expected} bytes")]
    ShortWrite { expected: u64, written: u64 },

    /// A close reason exceeded the accepted size.
    #[error("close reason of {length} bytes exceeds {MAX_REASON_BYTES}")]
    ReasonTooLong { length: u64 },

    /// The sender closed the channel.
    #[error("channel {channel} closed{}", render_reason(.reason.as_deref()))]
    Closed { channel: u8, reason: Option<String> },

    /// Underlying I/O failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PackerError {
    /// Returns `true` for a close frame without a reason.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Self::Closed { reason: None, .. })
    }
}

/// Header of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Logical stream the payload belongs to.
    pub channel: u8,
    /// Payload bytes following the header.
    pub length: u64,
}

/// Frames payloads for one magic/version pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packer {
    magic: [u8; 2],
    version: u16,
}

impl Packer {
    /// Creates a packer.
    #[must_use]
    pub const fn new(magic: [u8; 2], version: u16) -> Self {
        Self { magic, version }
    }

    /// Writes one data frame carrying exactly `length` bytes from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`PackerError::ShortWrite`] when `reader` ends early.
    pub fn send<W, R>(
        &self,
        channel: u8,
        writer: &mut W,
        reader: R,
        length: u64,
    ) -> Result<(), PackerError>
    where
        W: Write + ?Sized,
        R: Read,
    {
        self.frame(KIND_DATA, channel, writer, reader, length)
    }

    /// Copies `reader` to `writer` as data frames of at most `chunk` bytes,
    /// then closes the channel. Returns the number of payload bytes sent.
    ///
    /// Every frame is flushed once written, so a slow source never leaves a
    /// complete frame sitting in a buffered writer.
    ///
    /// A read failure closes the channel with the error text as reason.
    ///
    /// # Errors
    ///
    /// Returns the read failure or any write failure.
    pub fn stream<W, R>(
        &self,
        channel: u8,
        writer: &mut W,
        reader: &mut R,
        chunk: usize,
    ) -> Result<u64, PackerError>
    where
        W: Write + ?Sized,
        R: Read + ?Sized,
    {
        let mut buf = vec![0_u8; chunk.max(1)];
        let mut total = 0_u64;
        loop {
            let read = match reader.read(&mut buf) {
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    let reason = error.to_string();
                    if let Err(close_error) = self.send_close(channel, writer, Some(&reason)) {
                        debug!(error = %close_error, "failed to send close frame");
                    }
                    return Err(PackerError::Io(error));
                }
            };
            if read == 0 {
                self.send_close(channel, writer, None)?;
                writer.flush()?;
                return Ok(total);
            }
            let payload = buf.get(..read).unwrap_or_default();
            let length = payload.len() as u64;
            self.send(channel, writer, payload, length)?;
            writer.flush()?;
            total += length;
        }
    }

    /// Writes a close frame, optionally carrying a reason.
    ///
    /// # Errors
    ///
    /// Returns any write failure.
    pub fn send_close<W>(
        &self,
        channel: u8,
        writer: &mut W,
        reason: Option<&str>,
    ) -> Result<(), PackerError>
    where
        W: Write + ?Sized,
    {
        let reason = reason.unwrap_or_default().as_bytes();
        self.frame(KIND_CLOSE, channel, writer, reason, reason.len() as u64)
    }

    /// Reads one frame and copies a data payload into `writer`.
    ///
    /// Returns the channel and the number of bytes copied.
    ///
    /// # Errors
    ///
    /// A close frame surfaces as [`PackerError::Closed`]; header mismatches
    /// use their dedicated variants.
    pub fn recv<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(u8, u64), PackerError>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let header = self.next(reader)?;
        let copied = io::copy(&mut reader.take(header.length), writer)?;
        Ok((header.channel, copied))
    }

    /// Reads the next header, leaving a data payload unread.
    ///
    /// # Errors
    ///
    /// As for [`Packer::recv`].
    pub fn next<R>(&self, reader: &mut R) -> Result<Header, PackerError>
    where
        R: Read + ?Sized,
    {
        let mut magic = [0_u8; 2];
        reader.read_exact(&mut magic)?;
        if magic != self.magic {
            return Err(PackerError::WrongMagic { found: magic });
        }
        let version = reader.read_u16::<LittleEndian>()?;
        if version != self.version {
            return Err(PackerError::WrongVersion {
                expected: self.version,
                found: version,
            });
        }
        let kind = reader.read_u8()?;
        let length = reader.read_i64::<LittleEndian>()?;
        let channel = reader.read_u8()?;
        let length = u64::try_from(length).map_err(|_| PackerError::NegativeLength { length })?;

        match kind {
            KIND_DATA => Ok(Header { channel, length }),
            KIND_CLOSE => Err(PackerError::Closed {
                channel,
                reason: read_reason(reader, length)?,
            }),
            other => Err(PackerError::UnknownKind { kind: other }),
        }
    }

    fn frame<W, R>(
        &self,
        kind: u8,
        channel: u8,
        writer: &mut W,
        reader: R,
        length: u64,
    ) -> Result<(), PackerError>
    where
        W: Write + ?Sized,
        R: Read,
    {
        let encoded = i64::try_from(length).map_err(|_| PackerError::LengthOverflow { length })?;
        writer.write_all(&self.magic)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u8(kind)?;
        writer.write_i64::<LittleEndian>(encoded)?;
        writer.write_u8(channel)?;
        let written = io::copy(&mut reader.take(length), writer)?;
        if written != length {
            return Err(PackerError::ShortWrite {
                expected: length,
                written,
            });
        }
        Ok(())
    }
}

fn render_reason(reason: Option<&str>) -> String {
    reason.map(|reason| format!(": {reason}")).unwrap_or_default()
}

fn read_reason<R>(reader: &mut R, length: u64) -> Result<Option<String>, PackerError>
where
    R: Read + ?Sized,
{
    if length == 0 {
        return Ok(None);
    }
    if length > MAX_REASON_BYTES {
        return Err(PackerError::ReasonTooLong { length });
    }
    let mut bytes = Vec::new();
    reader.take(length).read_to_end(&mut bytes)?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn packer() -> Packer {
        Packer::new(*b"pw", 1)
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::other("disk on fire"));
            }
            self.served = true;
            let payload = b"partial";
            let count = payload.len().min(buf.len());
            for (slot, byte) in buf.iter_mut().zip(payload.iter().take(count)) {
                *slot = *byte;
            }
            Ok(count)
        }
    }

    #[rstest]
    fn interleaved_channels_are_demultiplexed(packer: Packer) {
        let mut wire = Vec::new();
        packer
            .send(0, &mut wire, &b"body-1"[..], 6)
            .expect("send body");
        packer
            .send(1, &mut wire, &b"trailer"[..], 7)
            .expect("send trailer");
        packer
            .send(0, &mut wire, &b"-2"[..], 2)
            .expect("send body");

        let mut reader = Cursor::new(wire);
        let mut body = Vec::new();
        let mut trailer = Vec::new();
        for _ in 0..3 {
            let header = packer.next(&mut reader).expect("header");
            let sink = if header.channel == 0 { &mut body } else { &mut trailer };
            io::copy(&mut (&mut reader).take(header.length), sink).expect("payload");
        }
        assert_eq!(body, b"body-1-2");
        assert_eq!(trailer, b"trailer");
    }

    #[rstest]
    fn stream_ends_with_clean_close(packer: Packer) {
        let mut wire = Vec::new();
        let mut source = Cursor::new(vec![7_u8; 10_000]);
        let sent = packer
            .stream(3, &mut wire, &mut source, 4096)
            .expect("stream");
        assert_eq!(sent, 10_000);

        let mut reader = Cursor::new(wire);
        let mut received = Vec::new();
        let error = loop {
            match packer.recv(&mut reader, &mut received) {
                Ok((channel, _)) => assert_eq!(channel, 3),
                Err(error) => break error,
            }
        };
        assert!(error.is_clean_close());
        assert_eq!(received.len(), 10_000);
    }

    #[rstest]
    fn failed_source_closes_with_reason(packer: Packer) {
        let mut wire = Vec::new();
        let mut source = FailingReader { served: false };
        let error = packer
            .stream(2, &mut wire, &mut source, 64)
            .expect_err("source fails");
        assert!(matches!(error, PackerError::Io(_)));

        let mut reader = Cursor::new(wire);
        let mut received = Vec::new();
        let (channel, copied) = packer.recv(&mut reader, &mut received).expect("data");
        assert_eq!((channel, copied), (2, 7));
        let closed = packer
            .recv(&mut reader, &mut received)
            .expect_err("close frame");
        assert!(matches!(
            closed,
            PackerError::Closed { channel: 2, reason: Some(ref reason) } if reason.contains("disk on fire")
        ));
    }

    #[rstest]
    fn short_source_is_reported(packer: Packer) {
        let mut wire = Vec::new();
        let error = packer
            .send(0, &mut wire, &b"abc"[..], 5)
            .expect_err("short");
        assert!(matches!(
            error,
            PackerError::ShortWrite {
                expected: 5,
                written: 3
            }
        ));
    }

    #[rstest]
    #[case::magic(Packer::new(*b"xx", 1))]
    #[case::version(Packer::new(*b"pw", 2))]
    fn mismatched_headers_are_rejected(packer: Packer, #[case] other: Packer) {
        let mut wire = Vec::new();
        packer.send(0, &mut wire, &b"hi"[..], 2).expect("send");
        let error = other.next(&mut Cursor::new(wire)).expect_err("mismatch");
        assert!(matches!(
            error,
            PackerError::WrongMagic { .. } | PackerError::WrongVersion { .. }
        ));
    }

    #[rstest]
    fn negative_length_is_rejected(packer: Packer) {
        let mut wire = Vec::new();
        wire.extend_from_slice(b"pw");
        wire.write_u16::<LittleEndian>(1).expect("version");
        wire.write_u8(KIND_DATA).expect("kind");
        wire.write_i64::<LittleEndian>(-4).expect("length");
        wire.write_u8(0).expect("channel");
        let error = packer.next(&mut Cursor::new(wire)).expect_err("negative");
        assert!(matches!(error, PackerError::NegativeLength { length: -4 }));
    }
}
