//! Newline-delimited framing that never loses read-ahead bytes.
//!
//! Frames are read in chunks for efficiency, so a single `read` may pull in
//! bytes that belong to whatever follows the frame: the next frame, or raw
//! payload once a stream command upgrades the connection. Those bytes stay in
//! the reader's buffer and are served first by its [`Read`] implementation.

use std::io::{self, Read};

use super::errors::CodecError;

const FRAME_DELIMITER: u8 = b'\n';
const CHUNK_BYTES: usize = 8 * 1024;

/// Reader that splits newline-delimited frames off an inner stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffered: Vec<u8>,
}

impl<R> FrameReader<R> {
    /// Wraps a stream with an empty read-ahead buffer.
    pub fn new(inner: R) -> Self {
        Self::with_buffered(inner, Vec::new())
    }

    /// Wraps a stream whose first bytes were already read elsewhere.
    pub fn with_buffered(inner: R, buffered: Vec<u8>) -> Self {
        Self { inner, buffered }
    }

    /// Bytes read from the stream but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    /// Shared access to the inner stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutable access to the inner stream. Reading from it directly skips any
    /// buffered bytes.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Splits the reader into the inner stream and unconsumed bytes.
    pub fn into_parts(self) -> (R, Vec<u8>) {
        (self.inner, self.buffered)
    }
}

impl<R: Read> FrameReader<R> {
    /// Reads the next frame, without its delimiter.
    ///
    /// Returns `Ok(None)` when the stream ends before any byte of a new frame.
    /// A final frame missing its delimiter is returned as-is when the stream
    /// ends.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::FrameTooLarge`] once the pending frame exceeds
    /// `limit` bytes, or [`CodecError::Io`] when reading fails.
    pub fn read_frame(&mut self, limit: usize) -> Result<Option<Vec<u8>>, CodecError> {
        let mut scanned = 0;
        loop {
            if let Some(offset) = self
                .buffered
                .get(scanned..)
                .and_then(|rest| rest.iter().position(|byte| *byte == FRAME_DELIMITER))
            {
                let end = scanned + offset;
                enforce_limit(end, limit)?;
                let rest = self.buffered.split_off(end + 1);
                let mut frame = std::mem::replace(&mut self.buffered, rest);
                frame.truncate(end);
                return Ok(Some(frame));
            }

            scanned = self.buffered.len();
            enforce_limit(scanned, limit)?;

            let mut chunk = [0_u8; CHUNK_BYTES];
            let read = read_with_retry(&mut self.inner, &mut chunk)?;
            if read == 0 {
                return Ok(if self.buffered.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut self.buffered))
                });
            }
            self.buffered
                .extend_from_slice(chunk.get(..read).unwrap_or_default());
        }
    }
}

impl<R: Read> Read for FrameReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffered.is_empty() {
            return self.inner.read(buf);
        }
        let count = buf.len().min(self.buffered.len());
        for (slot, byte) in buf.iter_mut().zip(self.buffered.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

/// Reads from the stream, retrying on interrupts.
fn read_with_retry<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
}

fn enforce_limit(size: usize, limit: usize) -> Result<(), CodecError> {
    if size > limit {
        return Err(CodecError::frame_too_large(size, limit));
    }
    Ok(())
}

/// Trims trailing ASCII whitespace (such as a `\r` before the delimiter).
pub(crate) fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    bytes.get(..end).unwrap_or_default()
}
