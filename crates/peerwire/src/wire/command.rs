//! Command frames sent from a client to a dispatcher.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use super::Body;
use super::errors::CodecError;
use super::frame::{FrameReader, trim_trailing_whitespace};

/// A named operation and its arguments.
///
/// Serialised as `{"command":"<name>","body":{...}}` on a single line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "command")]
    name: String,
    #[serde(default)]
    body: Body,
}

impl Command {
    /// Builds a command.
    pub fn new(name: impl Into<String>, body: Body) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    /// Command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command arguments.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Splits the command into its name and body.
    pub fn into_parts(self) -> (String, Body) {
        (self.name, self.body)
    }

    /// Writes the command as one frame and flushes the writer.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        let mut frame = serde_json::to_vec(self).map_err(CodecError::Serialize)?;
        frame.push(b'\n');
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads and parses the next command frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Closed`] if the stream ends first, or the parse
    /// errors documented on [`Command::parse`].
    pub fn decode<R: Read>(reader: &mut FrameReader<R>, limit: usize) -> Result<Self, CodecError> {
        let frame = reader.read_frame(limit)?.ok_or(CodecError::Closed)?;
        Self::parse(&frame)
    }

    /// Parses a single frame into a command.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] for empty or non-JSON frames and
    /// [`CodecError::InvalidCommand`] when the name is blank.
    pub fn parse(frame: &[u8]) -> Result<Self, CodecError> {
        let trimmed = trim_trailing_whitespace(frame);
        if trimmed.is_empty() {
            return Err(CodecError::malformed("empty command frame"));
        }
        let command: Self = serde_json::from_slice(trimmed).map_err(CodecError::from_json_error)?;
        if command.name.trim().is_empty() {
            return Err(CodecError::invalid_command("command name is empty"));
        }
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn body(pairs: &[(&str, serde_json::Value)]) -> Body {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn encodes_single_terminated_line() {
        let mut output = Vec::new();
        Command::new("hi", Body::new())
            .encode(&mut output)
            .expect("encode");
        assert_eq!(output, b"{\"command\":\"hi\",\"body\":{}}\n");
    }

    #[test]
    fn decodes_what_it_encodes() {
        let command = Command::new("echo", body(&[("message", json!("back")), ("n", json!(3))]));
        let mut output = Vec::new();
        command.encode(&mut output).expect("encode");

        let mut reader = FrameReader::new(Cursor::new(output));
        let decoded = Command::decode(&mut reader, 1024).expect("decode");
        assert_eq!(decoded, command);
    }

    #[rstest]
    #[case::empty_body(Body::new())]
    #[case::body_over_a_megabyte(body(&[("payload", json!("x".repeat(1_200_000)))]))]
    fn survives_the_wire(#[case] payload: Body) {
        let command = Command::new("upload", payload);
        let mut output = Vec::new();
        command.encode(&mut output).expect("encode");

        let mut reader = FrameReader::new(Cursor::new(output));
        let decoded = Command::decode(&mut reader, 2 * 1024 * 1024).expect("decode");
        assert_eq!(decoded, command);
        assert!(matches!(
            Command::decode(&mut reader, 2 * 1024 * 1024),
            Err(CodecError::Closed)
        ));
    }

    #[test]
    fn missing_body_defaults_to_empty() {
        let command = Command::parse(br#"{"command":"hi"}"#).expect("parse");
        assert!(command.body().is_empty());
    }

    #[test]
    fn rejects_blank_names() {
        let result = Command::parse(br#"{"command":"  "}"#);
        assert!(matches!(result, Err(CodecError::InvalidCommand { .. })));
    }

    #[test]
    fn rejects_invalid_json() {
        let result = Command::parse(b"not json");
        assert!(matches!(result, Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn reports_closed_stream() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        let result = Command::decode(&mut reader, 1024);
        assert!(matches!(result, Err(CodecError::Closed)));
    }
}
