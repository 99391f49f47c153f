//! Response frames sent back by a dispatcher.

use std::io::{Read, Write};

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Body;
use super::errors::CodecError;
use super::frame::{FrameReader, trim_trailing_whitespace};

/// Reserved key carrying a remote failure.
pub const ERROR_KEY: &str = "error";

/// Result of a command: a map of fields, or a failure message.
///
/// On the wire a response is a flat JSON object. The presence of
/// [`ERROR_KEY`] marks the response as a failure regardless of its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    fields: Body,
    error: Option<String>,
}

impl Response {
    /// Creates an empty successful response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a response from a map, lifting any [`ERROR_KEY`] entry into the
    /// error slot.
    pub fn from_fields(mut fields: Body) -> Self {
        let error = fields.remove(ERROR_KEY).map(|value| render_error(&value));
        Self { fields, error }
    }

    /// Creates a failure response.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            fields: Body::new(),
            error: Some(message.into()),
        }
    }

    /// Adds a field, consuming and returning the response.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a field. Inserting [`ERROR_KEY`] marks the response failed.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if key == ERROR_KEY {
            self.error = Some(render_error(&value));
        } else {
            self.fields.insert(key, value);
        }
    }

    /// Looks up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Looks up a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// All non-error fields.
    pub fn fields(&self) -> &Body {
        &self.fields
    }

    /// Remote failure message, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns `true` when the response reports a failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Writes the response as one frame and flushes the writer.
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

    /// Reads and parses the next response frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Closed`] if the stream ends first, or
    /// [`CodecError::Malformed`] if the frame is not a JSON object.
    pub fn decode<R: Read>(reader: &mut FrameReader<R>, limit: usize) -> Result<Self, CodecError> {
        let frame = reader.read_frame(limit)?.ok_or(CodecError::Closed)?;
        Self::parse(&frame)
    }

    /// Parses a single frame into a response.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if the frame is empty or not a JSON
    /// object.
    pub fn parse(frame: &[u8]) -> Result<Self, CodecError> {
        let trimmed = trim_trailing_whitespace(frame);
        if trimmed.is_empty() {
            return Err(CodecError::malformed("empty response frame"));
        }
        serde_json::from_slice(trimmed).map_err(CodecError::from_json_error)
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.fields.len() + usize::from(self.error.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        if let Some(error) = &self.error {
            map.serialize_entry(ERROR_KEY, error)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Body::deserialize(deserializer).map(Self::from_fields)
    }
}

fn render_error(value: &Value) -> String {
    match value {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    }
}
