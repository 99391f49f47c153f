//! Wire codec for commands and responses.
//!
//! Every message is a single JSON object terminated by `\n`. JSON string
//! escaping guarantees the delimiter never appears inside a frame, so a
//! reader can find frame boundaries without a length prefix. Once a stream
//! command has been answered, the same connection carries unframed bytes;
//! [`FrameReader`] keeps anything it read past the last frame so those bytes
//! reach the raw consumer intact.
//!
//! ```json
//! {"command":"echo","body":{"message":"back"}}
//! {"message":"back"}
//! {"error":"command not found: notExist"}
//! ```

mod command;
mod errors;
mod frame;
mod response;

use std::collections::BTreeMap;

use serde_json::Value;

pub use self::command::Command;
pub use self::errors::CodecError;
pub use self::frame::FrameReader;
pub use self::response::{ERROR_KEY, Response};

/// Ordered key/value arguments carried by commands and responses.
pub type Body = BTreeMap<String, Value>;
