//! Frames exchanged when a stream is opened between two nodes.
//!
//! The dialer sends a [`Hello`] naming the protocol it wants; the listener
//! answers with a [`Welcome`] saying whether it accepted. A `Hello` without a
//! protocol only exchanges identities.

use std::io::{Read, Write};

use peerwire_config::SocketEndpoint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::identity::{PeerId, ProtocolId};
use crate::wire::{CodecError, FrameReader};

/// Upper bound on handshake frame size.
pub(crate) const HANDSHAKE_FRAME_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Hello {
    pub(crate) peer: PeerId,
    pub(crate) listen: SocketEndpoint,
    #[serde(default)]
    pub(crate) protocols: Vec<ProtocolId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) protocol: Option<ProtocolId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Welcome {
    pub(crate) peer: PeerId,
    pub(crate) listen: SocketEndpoint,
    #[serde(default)]
    pub(crate) protocols: Vec<ProtocolId>,
    pub(crate) accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<String>,
}

pub(crate) fn send<T: Serialize, W: Write>(value: &T, writer: &mut W) -> Result<(), CodecError> {
    let mut frame = serde_json::to_vec(value).map_err(CodecError::Serialize)?;
    frame.push(b'\n');
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

pub(crate) fn receive<T: DeserializeOwned, R: Read>(
    reader: &mut FrameReader<R>,
) -> Result<T, CodecError> {
    let frame = reader
        .read_frame(HANDSHAKE_FRAME_LIMIT)?
        .ok_or(CodecError::Closed)?;
    serde_json::from_slice(&frame).map_err(CodecError::from_json_error)
}
