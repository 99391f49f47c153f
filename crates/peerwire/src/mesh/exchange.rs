//! Peer exchange: the built-in service nodes use to discover each other.
//!
//! Every node serves [`EXCHANGE_PROTOCOL`] with a single `find` command:
//!
//! ```json
//! {"command":"find","body":{"protocol":"/hello/1.0","limit":512}}
//! {"peers":[{"id":"…","addrs":[{"transport":"tcp","host":"127.0.0.1","port":9779}]}]}
//! ```

use std::io;
use std::sync::{Arc, Weak};

use serde_json::Value;
use thiserror::Error;

use peerwire_config::{DEFAULT_DISCOVERY_QUERY_LIMIT, DEFAULT_MAX_FRAME_BYTES};

use crate::connection::{Connection, deadline_after};
use crate::identity::{PeerAddrInfo, PeerId, ProtocolId};
use crate::service::{HandlerError, Service, ServiceBuilder, ServiceError};
use crate::transport::{StreamHost, TransportError};
use crate::wire::{Body, CodecError, Command, Response};

use super::node::NodeInner;

/// Protocol identifier of the peer exchange service.
pub const EXCHANGE_PROTOCOL: &str = "/peerwire/exchange/1.0";

const FIND_COMMAND: &str = "find";
const PEERS_FIELD: &str = "peers";

pub(crate) fn exchange_protocol() -> ProtocolId {
    ProtocolId::from_static(EXCHANGE_PROTOCOL)
}

/// Failures of a single exchange query. Only logged; a failing neighbour is
/// skipped.
#[derive(Debug, Error)]
pub(crate) enum ExchangeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("deadline setup failed: {0}")]
    Io(#[from] io::Error),
    #[error("neighbour rejected query: {message}")]
    Remote { message: String },
    #[error("malformed peer list: {0}")]
    Payload(#[source] serde_json::Error),
}

struct FindRequest {
    protocol: ProtocolId,
    limit: usize,
}

impl FindRequest {
    fn from_body(body: &Body) -> Result<Self, HandlerError> {
        let protocol = body
            .get("protocol")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::missing_field("protocol"))?;
        let protocol = ProtocolId::parse(protocol)
            .map_err(|error| HandlerError::invalid_field("protocol", error.to_string()))?;
        let limit = match body.get("limit") {
            None => DEFAULT_DISCOVERY_QUERY_LIMIT,
            Some(value) => value
                .as_u64()
                .and_then(|limit| usize::try_from(limit).ok())
                .ok_or_else(|| HandlerError::invalid_field("limit", "expected a count"))?,
        };
        Ok(Self { protocol, limit })
    }

    fn into_body(self) -> Body {
        Body::from([
            ("protocol".to_owned(), Value::from(self.protocol.as_str())),
            ("limit".to_owned(), Value::from(self.limit)),
        ])
    }
}

/// Registers the exchange service on `node`.
pub(crate) fn serve(node: &Arc<NodeInner>) -> Result<Service, ServiceError> {
    let weak: Weak<NodeInner> = Arc::downgrade(node);
    let host: Arc<dyn StreamHost> = Arc::clone(node) as Arc<dyn StreamHost>;
    ServiceBuilder::new("exchange", exchange_protocol())
        .define(FIND_COMMAND, move |_, connection, body| {
            let node = weak
                .upgrade()
                .ok_or_else(|| HandlerError::new("node is shutting down"))?;
            let request = FindRequest::from_body(body)?;
            let peers = node.peers_for(&request.protocol, connection.peer(), request.limit);
            let peers = serde_json::to_value(peers)
                .map_err(|error| HandlerError::new(error.to_string()))?;
            Ok(Response::new().with(PEERS_FIELD, peers))
        })
        .start(host)
}

/// Asks `neighbour` for peers serving `protocol`.
pub(crate) fn query(
    node: &NodeInner,
    neighbour: &PeerId,
    protocol: &ProtocolId,
    limit: usize,
) -> Result<Vec<PeerAddrInfo>, ExchangeError> {
    let mut connection = Connection::open(node, neighbour, &exchange_protocol())?;
    let deadline = deadline_after(node.handshake_timeout());
    connection.set_write_deadline(deadline)?;
    connection.set_read_deadline(deadline)?;

    let request = FindRequest {
        protocol: protocol.clone(),
        limit,
    };
    connection.write_command(&Command::new(FIND_COMMAND, request.into_body()))?;
    let response = connection.read_response(DEFAULT_MAX_FRAME_BYTES)?;
    if let Some(message) = response.error() {
        return Err(ExchangeError::Remote {
            message: message.to_owned(),
        });
    }
    let peers = response.get(PEERS_FIELD).cloned().unwrap_or(Value::Null);
    if peers.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(peers).map_err(ExchangeError::Payload)
}
