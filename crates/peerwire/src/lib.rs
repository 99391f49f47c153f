//! Peer-to-peer command/response streaming.
//!
//! A [`Client`] fans one named command out to many peers that serve a
//! protocol, discovering them on demand, and streams each peer's response
//! back as soon as it completes. On the serving side a [`Service`] maps
//! command names to handlers. A stream command answers its command and then
//! keeps the connection open as a raw duplex pipe.
//!
//! Connections carry newline-delimited JSON frames (see [`wire`]) over a
//! [`PeerTransport`]. [`MeshNode`] is the bundled transport: a TCP or Unix
//! socket listener with a small handshake, a peer store, and a peer exchange
//! protocol used for active discovery.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use peerwire::{
//!     Client, ClientSettings, MeshNode, NodeSettings, ProtocolId, Response, ServiceBuilder,
//! };
//! use peerwire_config::SocketEndpoint;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let protocol = ProtocolId::parse("/hello/1.0")?;
//! let server = MeshNode::start(NodeSettings::new(SocketEndpoint::tcp("127.0.0.1", 0)))?;
//! let _service = ServiceBuilder::new("hello", protocol.clone())
//!     .define("hi", |_, _, _| Ok(Response::new().with("message", "HI")))
//!     .start(server.clone())?;
//!
//! let node = MeshNode::start(NodeSettings::new(SocketEndpoint::tcp("127.0.0.1", 0)))?;
//! let peer = node.dial(server.listen_endpoint())?;
//! let client = Client::new(node, protocol, ClientSettings::default());
//! let response = client.send("hi", Default::default(), &[peer])?;
//! assert_eq!(response.get_str("message"), Some("HI"));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod discovery;
pub mod identity;
pub mod mesh;
pub mod packer;
pub mod scope;
pub mod service;
pub mod telemetry;
pub mod transport;
pub mod tunnel;
pub mod wire;

pub use client::{
    Client, ClientError, ClientSettings, PeerError, PeerResponse, Request, RequestOption,
    Responses,
};
pub use connection::{AbortHandle, Connection, Phase};
pub use discovery::{Discovery, DiscoveryError, DiscoverySettings, FeedEvent, FeedId, Snapshot};
pub use identity::{IdentityError, PeerAddrInfo, PeerId, ProtocolId};
pub use mesh::{EXCHANGE_PROTOCOL, MeshError, MeshNode, NodeSettings, PeerStore};
pub use packer::{Packer, PackerError};
pub use scope::Scope;
pub use service::{HandlerError, Service, ServiceBuilder, ServiceError, ServiceSettings};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{PeerTransport, ProtocolHandler, StreamHost, TransportError};
pub use tunnel::TunnelError;
pub use wire::{Body, CodecError, Command, Response};

#[cfg(test)]
mod tests;
