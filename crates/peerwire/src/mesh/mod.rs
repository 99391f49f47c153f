//! Socket-backed reference transport.
//!
//! A [`MeshNode`] listens on a TCP or Unix endpoint, negotiates a protocol on
//! every stream with a one-line handshake, and keeps a [`PeerStore`] of the
//! peers it has met. Nodes find each other through the built-in peer
//! exchange service on [`EXCHANGE_PROTOCOL`].

mod exchange;
mod handshake;
mod node;
mod peerstore;
mod settings;

pub use self::exchange::EXCHANGE_PROTOCOL;
pub use self::node::{MeshError, MeshNode};
pub use self::peerstore::{PeerRecord, PeerStore};
pub use self::settings::NodeSettings;

const MESH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::mesh");
