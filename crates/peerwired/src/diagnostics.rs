//! Diagnostics protocol served by every daemon.
//!
//! * `ping` answers with the node identity and the size of its peer store.
//! * `echo` is a stream command: after the acknowledgement it mirrors raw
//!   bytes until the caller closes its write half.

use std::io::{Read, Write};
use std::sync::Arc;

use peerwire::{
    Connection, MeshNode, ProtocolId, Response, Service, ServiceBuilder, ServiceError,
    ServiceSettings,
};

/// Protocol identifier of the diagnostics service.
pub const DIAG_PROTOCOL: &str = "/peerwire/diag/1.0";

const ECHO_BUFFER_BYTES: usize = 32 * 1024;

/// [`DIAG_PROTOCOL`] as a [`ProtocolId`].
#[must_use]
pub fn diag_protocol() -> ProtocolId {
    ProtocolId::from_static(DIAG_PROTOCOL)
}

pub(crate) fn serve(node: &Arc<MeshNode>, settings: ServiceSettings) -> Result<Service, ServiceError> {
    let identity = Arc::downgrade(node);
    ServiceBuilder::new("diagnostics", diag_protocol())
        .settings(settings)
        .define("ping", move |_, _, _| {
            let mut response = Response::new().with("pong", true);
            if let Some(node) = identity.upgrade() {
                response.insert("peer", node.peer_id().as_str());
                response.insert("known_peers", node.peerstore().len());
            }
            Ok(response)
        })
        .define_stream("echo", |_, _, _| Ok(Response::new()), |_, connection| mirror(connection))
        .start(Arc::<MeshNode>::clone(node))
}

fn mirror(connection: &mut Connection) {
    let mut buf = vec![0_u8; ECHO_BUFFER_BYTES];
    loop {
        let read = match connection.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(read) => read,
        };
        let chunk = buf.get(..read).unwrap_or_default();
        if connection.write_all(chunk).is_err() {
            return;
        }
    }
}
