//! Harness shared by the end-to-end suites.

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use peerwire_config::SocketEndpoint;
use serde_json::Value;

use crate::client::{Client, ClientSettings};
use crate::connection::Connection;
use crate::identity::{PeerId, ProtocolId};
use crate::mesh::{MeshNode, NodeSettings};
use crate::service::{HandlerError, Service, ServiceBuilder};
use crate::wire::Response;

pub(crate) fn hello() -> ProtocolId {
    ProtocolId::parse("/hello/1.0").expect("valid protocol")
}

/// Starts a loopback node with an identity derived from `name`.
pub(crate) fn start_node(name: &str) -> Arc<MeshNode> {
    let settings = NodeSettings::new(SocketEndpoint::tcp("127.0.0.1", 0))
        .with_peer_id(PeerId::derive(name));
    MeshNode::start(settings).expect("start mesh node")
}

/// Registers the hello service used throughout the suites.
///
/// * `hi` answers `{"message": "HI"}`.
/// * `greet` requires a `name` field.
/// * `stall` blocks until the service stops.
/// * `echo` acknowledges, then mirrors raw bytes until the caller closes its
///   write half.
/// * `tally` reads until the caller closes its write half, then writes the
///   number of bytes it saw.
pub(crate) fn serve_hello(node: &Arc<MeshNode>) -> Service {
    ServiceBuilder::new("hello", hello())
        .define("hi", |_, _, _| Ok(Response::new().with("message", "HI")))
        .define("greet", |_, _, body| {
            let name = body
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::missing_field("name"))?;
            Ok(Response::new().with("message", format!("hello {name}")))
        })
        .define("stall", |scope, _, _| {
            while !scope.is_cancelled() {
                thread::sleep(Duration::from_millis(10));
            }
            Ok(Response::new())
        })
        .define_stream(
            "echo",
            |_, _, _| Ok(Response::new().with("ready", true)),
            |_, connection| mirror(connection),
        )
        .define_stream(
            "tally",
            |_, _, _| Ok(Response::new()),
            |_, connection| tally(connection),
        )
        .start(node.clone())
        .expect("start hello service")
}

fn mirror(connection: &mut Connection) {
    let mut buf = [0_u8; 16 * 1024];
    loop {
        let read = match connection.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        let chunk = buf.get(..read).unwrap_or_default();
        if connection.write_all(chunk).is_err() {
            break;
        }
    }
}

fn tally(connection: &mut Connection) {
    let mut received = Vec::new();
    if connection.read_to_end(&mut received).is_err() {
        return;
    }
    let reply = format!("{}\n", received.len());
    if let Err(error) = connection.write_all(reply.as_bytes()) {
        tracing::debug!(error = %error, "tally reply failed");
    }
}

/// Client on `node` speaking the hello protocol.
pub(crate) fn client_for(node: &Arc<MeshNode>) -> Client {
    let settings = ClientSettings {
        default_timeout: Duration::from_secs(5),
        ..ClientSettings::default()
    };
    Client::new(node.clone(), hello(), settings)
}

/// Polls `condition` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
