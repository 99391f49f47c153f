//! Behavioural tests for discovery through the peer store and peer exchange.

use std::cell::RefCell;
use std::sync::Arc;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::client::{Client, ClientError};
use crate::mesh::MeshNode;
use crate::service::Service;
use crate::transport::PeerTransport;
use crate::wire::{Body, Response};

use super::support::{client_for, serve_hello, start_node};

struct DiscoveryWorld {
    caller: Arc<MeshNode>,
    client: Client,
    server: Option<(Arc<MeshNode>, Service)>,
    relay: Option<Arc<MeshNode>>,
    sent: Option<Result<Response, ClientError>>,
}

impl DiscoveryWorld {
    fn new() -> Self {
        let caller = start_node("discovery-caller");
        let client = client_for(&caller);
        Self {
            caller,
            client,
            server: None,
            relay: None,
            sent: None,
        }
    }

    fn server(&self) -> &Arc<MeshNode> {
        &self.server.as_ref().expect("serving node started").0
    }
}

impl Drop for DiscoveryWorld {
    fn drop(&mut self) {
        self.client.close();
        if let Some((node, service)) = self.server.take() {
            service.stop();
            node.shutdown();
        }
        if let Some(relay) = self.relay.take() {
            relay.shutdown();
        }
        self.caller.shutdown();
    }
}

#[fixture]
fn world() -> RefCell<DiscoveryWorld> {
    RefCell::new(DiscoveryWorld::new())
}

#[given("a node serving the hello protocol")]
fn given_server(world: &RefCell<DiscoveryWorld>) {
    let node = start_node("discovery-server");
    let service = serve_hello(&node);
    world.borrow_mut().server = Some((node, service));
}

#[given("a relay node that has been dialled by the serving node")]
fn given_relay(world: &RefCell<DiscoveryWorld>) {
    let relay = start_node("discovery-relay");
    world
        .borrow()
        .server()
        .dial(relay.listen_endpoint())
        .expect("server dials relay");
    world.borrow_mut().relay = Some(relay);
}

#[given("the caller has dialled the serving node")]
fn given_caller_knows_server(world: &RefCell<DiscoveryWorld>) {
    let world = world.borrow();
    world
        .caller
        .dial(world.server().listen_endpoint())
        .expect("caller dials server");
}

#[given("the caller has dialled the relay node")]
fn given_caller_knows_relay(world: &RefCell<DiscoveryWorld>) {
    let world = world.borrow();
    let relay = world.relay.as_ref().expect("relay started");
    world
        .caller
        .dial(relay.listen_endpoint())
        .expect("caller dials relay");
    assert!(world.caller.addresses(world.server().peer_id()).is_empty());
}

#[when("the caller sends \"{command}\" without targets")]
fn when_sends(world: &RefCell<DiscoveryWorld>, command: String) {
    let sent = world.borrow().client.send(command, Body::new(), &[]);
    world.borrow_mut().sent = Some(sent);
}

#[then("the answer comes from the serving node")]
fn then_answer(world: &RefCell<DiscoveryWorld>) {
    let world = world.borrow();
    match world.sent.as_ref() {
        Some(Ok(response)) => assert_eq!(response.get_str("message"), Some("HI")),
        other => panic!("expected an answer, got {other:?}"),
    }
}

#[then("the caller has learned the serving node's address")]
fn then_learned(world: &RefCell<DiscoveryWorld>) {
    let world = world.borrow();
    let addrs = world.caller.addresses(world.server().peer_id());
    assert!(addrs.contains(world.server().listen_endpoint()));
}

#[scenario(path = "tests/features/peer_discovery.feature")]
fn peer_discovery(#[from(world)] world: RefCell<DiscoveryWorld>) {
    drop(world);
}
