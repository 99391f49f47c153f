//! Behavioural tests for daemon bootstrap, diagnostics and shutdown.

use std::cell::RefCell;
use std::sync::Arc;

use peerwire::{Body, Client, ClientSettings, MeshNode, NodeSettings};
use peerwire_config::SocketEndpoint;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, bootstrap_with};
use crate::diagnostics::diag_protocol;

use super::support::{
    FailingConfigLoader, HealthEvent, ImmediateShutdown, RecordingHealthReporter,
    TempSocketLoader,
};

const UNREACHABLE: u16 = 1;

struct DaemonWorld {
    loader: Option<Box<dyn ConfigLoader>>,
    reporter: Arc<RecordingHealthReporter>,
    daemon: Option<Daemon>,
    node: Option<Arc<MeshNode>>,
    error: Option<BootstrapError>,
}

impl DaemonWorld {
    fn new() -> Self {
        Self {
            loader: None,
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemon: None,
            node: None,
            error: None,
        }
    }

    fn daemon(&self) -> &Daemon {
        self.daemon.as_ref().expect("daemon bootstrapped")
    }
}

impl Drop for DaemonWorld {
    fn drop(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            daemon.shutdown(None);
        }
    }
}

#[fixture]
fn world() -> RefCell<DaemonWorld> {
    RefCell::new(DaemonWorld::new())
}

#[given("a daemon configuration on a temporary socket")]
fn given_temp_socket(world: &RefCell<DaemonWorld>) {
    world.borrow_mut().loader = Some(Box::new(TempSocketLoader::new(Vec::new())));
}

#[given("a daemon configuration with an unreachable bootstrap peer")]
fn given_unreachable_peer(world: &RefCell<DaemonWorld>) {
    let peers = vec![SocketEndpoint::tcp("127.0.0.1", UNREACHABLE)];
    world.borrow_mut().loader = Some(Box::new(TempSocketLoader::new(peers)));
}

#[given("an invalid daemon configuration")]
fn given_invalid_config(world: &RefCell<DaemonWorld>) {
    world.borrow_mut().loader = Some(Box::new(FailingConfigLoader));
}

#[when("the daemon bootstraps")]
fn when_bootstraps(world: &RefCell<DaemonWorld>) {
    let mut world = world.borrow_mut();
    let loader = world.loader.take().expect("loader configured");
    match bootstrap_with(loader.as_ref(), world.reporter.clone()) {
        Ok(daemon) => {
            world.node = Some(Arc::clone(daemon.node()));
            world.daemon = Some(daemon);
        }
        Err(error) => world.error = Some(error),
    }
    world.loader = Some(loader);
}

#[when("the daemon receives signal {signal}")]
fn when_signal(world: &RefCell<DaemonWorld>, signal: i32) {
    let daemon = world.borrow_mut().daemon.take().expect("daemon bootstrapped");
    daemon
        .run(&ImmediateShutdown(Some(signal)))
        .expect("run until signal");
}

#[then("bootstrap succeeds")]
fn then_succeeds(world: &RefCell<DaemonWorld>) {
    let world = world.borrow();
    assert!(world.error.is_none(), "bootstrap failed: {:?}", world.error);
    let events = world.reporter.events();
    assert_eq!(events.first(), Some(&HealthEvent::BootstrapStarting));
    assert_eq!(events.last(), Some(&HealthEvent::BootstrapSucceeded));
}

#[then("a peer can ping the daemon")]
fn then_ping(world: &RefCell<DaemonWorld>) {
    let world = world.borrow();
    let daemon = world.daemon();
    let caller = MeshNode::start(NodeSettings::new(SocketEndpoint::tcp("127.0.0.1", 0)))
        .expect("start caller");
    let peer = caller
        .dial(daemon.node().listen_endpoint())
        .expect("dial daemon");
    assert_eq!(&peer, daemon.node().peer_id());

    let client = Client::new(caller.clone(), diag_protocol(), ClientSettings::default());
    let response = client.send("ping", Body::new(), &[peer]).expect("ping");
    assert_eq!(response.get("pong"), Some(&serde_json::Value::Bool(true)));
    assert_eq!(
        response.get_str("peer"),
        Some(daemon.node().peer_id().as_str())
    );
    client.close();
    caller.shutdown();
}

#[then("bootstrap fails with a configuration error")]
fn then_config_error(world: &RefCell<DaemonWorld>) {
    let world = world.borrow();
    assert!(matches!(
        world.error,
        Some(BootstrapError::Configuration { .. })
    ));
    assert!(matches!(
        world.reporter.events().last(),
        Some(HealthEvent::BootstrapFailed(_))
    ));
}

#[then("the unreachable bootstrap peer is reported")]
fn then_peer_reported(world: &RefCell<DaemonWorld>) {
    let events = world.borrow().reporter.events();
    assert!(events.contains(&HealthEvent::PeerFailed(SocketEndpoint::tcp(
        "127.0.0.1",
        UNREACHABLE
    ))));
}

#[then("shutdown is reported for signal {signal}")]
fn then_shutdown_reported(world: &RefCell<DaemonWorld>, signal: i32) {
    let events = world.borrow().reporter.events();
    let tail = events.iter().rev().take(2).rev().cloned().collect::<Vec<_>>();
    assert_eq!(
        tail,
        [
            HealthEvent::ShutdownStarted(Some(signal)),
            HealthEvent::ShutdownCompleted
        ]
    );
}

#[then("the daemon node is closed")]
fn then_node_closed(world: &RefCell<DaemonWorld>) {
    let world = world.borrow();
    assert!(world.node.as_ref().is_some_and(|node| node.is_closed()));
}

#[scenario(path = "tests/features/daemon_lifecycle.feature")]
fn daemon_lifecycle(#[from(world)] world: RefCell<DaemonWorld>) {
    drop(world);
}
