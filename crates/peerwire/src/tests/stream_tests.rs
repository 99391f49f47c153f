//! End-to-end tests for stream commands, bodies, deadlines and teardown.

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use crate::client::{Client, ClientError, ClientSettings, PeerError, PeerResponse};
use crate::identity::ProtocolId;
use crate::mesh::MeshNode;
use crate::service::{Service, ServiceBuilder, ServiceSettings};
use crate::transport::TransportError;
use crate::wire::{Body, Response};

use super::support::{client_for, hello, serve_hello, start_node, wait_until};

struct Pair {
    server: Arc<MeshNode>,
    service: Service,
    caller: Arc<MeshNode>,
    client: Client,
}

impl Pair {
    fn open(&self, command: &str) -> PeerResponse {
        let responses = self
            .client
            .build(command)
            .to([self.server.peer_id().clone()])
            .execute()
            .expect("execute");
        responses.recv().expect("one result")
    }
}

impl Drop for Pair {
    fn drop(&mut self) {
        self.client.close();
        self.service.stop();
        self.server.shutdown();
        self.caller.shutdown();
    }
}

#[fixture]
fn pair() -> Pair {
    let server = start_node("stream-server");
    let service = serve_hello(&server);
    let caller = start_node("stream-caller");
    caller
        .dial(server.listen_endpoint())
        .expect("dial server");
    let client = client_for(&caller);
    Pair {
        server,
        service,
        caller,
        client,
    }
}

#[rstest]
fn echo_mirrors_large_payload_until_write_half_closes(pair: Pair) {
    let mut stream = pair.open("echo");
    assert!(stream.is_ok(), "echo failed: {:?}", stream.error());
    assert_eq!(stream.get("ready"), Some(&Value::Bool(true)));

    let chunk = (0..64 * 1024)
        .map(|index| u8::try_from(index % 251).expect("fits in a byte"))
        .collect::<Vec<_>>();
    let mut echoed = vec![0_u8; chunk.len()];
    let mut total = 0_usize;
    while total < 3 * 512 * 1024 {
        stream.write_all(&chunk).expect("write chunk");
        stream.read_exact(&mut echoed).expect("read echo");
        assert_eq!(echoed, chunk);
        total += chunk.len();
    }

    stream.close_write().expect("close write half");
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).expect("read to eof");
    assert!(rest.is_empty());
}

#[rstest]
fn body_fields_reach_the_handler(pair: Pair) {
    let mut body = Body::new();
    body.insert("name".to_owned(), json!("ada"));
    let response = pair
        .client
        .send("greet", body, &[pair.server.peer_id().clone()])
        .expect("greet");
    assert_eq!(response.get_str("message"), Some("hello ada"));
}

#[rstest]
fn stalled_peer_is_reported_at_the_deadline(pair: Pair) {
    let started = Instant::now();
    let responses = pair
        .client
        .build("stall")
        .to([pair.server.peer_id().clone()])
        .with_timeout(Duration::from_millis(200))
        .execute()
        .expect("execute");
    let results = responses.collect::<Vec<_>>();
    assert_eq!(results.len(), 1);
    let result = results.first().expect("one result");
    assert_eq!(result.peer(), pair.server.peer_id());
    assert!(
        matches!(result.error(), Some(PeerError::DeadlineExceeded)),
        "unexpected result: {:?}",
        result.error()
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
}

#[rstest]
fn transport_shutdown_ends_the_request_promptly(pair: Pair) {
    let started = Instant::now();
    let responses = pair
        .client
        .build("stall")
        .to([pair.server.peer_id().clone()])
        .with_timeout(Duration::from_secs(10))
        .execute()
        .expect("execute");
    let caller = Arc::clone(&pair.caller);
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        caller.shutdown();
    });

    let results = responses.collect::<Vec<_>>();
    stopper.join().expect("shutdown thread");
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results.first().and_then(PeerResponse::error),
        Some(PeerError::Unreachable(TransportError::Closed) | PeerError::Cancelled)
    ));

    let error = pair
        .client
        .build("hi")
        .to([pair.server.peer_id().clone()])
        .execute()
        .expect_err("transport closed");
    assert!(matches!(error, ClientError::TransportClosed));
}

#[rstest]
fn server_writes_after_client_closes_its_write_half(pair: Pair) {
    let mut stream = pair.open("tally");
    assert!(stream.is_ok(), "tally failed: {:?}", stream.error());
    stream.write_all(&[7_u8; 4096]).expect("write payload");
    stream.close_write().expect("close write half");

    let mut reply = String::new();
    stream.read_to_string(&mut reply).expect("read reply");
    assert_eq!(reply, "4096\n");
}

#[test]
fn unbounded_command_timeout_still_serves() {
    let server = start_node("unbounded-server");
    let service = ServiceBuilder::new("hello", hello())
        .settings(ServiceSettings {
            command_timeout: Duration::MAX,
            ..ServiceSettings::default()
        })
        .define("hi", |_, _, _| Ok(Response::new().with("message", "HI")))
        .start(server.clone())
        .expect("start service");
    let caller = start_node("unbounded-caller");
    caller.dial(server.listen_endpoint()).expect("dial server");
    let client = client_for(&caller);

    let response = client
        .send("hi", Body::new(), &[server.peer_id().clone()])
        .expect("hi");
    assert_eq!(response.get_str("message"), Some("HI"));

    client.close();
    service.stop();
    caller.shutdown();
    server.shutdown();
}

#[rstest]
fn stopping_the_service_resets_open_streams(pair: Pair) {
    let stream = pair.open("echo");
    assert!(stream.is_ok());
    assert!(wait_until(Duration::from_secs(2), || {
        pair.service.scope().tracked() == 1
    }));

    pair.service.stop();
    let mut connection = stream.into_connection().expect("stream connection");
    connection
        .set_read_deadline(Some(Instant::now() + Duration::from_secs(2)))
        .expect("read deadline");
    let mut buf = [0_u8; 8];
    assert!(matches!(connection.read(&mut buf), Ok(0) | Err(_)));
}

#[rstest]
fn closing_the_client_aborts_owned_streams(pair: Pair) {
    let mut stream = pair.open("echo");
    assert!(stream.is_ok());
    pair.client.close();

    let mut buf = [0_u8; 8];
    assert!(matches!(stream.read(&mut buf), Ok(0) | Err(_)));
    assert!(pair.client.build("hi").execute().is_err());
}

#[rstest]
fn unserved_protocol_is_reported_per_peer(pair: Pair) {
    let other = Client::new(
        pair.caller.clone(),
        ProtocolId::parse("/missing/1.0").expect("protocol"),
        ClientSettings::default(),
    );
    let result = other
        .build("hi")
        .to([pair.server.peer_id().clone()])
        .execute()
        .expect("execute")
        .recv()
        .expect("one result");
    assert!(matches!(
        result.error(),
        Some(PeerError::Unreachable(TransportError::ProtocolNotSupported { .. }))
    ));
    other.close();
}
