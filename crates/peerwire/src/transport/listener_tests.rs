//! Tests for the socket listener.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use rstest::{fixture, rstest};

use peerwire_config::SocketEndpoint;

use super::{
    ConnectionHandler, ConnectionStream, HandOffHandler, ListenerError, ListenerHandle,
    SocketListener,
};

const ACCEPT_WAIT: Duration = Duration::from_secs(2);

fn start(endpoint: &SocketEndpoint) -> (Receiver<ConnectionStream>, ListenerHandle) {
    let listener = SocketListener::bind(endpoint).expect("bind listener");
    let (accepted, handler) = HandOffHandler::new();
    let handler: Arc<dyn ConnectionHandler> = Arc::new(handler);
    let handle = listener.start(handler).expect("start listener");
    (accepted, handle)
}

#[test]
fn port_zero_is_replaced_by_the_assigned_port() {
    let listener =
        SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind tcp listener");
    let SocketEndpoint::Tcp { port, .. } = listener.local_endpoint() else {
        panic!("expected tcp endpoint");
    };
    assert_ne!(*port, 0);
}

#[test]
fn occupied_tcp_port_is_a_bind_error() {
    let first =
        SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind first listener");
    let error = SocketListener::bind(first.local_endpoint()).expect_err("port is taken");
    assert!(matches!(error, ListenerError::Bind { .. }));
}

#[test]
fn accepted_sockets_are_handed_off_in_blocking_mode() {
    let (accepted, handle) = start(&SocketEndpoint::tcp("127.0.0.1", 0));
    let addr = handle
        .endpoint()
        .socket_addrs()
        .expect("resolve")
        .into_iter()
        .next()
        .expect("one address");

    let mut client = TcpStream::connect(addr).expect("connect client");
    let mut server = accepted.recv_timeout(ACCEPT_WAIT).expect("accepted socket");

    // A blocking read waits for the late write instead of failing with
    // WouldBlock.
    let writer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        client.write_all(b"hello").expect("client write");
        client
    });
    let mut greeting = [0_u8; 5];
    server.read_exact(&mut greeting).expect("server read");
    assert_eq!(&greeting, b"hello");
    drop(writer.join().expect("join writer"));

    handle.shutdown();
    handle.join().expect("join listener");
}

#[cfg(unix)]
mod unix {
    use std::os::unix::net::{UnixListener, UnixStream};

    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn socket_path() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("peerwire.sock"))
            .expect("utf8 socket path");
        (dir, path)
    }

    #[rstest]
    fn stale_socket_is_reclaimed_and_removed_on_stop(socket_path: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = socket_path;
        drop(UnixListener::bind(&path).expect("bind stale listener"));
        assert!(path.exists(), "stale socket should remain");

        let (accepted, handle) = start(&SocketEndpoint::unix(path.clone()));
        UnixStream::connect(&path).expect("connect unix client");
        accepted.recv_timeout(ACCEPT_WAIT).expect("accepted unix socket");

        handle.shutdown();
        handle.join().expect("join listener");
        assert!(!path.exists(), "socket file should be removed on stop");
    }

    #[rstest]
    fn live_socket_is_not_stolen(socket_path: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = socket_path;
        let _live = UnixListener::bind(&path).expect("bind live listener");

        let error = SocketListener::bind(&SocketEndpoint::unix(path.clone()))
            .expect_err("socket is in use");
        assert!(matches!(error, ListenerError::SocketInUse { .. }));
        assert!(path.exists());
    }

    #[rstest]
    fn regular_file_is_not_replaced(socket_path: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = socket_path;
        std::fs::write(&path, b"keep me").expect("write file");

        let error = SocketListener::bind(&SocketEndpoint::unix(path.clone()))
            .expect_err("path is not a socket");
        assert!(matches!(error, ListenerError::NotASocket { .. }));
        assert_eq!(std::fs::read(&path).expect("read file"), b"keep me");
    }

    #[rstest]
    fn unstarted_listener_removes_its_socket_file(socket_path: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = socket_path;
        let listener =
            SocketListener::bind(&SocketEndpoint::unix(path.clone())).expect("bind listener");
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());
    }
}
