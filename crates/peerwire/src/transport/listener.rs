//! Listener accepting inbound peer sockets.
//!
//! Accepting runs on one background thread that polls a non-blocking socket
//! so [`ListenerHandle::shutdown`] is noticed promptly. Every accepted socket
//! is switched back to blocking mode and handed to the
//! [`ConnectionHandler`] on a thread of its own.

use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use peerwire_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use camino::{Utf8Path, Utf8PathBuf};
#[cfg(unix)]
use std::os::unix::net::UnixListener;

const IDLE_POLL: Duration = Duration::from_millis(10);
const FAILURE_PAUSE: Duration = Duration::from_millis(150);

/// Listener bound to a socket endpoint.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: SocketEndpoint,
    acceptor: Acceptor,
}

impl SocketListener {
    /// Binds the endpoint. TCP port `0` asks the kernel for a free port; see
    /// [`SocketListener::local_endpoint`] for the result.
    ///
    /// Each resolved TCP address is tried in turn. A Unix socket file left
    /// behind by a dead process is removed first; a live one is an error.
    ///
    /// # Errors
    ///
    /// Returns a [`ListenerError`] describing why binding failed.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let acceptor = Acceptor::bind(endpoint)?;
        let endpoint = match &acceptor {
            Acceptor::Tcp(listener) => {
                let port = listener
                    .local_addr()
                    .map_err(|source| ListenerError::Setup { source })?
                    .port();
                endpoint.with_port(port)
            }
            #[cfg(unix)]
            Acceptor::Unix { .. } => endpoint.clone(),
        };
        Ok(Self { endpoint, acceptor })
    }

    /// Endpoint actually bound, with any kernel-assigned port filled in.
    pub fn local_endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Starts accepting on a background thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be switched to non-blocking
    /// mode or the accept thread cannot be spawned.
    pub fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        self.acceptor
            .set_nonblocking(true)
            .map_err(|source| ListenerError::Setup { source })?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let endpoint = self.endpoint.clone();
        let accept_loop = AcceptLoop {
            listener: self,
            shutdown: Arc::clone(&shutdown),
            handler,
        };
        let thread = thread::Builder::new()
            .name("peerwire-accept".to_owned())
            .spawn(move || accept_loop.run())
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            endpoint,
            shutdown,
            thread: Some(thread),
        })
    }
}

/// Handle to the background accept thread. Dropping it stops accepting.
#[derive(Debug)]
pub struct ListenerHandle {
    endpoint: SocketEndpoint,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Endpoint the listener accepts on.
    pub fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Asks the accept loop to stop. Connections already handed off keep
    /// running.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] if the accept thread panicked.
    pub fn join(mut self) -> Result<(), ListenerError> {
        self.thread
            .take()
            .map_or(Ok(()), |thread| thread.join().map_err(|_| ListenerError::ThreadPanic))
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct AcceptLoop {
    listener: SocketListener,
    shutdown: Arc<AtomicBool>,
    handler: Arc<dyn ConnectionHandler>,
}

impl AcceptLoop {
    fn run(self) {
        let endpoint = &self.listener.endpoint;
        info!(target: LISTENER_TARGET, %endpoint, "accepting peer connections");
        // Repeated failures of the same kind are logged once.
        let mut failing = None::<io::ErrorKind>;
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.acceptor.accept() {
                Ok(stream) => {
                    failing = None;
                    self.hand_off(stream);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(IDLE_POLL);
                }
                Err(error) => {
                    if failing.replace(error.kind()) != Some(error.kind()) {
                        warn!(target: LISTENER_TARGET, %endpoint, %error, "accept failed");
                    }
                    thread::sleep(FAILURE_PAUSE);
                }
            }
        }
        debug!(target: LISTENER_TARGET, %endpoint, "listener stopped");
    }

    fn hand_off(&self, stream: ConnectionStream) {
        if let Err(error) = stream.set_blocking() {
            warn!(target: LISTENER_TARGET, %error, "dropping socket left non-blocking");
            return;
        }
        let handler = Arc::clone(&self.handler);
        if let Err(error) = thread::Builder::new()
            .name("peerwire-conn".to_owned())
            .spawn(move || handler.handle(stream))
        {
            warn!(target: LISTENER_TARGET, %error, "no thread for inbound connection");
        }
    }
}

#[derive(Debug)]
enum Acceptor {
    Tcp(TcpListener),
    /// Removes its socket file when dropped.
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        path: Utf8PathBuf,
    },
}

impl Acceptor {
    fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        match endpoint {
            SocketEndpoint::Tcp { .. } => bind_tcp(endpoint).map(Self::Tcp),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => {
                reclaim_stale_socket(path)?;
                let listener = UnixListener::bind(path)
                    .map_err(|source| ListenerError::bind(endpoint, source))?;
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => Err(ListenerError::Unsupported {
                endpoint: endpoint.clone(),
            }),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Self::Unix { listener, .. } => listener.set_nonblocking(nonblocking),
        }
    }

    fn accept(&self) -> io::Result<ConnectionStream> {
        match self {
            Self::Tcp(listener) => listener
                .accept()
                .map(|(stream, _)| ConnectionStream::Tcp(stream)),
            #[cfg(unix)]
            Self::Unix { listener, .. } => listener
                .accept()
                .map(|(stream, _)| ConnectionStream::Unix(stream)),
        }
    }
}

#[cfg(unix)]
impl Drop for Acceptor {
    fn drop(&mut self) {
        let Self::Unix { path, .. } = self else {
            return;
        };
        if let Err(error) = std::fs::remove_file(path.as_std_path())
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(target: LISTENER_TARGET, %error, %path, "unix socket file left behind");
        }
    }
}

fn bind_tcp(endpoint: &SocketEndpoint) -> Result<TcpListener, ListenerError> {
    let addrs = endpoint
        .socket_addrs()
        .map_err(|source| ListenerError::bind(endpoint, source))?;
    let mut last_failure = None;
    for addr in addrs {
        match TcpListener::bind(addr) {
            Ok(listener) => return Ok(listener),
            Err(error) => last_failure = Some(error),
        }
    }
    Err(match last_failure {
        Some(source) => ListenerError::bind(endpoint, source),
        None => ListenerError::NoAddress {
            endpoint: endpoint.clone(),
        },
    })
}

/// Clears a socket file whose owner has gone away.
#[cfg(unix)]
fn reclaim_stale_socket(path: &Utf8Path) -> Result<(), ListenerError> {
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::UnixStream;

    let stale = |source| ListenerError::StaleSocket {
        path: path.to_path_buf(),
        source,
    };
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(stale(error)),
    };
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::NotASocket {
            path: path.to_path_buf(),
        });
    }
    match UnixStream::connect(path) {
        Ok(_live) => Err(ListenerError::SocketInUse {
            path: path.to_path_buf(),
        }),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            std::fs::remove_file(path).map_err(stale)
        }
        Err(error) => Err(stale(error)),
    }
}
