//! Mesh node: a socket-backed peer transport and stream host.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use peerwire_config::SocketEndpoint;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::identity::{PeerAddrInfo, PeerId, ProtocolId};
use crate::service::{Service, ServiceError};
use crate::transport::{
    ConnectionHandler, ConnectionStream, ListenerError, ListenerHandle, PeerTransport,
    ProtocolHandler, RawStream, SocketListener, StreamHost, TransportError,
};
use crate::wire::FrameReader;

use super::MESH_TARGET;
use super::exchange::{self, exchange_protocol};
use super::handshake::{self, Hello, Welcome};
use super::peerstore::PeerStore;
use super::settings::NodeSettings;

/// Errors raised while starting a node.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The listener could not be bound or started.
    #[error("failed to start listener: {0}")]
    Listener(#[from] ListenerError),
    /// The peer exchange service could not be registered.
    #[error("failed to start peer exchange: {0}")]
    Exchange(#[source] ServiceError),
}

/// A running node.
///
/// Implements [`PeerTransport`] for clients and [`StreamHost`] for services.
/// Dropping the last handle shuts the node down.
pub struct MeshNode {
    inner: Arc<NodeInner>,
    listener: Mutex<Option<ListenerHandle>>,
    exchange: Mutex<Option<Service>>,
}

impl MeshNode {
    /// Binds the listener, registers peer exchange and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] when the listener or the exchange service cannot
    /// start.
    pub fn start(settings: NodeSettings) -> Result<Arc<Self>, MeshError> {
        let listener = SocketListener::bind(&settings.listen)?;
        let listen = listener.local_endpoint().clone();
        let id = settings
            .peer_id
            .clone()
            .unwrap_or_else(|| PeerId::derive(format!("{listen}#{}", std::process::id())));
        let inner = Arc::new_cyclic(|me| NodeInner {
            me: me.clone(),
            id,
            listen,
            settings,
            peerstore: PeerStore::new(),
            handlers: RwLock::default(),
            closed: AtomicBool::new(false),
        });
        let exchange = exchange::serve(&inner).map_err(MeshError::Exchange)?;
        let acceptor: Arc<dyn ConnectionHandler> = Arc::new(Acceptor {
            node: Arc::downgrade(&inner),
        });
        let listener = listener.start(acceptor)?;
        info!(
            target: MESH_TARGET,
            peer = %inner.id,
            listen = %inner.listen,
            "mesh node started"
        );
        Ok(Arc::new(Self {
            inner,
            listener: Mutex::new(Some(listener)),
            exchange: Mutex::new(Some(exchange)),
        }))
    }

    /// Identity of this node.
    pub fn peer_id(&self) -> &PeerId {
        &self.inner.id
    }

    /// Endpoint this node accepts on.
    pub fn listen_endpoint(&self) -> &SocketEndpoint {
        &self.inner.listen
    }

    /// Identity and endpoint, as other nodes need them to connect.
    pub fn addr_info(&self) -> PeerAddrInfo {
        PeerAddrInfo::new(self.inner.id.clone(), vec![self.inner.listen.clone()])
    }

    /// Peers this node has exchanged handshakes with.
    pub fn peerstore(&self) -> &PeerStore {
        &self.inner.peerstore
    }

    /// Exchanges identities with whoever listens at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when dialling or the handshake fails.
    pub fn dial(&self, endpoint: &SocketEndpoint) -> Result<PeerId, TransportError> {
        self.inner.ensure_open()?;
        self.inner
            .negotiate(endpoint, None, None)
            .map(|(peer, _stream)| peer)
    }

    /// Returns `true` once [`MeshNode::shutdown`] has run.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Stops accepting, unregisters peer exchange and refuses new streams.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(exchange) = lock(&self.exchange).take() {
            exchange.stop();
        }
        if let Some(listener) = lock(&self.listener).take() {
            listener.shutdown();
            if let Err(error) = listener.join() {
                warn!(target: MESH_TARGET, error = %error, "listener did not stop cleanly");
            }
        }
        info!(target: MESH_TARGET, peer = %self.inner.id, "mesh node stopped");
    }
}

impl Drop for MeshNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MeshNode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MeshNode")
            .field("peer", &self.inner.id)
            .field("listen", &self.inner.listen)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PeerTransport for MeshNode {
    fn local_peer_id(&self) -> PeerId {
        self.inner.local_peer_id()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn open_stream(
        &self,
        peer: &PeerId,
        protocol: &ProtocolId,
    ) -> Result<RawStream, TransportError> {
        self.inner.open_stream(peer, protocol)
    }

    fn find_peers(
        &self,
        protocol: &ProtocolId,
        limit: usize,
    ) -> Result<Receiver<PeerAddrInfo>, TransportError> {
        self.inner.find_peers(protocol, limit)
    }

    fn peers(&self) -> Vec<PeerId> {
        self.inner.peers()
    }

    fn known_protocols(&self, peer: &PeerId) -> Vec<ProtocolId> {
        self.inner.known_protocols(peer)
    }

    fn addresses(&self, peer: &PeerId) -> Vec<SocketEndpoint> {
        self.inner.addresses(peer)
    }

    fn connect(&self, info: &PeerAddrInfo) -> Result<(), TransportError> {
        self.inner.connect(info)
    }
}

impl StreamHost for MeshNode {
    fn set_stream_handler(
        &self,
        protocol: ProtocolId,
        handler: Arc<dyn ProtocolHandler>,
    ) -> Result<(), TransportError> {
        self.inner.set_stream_handler(protocol, handler)
    }

    fn remove_stream_handler(&self, protocol: &ProtocolId) {
        self.inner.remove_stream_handler(protocol);
    }
}

/// State shared between the node handle, its accept threads and its
/// exchange service.
pub(crate) struct NodeInner {
    me: Weak<NodeInner>,
    id: PeerId,
    listen: SocketEndpoint,
    settings: NodeSettings,
    peerstore: PeerStore,
    handlers: RwLock<HashMap<ProtocolId, Arc<dyn ProtocolHandler>>>,
    closed: AtomicBool,
}

impl NodeInner {
    pub(crate) fn handshake_timeout(&self) -> Duration {
        self.settings.handshake_timeout
    }

    /// Peers serving `protocol` for a remote `requester`, including this node
    /// when it serves the protocol itself.
    pub(crate) fn peers_for(
        &self,
        protocol: &ProtocolId,
        requester: &PeerId,
        limit: usize,
    ) -> Vec<PeerAddrInfo> {
        let local = self
            .handler(protocol)
            .map(|_| PeerAddrInfo::new(self.id.clone(), vec![self.listen.clone()]));
        local
            .into_iter()
            .chain(self.peerstore.supporting(protocol))
            .filter(|info| info.id != *requester)
            .take(limit)
            .collect()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn handler(&self, protocol: &ProtocolId) -> Option<Arc<dyn ProtocolHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(protocol)
            .cloned()
    }

    fn protocols(&self) -> Vec<ProtocolId> {
        let mut protocols = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        protocols.sort_unstable();
        protocols
    }

    fn hello(&self, protocol: Option<&ProtocolId>) -> Hello {
        Hello {
            peer: self.id.clone(),
            listen: self.listen.clone(),
            protocols: self.protocols(),
            protocol: protocol.cloned(),
        }
    }

    fn dial(&self, endpoint: &SocketEndpoint) -> Result<ConnectionStream, TransportError> {
        match endpoint {
            SocketEndpoint::Tcp { .. } => {
                let addrs = endpoint
                    .socket_addrs()
                    .map_err(|error| TransportError::dial(endpoint, error))?;
                let mut last_error = None;
                for addr in addrs {
                    match TcpStream::connect_timeout(&addr, self.settings.connect_timeout) {
                        Ok(stream) => return Ok(ConnectionStream::Tcp(stream)),
                        Err(error) => last_error = Some(error),
                    }
                }
                let error = last_error.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved")
                });
                Err(TransportError::dial(endpoint, error))
            }
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => UnixStream::connect(path.as_std_path())
                .map(ConnectionStream::Unix)
                .map_err(|error| TransportError::dial(endpoint, error)),
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => Err(TransportError::dial(
                endpoint,
                io::Error::new(io::ErrorKind::Unsupported, "unix sockets are unsupported"),
            )),
        }
    }

    /// Dials `endpoint` and runs the dialer side of the handshake.
    fn negotiate(
        &self,
        endpoint: &SocketEndpoint,
        expected: Option<&PeerId>,
        protocol: Option<&ProtocolId>,
    ) -> Result<(PeerId, RawStream), TransportError> {
        let stream = self.dial(endpoint)?;
        let budget = Some(self.settings.handshake_timeout);
        stream.set_read_timeout(budget)?;
        stream.set_write_timeout(budget)?;
        let mut reader = FrameReader::new(stream);

        handshake::send(&self.hello(protocol), reader.get_mut())
            .map_err(|error| TransportError::handshake(endpoint, error))?;
        let welcome: Welcome = handshake::receive(&mut reader)
            .map_err(|error| TransportError::handshake(endpoint, error))?;
        reader.get_ref().set_read_timeout(None)?;
        reader.get_ref().set_write_timeout(None)?;

        if let Some(expected) = expected
            && welcome.peer != *expected
        {
            return Err(TransportError::PeerMismatch {
                expected: expected.clone(),
                actual: welcome.peer,
            });
        }
        if welcome.peer != self.id {
            self.peerstore.record(
                &welcome.peer,
                [endpoint.clone(), welcome.listen.clone()],
                welcome.protocols.iter().cloned(),
            );
        }
        if let Some(protocol) = protocol
            && !welcome.accepted
        {
            return Err(TransportError::ProtocolNotSupported {
                peer: welcome.peer,
                protocol: protocol.clone(),
                reason: welcome.reason.unwrap_or_else(|| "rejected".to_owned()),
            });
        }
        Ok((welcome.peer, reader))
    }

    /// Runs the listener side of the handshake and routes the stream.
    fn accept(&self, stream: ConnectionStream) {
        let budget = Some(self.settings.handshake_timeout);
        if let Err(error) = stream
            .set_read_timeout(budget)
            .and_then(|()| stream.set_write_timeout(budget))
        {
            debug!(target: MESH_TARGET, error = %error, "failed to arm handshake deadline");
            return;
        }
        let mut reader = FrameReader::new(stream);
        let hello: Hello = match handshake::receive(&mut reader) {
            Ok(hello) => hello,
            Err(error) => {
                debug!(target: MESH_TARGET, error = %error, "inbound handshake failed");
                return;
            }
        };
        if hello.peer != self.id {
            self.peerstore.record(
                &hello.peer,
                [hello.listen.clone()],
                hello.protocols.iter().cloned(),
            );
        }

        let handler = hello
            .protocol
            .as_ref()
            .and_then(|protocol| self.handler(protocol));
        let refusal = if self.is_closed() {
            Some("node is shutting down")
        } else if hello.protocol.is_some() && handler.is_none() {
            Some("protocol not supported")
        } else {
            None
        };
        let welcome = Welcome {
            peer: self.id.clone(),
            listen: self.listen.clone(),
            protocols: self.protocols(),
            accepted: refusal.is_none(),
            reason: refusal.map(str::to_owned),
        };
        if let Err(error) = handshake::send(&welcome, reader.get_mut()) {
            debug!(target: MESH_TARGET, peer = %hello.peer, error = %error, "failed to send welcome");
            return;
        }
        let Some(handler) = handler.filter(|_| refusal.is_none()) else {
            return;
        };
        if let Err(error) = reader
            .get_ref()
            .set_read_timeout(None)
            .and_then(|()| reader.get_ref().set_write_timeout(None))
        {
            warn!(target: MESH_TARGET, error = %error, "failed to clear handshake deadline");
            return;
        }
        handler.handle(Connection::from_raw(hello.peer, reader));
    }

    fn run_find(
        &self,
        neighbours: Vec<PeerAddrInfo>,
        protocol: &ProtocolId,
        limit: usize,
        results: &Sender<PeerAddrInfo>,
    ) {
        let mut seen = HashSet::from([self.id.clone()]);
        let mut sent = 0_usize;
        for neighbour in neighbours {
            if sent >= limit {
                break;
            }
            let peers = match exchange::query(self, &neighbour.id, protocol, limit - sent) {
                Ok(peers) => peers,
                Err(error) => {
                    debug!(
                        target: MESH_TARGET,
                        neighbour = %neighbour.id,
                        error = %error,
                        "peer exchange query failed"
                    );
                    continue;
                }
            };
            for info in peers {
                if sent >= limit {
                    break;
                }
                if !seen.insert(info.id.clone()) {
                    continue;
                }
                if results.send(info).is_err() {
                    return;
                }
                sent += 1;
            }
        }
        debug!(target: MESH_TARGET, %protocol, found = sent, "peer exchange finished");
    }
}

impl PeerTransport for NodeInner {
    fn local_peer_id(&self) -> PeerId {
        self.id.clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn open_stream(
        &self,
        peer: &PeerId,
        protocol: &ProtocolId,
    ) -> Result<RawStream, TransportError> {
        self.ensure_open()?;
        let endpoints = self.addresses(peer);
        let mut last_error = None;
        for endpoint in &endpoints {
            match self.negotiate(endpoint, Some(peer), Some(protocol)) {
                Ok((_, stream)) => return Ok(stream),
                Err(
                    error @ (TransportError::PeerMismatch { .. }
                    | TransportError::ProtocolNotSupported { .. }),
                ) => return Err(error),
                Err(error) => last_error = Some(error),
            }
        }
        Err(last_error.unwrap_or_else(|| TransportError::UnknownPeer { peer: peer.clone() }))
    }

    fn find_peers(
        &self,
        protocol: &ProtocolId,
        limit: usize,
    ) -> Result<Receiver<PeerAddrInfo>, TransportError> {
        self.ensure_open()?;
        let neighbours = self.peerstore.supporting(&exchange_protocol());
        if neighbours.is_empty() {
            return Err(TransportError::NoRoute {
                protocol: protocol.clone(),
            });
        }
        let node = self.me.upgrade().ok_or(TransportError::Closed)?;
        let protocol = protocol.clone();
        let (sender, receiver) = mpsc::channel();
        thread::Builder::new()
            .name("peerwire-find".to_owned())
            .spawn(move || node.run_find(neighbours, &protocol, limit, &sender))?;
        Ok(receiver)
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peerstore.peers()
    }

    fn known_protocols(&self, peer: &PeerId) -> Vec<ProtocolId> {
        if *peer == self.id {
            return self.protocols();
        }
        self.peerstore.protocols(peer)
    }

    fn addresses(&self, peer: &PeerId) -> Vec<SocketEndpoint> {
        if *peer == self.id {
            return vec![self.listen.clone()];
        }
        self.peerstore.addresses(peer)
    }

    fn connect(&self, info: &PeerAddrInfo) -> Result<(), TransportError> {
        if info.id == self.id {
            return Ok(());
        }
        self.ensure_open()?;
        let endpoints = if info.addrs.is_empty() {
            self.peerstore.addresses(&info.id)
        } else {
            info.addrs.clone()
        };
        let mut last_error = None;
        for endpoint in &endpoints {
            match self.negotiate(endpoint, Some(&info.id), None) {
                Ok(_) => return Ok(()),
                Err(error) => last_error = Some(error),
            }
        }
        Err(last_error.unwrap_or_else(|| TransportError::UnknownPeer {
            peer: info.id.clone(),
        }))
    }
}

impl StreamHost for NodeInner {
    fn set_stream_handler(
        &self,
        protocol: ProtocolId,
        handler: Arc<dyn ProtocolHandler>,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        match handlers.entry(protocol) {
            Entry::Occupied(entry) => Err(TransportError::ProtocolInUse {
                protocol: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                debug!(target: MESH_TARGET, protocol = %entry.key(), "stream handler registered");
                entry.insert(handler);
                Ok(())
            }
        }
    }

    fn remove_stream_handler(&self, protocol: &ProtocolId) {
        let removed = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(protocol);
        if removed.is_some() {
            debug!(target: MESH_TARGET, %protocol, "stream handler removed");
        }
    }
}

/// Accept-loop handler; holds the node weakly so the listener thread does
/// not keep it alive.
struct Acceptor {
    node: Weak<NodeInner>,
}

impl ConnectionHandler for Acceptor {
    fn handle(&self, stream: ConnectionStream) {
        if let Some(node) = self.node.upgrade() {
            node.accept(stream);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
