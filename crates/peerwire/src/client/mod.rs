//! Dispatch client.
//!
//! A [`Client`] sends one command to many peers that serve a protocol and
//! streams their results back as each one finishes. Peers come from the
//! request's explicit targets or, when those do not cover the threshold,
//! from a discovery loop the client starts on first use.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use peerwire::{Client, ClientSettings, PeerTransport, ProtocolId};
//!
//! # fn run(transport: Arc<dyn PeerTransport>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(transport, ProtocolId::parse("/hello/1.0")?, ClientSettings::default());
//! for result in client.build("hi").with_threshold(3).execute()? {
//!     match result.error() {
//!         None => println!("{}: {:?}", result.peer(), result.get_str("message")),
//!         Some(error) => eprintln!("{}: {error}", result.peer()),
//!     }
//! }
//! client.close();
//! # Ok(())
//! # }
//! ```

mod dispatch;
mod errors;
mod request;
mod response;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use peerwire_config::Config;
use tracing::info;

use crate::discovery::{Discovery, DiscoverySettings};
use crate::identity::{PeerId, ProtocolId};
use crate::scope::Scope;
use crate::transport::PeerTransport;
use crate::wire::{Body, Response};

pub use self::errors::{ClientError, PeerError};
pub use self::request::{Request, RequestOption};
pub use self::response::{PeerResponse, Responses};

pub(crate) const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");

/// Client tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    /// Request timeout used when a request does not set one.
    pub default_timeout: Duration,
    /// Most peers one request may contact; also the result buffer size.
    pub max_concurrent_sends: usize,
    /// Threshold used when a request does not set one.
    pub default_threshold: usize,
    /// Largest accepted response frame.
    pub max_frame_bytes: usize,
    /// Tuning for the lazily started discovery loop.
    pub discovery: DiscoverySettings,
}

impl ClientSettings {
    /// Reads the tuning from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_timeout: config.request_timeout(),
            max_concurrent_sends: config.max_concurrent_sends(),
            default_threshold: 1,
            max_frame_bytes: config.max_frame_bytes(),
            discovery: DiscoverySettings::from_config(config),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Sends commands for one protocol. Clones share state; closing one closes
/// them all.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    transport: Arc<dyn PeerTransport>,
    protocol: ProtocolId,
    settings: ClientSettings,
    /// Owns every connection handed out to callers.
    scope: Scope,
    discovery: Mutex<Option<Arc<Discovery>>>,
    closed: AtomicBool,
}

impl Client {
    /// Creates a client. Discovery starts on the first request that needs it.
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        protocol: ProtocolId,
        settings: ClientSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                protocol,
                settings,
                scope: Scope::new(),
                discovery: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Protocol the client speaks.
    pub fn protocol(&self) -> &ProtocolId {
        &self.inner.protocol
    }

    /// Client tuning.
    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// Starts building a request for `name`.
    pub fn build(&self, name: impl Into<String>) -> Request {
        Request::new(self.clone(), name.into())
    }

    /// Sends `name` and returns the first result.
    ///
    /// With no `peers` one discovered peer answers; otherwise every listed
    /// peer is contacted and the first to finish wins.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Peer`] when the first result is a failure and
    /// [`ClientError::DeadlineExceeded`] when none arrived in time, besides
    /// the errors of [`Request::execute`].
    pub fn send(
        &self,
        name: impl Into<String>,
        body: Body,
        peers: &[PeerId],
    ) -> Result<Response, ClientError> {
        let responses = self
            .build(name)
            .with_body(body)
            .to(peers.iter().cloned())
            .with_threshold(peers.len().max(1))
            .execute()?;
        let first = responses.recv().ok_or(ClientError::DeadlineExceeded)?;
        let peer = first.peer().clone();
        first
            .into_result()
            .map_err(|source| ClientError::Peer { peer, source })
    }

    /// Returns `true` once [`Client::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Aborts every connection the client owns and stops discovery.
    ///
    /// Idempotent. Requests in flight end their result streams promptly.
    pub fn close(&self) {
        self.inner.close();
    }

    pub(crate) fn shared(&self) -> Arc<ClientInner> {
        Arc::clone(&self.inner)
    }

    pub(crate) fn discovery(&self) -> Result<Arc<Discovery>, ClientError> {
        let mut slot = lock(&self.inner.discovery);
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if let Some(discovery) = slot.as_ref() {
            return Ok(Arc::clone(discovery));
        }
        let discovery = Arc::new(Discovery::start(
            Arc::clone(&self.inner.transport),
            self.inner.protocol.clone(),
            self.inner.settings.discovery,
        )?);
        *slot = Some(Arc::clone(&discovery));
        Ok(discovery)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Client")
            .field("protocol", &self.inner.protocol)
            .field("settings", &self.inner.settings)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let aborted = self.scope.tracked();
        self.scope.cancel();
        let discovery = lock(&self.discovery).take();
        if let Some(discovery) = discovery {
            discovery.shutdown();
        }
        info!(
            target: CLIENT_TARGET,
            protocol = %self.protocol,
            aborted,
            "client closed"
        );
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::transport::{MockPeerTransport, TransportError};

    fn protocol() -> ProtocolId {
        ProtocolId::parse("/hello/1.0").expect("valid protocol")
    }

    /// Transport with no peers whose searches always fail.
    fn isolated_transport() -> MockPeerTransport {
        let mut transport = MockPeerTransport::new();
        transport
            .expect_local_peer_id()
            .returning(|| PeerId::new("local"));
        transport.expect_is_closed().returning(|| false);
        transport.expect_peers().returning(Vec::new);
        transport.expect_known_protocols().returning(|_| Vec::new());
        transport.expect_addresses().returning(|_| Vec::new());
        transport
            .expect_find_peers()
            .returning(|protocol, _| {
                Err(TransportError::NoRoute {
                    protocol: protocol.clone(),
                })
            });
        transport
            .expect_open_stream()
            .returning(|peer, _| Err(TransportError::UnknownPeer { peer: peer.clone() }));
        transport
    }

    #[fixture]
    fn client() -> Client {
        Client::new(
            Arc::new(isolated_transport()),
            protocol(),
            ClientSettings::default(),
        )
    }

    #[rstest]
    fn zero_threshold_is_rejected(client: Client) {
        let error = client
            .build("hi")
            .with_threshold(0)
            .execute()
            .expect_err("threshold 0");
        assert!(matches!(error, ClientError::InvalidThreshold));
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("  ")]
    fn blank_command_is_rejected(client: Client, #[case] name: &str) {
        let error = client.build(name).execute().expect_err("blank name");
        assert!(matches!(error, ClientError::InvalidCommand { .. }));
    }

    #[rstest]
    fn first_invalid_option_wins(client: Client) {
        let error = client
            .build("")
            .with_threshold(0)
            .execute()
            .expect_err("invalid request");
        assert!(matches!(error, ClientError::InvalidCommand { .. }));
    }

    #[rstest]
    fn threshold_above_send_cap_is_rejected(client: Client) {
        let limit = client.settings().max_concurrent_sends;
        let error = client
            .build("hi")
            .with_threshold(limit + 1)
            .execute()
            .expect_err("threshold too high");
        assert!(matches!(
            error,
            ClientError::ThresholdTooHigh { threshold, limit: cap } if threshold == limit + 1 && cap == limit
        ));
    }

    #[rstest]
    fn targets_are_deduplicated_and_raise_threshold(client: Client) {
        let request = client.build("hi").to([
            PeerId::new("a"),
            PeerId::new("b"),
            PeerId::new("a"),
        ]);
        assert_eq!(request.targets(), [PeerId::new("a"), PeerId::new("b")]);
        assert_eq!(request.threshold(), 2);
    }

    #[rstest]
    fn zero_timeout_keeps_default(client: Client) {
        let request = client.build("hi").with_timeout(Duration::ZERO);
        assert_eq!(request.timeout(), client.settings().default_timeout);
    }

    #[rstest]
    fn closed_client_refuses_requests(client: Client) {
        client.close();
        client.close();
        assert!(client.is_closed());
        let error = client.build("hi").execute().expect_err("closed");
        assert!(matches!(error, ClientError::Closed));
    }

    #[test]
    fn closed_transport_is_rejected_up_front() {
        let mut transport = MockPeerTransport::new();
        transport.expect_is_closed().returning(|| true);
        transport.expect_open_stream().never();
        let client = Client::new(Arc::new(transport), protocol(), ClientSettings::default());
        let error = client
            .build("hi")
            .to([PeerId::new("a")])
            .execute()
            .expect_err("transport closed");
        assert!(matches!(error, ClientError::TransportClosed));
    }

    #[rstest]
    fn unrepresentable_timeout_is_rejected(client: Client) {
        let error = client
            .build("hi")
            .to([PeerId::new("a")])
            .with_timeout(Duration::MAX)
            .execute()
            .expect_err("timeout too large");
        assert!(matches!(
            error,
            ClientError::InvalidTimeout { timeout } if timeout == Duration::MAX
        ));
    }

    #[rstest]
    fn unreachable_target_yields_per_peer_failure(client: Client) {
        let responses = client
            .build("hi")
            .to([PeerId::new("ghost")])
            .with_timeout(Duration::from_secs(2))
            .execute()
            .expect("execute");
        let results = responses.collect::<Vec<_>>();
        assert_eq!(results.len(), 1);
        let result = results.first().expect("one result");
        assert_eq!(result.peer(), &PeerId::new("ghost"));
        assert!(matches!(result.error(), Some(PeerError::Unreachable(_))));
        assert!(result.close().is_err());
    }

    #[rstest]
    fn no_peers_ends_stream_at_deadline(client: Client) {
        let started = Instant::now();
        let responses = client
            .build("hi")
            .with_timeout(Duration::from_millis(200))
            .execute()
            .expect("execute");
        assert_eq!(responses.count(), 0);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn send_without_answers_reports_deadline() {
        let client = Client::new(
            Arc::new(isolated_transport()),
            protocol(),
            ClientSettings {
                default_timeout: Duration::from_millis(100),
                ..ClientSettings::default()
            },
        );
        let error = client.send("hi", Body::new(), &[]).expect_err("no peers");
        assert!(matches!(error, ClientError::DeadlineExceeded));
    }
}
