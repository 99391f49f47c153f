//! Background peer discovery for one protocol.
//!
//! A [`Discovery`] owns a loop thread that keeps a bounded, rolling set of
//! peers advertising the protocol. Each refresh scans the transport's peer
//! store and, unless one is already running, starts an active query whose
//! results keep flowing into the set after the caller that triggered it has
//! moved on. A failing query only logs; the next refresh tries again.
//!
//! Requests waiting for peers [`subscribe`](Discovery::subscribe) instead of
//! polling: the loop replays its current candidates to a new subscriber and
//! then pushes every candidate it admits. A transport that reports itself
//! closed ends every feed with [`FeedEvent::TransportClosed`].

mod errors;
mod settings;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::identity::{PeerAddrInfo, PeerId, ProtocolId};
use crate::transport::PeerTransport;

pub use self::errors::DiscoveryError;
pub use self::settings::DiscoverySettings;

use self::worker::{DiscoveryLoop, Feed, LoopEvent};

const DISCOVERY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::discovery");

/// Candidates known to the loop at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Candidates in the order they were discovered.
    pub peers: Vec<PeerAddrInfo>,
    /// Whether an active query is still producing results.
    pub querying: bool,
    /// Whether the transport has reported itself closed.
    pub closed: bool,
}

/// What a subscriber hears from the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A candidate known at subscription time or admitted since.
    Candidate(PeerAddrInfo),
    /// The transport is closed; the feed ends here.
    TransportClosed,
}

/// Names a subscription so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedId(u64);

/// Handle to a running discovery loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct Discovery {
    protocol: ProtocolId,
    events: Sender<LoopEvent>,
    wake_pending: Arc<AtomicBool>,
    next_feed: AtomicU64,
    snapshot_timeout: Duration,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Discovery {
    /// Spawns the loop.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Spawn`] when the thread cannot be created.
    pub fn start(
        transport: Arc<dyn PeerTransport>,
        protocol: ProtocolId,
        settings: DiscoverySettings,
    ) -> Result<Self, DiscoveryError> {
        let (events, inbox) = mpsc::channel();
        let wake_pending = Arc::new(AtomicBool::new(false));
        let state = DiscoveryLoop::new(
            transport,
            protocol.clone(),
            settings,
            events.clone(),
            Arc::clone(&wake_pending),
        );
        let thread = thread::Builder::new()
            .name("peerwire-discovery".to_owned())
            .spawn(move || state.run(&inbox))
            .map_err(DiscoveryError::Spawn)?;
        Ok(Self {
            protocol,
            events,
            wake_pending,
            next_feed: AtomicU64::new(0),
            snapshot_timeout: settings.snapshot_timeout,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Protocol this loop discovers peers for.
    pub fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    /// Asks the loop to refresh now. Requests made before the loop wakes
    /// collapse into one.
    pub fn request_more(&self) {
        if self.wake_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.events.send(LoopEvent::Wake).is_err() {
            self.wake_pending.store(false, Ordering::SeqCst);
        }
    }

    /// Reads the current candidate set.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Stopped`] once the loop has exited, or
    /// [`DiscoveryError::SnapshotTimeout`] if it does not answer in time.
    pub fn snapshot(&self) -> Result<Snapshot, DiscoveryError> {
        let (reply, answer) = mpsc::channel();
        self.events
            .send(LoopEvent::Snapshot(reply))
            .map_err(|_| DiscoveryError::Stopped)?;
        answer
            .recv_timeout(self.snapshot_timeout)
            .map_err(|error| match error {
                RecvTimeoutError::Timeout => DiscoveryError::SnapshotTimeout {
                    timeout_ms: self.snapshot_timeout.as_millis(),
                },
                RecvTimeoutError::Disconnected => DiscoveryError::Stopped,
            })
    }

    /// Pushes candidates into `sink` until [`Discovery::unsubscribe`] is
    /// called, the receiving end is dropped, or the transport closes.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Stopped`] once the loop has exited.
    pub fn subscribe<T>(&self, sink: Sender<T>) -> Result<FeedId, DiscoveryError>
    where
        T: From<FeedEvent> + Send + 'static,
    {
        let id = FeedId(self.next_feed.fetch_add(1, Ordering::Relaxed));
        let feed: Feed = Box::new(move |event| sink.send(T::from(event)).is_ok());
        self.events
            .send(LoopEvent::Subscribe(id, feed))
            .map_err(|_| DiscoveryError::Stopped)?;
        Ok(id)
    }

    /// Ends a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: FeedId) {
        if self.events.send(LoopEvent::Unsubscribe(id)).is_err() {
            debug!(target: DISCOVERY_TARGET, "discovery loop already stopped");
        }
    }

    /// Drops a candidate, typically one that could not be reached.
    pub fn forget(&self, peer: &PeerId) {
        if self.events.send(LoopEvent::Forget(peer.clone())).is_err() {
            debug!(target: DISCOVERY_TARGET, %peer, "discovery loop already stopped");
        }
    }

    /// Stops the loop and waits for it to exit. Safe to call more than once.
    pub fn shutdown(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        if self.events.send(LoopEvent::Shutdown).is_err() {
            debug!(target: DISCOVERY_TARGET, "discovery loop exited early");
        }
        if handle.join().is_err() {
            warn!(target: DISCOVERY_TARGET, protocol = %self.protocol, "discovery loop panicked");
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.shutdown();
    }
}
