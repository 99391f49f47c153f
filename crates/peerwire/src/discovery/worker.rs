//! The discovery loop itself.
//!
//! All state lives on the loop thread. Every input (refresh tick, wake-up,
//! query result, snapshot request, subscription, shutdown) arrives as a
//! [`LoopEvent`] on one channel, so the candidate list needs no lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::identity::{PeerAddrInfo, PeerId, ProtocolId};
use crate::transport::{PeerTransport, TransportError};

use super::{DISCOVERY_TARGET, DiscoverySettings, FeedEvent, FeedId, Snapshot};

/// Delivers one event to a subscriber; `false` means it has gone away.
pub(super) type Feed = Box<dyn FnMut(FeedEvent) -> bool + Send>;

pub(super) enum LoopEvent {
    Wake,
    Candidate(PeerAddrInfo),
    QueryFinished,
    Snapshot(Sender<Snapshot>),
    Subscribe(FeedId, Feed),
    Unsubscribe(FeedId),
    Forget(PeerId),
    Shutdown,
}

pub(super) struct DiscoveryLoop {
    transport: Arc<dyn PeerTransport>,
    protocol: ProtocolId,
    settings: DiscoverySettings,
    local: PeerId,
    candidates: Vec<PeerAddrInfo>,
    querying: bool,
    closed: bool,
    last_query: Option<Instant>,
    feeds: Vec<(FeedId, Feed)>,
    events: Sender<LoopEvent>,
    wake_pending: Arc<AtomicBool>,
}

impl DiscoveryLoop {
    pub(super) fn new(
        transport: Arc<dyn PeerTransport>,
        protocol: ProtocolId,
        settings: DiscoverySettings,
        events: Sender<LoopEvent>,
        wake_pending: Arc<AtomicBool>,
    ) -> Self {
        let local = transport.local_peer_id();
        Self {
            transport,
            protocol,
            settings,
            local,
            candidates: Vec::new(),
            querying: false,
            closed: false,
            last_query: None,
            feeds: Vec::new(),
            events,
            wake_pending,
        }
    }

    pub(super) fn run(mut self, inbox: &Receiver<LoopEvent>) {
        debug!(target: DISCOVERY_TARGET, protocol = %self.protocol, "discovery loop started");
        self.refresh(true);
        let mut next_refresh = self.next_refresh();
        loop {
            // An interval too long to schedule waits for events only.
            let wait = next_refresh.map_or(Duration::MAX, |at| {
                at.saturating_duration_since(Instant::now())
            });
            match inbox.recv_timeout(wait) {
                Ok(LoopEvent::Wake) => {
                    self.wake_pending.store(false, Ordering::SeqCst);
                    self.refresh(false);
                }
                Ok(LoopEvent::Candidate(info)) => self.admit(info),
                Ok(LoopEvent::QueryFinished) => {
                    self.querying = false;
                    debug!(
                        target: DISCOVERY_TARGET,
                        protocol = %self.protocol,
                        candidates = self.candidates.len(),
                        "discovery query finished"
                    );
                }
                Ok(LoopEvent::Snapshot(reply)) => {
                    if reply.send(self.snapshot()).is_err() {
                        debug!(target: DISCOVERY_TARGET, "snapshot requester went away");
                    }
                }
                Ok(LoopEvent::Subscribe(id, feed)) => self.subscribe(id, feed),
                Ok(LoopEvent::Unsubscribe(id)) => self.feeds.retain(|(feed, _)| *feed != id),
                Ok(LoopEvent::Forget(peer)) => self.candidates.retain(|info| info.id != peer),
                Ok(LoopEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    self.refresh(true);
                    next_refresh = self.next_refresh();
                }
            }
        }
        debug!(target: DISCOVERY_TARGET, protocol = %self.protocol, "discovery loop stopped");
    }

    fn next_refresh(&self) -> Option<Instant> {
        Instant::now().checked_add(self.settings.refresh_interval)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            peers: self.candidates.clone(),
            querying: self.querying,
            closed: self.closed,
        }
    }

    /// Replays the known candidates, then keeps the feed for new ones.
    fn subscribe(&mut self, id: FeedId, mut feed: Feed) {
        if self.closed {
            feed(FeedEvent::TransportClosed);
            return;
        }
        let replayed = self
            .candidates
            .iter()
            .all(|info| feed(FeedEvent::Candidate(info.clone())));
        if replayed {
            self.feeds.push((id, feed));
        }
    }

    fn publish(&mut self, info: &PeerAddrInfo) {
        self.feeds
            .retain_mut(|(_, feed)| feed(FeedEvent::Candidate(info.clone())));
    }

    /// Stops discovering for good and ends every feed.
    fn transport_closed(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        warn!(
            target: DISCOVERY_TARGET,
            protocol = %self.protocol,
            "transport closed; discovery stops"
        );
        for (_, mut feed) in self.feeds.drain(..) {
            feed(FeedEvent::TransportClosed);
        }
    }

    /// Scans the peer store, then starts an active query unless one is
    /// running or, for wake-ups, one started too recently.
    fn refresh(&mut self, scheduled: bool) {
        if self.closed {
            return;
        }
        if self.transport.is_closed() {
            self.transport_closed();
            return;
        }
        self.scan();
        if self.querying {
            return;
        }
        if !scheduled
            && let Some(last) = self.last_query
            && last.elapsed() < self.settings.query_backoff
        {
            return;
        }
        self.start_query();
    }

    fn scan(&mut self) {
        for peer in self.transport.peers() {
            if peer == self.local {
                continue;
            }
            if !self.transport.known_protocols(&peer).contains(&self.protocol) {
                continue;
            }
            let addrs = self.transport.addresses(&peer);
            self.admit(PeerAddrInfo::new(peer, addrs));
        }
    }

    fn start_query(&mut self) {
        self.last_query = Some(Instant::now());
        let results = match self
            .transport
            .find_peers(&self.protocol, self.settings.query_limit)
        {
            Ok(results) => results,
            Err(error @ TransportError::NoRoute { .. }) => {
                debug!(target: DISCOVERY_TARGET, error = %error, "no route for active discovery");
                return;
            }
            Err(error) if error.is_fatal() => {
                self.transport_closed();
                return;
            }
            Err(error) => {
                warn!(
                    target: DISCOVERY_TARGET,
                    protocol = %self.protocol,
                    error = %error,
                    "active discovery failed; relying on peer store until next refresh"
                );
                return;
            }
        };
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name("peerwire-discovery-query".to_owned())
            .spawn(move || forward(&results, &events));
        match spawned {
            Ok(_) => self.querying = true,
            Err(error) => warn!(
                target: DISCOVERY_TARGET,
                error = %error,
                "failed to spawn discovery query thread"
            ),
        }
    }

    /// Adds a candidate unless it is this peer, already known, or the cap is
    /// reached. Known candidates gain any new addresses.
    fn admit(&mut self, info: PeerAddrInfo) {
        if info.id == self.local {
            return;
        }
        if let Some(known) = self.candidates.iter_mut().find(|known| known.id == info.id) {
            for addr in info.addrs {
                if !known.addrs.contains(&addr) {
                    known.addrs.push(addr);
                }
            }
            return;
        }
        if self.candidates.len() >= self.settings.peer_cap {
            return;
        }
        debug!(target: DISCOVERY_TARGET, peer = %info.id, "discovered candidate");
        self.publish(&info);
        self.candidates.push(info);
    }
}

fn forward(results: &Receiver<PeerAddrInfo>, events: &Sender<LoopEvent>) {
    for info in results {
        if events.send(LoopEvent::Candidate(info)).is_err() {
            return;
        }
    }
    if events.send(LoopEvent::QueryFinished).is_err() {
        debug!(target: DISCOVERY_TARGET, "discovery loop gone before query finished");
    }
}
