//! Fan-out of one command to many peers.
//!
//! A coordinator thread owns the request. It launches one worker thread per
//! contacted peer and forwards results to the caller as they complete. While
//! fewer than `threshold` peers are in play it takes candidates from a
//! discovery subscription, which pushes them onto the same channel the
//! workers report on.
//!
//! The request ends when every launched peer has answered, the deadline
//! passes, the client closes or the transport shuts down. The request scope
//! is then cancelled so that in-flight exchanges unblock, and every peer
//! still in flight gets a failure result before the stream ends.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::discovery::{Discovery, FeedEvent, FeedId};
use crate::identity::{PeerAddrInfo, PeerId};
use crate::scope::Scope;
use crate::transport::TransportError;
use crate::wire::{Command, Response};

use super::errors::{ClientError, PeerError};
use super::response::{PeerResponse, Responses};
use super::{CLIENT_TARGET, ClientInner};

/// Client cancellation and transport shutdown are noticed at least this often.
const WATCH_INTERVAL: Duration = Duration::from_millis(50);

/// How long cancelled workers get to report before failures are synthesized.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Everything a coordinator needs to run one request.
pub(super) struct Plan {
    pub(super) command: Command,
    pub(super) targets: Vec<PeerId>,
    pub(super) threshold: usize,
    pub(super) deadline: Instant,
}

enum Event {
    /// The exchange ran; the result counts towards the threshold.
    Finished(PeerResponse),
    /// A discovered peer could not be reached; its slot is freed.
    Unreachable { peer: PeerId, error: TransportError },
    /// Discovery found a peer serving the protocol.
    Candidate(PeerAddrInfo),
    /// Discovery saw the transport shut down.
    TransportClosed,
}

impl From<FeedEvent> for Event {
    fn from(event: FeedEvent) -> Self {
        match event {
            FeedEvent::Candidate(info) => Self::Candidate(info),
            FeedEvent::TransportClosed => Self::TransportClosed,
        }
    }
}

/// Why the coordinator stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Complete,
    Deadline,
    ClientClosed,
    TransportClosed,
    /// The caller dropped the result stream.
    Abandoned,
}

impl Stop {
    /// Failure reported for a peer still in flight when the request stops.
    fn failure(self) -> PeerError {
        match self {
            Self::ClientClosed | Self::Abandoned => PeerError::Cancelled,
            Self::TransportClosed => PeerError::Unreachable(TransportError::Closed),
            Self::Complete | Self::Deadline => PeerError::DeadlineExceeded,
        }
    }
}

pub(super) fn start(
    client: Arc<ClientInner>,
    plan: Plan,
    discovery: Option<Arc<Discovery>>,
) -> Result<Responses, ClientError> {
    let (output, receiver) = mpsc::sync_channel(client.settings.max_concurrent_sends);
    let (events_tx, events_rx) = mpsc::channel();
    let coordinator = Coordinator {
        client,
        command: Arc::new(plan.command),
        threshold: plan.threshold,
        deadline: plan.deadline,
        discovery,
        feed: None,
        scope: Scope::new(),
        events_tx,
        events_rx,
        output,
        attempted: HashSet::new(),
        backlog: VecDeque::new(),
        launched: 0,
        in_flight: HashSet::new(),
    };
    let targets = plan.targets;
    thread::Builder::new()
        .name("peerwire-dispatch".to_owned())
        .spawn(move || coordinator.run(targets))
        .map_err(ClientError::Spawn)?;
    Ok(Responses::new(receiver))
}

struct Coordinator {
    client: Arc<ClientInner>,
    command: Arc<Command>,
    threshold: usize,
    deadline: Instant,
    discovery: Option<Arc<Discovery>>,
    feed: Option<FeedId>,
    /// Request-scoped cancellation; resets every exchange still running.
    scope: Scope,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    output: SyncSender<PeerResponse>,
    attempted: HashSet<PeerId>,
    /// Candidates that arrived while every slot was taken.
    backlog: VecDeque<PeerAddrInfo>,
    /// Peers whose results count towards the threshold.
    launched: usize,
    /// Peers whose workers have not reported yet.
    in_flight: HashSet<PeerId>,
}

impl Coordinator {
    fn run(mut self, targets: Vec<PeerId>) {
        debug!(
            target: CLIENT_TARGET,
            command = self.command.name(),
            targets = targets.len(),
            threshold = self.threshold,
            "dispatching command"
        );
        for peer in targets {
            self.launch(peer, None);
        }
        if self.launched < self.threshold {
            self.subscribe();
        }

        let stop = self.wait();
        debug!(
            target: CLIENT_TARGET,
            command = self.command.name(),
            stop = ?stop,
            in_flight = self.in_flight.len(),
            "request finished"
        );
        if let (Some(discovery), Some(feed)) = (&self.discovery, self.feed.take()) {
            discovery.unsubscribe(feed);
        }
        self.scope.cancel();
        if stop != Stop::Abandoned {
            self.drain(stop);
        }
    }

    fn subscribe(&mut self) {
        let Some(discovery) = self.discovery.clone() else {
            return;
        };
        match discovery.subscribe(self.events_tx.clone()) {
            Ok(feed) => {
                self.feed = Some(feed);
                discovery.request_more();
            }
            Err(error) => {
                debug!(target: CLIENT_TARGET, error = %error, "discovery unavailable");
                self.discovery = None;
            }
        }
    }

    /// Handles events until the request has to stop.
    fn wait(&mut self) -> Stop {
        loop {
            if self.client.scope.is_cancelled() {
                return Stop::ClientClosed;
            }
            if self.client.transport.is_closed() {
                return Stop::TransportClosed;
            }
            let now = Instant::now();
            if now >= self.deadline {
                return Stop::Deadline;
            }
            if self.in_flight.is_empty()
                && (self.launched >= self.threshold || self.discovery.is_none())
            {
                return Stop::Complete;
            }

            let wait = self.deadline.saturating_duration_since(now).min(WATCH_INTERVAL);
            let event = match self.events_rx.recv_timeout(wait) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => continue,
            };
            if let Some(stop) = self.handle(event) {
                return stop;
            }
        }
    }

    fn handle(&mut self, event: Event) -> Option<Stop> {
        match event {
            Event::Finished(response) => {
                self.in_flight.remove(response.peer());
                let fatal = matches!(
                    response.error(),
                    Some(PeerError::Unreachable(error)) if error.is_fatal()
                );
                if !self.forward(response) {
                    return Some(Stop::Abandoned);
                }
                if fatal {
                    return Some(Stop::TransportClosed);
                }
            }
            Event::Unreachable { peer, error } => {
                self.in_flight.remove(&peer);
                self.launched = self.launched.saturating_sub(1);
                if error.is_fatal() {
                    return Some(Stop::TransportClosed);
                }
                debug!(
                    target: CLIENT_TARGET,
                    peer = %peer,
                    error = %error,
                    "discovered peer unreachable"
                );
                if let Some(discovery) = &self.discovery {
                    discovery.forget(&peer);
                }
                self.refill();
            }
            Event::Candidate(info) => {
                if self.attempted.contains(&info.id) {
                    return None;
                }
                if self.launched < self.threshold {
                    self.launch(info.id.clone(), Some(info));
                } else if !self.backlog.iter().any(|queued| queued.id == info.id) {
                    self.backlog.push_back(info);
                }
            }
            Event::TransportClosed => return Some(Stop::TransportClosed),
        }
        None
    }

    /// Moves backlogged candidates into free slots, asking discovery for
    /// more when the backlog runs dry.
    fn refill(&mut self) {
        while self.launched < self.threshold {
            let Some(info) = self.backlog.pop_front() else {
                if let Some(discovery) = &self.discovery {
                    discovery.request_more();
                }
                return;
            };
            if !self.attempted.contains(&info.id) {
                self.launch(info.id.clone(), Some(info));
            }
        }
    }

    /// Reports every peer still in flight. Workers that answer within the
    /// grace period are replaced by the stop failure too, so no exchange
    /// completes after the request has ended.
    fn drain(&mut self, stop: Stop) {
        let started = Instant::now();
        while !self.in_flight.is_empty() {
            let wait = DRAIN_GRACE.saturating_sub(started.elapsed());
            if wait.is_zero() {
                break;
            }
            let peer = match self.events_rx.recv_timeout(wait) {
                Ok(Event::Finished(response)) => response.peer().clone(),
                Ok(Event::Unreachable { peer, .. }) => peer,
                Ok(Event::Candidate(_) | Event::TransportClosed) => continue,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            };
            if !self.in_flight.remove(&peer) {
                continue;
            }
            if !self.forward(PeerResponse::failed(peer, stop.failure())) {
                return;
            }
        }
        let stalled = std::mem::take(&mut self.in_flight);
        for peer in stalled {
            debug!(target: CLIENT_TARGET, peer = %peer, "peer still in flight at request end");
            if !self.forward(PeerResponse::failed(peer, stop.failure())) {
                return;
            }
        }
    }

    fn launch(&mut self, peer: PeerId, discovered: Option<PeerAddrInfo>) {
        self.attempted.insert(peer.clone());
        self.launched += 1;
        self.in_flight.insert(peer.clone());
        let worker = Worker {
            client: Arc::clone(&self.client),
            request: self.scope.clone(),
            command: Arc::clone(&self.command),
            deadline: self.deadline,
            peer: peer.clone(),
            discovered,
            events: self.events_tx.clone(),
        };
        let spawned = thread::Builder::new()
            .name("peerwire-send".to_owned())
            .spawn(move || worker.run());
        if let Err(error) = spawned {
            warn!(target: CLIENT_TARGET, peer = %peer, error = %error, "failed to spawn send worker");
            self.in_flight.remove(&peer);
            // The caller still sees one result per launched peer.
            self.forward(PeerResponse::failed(peer, PeerError::Io(error)));
        }
    }

    /// Hands a result to the caller. Returns `false` once nobody listens.
    fn forward(&self, response: PeerResponse) -> bool {
        if self.output.send(response).is_err() {
            debug!(target: CLIENT_TARGET, command = self.command.name(), "result stream dropped");
            return false;
        }
        true
    }
}

struct Worker {
    client: Arc<ClientInner>,
    request: Scope,
    command: Arc<Command>,
    deadline: Instant,
    peer: PeerId,
    discovered: Option<PeerAddrInfo>,
    events: Sender<Event>,
}

impl Worker {
    fn run(self) {
        let event = self.exchange();
        if self.events.send(event).is_err() {
            debug!(target: CLIENT_TARGET, peer = %self.peer, "request finished before peer answered");
        }
    }

    fn exchange(&self) -> Event {
        let transport = &*self.client.transport;
        let peer = self.peer.clone();
        if let Some(info) = &self.discovered
            && transport.addresses(&info.id).is_empty()
            && let Err(error) = transport.connect(info)
        {
            return Event::Unreachable { peer, error };
        }

        let mut connection = match Connection::open(transport, &peer, &self.client.protocol) {
            Ok(connection) => connection,
            Err(error) if self.discovered.is_some() => {
                return Event::Unreachable { peer, error };
            }
            Err(error) => {
                return Event::Finished(PeerResponse::failed(peer, PeerError::Unreachable(error)));
            }
        };
        let handle = match connection.abort_handle() {
            Ok(handle) => handle,
            Err(error) => return Event::Finished(PeerResponse::failed(peer, PeerError::Io(error))),
        };
        let owned = self.client.scope.track(handle.clone());
        let in_flight = self.request.track(handle);
        let result = round_trip(
            &mut connection,
            &self.command,
            self.deadline,
            self.client.settings.max_frame_bytes,
        );
        in_flight.release();

        match result {
            Ok(response) => {
                connection.upgrade();
                Event::Finished(PeerResponse::received(peer, response, connection, owned))
            }
            Err(error) => {
                let error = if self.client.scope.is_cancelled() {
                    PeerError::Cancelled
                } else if transport.is_closed() {
                    PeerError::Unreachable(TransportError::Closed)
                } else if self.request.is_cancelled() {
                    PeerError::DeadlineExceeded
                } else {
                    error
                };
                debug!(target: CLIENT_TARGET, peer = %peer, error = %error, "exchange failed");
                Event::Finished(PeerResponse::failed(peer, error))
            }
        }
    }
}

/// Writes the command and reads the response, both bounded by `deadline`.
fn round_trip(
    connection: &mut Connection,
    command: &Command,
    deadline: Instant,
    limit: usize,
) -> Result<Response, PeerError> {
    connection
        .set_write_deadline(Some(deadline))
        .map_err(PeerError::from_io)?;
    connection
        .write_command(command)
        .map_err(PeerError::from_codec)?;
    connection
        .set_write_deadline(None)
        .map_err(PeerError::from_io)?;

    connection
        .set_read_deadline(Some(deadline))
        .map_err(PeerError::from_io)?;
    let response = connection
        .read_response(limit)
        .map_err(PeerError::from_codec)?;
    connection
        .set_read_deadline(None)
        .map_err(PeerError::from_io)?;
    Ok(response)
}
