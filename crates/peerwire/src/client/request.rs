//! Request construction and validation.

use std::time::Duration;

use crate::connection::deadline_after;
use crate::identity::PeerId;
use crate::wire::{Body, Command};

use super::dispatch::{self, Plan};
use super::errors::ClientError;
use super::response::Responses;
use super::Client;

/// A single option applied to a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOption {
    /// Wall time for the whole request. Zero keeps the client default.
    Timeout(Duration),
    /// Number of successful exchanges to aim for. Must be at least 1.
    Threshold(usize),
    /// Command body sent to every peer.
    Body(Body),
    /// Peers to contact instead of discovering them.
    Targets(Vec<PeerId>),
}

/// A command waiting to be dispatched. Built with [`Client::build`].
///
/// Invalid options do not panic; the first one is remembered and reported by
/// [`Request::execute`].
#[derive(Debug)]
pub struct Request {
    client: Client,
    name: String,
    body: Body,
    targets: Vec<PeerId>,
    threshold: usize,
    timeout: Duration,
    error: Option<ClientError>,
}

impl Request {
    pub(crate) fn new(client: Client, name: String) -> Self {
        let settings = client.settings();
        let threshold = settings.default_threshold.max(1);
        let timeout = settings.default_timeout;
        let error = name.trim().is_empty().then_some(ClientError::InvalidCommand {
            reason: "command name must not be empty",
        });
        Self {
            client,
            name,
            body: Body::new(),
            targets: Vec::new(),
            threshold,
            timeout,
            error,
        }
    }

    /// Applies an option.
    #[must_use]
    pub fn with(mut self, option: RequestOption) -> Self {
        match option {
            RequestOption::Timeout(timeout) => {
                if !timeout.is_zero() {
                    self.timeout = timeout;
                }
            }
            RequestOption::Threshold(0) => self.fail(ClientError::InvalidThreshold),
            RequestOption::Threshold(threshold) => self.threshold = threshold,
            RequestOption::Body(body) => self.body = body,
            RequestOption::Targets(peers) => {
                for peer in peers {
                    if !self.targets.contains(&peer) {
                        self.targets.push(peer);
                    }
                }
                self.threshold = self.threshold.max(self.targets.len());
            }
        }
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with(RequestOption::Timeout(timeout))
    }

    /// Sets the success threshold.
    #[must_use]
    pub fn with_threshold(self, threshold: usize) -> Self {
        self.with(RequestOption::Threshold(threshold))
    }

    /// Sets the command body.
    #[must_use]
    pub fn with_body(self, body: Body) -> Self {
        self.with(RequestOption::Body(body))
    }

    /// Targets specific peers. Duplicates are ignored and the threshold grows
    /// to cover every target.
    #[must_use]
    pub fn to(self, peers: impl IntoIterator<Item = PeerId>) -> Self {
        self.with(RequestOption::Targets(peers.into_iter().collect()))
    }

    /// Command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command body.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Explicit targets, in the order they were given.
    pub fn targets(&self) -> &[PeerId] {
        &self.targets
    }

    /// Success threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Dispatches the command and returns the stream of per-peer results.
    ///
    /// Explicit targets are contacted directly, at most `threshold` of them.
    /// Without enough targets the client's discovery loop supplies peers.
    ///
    /// # Errors
    ///
    /// Returns the first invalid option, [`ClientError::Closed`] after the
    /// client was closed, [`ClientError::TransportClosed`] once the transport
    /// has shut down, [`ClientError::ThresholdTooHigh`] when the threshold
    /// exceeds the concurrent send cap, [`ClientError::InvalidTimeout`] when
    /// the timeout overflows the clock, or a discovery or spawn failure.
    pub fn execute(self) -> Result<Responses, ClientError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.client.is_closed() {
            return Err(ClientError::Closed);
        }
        if self.client.shared().transport.is_closed() {
            return Err(ClientError::TransportClosed);
        }
        let limit = self.client.settings().max_concurrent_sends;
        if self.threshold > limit {
            return Err(ClientError::ThresholdTooHigh {
                threshold: self.threshold,
                limit,
            });
        }
        let discovery = if self.targets.len() < self.threshold {
            Some(self.client.discovery()?)
        } else {
            None
        };

        let deadline = deadline_after(self.timeout).ok_or(ClientError::InvalidTimeout {
            timeout: self.timeout,
        })?;
        let mut targets = self.targets;
        targets.truncate(self.threshold);
        let plan = Plan {
            command: Command::new(self.name, self.body),
            targets,
            threshold: self.threshold,
            deadline,
        };
        dispatch::start(self.client.shared(), plan, discovery)
    }

    fn fail(&mut self, error: ClientError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}
