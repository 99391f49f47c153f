//! Test helpers for the transport module.

use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

use super::{ConnectionHandler, ConnectionStream};

/// Passes every accepted socket to the test thread.
pub(crate) struct HandOffHandler {
    accepted: Mutex<Sender<ConnectionStream>>,
}

impl HandOffHandler {
    pub(crate) fn new() -> (Receiver<ConnectionStream>, Self) {
        let (sender, receiver) = mpsc::channel();
        let handler = Self {
            accepted: Mutex::new(sender),
        };
        (receiver, handler)
    }
}

impl ConnectionHandler for HandOffHandler {
    fn handle(&self, stream: ConnectionStream) {
        if let Ok(sender) = self.accepted.lock() {
            let _ = sender.send(stream);
        }
    }
}
