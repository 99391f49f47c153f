//! Cancellation scopes shared by clients and services.
//!
//! A scope owns a cancellation flag plus the abort handles of every
//! connection currently working on its behalf. Cancelling the scope resets
//! those connections so blocked reads and writes return immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::connection::AbortHandle;

/// Cancellation scope handed to handlers and owned by clients.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

#[derive(Debug, Default)]
struct ScopeInner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, AbortHandle>>,
}

impl Scope {
    /// Creates a fresh, uncancelled scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the scope has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancels the scope and resets every tracked connection.
    ///
    /// Returns `false` when the scope was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let handles = self.live().drain().map(|(_, handle)| handle).collect::<Vec<_>>();
        for handle in handles {
            handle.reset();
        }
        true
    }

    /// Number of connections currently tracked.
    pub fn tracked(&self) -> usize {
        self.live().len()
    }

    /// Registers a connection for the lifetime of the returned guard.
    ///
    /// A connection tracked on an already-cancelled scope is reset at once.
    pub(crate) fn track(&self, handle: AbortHandle) -> TrackGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if self.is_cancelled() {
            handle.reset();
        } else {
            self.live().insert(id, handle);
        }
        TrackGuard {
            scope: self.clone(),
            id,
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<u64, AbortHandle>> {
        self.inner.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a connection registered with its scope until dropped.
#[derive(Debug)]
pub(crate) struct TrackGuard {
    scope: Scope,
    id: u64,
}

impl TrackGuard {
    /// Stops tracking without touching the connection.
    pub(crate) fn release(self) {
        drop(self);
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.scope.live().remove(&self.id);
    }
}
