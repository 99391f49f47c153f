//! Addresses and advertised protocols of known peers.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use peerwire_config::SocketEndpoint;

use crate::identity::{PeerAddrInfo, PeerId, ProtocolId};

/// What is known about one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerRecord {
    /// Endpoints the peer has been reached at or advertised.
    pub addrs: BTreeSet<SocketEndpoint>,
    /// Protocols from the peer's latest advertisement.
    pub protocols: BTreeSet<ProtocolId>,
}

/// Shared, lock-guarded peer store.
#[derive(Debug, Clone, Default)]
pub struct PeerStore {
    records: Arc<RwLock<HashMap<PeerId, PeerRecord>>>,
}

impl PeerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a peer advertisement. Addresses accumulate; protocols are
    /// replaced by the latest advertisement.
    pub fn record(
        &self,
        peer: &PeerId,
        addrs: impl IntoIterator<Item = SocketEndpoint>,
        protocols: impl IntoIterator<Item = ProtocolId>,
    ) {
        let mut records = self.write();
        let record = records.entry(peer.clone()).or_default();
        record.addrs.extend(addrs);
        record.protocols = protocols.into_iter().collect();
    }

    /// Adds addresses without touching advertised protocols.
    pub fn add_addrs(&self, peer: &PeerId, addrs: impl IntoIterator<Item = SocketEndpoint>) {
        self.write()
            .entry(peer.clone())
            .or_default()
            .addrs
            .extend(addrs);
    }

    /// Removes a peer, returning `true` if it was known.
    pub fn remove(&self, peer: &PeerId) -> bool {
        self.write().remove(peer).is_some()
    }

    /// Snapshot of one peer's record.
    pub fn get(&self, peer: &PeerId) -> Option<PeerRecord> {
        self.read().get(peer).cloned()
    }

    /// Known endpoints for a peer.
    pub fn addresses(&self, peer: &PeerId) -> Vec<SocketEndpoint> {
        self.read()
            .get(peer)
            .map(|record| record.addrs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Advertised protocols for a peer.
    pub fn protocols(&self, peer: &PeerId) -> Vec<ProtocolId> {
        self.read()
            .get(peer)
            .map(|record| record.protocols.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All known peers, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers = self.read().keys().cloned().collect::<Vec<_>>();
        peers.sort_unstable();
        peers
    }

    /// Peers advertising `protocol`, sorted by identity.
    pub fn supporting(&self, protocol: &ProtocolId) -> Vec<PeerAddrInfo> {
        let mut matches = self
            .read()
            .iter()
            .filter(|(_, record)| record.protocols.contains(protocol))
            .map(|(peer, record)| {
                PeerAddrInfo::new(peer.clone(), record.addrs.iter().cloned().collect())
            })
            .collect::<Vec<_>>();
        matches.sort_unstable_by(|left, right| left.id.cmp(&right.id));
        matches
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` when no peer is known.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PeerId, PeerRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PeerId, PeerRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    fn protocol(value: &str) -> ProtocolId {
        ProtocolId::parse(value).expect("protocol")
    }

    #[fixture]
    fn store() -> PeerStore {
        let store = PeerStore::new();
        store.record(
            &PeerId::new("b"),
            [SocketEndpoint::tcp("127.0.0.1", 2)],
            [protocol("/hello/1.0")],
        );
        store.record(
            &PeerId::new("a"),
            [SocketEndpoint::tcp("127.0.0.1", 1)],
            [protocol("/hello/1.0"), protocol("/other/1.0")],
        );
        store
    }

    #[rstest]
    fn filters_by_protocol(store: PeerStore) {
        let hello = store.supporting(&protocol("/hello/1.0"));
        assert_eq!(
            hello.iter().map(|info| info.id.as_str()).collect::<Vec<_>>(),
            ["a", "b"]
        );
        let other = store.supporting(&protocol("/other/1.0"));
        assert_eq!(other.len(), 1);
    }

    #[rstest]
    fn addresses_accumulate_and_protocols_replace(store: PeerStore) {
        let peer = PeerId::new("a");
        store.record(&peer, [SocketEndpoint::tcp("10.0.0.1", 1)], [protocol("/new/1.0")]);

        assert_eq!(store.addresses(&peer).len(), 2);
        assert_eq!(store.protocols(&peer), [protocol("/new/1.0")]);
    }

    #[rstest]
    fn remove_forgets_peer(store: PeerStore) {
        assert!(store.remove(&PeerId::new("a")));
        assert!(!store.remove(&PeerId::new("a")));
        assert_eq!(store.peers(), [PeerId::new("b")]);
    }
}
