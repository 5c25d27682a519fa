use super::BoxWriter;
use parking_lot::Mutex;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;

/// One live connection.
pub(crate) struct Peer {
    pub(crate) addr: SocketAddr,
    /// Held across the write contract, so concurrent sends to the same peer
    /// never interleave.
    pub(crate) writer: tokio::sync::Mutex<BoxWriter>,
    /// Ends this connection's read task.
    pub(crate) cancel: CancellationToken,
}

impl Peer {
    pub(crate) fn new(addr: SocketAddr, writer: BoxWriter, cancel: CancellationToken) -> Self {
        Self {
            addr,
            writer: tokio::sync::Mutex::new(writer),
            cancel,
        }
    }
}

/// Live connections keyed by remote address. The lock is never held across
/// an await.
#[derive(Default)]
pub(crate) struct PeerRegistry {
    peers: Mutex<HashMap<SocketAddr, Arc<Peer>>>,
}

impl PeerRegistry {
    /// Returns `false`, leaving the map untouched, if the address is already
    /// registered.
    pub(crate) fn register(&self, peer: Arc<Peer>) -> bool {
        let mut peers = self.peers.lock();
        if peers.contains_key(&peer.addr) {
            return false;
        }
        peers.insert(peer.addr, peer);
        true
    }

    pub(crate) fn get(&self, addr: &SocketAddr) -> Option<Arc<Peer>> {
        self.peers.lock().get(addr).cloned()
    }

    /// Removes `peer` if it is the registered entry for its address.
    /// Returns `false` if it was not.
    pub(crate) fn deregister(&self, peer: &Arc<Peer>) -> bool {
        let mut peers = self.peers.lock();
        match peers.get(&peer.addr) {
            Some(registered) if Arc::ptr_eq(registered, peer) => {
                peers.remove(&peer.addr);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.lock().values().cloned().collect()
    }

    pub(crate) fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.lock().keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(addr: &str) -> Arc<Peer> {
        Arc::new(Peer::new(
            addr.parse().unwrap(),
            Box::new(tokio::io::sink()),
            CancellationToken::new(),
        ))
    }

    #[test]
    fn one_entry_per_address() {
        let registry = PeerRegistry::default();
        let first = peer("127.0.0.1:5000");
        let duplicate = peer("127.0.0.1:5000");

        assert!(registry.register(Arc::clone(&first)));
        assert!(!registry.register(Arc::clone(&duplicate)));
        assert_eq!(registry.len(), 1);

        assert!(!registry.deregister(&duplicate));
        assert!(registry.get(&first.addr).is_some());

        assert!(registry.deregister(&first));
        assert!(!registry.deregister(&first));
        assert_eq!(registry.len(), 0);
        assert!(registry.addrs().is_empty());
    }
}
