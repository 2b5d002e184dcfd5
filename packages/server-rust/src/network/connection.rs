//! Accepted server connections and the registry tracking them.
//!
//! Each connection gets a close signal (`watch` channel) so the server can
//! ask it to stop reading while it finishes writing outstanding responses.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// Identifies an accepted connection within its server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Handle to one accepted connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Address of the consuming peer.
    pub peer_addr: SocketAddr,
    close_tx: watch::Sender<bool>,
}

impl ConnectionHandle {
    /// Asks the connection to stop reading requests. Responses to requests
    /// already received are still written before the socket closes.
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }
}

/// Open connections of one server, keyed by id.
#[derive(Debug)]
pub struct ConnectionRegistry {
    open: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a connection from `peer_addr`. The returned receiver is the close
    /// signal the connection's driver watches.
    pub fn register(&self, peer_addr: SocketAddr) -> (Arc<ConnectionHandle>, watch::Receiver<bool>) {
        let (close_tx, close_rx) = watch::channel(false);
        let handle = Arc::new(ConnectionHandle {
            id: ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            peer_addr,
            close_tx,
        });
        self.open.insert(handle.id, Arc::clone(&handle));
        (handle, close_rx)
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.open.remove(&id).map(|(_, handle)| handle)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.open.len()
    }

    /// Empties the registry, handing back every connection it held.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        // Removing while iterating a DashMap shard deadlocks.
        let ids: Vec<ConnectionId> = self.open.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        ([127, 0, 0, 1], port).into()
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let registry = ConnectionRegistry::new();
        let (first, _first_rx) = registry.register(peer(5001));
        let (second, _second_rx) = registry.register(peer(5002));

        assert_eq!(first.id, ConnectionId(1));
        assert_eq!(second.id, ConnectionId(2));
        assert_eq!(second.peer_addr, peer(5002));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn remove_forgets_connection() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(peer(5001));

        assert_eq!(registry.remove(handle.id).map(|h| h.peer_addr), Some(peer(5001)));
        assert!(registry.remove(handle.id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn drain_all_hands_back_every_connection() {
        let registry = ConnectionRegistry::new();
        let receivers: Vec<_> = (5001..5004).map(|port| registry.register(peer(port)).1).collect();

        let drained = registry.drain_all();
        assert_eq!(drained.len(), receivers.len());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn close_signals_driver() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = registry.register(peer(5001));
        assert!(!*rx.borrow());

        handle.close();
        assert!(*rx.borrow());
    }
}
