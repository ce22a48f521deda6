// Demultiplexes inbound datagrams to the per-peer DTLS connection task that
// owns them. Distinct from `core::session::SessionTable`: an entry here
// exists from a peer's very first datagram (handshake in progress) until
// its DTLS connection task exits, whereas a `SessionTable` entry only
// exists from handshake completion to teardown.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::identity::PeerIdentity;

pub type PeerPacketTx = mpsc::Sender<Vec<u8>>;

pub struct PacketRouter {
    routes: RwLock<HashMap<PeerIdentity, PeerPacketTx>>,
}

impl PacketRouter {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, peer: PeerIdentity, tx: PeerPacketTx) {
        self.routes.write().await.insert(peer, tx);
        debug!("[router] route registered peer={peer}");
    }

    pub async fn remove(&self, peer: &PeerIdentity) {
        if self.routes.write().await.remove(peer).is_some() {
            debug!("[router] route removed peer={peer}");
        }
    }

    /// Forwards `packet` to the peer's connection task. Returns `false` if
    /// there is no route (the task has already exited) — the caller treats
    /// that the same as the "no session yet, drop" case.
    pub async fn inject(&self, peer: &PeerIdentity, packet: Vec<u8>) -> bool {
        if let Some(tx) = self.routes.read().await.get(peer) {
            tx.send(packet).await.is_ok()
        } else {
            false
        }
    }

    pub async fn contains(&self, peer: &PeerIdentity) -> bool {
        self.routes.read().await.contains_key(peer)
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    /// Drops every route. Used by proxy shutdown alongside aborting the
    /// per-peer tasks themselves, so no stale sender lingers even for a
    /// task that hasn't noticed its abort yet.
    pub async fn clear(&self) {
        self.routes.write().await.clear();
    }
}

impl Default for PacketRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn peer(port: u16) -> PeerIdentity {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        PeerIdentity::new(addr)
    }

    #[tokio::test]
    async fn inject_without_route_returns_false() {
        let router = PacketRouter::new();
        assert!(!router.inject(&peer(1), vec![1, 2, 3]).await);
    }

    #[tokio::test]
    async fn insert_then_inject_delivers() {
        let router = PacketRouter::new();
        let (tx, mut rx) = mpsc::channel(4);
        router.insert(peer(1), tx).await;

        assert!(router.inject(&peer(1), vec![9, 9]).await);
        assert_eq!(rx.recv().await, Some(vec![9, 9]));
    }

    #[tokio::test]
    async fn remove_drops_route() {
        let router = PacketRouter::new();
        let (tx, _rx) = mpsc::channel(4);
        router.insert(peer(1), tx).await;
        router.remove(&peer(1)).await;
        assert!(!router.contains(&peer(1)).await);
    }
}
