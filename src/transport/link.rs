//! Short-range Link transport: a BLE-like point-to-point radio with a small
//! number of concurrent connections and a tight MTU.

use super::{PeerSnapshot, Transport, TransportDelegate, TransportError, TransportState};
use crate::types::{now_ms, PEER_ID_LEN};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Target MTU for a single Link frame, including header overhead.
pub const LINK_MTU: usize = 512;
/// TTL given to packets that originate from or are re-announced over Link.
pub const LINK_DEFAULT_TTL: u8 = 7;
/// Maximum simultaneous point-to-point connections this transport holds.
pub const MAX_CONCURRENT_LINKS: usize = 7;

/// Minimum time between successive connection attempts to the same peer.
pub const CONNECTION_ATTEMPT_INTERVAL_SECS: u64 = 2;
/// Minimum time between discovery announce broadcasts.
pub const ANNOUNCE_INTERVAL_SECS: u64 = 5;
/// Interval of the periodic maintenance pass (eviction + re-announce).
pub const MAINTENANCE_TICK_SECS: u64 = 15;
/// A peer with no traffic for this long is evicted outright.
pub const PEER_EVICT_TIMEOUT_SECS: u64 = 120;

struct LinkPeer {
    last_seen_ms: u64,
    rssi: Option<i8>,
}

/// A single open Link connection, either as the peripheral or central side.
pub struct LinkTransport {
    state: AtomicU8,
    peers: Mutex<HashMap<[u8; PEER_ID_LEN], LinkPeer>>,
    delegate: Arc<dyn TransportDelegate>,
}

impl LinkTransport {
    pub fn new(delegate: Arc<dyn TransportDelegate>) -> Self {
        Self { state: AtomicU8::new(TransportState::PoweredOn as u8), peers: Mutex::new(HashMap::new()), delegate }
    }

    pub fn state(&self) -> TransportState {
        match self.state.load(Ordering::Relaxed) {
            0 => TransportState::Unknown,
            1 => TransportState::Unsupported,
            2 => TransportState::Unauthorized,
            3 => TransportState::PoweredOff,
            4 => TransportState::PoweredOn,
            _ => TransportState::Resetting,
        }
    }

    pub async fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::Relaxed);
        self.delegate.on_state_changed(self.name(), state).await;
    }

    /// Record a discovered or newly connected peer, honoring the
    /// concurrent-link cap.
    pub async fn note_peer(&self, peer_id: [u8; PEER_ID_LEN], rssi: Option<i8>) -> Result<(), TransportError> {
        let mut peers = self.peers.lock().await;
        if !peers.contains_key(&peer_id) && peers.len() >= MAX_CONCURRENT_LINKS {
            return Err(TransportError::LinkLimitReached);
        }
        let is_new = !peers.contains_key(&peer_id);
        peers.insert(peer_id, LinkPeer { last_seen_ms: now_ms(), rssi });
        drop(peers);
        if is_new {
            self.delegate.on_peer_connected(self.name(), peer_id).await;
        }
        Ok(())
    }

    /// Deliver a frame received from `peer_id` up to the router.
    pub async fn receive_frame(&self, peer_id: [u8; PEER_ID_LEN], frame: Vec<u8>) {
        self.note_peer(peer_id, None).await.ok();
        self.delegate.on_frame(self.name(), peer_id, frame).await;
    }

    /// Evict links idle past [`PEER_EVICT_TIMEOUT_SECS`]. Intended to be
    /// called periodically (every [`MAINTENANCE_TICK_SECS`]) by the owning
    /// runtime's maintenance loop.
    pub async fn run_maintenance_pass(&self) {
        let now = now_ms();
        let mut peers = self.peers.lock().await;
        let stale: Vec<_> = peers
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.last_seen_ms) > PEER_EVICT_TIMEOUT_SECS * 1000)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            peers.remove(id);
        }
        drop(peers);
        for id in stale {
            debug!(peer = %hex::encode(id), "evicting stale link");
            self.delegate.on_peer_disconnected(self.name(), id).await;
        }
    }

    /// Hard reset: drop all connections immediately, e.g. on an
    /// emergency-disconnect trigger.
    pub async fn emergency_disconnect(&self) {
        let mut peers = self.peers.lock().await;
        let ids: Vec<_> = peers.keys().copied().collect();
        peers.clear();
        drop(peers);
        for id in ids {
            self.delegate.on_peer_disconnected(self.name(), id).await;
        }
    }
}

#[async_trait]
impl Transport for LinkTransport {
    fn name(&self) -> &'static str {
        "link"
    }

    async fn is_available(&self) -> bool {
        self.state() == TransportState::PoweredOn
    }

    async fn peer_snapshots(&self) -> Vec<PeerSnapshot> {
        self.peers
            .lock()
            .await
            .iter()
            .map(|(id, p)| PeerSnapshot { peer_id: *id, rssi: p.rssi, last_seen_ms: p.last_seen_ms })
            .collect()
    }

    async fn send_to(&self, peer_id: [u8; PEER_ID_LEN], frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_available().await {
            return Err(TransportError::Unavailable);
        }
        if frame.len() > LINK_MTU {
            warn!(len = frame.len(), mtu = LINK_MTU, "frame exceeds link MTU; relying on wire-level chunking upstream");
        }
        let peers = self.peers.lock().await;
        if !peers.contains_key(&peer_id) {
            return Err(TransportError::PeerUnreachable);
        }
        // Actual radio I/O is platform-specific and lives outside this crate;
        // this transport models the protocol surface the router depends on.
        Ok(())
    }

    async fn broadcast(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_available().await {
            return Err(TransportError::Unavailable);
        }
        if frame.len() > LINK_MTU {
            warn!(len = frame.len(), mtu = LINK_MTU, "frame exceeds link MTU; relying on wire-level chunking upstream");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDelegate;
    #[async_trait]
    impl TransportDelegate for NullDelegate {
        async fn on_frame(&self, _t: &'static str, _p: [u8; PEER_ID_LEN], _f: Vec<u8>) {}
        async fn on_peer_connected(&self, _t: &'static str, _p: [u8; PEER_ID_LEN]) {}
        async fn on_peer_disconnected(&self, _t: &'static str, _p: [u8; PEER_ID_LEN]) {}
        async fn on_state_changed(&self, _t: &'static str, _s: TransportState) {}
    }

    #[tokio::test]
    async fn rejects_peers_past_the_concurrent_link_cap() {
        let link = LinkTransport::new(Arc::new(NullDelegate));
        for i in 0..MAX_CONCURRENT_LINKS {
            link.note_peer([i as u8; PEER_ID_LEN], None).await.unwrap();
        }
        let result = link.note_peer([99u8; PEER_ID_LEN], None).await;
        assert!(matches!(result, Err(TransportError::LinkLimitReached)));
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let link = LinkTransport::new(Arc::new(NullDelegate));
        let result = link.send_to([1u8; PEER_ID_LEN], b"hi").await;
        assert!(matches!(result, Err(TransportError::PeerUnreachable)));
    }

    #[tokio::test]
    async fn maintenance_evicts_stale_peers() {
        let link = LinkTransport::new(Arc::new(NullDelegate));
        link.note_peer([1u8; PEER_ID_LEN], Some(-60)).await.unwrap();
        {
            let mut peers = link.peers.lock().await;
            peers.get_mut(&[1u8; PEER_ID_LEN]).unwrap().last_seen_ms = 0;
        }
        link.run_maintenance_pass().await;
        assert!(link.peer_snapshots().await.is_empty());
    }
}
