//! Rendezvous-radio transport: broadcast/pub-sub delivery with L2
//! fragmentation for a small (~255 byte) message ceiling.
//!
//! Every wire frame carries a single leading marker byte: [`SINGLE_MARKER`]
//! for a frame that fits in one message, or [`FRAGMENT_MARKER`] followed by
//! a 6-byte header (`msg_id: u16 BE`, `index: u16 BE`, `count: u16 BE`) and
//! up to [`MAX_FRAGMENT_PAYLOAD`] bytes of the original frame.

use super::{PeerSnapshot, Transport, TransportDelegate, TransportError, TransportState};
use crate::types::{now_ms, PEER_ID_LEN};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// This radio's practical single-message ceiling before fragmentation,
/// including the marker byte.
pub const MAX_MESSAGE_LEN: usize = 255;
const SINGLE_MARKER: u8 = 0x00;
const FRAGMENT_MARKER: u8 = 0x01;
const FRAGMENT_HEADER_LEN: usize = 6;
/// Payload bytes carried per fragment after the marker and header.
pub const MAX_FRAGMENT_PAYLOAD: usize = MAX_MESSAGE_LEN - 1 - FRAGMENT_HEADER_LEN;
/// Incomplete reassembly buffers older than this are dropped.
pub const REASSEMBLY_TIMEOUT_SECS: u64 = 30;

type ReassemblyKey = ([u8; PEER_ID_LEN], u16);

struct ReassemblyBuffer {
    count: u16,
    parts: HashMap<u16, Vec<u8>>,
    started_ms: u64,
}

struct PeerInfo {
    last_seen_ms: u64,
}

pub struct RendezvousTransport {
    state: AtomicU8,
    peers: Mutex<HashMap<[u8; PEER_ID_LEN], PeerInfo>>,
    reassembly: Mutex<HashMap<ReassemblyKey, ReassemblyBuffer>>,
    next_msg_id: AtomicU16,
    delegate: Arc<dyn TransportDelegate>,
}

impl RendezvousTransport {
    pub fn new(delegate: Arc<dyn TransportDelegate>) -> Self {
        Self {
            state: AtomicU8::new(TransportState::PoweredOn as u8),
            peers: Mutex::new(HashMap::new()),
            reassembly: Mutex::new(HashMap::new()),
            next_msg_id: AtomicU16::new(0),
            delegate,
        }
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

    pub fn set_state_sync(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Split `frame` into wire-ready fragments if it exceeds the single
    /// message ceiling; otherwise returns it as one `SINGLE_MARKER`-prefixed
    /// chunk.
    fn fragment(frame: &[u8], msg_id: u16) -> Vec<Vec<u8>> {
        if frame.len() + 1 <= MAX_MESSAGE_LEN {
            let mut single = Vec::with_capacity(1 + frame.len());
            single.push(SINGLE_MARKER);
            single.extend_from_slice(frame);
            return vec![single];
        }
        let chunks: Vec<&[u8]> = frame.chunks(MAX_FRAGMENT_PAYLOAD).collect();
        let count = chunks.len() as u16;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut out = Vec::with_capacity(1 + FRAGMENT_HEADER_LEN + chunk.len());
                out.push(FRAGMENT_MARKER);
                out.extend_from_slice(&msg_id.to_be_bytes());
                out.extend_from_slice(&(i as u16).to_be_bytes());
                out.extend_from_slice(&count.to_be_bytes());
                out.extend_from_slice(chunk);
                out
            })
            .collect()
    }

    /// Feed a raw inbound frame through fragment reassembly. Returns the
    /// reassembled frame once every fragment of its message has arrived.
    pub async fn ingest(&self, peer_id: [u8; PEER_ID_LEN], frame: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        {
            let mut peers = self.peers.lock().await;
            peers.entry(peer_id).or_insert(PeerInfo { last_seen_ms: now_ms() }).last_seen_ms = now_ms();
        }

        let marker = *frame.first().ok_or(TransportError::ReassemblyFailed)?;
        if marker == SINGLE_MARKER {
            return Ok(Some(frame[1..].to_vec()));
        }
        if marker != FRAGMENT_MARKER {
            return Err(TransportError::ReassemblyFailed);
        }
        if frame.len() < 1 + FRAGMENT_HEADER_LEN {
            return Err(TransportError::ReassemblyFailed);
        }
        let msg_id = u16::from_be_bytes(frame[1..3].try_into().unwrap());
        let index = u16::from_be_bytes(frame[3..5].try_into().unwrap());
        let count = u16::from_be_bytes(frame[5..7].try_into().unwrap());
        if count == 0 || index >= count {
            return Err(TransportError::ReassemblyFailed);
        }
        let payload = frame[7..].to_vec();

        let key = (peer_id, msg_id);
        let mut table = self.reassembly.lock().await;
        self.purge_expired(&mut table);

        let buf = table.entry(key).or_insert_with(|| ReassemblyBuffer { count, parts: HashMap::new(), started_ms: now_ms() });
        // Duplicate fragments are ignored: the first delivery for a given
        // index wins.
        buf.parts.entry(index).or_insert(payload);

        if buf.parts.len() as u16 >= buf.count {
            let buf = table.remove(&key).unwrap();
            let mut whole = Vec::new();
            for i in 0..buf.count {
                match buf.parts.get(&i) {
                    Some(part) => whole.extend_from_slice(part),
                    None => return Err(TransportError::ReassemblyFailed),
                }
            }
            Ok(Some(whole))
        } else {
            Ok(None)
        }
    }

    fn purge_expired(&self, table: &mut HashMap<ReassemblyKey, ReassemblyBuffer>) {
        let now = now_ms();
        table.retain(|_, buf| now.saturating_sub(buf.started_ms) <= REASSEMBLY_TIMEOUT_SECS * 1000);
    }

    /// Feed a raw on-air frame from `peer_id` through fragment reassembly
    /// and, once a message is complete, deliver it up to the router.
    pub async fn receive_frame(&self, peer_id: [u8; PEER_ID_LEN], frame: Vec<u8>) {
        match self.ingest(peer_id, &frame).await {
            Ok(Some(whole)) => self.delegate.on_frame(self.name(), peer_id, whole).await,
            Ok(None) => {}
            Err(e) => warn!(peer = %hex::encode(peer_id), error = %e, "dropping malformed rendezvous frame"),
        }
    }
}

#[async_trait]
impl Transport for RendezvousTransport {
    fn name(&self) -> &'static str {
        "rendezvous"
    }

    async fn is_available(&self) -> bool {
        self.state() == TransportState::PoweredOn
    }

    async fn peer_snapshots(&self) -> Vec<PeerSnapshot> {
        self.peers
            .lock()
            .await
            .iter()
            .map(|(id, p)| PeerSnapshot { peer_id: *id, rssi: None, last_seen_ms: p.last_seen_ms })
            .collect()
    }

    async fn send_to(&self, _peer_id: [u8; PEER_ID_LEN], frame: &[u8]) -> Result<(), TransportError> {
        // This is a broadcast-only medium; directed delivery means "send
        // and let the recipient filter on the packet's recipient field".
        self.broadcast(frame).await
    }

    async fn broadcast(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_available().await {
            return Err(TransportError::Unavailable);
        }
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let _fragments = Self::fragment(frame, msg_id);
        // Actual radio broadcast I/O is platform-specific; this transport
        // models the fragmentation contract the router depends on.
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

    #[test]
    fn small_frame_is_not_fragmented() {
        let frame = vec![0u8; 50];
        let fragments = RendezvousTransport::fragment(&frame, 1);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0][0], SINGLE_MARKER);
        assert_eq!(&fragments[0][1..], &frame[..]);
    }

    #[test]
    fn large_frame_splits_into_multiple_fragments() {
        let frame = vec![7u8; 1000];
        let fragments = RendezvousTransport::fragment(&frame, 42);
        assert!(fragments.len() > 1);
        for f in &fragments {
            assert_eq!(f[0], FRAGMENT_MARKER);
            assert!(f.len() <= MAX_MESSAGE_LEN);
        }
    }

    #[tokio::test]
    async fn reassembles_fragments_delivered_out_of_order() {
        let transport = RendezvousTransport::new(Arc::new(NullDelegate));
        let original = vec![3u8; 700];
        let fragments = RendezvousTransport::fragment(&original, 5);
        let peer = [1u8; PEER_ID_LEN];

        let mut reassembled = None;
        for frag in fragments.iter().rev() {
            reassembled = transport.ingest(peer, frag).await.unwrap();
        }
        assert_eq!(reassembled, Some(original));
    }

    #[tokio::test]
    async fn unfragmented_frame_round_trips_through_marker() {
        let transport = RendezvousTransport::new(Arc::new(NullDelegate));
        let frame = vec![1, 2, 3];
        let marked = RendezvousTransport::fragment(&frame, 0).remove(0);
        let result = transport.ingest([2u8; PEER_ID_LEN], &marked).await.unwrap();
        assert_eq!(result, Some(frame));
    }

    #[tokio::test]
    async fn duplicate_fragment_is_ignored_and_first_delivery_wins() {
        let transport = RendezvousTransport::new(Arc::new(NullDelegate));
        let original = vec![9u8; 700];
        let fragments = RendezvousTransport::fragment(&original, 7);
        let peer = [3u8; PEER_ID_LEN];

        // A tampered duplicate of fragment 0, delivered first.
        let mut tampered_first = fragments[0].clone();
        *tampered_first.last_mut().unwrap() ^= 0xFF;

        transport.ingest(peer, &tampered_first).await.unwrap();
        // The genuine fragment 0 arrives second — it must be ignored.
        transport.ingest(peer, &fragments[0]).await.unwrap();

        let mut reassembled = None;
        for frag in fragments.iter().skip(1) {
            reassembled = transport.ingest(peer, frag).await.unwrap();
        }
        let result = reassembled.unwrap();
        assert_ne!(result, original, "the tampered first delivery should have won");
        assert_eq!(&result[MAX_FRAGMENT_PAYLOAD - 1], tampered_first.last().unwrap());
    }

    #[tokio::test]
    async fn fragment_with_index_past_count_is_rejected() {
        let transport = RendezvousTransport::new(Arc::new(NullDelegate));
        let mut bad = vec![FRAGMENT_MARKER];
        bad.extend_from_slice(&1u16.to_be_bytes()); // msg_id
        bad.extend_from_slice(&5u16.to_be_bytes()); // index
        bad.extend_from_slice(&3u16.to_be_bytes()); // count (index >= count)
        bad.extend_from_slice(&[1, 2, 3]);
        let result = transport.ingest([4u8; PEER_ID_LEN], &bad).await;
        assert!(matches!(result, Err(TransportError::ReassemblyFailed)));
    }

    #[tokio::test]
    async fn fragment_with_zero_count_is_rejected() {
        let transport = RendezvousTransport::new(Arc::new(NullDelegate));
        let mut bad = vec![FRAGMENT_MARKER];
        bad.extend_from_slice(&1u16.to_be_bytes());
        bad.extend_from_slice(&0u16.to_be_bytes());
        bad.extend_from_slice(&0u16.to_be_bytes());
        let result = transport.ingest([5u8; PEER_ID_LEN], &bad).await;
        assert!(matches!(result, Err(TransportError::ReassemblyFailed)));
    }
}
