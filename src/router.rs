//! Mesh packet router: deduplication, loop/TTL enforcement, local dispatch,
//! and relay.
//!
//! Every inbound frame passes through [`Router::handle_inbound`] exactly
//! once. Dispatch by packet type happens after the dedup/loop/TTL gate, so a
//! packet that is both addressed to us and eligible for relay (the
//! broadcast case) is delivered locally and forwarded in the same pass.

use crate::noise::session::HandshakeOutcome;
use crate::noise::{NoiseError, SessionManager};
use crate::types::{now_ms, BitchatMessage, MessageType, NoisePayloadType, PeerId, PEER_ID_LEN};
use crate::wire::packet::{Packet, MAX_ROUTE_HOPS};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Maximum number of distinct (sender, timestamp, type, payload-hash) tuples
/// the dedup set remembers at once.
pub const DEDUP_CAPACITY: usize = 10_000;
/// Entries older than this are purged lazily as new ones arrive.
pub const DEDUP_TTL_MS: u64 = 2 * 60 * 1000;
/// Default TTL given to locally originated broadcasts.
pub const DEFAULT_TTL: u8 = 7;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("packet payload could not be decoded as its declared type")]
    Malformed,
    #[error("packet route already contains this node; dropped to break a loop")]
    RouteLoop,
    #[error(transparent)]
    Noise(#[from] NoiseError),
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
}

/// Receives locally dispatched events. Implemented by the application shell
/// (a CLI, a UI bridge); the router only ever calls out through this trait.
#[async_trait]
pub trait RouterDelegate: Send + Sync {
    async fn on_announce(&self, from: PeerId, payload: Vec<u8>);
    async fn on_message(&self, from: PeerId, message: BitchatMessage);
    async fn on_peer_left(&self, from: PeerId);
    async fn on_session_established(&self, peer: PeerId);
    async fn on_handshake_failed(&self, peer: PeerId);
    async fn on_delivery_ack(&self, from: PeerId, kind: NoisePayloadType, message_id: String);
    async fn on_fragment(&self, from: PeerId, payload: Vec<u8>);
    async fn on_request_sync(&self, from: PeerId, payload: Vec<u8>);
    async fn on_file_transfer(&self, from: PeerId, payload: Vec<u8>);
}

/// The outbound side of a transport selector: hand a framed packet off for
/// delivery, broadcast or directed, without the router knowing which radio
/// carries it.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn send_packet(&self, packet: &Packet) -> Result<(), crate::transport::TransportError>;
}

type DedupKey = (String, u64, u8, u64);

struct DedupSet {
    expiry: HashMap<DedupKey, u64>,
    order: VecDeque<DedupKey>,
}

impl DedupSet {
    fn new() -> Self {
        Self { expiry: HashMap::new(), order: VecDeque::new() }
    }

    fn purge_expired(&mut self, now: u64) {
        while let Some(front) = self.order.front() {
            match self.expiry.get(front) {
                Some(&exp) if exp <= now => {
                    let key = self.order.pop_front().unwrap();
                    self.expiry.remove(&key);
                }
                _ => break,
            }
        }
    }

    /// Returns `true` if `key` had not been seen (and is now recorded).
    fn insert_if_new(&mut self, key: DedupKey) -> bool {
        let now = now_ms();
        self.purge_expired(now);
        if self.expiry.contains_key(&key) {
            return false;
        }
        if self.order.len() >= DEDUP_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.expiry.remove(&oldest);
            }
        }
        self.expiry.insert(key.clone(), now + DEDUP_TTL_MS);
        self.order.push_back(key);
        true
    }
}

fn dedup_key(packet: &Packet) -> DedupKey {
    let mut hasher = siphasher::sip::SipHasher13::new();
    packet.payload.hash(&mut hasher);
    let payload_hash = hasher.finish();
    (hex::encode(packet.sender_id), packet.timestamp_ms, packet.msg_type.as_byte(), payload_hash)
}

pub struct Router {
    local_id: [u8; PEER_ID_LEN],
    sessions: Arc<SessionManager>,
    dedup: Mutex<DedupSet>,
    delegate: Arc<dyn RouterDelegate>,
    outbound: Arc<dyn OutboundTransport>,
}

impl Router {
    pub fn new(
        local_id: [u8; PEER_ID_LEN],
        sessions: Arc<SessionManager>,
        delegate: Arc<dyn RouterDelegate>,
        outbound: Arc<dyn OutboundTransport>,
    ) -> Self {
        Self { local_id, sessions, dedup: Mutex::new(DedupSet::new()), delegate, outbound }
    }

    pub async fn handle_inbound(&self, packet: Packet) -> Result<(), RouterError> {
        let key = dedup_key(&packet);
        if !self.dedup.lock().await.insert_if_new(key) {
            return Ok(());
        }
        if packet.route.contains(&self.local_id) {
            return Err(RouterError::RouteLoop);
        }
        if packet.ttl == 0 {
            return Ok(());
        }

        let addressed_to_us = packet.recipient_id.map_or(true, |r| r == self.local_id);
        if addressed_to_us {
            self.deliver_local(&packet).await?;
        }

        // ttl == 1 is delivered at this hop but not forwarded again: relaying it
        // would only hand the next hop a ttl == 0 packet it drops unread.
        let should_relay = packet.ttl > 1 && packet.recipient_id.map_or(true, |r| r != self.local_id);
        if should_relay {
            self.relay(packet).await?;
        }
        Ok(())
    }

    async fn relay(&self, mut packet: Packet) -> Result<(), RouterError> {
        packet.ttl -= 1;
        if packet.version >= 2 {
            if packet.route.len() >= MAX_ROUTE_HOPS {
                return Ok(());
            }
            packet.route.push(self.local_id);
        }
        self.outbound.send_packet(&packet).await?;
        Ok(())
    }

    async fn deliver_local(&self, packet: &Packet) -> Result<(), RouterError> {
        let from = PeerId::Short(packet.sender_id);
        match packet.msg_type {
            MessageType::Announce => self.delegate.on_announce(from, packet.payload.clone()).await,
            MessageType::Message => {
                let msg = crate::message::decode(&packet.payload).map_err(|_| RouterError::Malformed)?;
                self.delegate.on_message(from, msg).await;
            }
            MessageType::Leave => self.delegate.on_peer_left(from).await,
            MessageType::NoiseHandshake => self.handle_handshake(packet).await?,
            MessageType::NoiseEncrypted => self.handle_encrypted(packet).await?,
            MessageType::Fragment => self.delegate.on_fragment(from, packet.payload.clone()).await,
            MessageType::RequestSync => self.delegate.on_request_sync(from, packet.payload.clone()).await,
            MessageType::FileTransfer => self.delegate.on_file_transfer(from, packet.payload.clone()).await,
        }
        Ok(())
    }

    async fn handle_handshake(&self, packet: &Packet) -> Result<(), RouterError> {
        let peer_hex = hex::encode(packet.sender_id);
        let peer = PeerId::Short(packet.sender_id);
        match self.sessions.handle_handshake_frame(&peer_hex, &packet.payload).await {
            HandshakeOutcome::Reply(bytes) => self.send_handshake_frame(packet.sender_id, bytes).await?,
            HandshakeOutcome::ReplyThenEstablished(bytes) => {
                self.send_handshake_frame(packet.sender_id, bytes).await?;
                self.delegate.on_session_established(peer).await;
            }
            HandshakeOutcome::Established => self.delegate.on_session_established(peer).await,
            HandshakeOutcome::Pending | HandshakeOutcome::Ignored => {}
            HandshakeOutcome::Failed => {
                self.sessions.evict(&peer_hex).await;
                self.delegate.on_handshake_failed(peer).await;
            }
        }
        Ok(())
    }

    async fn handle_encrypted(&self, packet: &Packet) -> Result<(), RouterError> {
        let peer_hex = hex::encode(packet.sender_id);
        let peer = PeerId::Short(packet.sender_id);
        let plaintext = match self.sessions.decrypt_from(&peer_hex, &packet.payload).await {
            Ok(bytes) => bytes,
            Err(_) => {
                self.delegate.on_handshake_failed(peer).await;
                return Ok(());
            }
        };
        let (kind_byte, body) = plaintext.split_first().ok_or(RouterError::Malformed)?;
        let kind = NoisePayloadType::from_byte(*kind_byte).ok_or(RouterError::Malformed)?;
        match kind {
            NoisePayloadType::PrivateMessage => {
                let msg = crate::message::decode(body).map_err(|_| RouterError::Malformed)?;
                let message_id = msg.id.clone();
                self.delegate.on_message(peer.clone(), msg).await;
                self.send_delivery_ack(packet.sender_id, message_id).await?;
            }
            NoisePayloadType::ReadReceipt | NoisePayloadType::Delivered => {
                let message_id = String::from_utf8_lossy(body).into_owned();
                self.delegate.on_delivery_ack(peer, kind, message_id).await;
            }
            NoisePayloadType::VerifyChallenge | NoisePayloadType::VerifyResponse => {
                self.delegate.on_request_sync(peer, body.to_vec()).await;
            }
        }
        Ok(())
    }

    async fn send_handshake_frame(&self, recipient: [u8; PEER_ID_LEN], payload: Vec<u8>) -> Result<(), RouterError> {
        let packet = Packet::new_broadcast(MessageType::NoiseHandshake, DEFAULT_TTL, self.local_id, payload)
            .with_recipient(recipient);
        self.dedup.lock().await.insert_if_new(dedup_key(&packet));
        self.outbound.send_packet(&packet).await?;
        Ok(())
    }

    async fn send_delivery_ack(&self, recipient: [u8; PEER_ID_LEN], message_id: String) -> Result<(), RouterError> {
        let mut body = vec![NoisePayloadType::Delivered.as_byte()];
        body.extend_from_slice(message_id.as_bytes());
        self.send_private_raw(recipient, body).await
    }

    /// Encrypt `body` (already prefixed with its `NoisePayloadType` byte) to
    /// an established peer and send it as a `NoiseEncrypted` packet.
    async fn send_private_raw(&self, recipient: [u8; PEER_ID_LEN], body: Vec<u8>) -> Result<(), RouterError> {
        let peer_hex = hex::encode(recipient);
        let ciphertext = self.sessions.encrypt_for(&peer_hex, &body).await?;
        let packet = Packet::new_broadcast(MessageType::NoiseEncrypted, DEFAULT_TTL, self.local_id, ciphertext)
            .with_recipient(recipient);
        self.dedup.lock().await.insert_if_new(dedup_key(&packet));
        self.outbound.send_packet(&packet).await?;
        Ok(())
    }

    /// Send a private application message to an already-established peer.
    pub async fn send_private_message(&self, recipient: [u8; PEER_ID_LEN], message: &BitchatMessage) -> Result<(), RouterError> {
        let mut body = vec![NoisePayloadType::PrivateMessage.as_byte()];
        body.extend_from_slice(&crate::message::encode(message).map_err(|_| RouterError::Malformed)?);
        self.send_private_raw(recipient, body).await
    }

    /// Broadcast an application message in the clear to the whole mesh.
    pub async fn send_broadcast_message(&self, message: &BitchatMessage) -> Result<(), RouterError> {
        let payload = crate::message::encode(message).map_err(|_| RouterError::Malformed)?;
        let packet = Packet::new_broadcast(MessageType::Message, DEFAULT_TTL, self.local_id, payload);
        self.dedup.lock().await.insert_if_new(dedup_key(&packet));
        self.outbound.send_packet(&packet).await?;
        Ok(())
    }

    pub async fn send_announce(&self, payload: Vec<u8>) -> Result<(), RouterError> {
        let packet = Packet::new_broadcast(MessageType::Announce, DEFAULT_TTL, self.local_id, payload);
        self.dedup.lock().await.insert_if_new(dedup_key(&packet));
        self.outbound.send_packet(&packet).await?;
        Ok(())
    }

    /// Begin a Noise handshake with `recipient` as initiator.
    pub async fn initiate_handshake(&self, recipient: [u8; PEER_ID_LEN]) -> Result<(), RouterError> {
        let peer_hex = hex::encode(recipient);
        let msg1 = self.sessions.initiate(&peer_hex).await;
        self.send_handshake_frame(recipient, msg1).await
    }
}
