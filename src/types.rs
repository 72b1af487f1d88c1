//! Core data types shared across the wire codec, router, and transports.
//!
//! # Memory budget
//! PeerID is a 16-hex short id on the wire (8 bytes) — the 64-hex full form
//! and out-of-band prefixed forms only ever live in memory or in UI-facing
//! strings, never framed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Application packet types (the `type` byte of a framed packet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Announce,
    Message,
    Leave,
    NoiseHandshake,
    NoiseEncrypted,
    Fragment,
    RequestSync,
    FileTransfer,
}

impl MessageType {
    pub const fn as_byte(self) -> u8 {
        match self {
            MessageType::Announce => 0x01,
            MessageType::Message => 0x02,
            MessageType::Leave => 0x03,
            MessageType::NoiseHandshake => 0x10,
            MessageType::NoiseEncrypted => 0x11,
            MessageType::Fragment => 0x20,
            MessageType::RequestSync => 0x21,
            MessageType::FileTransfer => 0x22,
        }
    }

    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MessageType::Announce),
            0x02 => Some(MessageType::Message),
            0x03 => Some(MessageType::Leave),
            0x10 => Some(MessageType::NoiseHandshake),
            0x11 => Some(MessageType::NoiseEncrypted),
            0x20 => Some(MessageType::Fragment),
            0x21 => Some(MessageType::RequestSync),
            0x22 => Some(MessageType::FileTransfer),
            _ => None,
        }
    }
}

/// Inner subtype carried as the first byte of a decrypted `NoiseEncrypted` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoisePayloadType {
    PrivateMessage,
    ReadReceipt,
    Delivered,
    VerifyChallenge,
    VerifyResponse,
}

impl NoisePayloadType {
    pub const fn as_byte(self) -> u8 {
        match self {
            NoisePayloadType::PrivateMessage => 0x01,
            NoisePayloadType::ReadReceipt => 0x02,
            NoisePayloadType::Delivered => 0x03,
            NoisePayloadType::VerifyChallenge => 0x10,
            NoisePayloadType::VerifyResponse => 0x11,
        }
    }

    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(NoisePayloadType::PrivateMessage),
            0x02 => Some(NoisePayloadType::ReadReceipt),
            0x03 => Some(NoisePayloadType::Delivered),
            0x10 => Some(NoisePayloadType::VerifyChallenge),
            0x11 => Some(NoisePayloadType::VerifyResponse),
            _ => None,
        }
    }
}

/// Number of bytes a short peer id occupies on the wire.
pub const PEER_ID_LEN: usize = 8;

/// A peer identity.
///
/// Three forms coexist: the 64-hex full static public key, the 16-hex short
/// routing id (first 8 bytes of SHA-256(public key)), and prefixed
/// out-of-band forms for address spaces outside the mesh (`mesh:`, `name:`,
/// `noise:`, `nostr:`, `nostr_`). Only the short form ever appears on the
/// wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerId {
    /// 32-byte static public key, displayed as 64 hex characters.
    Full([u8; 32]),
    /// First 8 bytes of SHA-256(public key).
    Short([u8; PEER_ID_LEN]),
    /// An out-of-band address carried verbatim (`mesh:`, `name:`, `noise:`,
    /// `nostr:`, `nostr_` prefixes).
    Prefixed(String),
}

impl PeerId {
    pub fn from_public_key(pubkey: &[u8; 32]) -> Self {
        PeerId::Full(*pubkey)
    }

    /// Collapse any form to the derived 16-hex short id. Deterministic and
    /// stable across invocations.
    pub fn to_short(&self) -> [u8; PEER_ID_LEN] {
        match self {
            PeerId::Short(s) => *s,
            PeerId::Full(pk) => short_id_from_pubkey(pk),
            PeerId::Prefixed(s) => {
                let digest = Sha256::digest(s.as_bytes());
                let mut out = [0u8; PEER_ID_LEN];
                out.copy_from_slice(&digest[..PEER_ID_LEN]);
                out
            }
        }
    }

    pub fn to_short_hex(&self) -> String {
        hex::encode(self.to_short())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerId::Full(pk) => write!(f, "{}", hex::encode(pk)),
            PeerId::Short(s) => write!(f, "{}", hex::encode(s)),
            PeerId::Prefixed(s) => write!(f, "{s}"),
        }
    }
}

/// Derive the 16-hex short peer id from a 32-byte static public key.
pub fn short_id_from_pubkey(pubkey: &[u8; 32]) -> [u8; PEER_ID_LEN] {
    let digest = Sha256::digest(pubkey);
    let mut out = [0u8; PEER_ID_LEN];
    out.copy_from_slice(&digest[..PEER_ID_LEN]);
    out
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Delivery status of an application message, as tracked by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered { to: String, at: u64 },
    Read { by: String, at: u64 },
    Failed { reason: String },
    PartiallyDelivered { reached: u32, total: u32 },
}

/// Application-layer chat message, carried inside `MessageType::Message` or
/// inside a Noise session as `NoisePayloadType::PrivateMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitchatMessage {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub timestamp_ms: u64,
    pub is_relay: bool,
    pub is_private: bool,
    pub original_sender: Option<String>,
    pub recipient_nickname: Option<String>,
    pub sender_peer_id: Option<String>,
    pub mentions: Option<Vec<String>>,
    #[serde(skip)]
    pub delivery_status: Option<DeliveryStatus>,
}

/// Messages longer than this are rejected locally before framing (spec §7
/// policy error).
pub const MAX_MESSAGE_CHARS: usize = 2000;

impl BitchatMessage {
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            content: content.into(),
            timestamp_ms: now_ms(),
            is_relay: false,
            is_private: false,
            original_sender: None,
            recipient_nickname: None,
            sender_peer_id: None,
            mentions: None,
            delivery_status: Some(DeliveryStatus::Sending),
        }
    }

    pub fn validate_policy(&self) -> bool {
        self.content.chars().count() <= MAX_MESSAGE_CHARS
    }
}
