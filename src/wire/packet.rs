//! Packet header flags, framing, and the byte-exact encode/decode pair.
//!
//! ```text
//! v1 header (14 B): ver(1) type(1) ttl(1) ts(8) flags(1) payload_len(2)
//! v2 header (16 B): ver(1) type(1) ttl(1) ts(8) flags(1) payload_len(4)
//! ```
//!
//! All multi-byte integers are big-endian. After the header: `sender_id`
//! (8 B); `recipient_id` (8 B) if `HAS_RECIPIENT`; route (v2 only, if
//! `HAS_ROUTE`): 1-byte hop count N followed by N × 8 bytes; the payload
//! section (optionally compressed); `signature` (64 B) if `HAS_SIGNATURE`.

use super::compression;
use super::padding;
use super::{WireError, MAX_PAYLOAD_LEN};
use crate::types::{MessageType, PEER_ID_LEN};

/// Maximum hops a route list may carry in practice (the wire format allows
/// up to 255 via the 1-byte count; the router caps appends at this value).
pub const MAX_ROUTE_HOPS: usize = 10;

const V1_HEADER_LEN: usize = 14;
const V2_HEADER_LEN: usize = 16;
const SIGNATURE_LEN: usize = 64;

/// Flag bits of the packet header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags(pub u8);

impl PacketFlags {
    pub const HAS_RECIPIENT: u8 = 0x01;
    pub const HAS_SIGNATURE: u8 = 0x02;
    pub const IS_COMPRESSED: u8 = 0x04;
    pub const HAS_ROUTE: u8 = 0x08;
    pub const IS_RSR: u8 = 0x10;

    pub fn has_recipient(self) -> bool {
        self.0 & Self::HAS_RECIPIENT != 0
    }
    pub fn has_signature(self) -> bool {
        self.0 & Self::HAS_SIGNATURE != 0
    }
    pub fn is_compressed(self) -> bool {
        self.0 & Self::IS_COMPRESSED != 0
    }
    pub fn has_route(self) -> bool {
        self.0 & Self::HAS_ROUTE != 0
    }
    pub fn is_rsr(self) -> bool {
        self.0 & Self::IS_RSR != 0
    }

    fn with(mut self, bit: u8, set: bool) -> Self {
        if set {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
        self
    }
}

/// A framed mesh packet. `payload` always holds the logical (decompressed)
/// application bytes — compression is an on-wire transport detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub msg_type: MessageType,
    pub ttl: u8,
    pub timestamp_ms: u64,
    pub sender_id: [u8; PEER_ID_LEN],
    pub recipient_id: Option<[u8; PEER_ID_LEN]>,
    pub route: Vec<[u8; PEER_ID_LEN]>,
    pub payload: Vec<u8>,
    pub signature: Option<[u8; SIGNATURE_LEN]>,
    pub is_rsr: bool,
}

impl Packet {
    pub fn new_broadcast(msg_type: MessageType, ttl: u8, sender_id: [u8; PEER_ID_LEN], payload: Vec<u8>) -> Self {
        Self {
            version: 1,
            msg_type,
            ttl,
            timestamp_ms: crate::types::now_ms(),
            sender_id,
            recipient_id: None,
            route: Vec::new(),
            payload,
            signature: None,
            is_rsr: false,
        }
    }

    pub fn with_recipient(mut self, recipient_id: [u8; PEER_ID_LEN]) -> Self {
        self.recipient_id = Some(recipient_id);
        self
    }

    pub fn with_signature(mut self, signature: [u8; SIGNATURE_LEN]) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient_id.is_none()
    }

    fn flags(&self) -> PacketFlags {
        PacketFlags::default()
            .with(PacketFlags::HAS_RECIPIENT, self.recipient_id.is_some())
            .with(PacketFlags::HAS_SIGNATURE, self.signature.is_some())
            .with(PacketFlags::HAS_ROUTE, self.version >= 2 && !self.route.is_empty())
            .with(PacketFlags::IS_RSR, self.is_rsr)
    }

    /// Encode the packet, optionally padding the frame to a standard block
    /// size. Returns the wire bytes.
    pub fn encode(&self, pad: bool) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }
        if self.route.len() > 255 {
            return Err(WireError::InvalidRoute("route exceeds 255 hops"));
        }

        let compressed = compression::compress_if_beneficial(&self.payload);
        let mut flags = self.flags();
        if compressed.is_some() {
            flags.0 |= PacketFlags::IS_COMPRESSED;
        }

        let is_v2 = self.version >= 2;
        let mut body = Vec::new();
        body.extend_from_slice(&self.sender_id);
        if let Some(recipient) = &self.recipient_id {
            body.extend_from_slice(recipient);
        }
        if is_v2 && flags.has_route() {
            body.push(self.route.len() as u8);
            for hop in &self.route {
                body.extend_from_slice(hop);
            }
        }

        let payload_section = match &compressed {
            Some((bytes, original_len)) => {
                let mut section = Vec::new();
                if is_v2 {
                    section.extend_from_slice(&(*original_len as u32).to_be_bytes());
                } else {
                    if *original_len > u16::MAX as usize {
                        return Err(WireError::PayloadTooLarge(*original_len));
                    }
                    section.extend_from_slice(&(*original_len as u16).to_be_bytes());
                }
                section.extend_from_slice(bytes);
                section
            }
            None => self.payload.clone(),
        };
        let payload_len = payload_section.len();
        body.extend_from_slice(&payload_section);

        if let Some(sig) = &self.signature {
            body.extend_from_slice(sig);
        }

        let mut out = Vec::with_capacity(if is_v2 { V2_HEADER_LEN } else { V1_HEADER_LEN } + body.len());
        out.push(self.version);
        out.push(self.msg_type.as_byte());
        out.push(self.ttl);
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        out.push(flags.0);
        if is_v2 {
            if payload_len > u32::MAX as usize {
                return Err(WireError::PayloadTooLarge(payload_len));
            }
            out.extend_from_slice(&(payload_len as u32).to_be_bytes());
        } else {
            if payload_len > u16::MAX as usize {
                return Err(WireError::PayloadTooLarge(payload_len));
            }
            out.extend_from_slice(&(payload_len as u16).to_be_bytes());
        }
        out.extend_from_slice(&body);

        if pad {
            Ok(padding::pad(&out))
        } else {
            Ok(out)
        }
    }

    /// Decode a packet from wire bytes. First attempts a literal decode;
    /// only on failure does it try stripping PKCS#7 padding, and only
    /// accepts that result if stripping actually changed the bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        match decode_core(bytes) {
            Ok(packet) => Ok(packet),
            Err(first_err) => match padding::strip(bytes) {
                Some(stripped) if stripped != bytes => decode_core(&stripped),
                _ => Err(first_err),
            },
        }
    }
}

fn decode_core(bytes: &[u8]) -> Result<Packet, WireError> {
    if bytes.is_empty() {
        return Err(WireError::Truncated);
    }
    let version = bytes[0];
    let header_len = match version {
        1 => V1_HEADER_LEN,
        2 => V2_HEADER_LEN,
        other => return Err(WireError::UnsupportedVersion(other)),
    };
    if bytes.len() < header_len {
        return Err(WireError::Truncated);
    }

    let msg_type = MessageType::from_byte(bytes[1]).ok_or(WireError::Malformed("unknown message type"))?;
    let ttl = bytes[2];
    let timestamp_ms = u64::from_be_bytes(bytes[3..11].try_into().unwrap());
    let flags = PacketFlags(bytes[11]);

    let (payload_len, mut cursor) = if version == 1 {
        (u16::from_be_bytes(bytes[12..14].try_into().unwrap()) as usize, V1_HEADER_LEN)
    } else {
        (u32::from_be_bytes(bytes[12..16].try_into().unwrap()) as usize, V2_HEADER_LEN)
    };
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(WireError::PayloadTooLarge(payload_len));
    }

    let sender_id = read_peer_id(bytes, &mut cursor)?;

    let recipient_id = if flags.has_recipient() {
        Some(read_peer_id(bytes, &mut cursor)?)
    } else {
        None
    };

    let mut route = Vec::new();
    if version >= 2 && flags.has_route() {
        let hop_count = *bytes.get(cursor).ok_or(WireError::Truncated)? as usize;
        cursor += 1;
        for _ in 0..hop_count {
            route.push(read_peer_id(bytes, &mut cursor)?);
        }
    }

    let payload_end = cursor.checked_add(payload_len).ok_or(WireError::Truncated)?;
    if payload_end > bytes.len() {
        return Err(WireError::Truncated);
    }
    let payload_section = &bytes[cursor..payload_end];
    cursor = payload_end;

    let payload = if flags.is_compressed() {
        let (len_width, original_len) = if version == 1 {
            if payload_section.len() < 2 {
                return Err(WireError::Truncated);
            }
            (2, u16::from_be_bytes(payload_section[0..2].try_into().unwrap()) as usize)
        } else {
            if payload_section.len() < 4 {
                return Err(WireError::Truncated);
            }
            (4, u32::from_be_bytes(payload_section[0..4].try_into().unwrap()) as usize)
        };
        compression::decompress(&payload_section[len_width..], original_len)?
    } else {
        payload_section.to_vec()
    };

    let signature = if flags.has_signature() {
        let end = cursor.checked_add(SIGNATURE_LEN).ok_or(WireError::Truncated)?;
        if end > bytes.len() {
            return Err(WireError::Truncated);
        }
        let mut sig = [0u8; SIGNATURE_LEN];
        sig.copy_from_slice(&bytes[cursor..end]);
        Some(sig)
    } else {
        None
    };

    Ok(Packet {
        version,
        msg_type,
        ttl,
        timestamp_ms,
        sender_id,
        recipient_id,
        route,
        payload,
        signature,
        is_rsr: flags.is_rsr(),
    })
}

fn read_peer_id(bytes: &[u8], cursor: &mut usize) -> Result<[u8; PEER_ID_LEN], WireError> {
    let end = cursor.checked_add(PEER_ID_LEN).ok_or(WireError::Truncated)?;
    if end > bytes.len() {
        return Err(WireError::Truncated);
    }
    let mut id = [0u8; PEER_ID_LEN];
    id.copy_from_slice(&bytes[*cursor..end]);
    *cursor = end;
    Ok(id)
}
