//! Wire protocol codec: packet framing, compression, and padding.
//!
//! Two header formats share a single byte layout prefix (`version`,
//! `type`, `ttl`, `timestamp`) and diverge only in the width of the flags/
//! payload-length fields and the presence of an optional route list. See
//! [`packet`] for the byte-exact layout.

pub mod compression;
pub mod packet;
pub mod padding;

pub use packet::{Packet, PacketFlags};
use thiserror::Error;

/// Packets with a payload larger than this are rejected outright.
pub const MAX_PAYLOAD_LEN: usize = 10 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("frame truncated")]
    Truncated,

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("payload length {0} exceeds the 10 MiB bound")]
    PayloadTooLarge(usize),

    #[error("decompression ratio {ratio} exceeds the bomb threshold")]
    CompressionBomb { ratio: u64 },

    #[error("route list invalid: {0}")]
    InvalidRoute(&'static str),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}
