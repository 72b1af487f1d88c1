//! Deflate (zlib-wrapped) payload compression policy.
//!
//! Compression only kicks in above a size threshold and only when it
//! actually shrinks the payload; decompression rejects absurd ratios as a
//! defense against decompression bombs.

use super::WireError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Payloads at or below this size are never compressed.
pub const COMPRESSION_MIN_SIZE: usize = 256;

/// Reject a decompressed/compressed size ratio larger than this — a
/// decompression bomb.
pub const MAX_COMPRESSION_RATIO: u64 = 50_000;

/// Attempt to compress `payload`. Returns `Some((compressed, original_len))`
/// only if compression strictly reduces the size and the payload exceeds
/// [`COMPRESSION_MIN_SIZE`].
pub fn compress_if_beneficial(payload: &[u8]) -> Option<(Vec<u8>, usize)> {
    if payload.len() <= COMPRESSION_MIN_SIZE {
        return None;
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).ok()?;
    let compressed = encoder.finish().ok()?;

    if compressed.len() < payload.len() {
        Some((compressed, payload.len()))
    } else {
        None
    }
}

/// Decompress `data`, which is expected to inflate to exactly
/// `original_len` bytes. Rejects the result as a decompression bomb if the
/// ratio of original to compressed size exceeds [`MAX_COMPRESSION_RATIO`].
pub fn decompress(data: &[u8], original_len: usize) -> Result<Vec<u8>, WireError> {
    if !data.is_empty() {
        let ratio = original_len as u64 / data.len() as u64;
        if ratio > MAX_COMPRESSION_RATIO {
            return Err(WireError::CompressionBomb { ratio });
        }
    }

    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(original_len.min(16 * 1024 * 1024));
    decoder
        .read_to_end(&mut out)
        .map_err(|_| WireError::Malformed("zlib inflate failed"))?;

    if out.len() != original_len {
        return Err(WireError::Malformed("decompressed length mismatch"));
    }

    Ok(out)
}
