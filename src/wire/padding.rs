//! PKCS#7-style block padding applied after framing.
//!
//! Padding exists to blur message-size fingerprinting over the radio. It is
//! advisory, not authenticated at this layer: an implementation that omits
//! it, or a frame whose trailing bytes merely look like padding, must still
//! decode correctly.

/// Candidate block sizes, smallest first.
pub const BLOCK_SIZES: [usize; 4] = [256, 512, 1024, 2048];

/// Bytes reserved for a cipher tag that a higher layer will append after
/// this codec's framing.
const TAG_RESERVATION: usize = 16;

/// Pad `frame` to the next block size in [`BLOCK_SIZES`] — the padded
/// frame's length is exactly that block size — reserving
/// [`TAG_RESERVATION`] bytes of headroom in the block for a cipher tag a
/// higher layer appends later. Frames already larger than the largest
/// block are returned unpadded — they will be fragmented at the transport
/// layer instead.
pub fn pad(frame: &[u8]) -> Vec<u8> {
    if frame.len() > *BLOCK_SIZES.last().unwrap() {
        return frame.to_vec();
    }

    let reserved = frame.len() + TAG_RESERVATION;
    let Some(&block) = BLOCK_SIZES.iter().find(|&&b| b >= reserved && b - frame.len() <= 255) else {
        // Either no block leaves room for the cipher tag, or the only
        // candidate block would need a pad length that doesn't fit in a
        // single PKCS#7 byte — leave unpadded.
        return frame.to_vec();
    };

    let pad_len = block - frame.len();
    debug_assert!((1..=255).contains(&pad_len));

    let mut out = Vec::with_capacity(block);
    out.extend_from_slice(frame);
    out.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    out
}

/// Attempt to strip PKCS#7 padding from `bytes`. Returns `None` if the
/// trailing bytes don't form valid padding — the caller keeps the original
/// bytes as-is rather than treating this as an error.
pub fn strip(bytes: &[u8]) -> Option<Vec<u8>> {
    let &pad_len = bytes.last()?;
    let pad_len = pad_len as usize;
    if pad_len == 0 || pad_len > bytes.len() {
        return None;
    }

    let boundary = bytes.len() - pad_len;
    if bytes[boundary..].iter().all(|&b| b as usize == pad_len) {
        Some(bytes[..boundary].to_vec())
    } else {
        None
    }
}
