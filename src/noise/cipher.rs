//! Transport cipher state: ChaCha20-Poly1305 with an extracted-nonce wire
//! format and a 1024-entry sliding-window replay defense.

use super::NoiseError;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroize;

/// Width of the replay-defense sliding window, in counters.
pub const REPLAY_WINDOW_BITS: usize = 1024;
const WINDOW_WORDS: usize = REPLAY_WINDOW_BITS / 64;

/// The send counter fails closed here — well below the 2⁶⁴ theoretical
/// limit — to force rekeying.
pub const SEND_COUNTER_LIMIT: u64 = u32::MAX as u64 - 1;

/// Receivers warn above this counter to suggest a rekey is overdue.
pub const RECV_WARN_THRESHOLD: u64 = 1_000_000_000;

pub struct CipherState {
    cipher: ChaCha20Poly1305,
    key: [u8; 32],
    send_counter: u64,
    highest_received: Option<u64>,
    window: [u64; WINDOW_WORDS],
}

impl CipherState {
    pub fn new(key: [u8; 32]) -> Self {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        Self {
            cipher,
            key,
            send_counter: 0,
            highest_received: None,
            window: [0u64; WINDOW_WORDS],
        }
    }

    pub fn send_counter(&self) -> u64 {
        self.send_counter
    }

    fn build_nonce(counter: u64) -> Nonce {
        let mut bytes = [0u8; 12];
        bytes[4..12].copy_from_slice(&counter.to_le_bytes());
        *Nonce::from_slice(&bytes)
    }

    /// Encrypt `plaintext`, returning the wire bytes: a 4-byte big-endian
    /// counter prefix followed by ChaCha20-Poly1305 ciphertext+tag.
    pub fn encrypt(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.send_counter >= SEND_COUNTER_LIMIT {
            return Err(NoiseError::NonceExhausted);
        }
        let nonce = Self::build_nonce(self.send_counter);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|_| NoiseError::InvalidCiphertext)?;

        let mut out = Vec::with_capacity(4 + ciphertext.len());
        out.extend_from_slice(&(self.send_counter as u32).to_be_bytes());
        out.extend_from_slice(&ciphertext);
        self.send_counter += 1;
        Ok(out)
    }

    /// Decrypt wire bytes produced by [`Self::encrypt`] on the peer's
    /// cipher state, using the wire-extracted counter as the nonce
    /// (extracted-nonce mode, the regime used after the XX handshake).
    pub fn decrypt(&mut self, wire_bytes: &[u8], aad: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if wire_bytes.len() < 4 {
            return Err(NoiseError::InvalidCiphertext);
        }
        let counter = u32::from_be_bytes(wire_bytes[0..4].try_into().unwrap()) as u64;
        self.check_replay(counter)?;

        if counter > RECV_WARN_THRESHOLD {
            tracing::warn!(counter, "receive counter approaching rekey limit");
        }

        let nonce = Self::build_nonce(counter);
        let plaintext = self
            .cipher
            .decrypt(&nonce, Payload { msg: &wire_bytes[4..], aad })
            .map_err(|_| NoiseError::InvalidCiphertext)?;

        self.mark_received(counter);
        Ok(plaintext)
    }

    fn check_replay(&self, counter: u64) -> Result<(), NoiseError> {
        let Some(highest) = self.highest_received else {
            return Ok(());
        };
        if counter > highest {
            return Ok(());
        }
        let diff = highest - counter;
        if diff as usize >= REPLAY_WINDOW_BITS {
            return Err(NoiseError::ReplayDetected);
        }
        if self.bit_is_set(diff as usize) {
            return Err(NoiseError::ReplayDetected);
        }
        Ok(())
    }

    fn mark_received(&mut self, counter: u64) {
        match self.highest_received {
            None => {
                self.highest_received = Some(counter);
                self.set_bit(0);
            }
            Some(highest) if counter > highest => {
                let shift = counter - highest;
                self.shift_window(shift);
                self.highest_received = Some(counter);
                self.set_bit(0);
            }
            Some(highest) => {
                let diff = highest - counter;
                self.set_bit(diff as usize);
            }
        }
    }

    fn set_bit(&mut self, offset: usize) {
        if offset >= REPLAY_WINDOW_BITS {
            return;
        }
        let word = offset / 64;
        let bit = offset % 64;
        self.window[word] |= 1u64 << bit;
    }

    fn bit_is_set(&self, offset: usize) -> bool {
        if offset >= REPLAY_WINDOW_BITS {
            return false;
        }
        let word = offset / 64;
        let bit = offset % 64;
        self.window[word] & (1u64 << bit) != 0
    }

    fn shift_window(&mut self, shift: u64) {
        if shift >= REPLAY_WINDOW_BITS as u64 {
            self.window = [0u64; WINDOW_WORDS];
            return;
        }
        let shift = shift as usize;
        let word_shift = shift / 64;
        let bit_shift = shift % 64;

        let mut new_window = [0u64; WINDOW_WORDS];
        for i in (0..WINDOW_WORDS).rev() {
            let src = i.checked_sub(word_shift);
            let mut value = src.map(|s| self.window[s]).unwrap_or(0);
            if bit_shift > 0 {
                value <<= bit_shift;
                if let Some(s) = src.and_then(|s| s.checked_sub(1)) {
                    value |= self.window[s] >> (64 - bit_shift);
                }
            }
            new_window[i] = value;
        }
        self.window = new_window;
    }
}

impl Drop for CipherState {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
