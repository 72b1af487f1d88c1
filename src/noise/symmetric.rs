//! `SymmetricState`: the chaining key / hash pair threaded through the XX
//! handshake, and the HKDF construction used to derive new keys from it.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

const HASH_LEN: usize = 32;

/// `Noise_XX_25519_ChaChaPoly_SHA256`'s protocol name, hashed (or
/// zero-padded) into the initial `h`/`ck`.
pub const PROTOCOL_NAME: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

#[derive(Clone)]
pub struct SymmetricState {
    ck: [u8; HASH_LEN],
    h: [u8; HASH_LEN],
}

impl SymmetricState {
    pub fn initialize(protocol_name: &str) -> Self {
        let mut h = [0u8; HASH_LEN];
        let name_bytes = protocol_name.as_bytes();
        if name_bytes.len() <= HASH_LEN {
            h[..name_bytes.len()].copy_from_slice(name_bytes);
        } else {
            h.copy_from_slice(&Sha256::digest(name_bytes));
        }
        let ck = h;
        Self { ck, h }
    }

    pub fn hash(&self) -> &[u8; HASH_LEN] {
        &self.h
    }

    pub fn chaining_key(&self) -> &[u8; HASH_LEN] {
        &self.ck
    }

    /// `mixHash(x) => h = SHA256(h || x)`
    pub fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.h);
        hasher.update(data);
        self.h = hasher.finalize().into();
    }

    /// `mixKey(ikm)`: splits `HKDF(ck, ikm, 2)` into `(new ck, cipher key)`.
    pub fn mix_key(&mut self, ikm: &[u8]) -> [u8; 32] {
        let [ck, cipher_key] = hkdf2(&self.ck, ikm);
        self.ck = ck;
        cipher_key
    }

    /// `mixKeyAndHash(ikm)`: splits `HKDF(ck, ikm, 3)` into
    /// `(new ck, hash input, cipher key)`, feeding the middle output into
    /// `mixHash`.
    pub fn mix_key_and_hash(&mut self, ikm: &[u8]) -> [u8; 32] {
        let [ck, hash_input, cipher_key] = hkdf3(&self.ck, ikm);
        self.ck = ck;
        self.mix_hash(&hash_input);
        cipher_key
    }

    /// `split()`: derive two transport cipher keys from the chaining key via
    /// `HKDF(ck, "", 2)`. Consumes `self` — the symmetric state is cleared
    /// after derivation.
    pub fn split(mut self) -> ([u8; 32], [u8; 32]) {
        let [k1, k2] = hkdf2(&self.ck, &[]);
        self.ck.zeroize();
        self.h.zeroize();
        (k1, k2)
    }
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.ck.zeroize();
        self.h.zeroize();
    }
}

fn hmac_hash(key: &[u8], data: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `T = HMAC(chaining_key, ikm); out_1 = HMAC(T, 0x01); out_2 = HMAC(T, out_1 || 0x02)`
fn hkdf2(chaining_key: &[u8; HASH_LEN], ikm: &[u8]) -> [[u8; HASH_LEN]; 2] {
    let temp_key = hmac_hash(chaining_key, ikm);
    let out1 = hmac_hash(&temp_key, &[0x01]);
    let mut buf2 = Vec::with_capacity(HASH_LEN + 1);
    buf2.extend_from_slice(&out1);
    buf2.push(0x02);
    let out2 = hmac_hash(&temp_key, &buf2);
    [out1, out2]
}

/// As [`hkdf2`] but with a third output chained off the second.
fn hkdf3(chaining_key: &[u8; HASH_LEN], ikm: &[u8]) -> [[u8; HASH_LEN]; 3] {
    let temp_key = hmac_hash(chaining_key, ikm);
    let out1 = hmac_hash(&temp_key, &[0x01]);
    let mut buf2 = Vec::with_capacity(HASH_LEN + 1);
    buf2.extend_from_slice(&out1);
    buf2.push(0x02);
    let out2 = hmac_hash(&temp_key, &buf2);
    let mut buf3 = Vec::with_capacity(HASH_LEN + 1);
    buf3.extend_from_slice(&out2);
    buf3.push(0x03);
    let out3 = hmac_hash(&temp_key, &buf3);
    [out1, out2, out3]
}
