//! Device identity: long-lived static keypairs and short peer id derivation.
//!
//! The X25519 static keypair is the Noise identity; the Ed25519 keypair
//! signs packets that set `HAS_SIGNATURE`. Both are generated on first run
//! and persisted under the data directory with restrictive permissions —
//! the real hardware-backed master key this wraps is an external
//! collaborator out of scope for this crate.

use crate::types::{short_id_from_pubkey, PEER_ID_LEN};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("io error loading identity: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt key file: expected {expected} bytes, got {got}")]
    CorruptKeyFile { expected: usize, got: usize },
}

/// Device identity: Noise static keypair plus an Ed25519 signing keypair.
pub struct Identity {
    noise_secret: StaticSecret,
    noise_public: PublicKey,
    signing_key: SigningKey,
}

impl Identity {
    /// Load the identity from `data_dir`, generating and persisting one if
    /// absent.
    pub fn load_or_generate(data_dir: &Path) -> Result<Self, IdentityError> {
        fs::create_dir_all(data_dir)?;
        let noise_path = data_dir.join("noise_identity.key");
        let signing_path = data_dir.join("signing_identity.key");

        let noise_secret = load_or_generate_bytes(&noise_path, 32, || {
            StaticSecret::random_from_rng(OsRng).to_bytes()
        })?;
        let noise_secret = StaticSecret::from(<[u8; 32]>::try_from(noise_secret.as_slice())
            .map_err(|_| IdentityError::CorruptKeyFile { expected: 32, got: noise_secret.len() })?);
        let noise_public = PublicKey::from(&noise_secret);

        let signing_bytes = load_or_generate_bytes(&signing_path, 32, || {
            SigningKey::generate(&mut OsRng).to_bytes()
        })?;
        let signing_key = SigningKey::from_bytes(
            &<[u8; 32]>::try_from(signing_bytes.as_slice())
                .map_err(|_| IdentityError::CorruptKeyFile { expected: 32, got: signing_bytes.len() })?,
        );

        Ok(Self { noise_secret, noise_public, signing_key })
    }

    /// Build an in-memory identity without touching disk; used by tests.
    pub fn ephemeral() -> Self {
        let noise_secret = StaticSecret::random_from_rng(OsRng);
        let noise_public = PublicKey::from(&noise_secret);
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { noise_secret, noise_public, signing_key }
    }

    pub fn noise_public_bytes(&self) -> [u8; 32] {
        self.noise_public.to_bytes()
    }

    pub fn noise_secret(&self) -> &StaticSecret {
        &self.noise_secret
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    pub fn verify(pubkey: &VerifyingKey, message: &[u8], signature: &[u8; 64]) -> bool {
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        pubkey.verify(message, &sig).is_ok()
    }

    /// First 16 hex characters of SHA-256(noise static public key).
    pub fn short_peer_id(&self) -> [u8; PEER_ID_LEN] {
        short_id_from_pubkey(&self.noise_public_bytes())
    }

    /// Formatted fingerprint (16 hex chars grouped 4-4-4-4, uppercase) for
    /// out-of-band verification.
    pub fn fingerprint(&self) -> String {
        format_fingerprint(&self.short_peer_id())
    }
}

/// Format an 8-byte short id as a 4-4-4-4 uppercase hex fingerprint.
pub fn format_fingerprint(short_id: &[u8; PEER_ID_LEN]) -> String {
    let hex = hex::encode_upper(short_id);
    hex.as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join("-")
}

fn load_or_generate_bytes(
    path: &PathBuf,
    expected_len: usize,
    generate: impl FnOnce() -> [u8; 32],
) -> Result<Vec<u8>, IdentityError> {
    if path.exists() {
        let mut bytes = fs::read(path)?;
        if bytes.len() != expected_len {
            let got = bytes.len();
            bytes.zeroize();
            return Err(IdentityError::CorruptKeyFile { expected: expected_len, got });
        }
        Ok(bytes)
    } else {
        let mut generated = generate();
        fs::write(path, generated)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }
        let out = generated.to_vec();
        generated.zeroize();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_grouped_4_4_4_4() {
        let short = [0xabu8, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89];
        let fp = format_fingerprint(&short);
        assert_eq!(fp, "ABCD-EF01-2345-6789");
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let identity = Identity::ephemeral();
        let msg = b"hello mesh";
        let sig = identity.sign(msg);
        assert!(Identity::verify(&identity.verifying_key(), msg, &sig));
    }

    #[test]
    fn load_or_generate_persists_across_loads() {
        let dir = tempdir();
        let id1 = Identity::load_or_generate(&dir).unwrap();
        let id2 = Identity::load_or_generate(&dir).unwrap();
        assert_eq!(id1.noise_public_bytes(), id2.noise_public_bytes());
        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("bitchat-identity-test-{}", uuid::Uuid::new_v4()));
        p
    }
}
