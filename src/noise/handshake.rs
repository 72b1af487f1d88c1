//! `Noise_XX_25519_ChaChaPoly_SHA256` handshake state machine.
//!
//! Three messages: `-> e`, `<- e, ee, s, es`, `-> s, se`. Each side's static
//! key is revealed only after a DH token has keyed the handshake cipher, so
//! the `s` tokens in messages 2 and 3 travel encrypted.

use super::cipher::CipherState;
use super::symmetric::{SymmetricState, PROTOCOL_NAME};
use super::NoiseError;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Initiator: about to send message 1. Responder: about to read message 1.
    Zero,
    /// Initiator: about to read message 2. Responder: about to send message 2.
    One,
    /// Initiator: about to send message 3. Responder: about to read message 3.
    Two,
    Done,
}

/// A Noise handshake cipher key used only while handshaking — distinct
/// from the post-split transport [`CipherState`].
#[derive(Default)]
struct HandshakeCipher {
    key: Option<[u8; 32]>,
    n: u64,
}

impl HandshakeCipher {
    fn set_key(&mut self, key: [u8; 32]) {
        self.key = Some(key);
        self.n = 0;
    }

    fn encrypt_and_hash(&mut self, state: &mut SymmetricState, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        match self.key {
            None => {
                state.mix_hash(plaintext);
                Ok(plaintext.to_vec())
            }
            Some(key) => {
                let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
                let nonce = nonce_for(self.n);
                let ct = cipher
                    .encrypt(&nonce, Payload { msg: plaintext, aad: state.hash() })
                    .map_err(|_| NoiseError::InvalidCiphertext)?;
                self.n += 1;
                state.mix_hash(&ct);
                Ok(ct)
            }
        }
    }

    fn decrypt_and_hash(&mut self, state: &mut SymmetricState, data: &[u8]) -> Result<Vec<u8>, NoiseError> {
        match self.key {
            None => {
                state.mix_hash(data);
                Ok(data.to_vec())
            }
            Some(key) => {
                let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
                let nonce = nonce_for(self.n);
                let pt = cipher
                    .decrypt(&nonce, Payload { msg: data, aad: state.hash() })
                    .map_err(|_| NoiseError::AuthenticationFailed)?;
                self.n += 1;
                state.mix_hash(data);
                Ok(pt)
            }
        }
    }
}

fn nonce_for(counter: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[4..12].copy_from_slice(&counter.to_le_bytes());
    *Nonce::from_slice(&bytes)
}

pub struct HandshakeState {
    role: Role,
    step: Step,
    symmetric: SymmetricState,
    hs_cipher: HandshakeCipher,
    local_static: StaticSecret,
    local_ephemeral: Option<StaticSecret>,
    remote_ephemeral: Option<PublicKey>,
    remote_static: Option<PublicKey>,
}

impl HandshakeState {
    pub fn new_initiator(local_static: StaticSecret) -> Self {
        Self {
            role: Role::Initiator,
            step: Step::Zero,
            symmetric: SymmetricState::initialize(PROTOCOL_NAME),
            hs_cipher: HandshakeCipher::default(),
            local_static,
            local_ephemeral: None,
            remote_ephemeral: None,
            remote_static: None,
        }
    }

    pub fn new_responder(local_static: StaticSecret) -> Self {
        Self {
            role: Role::Responder,
            step: Step::Zero,
            symmetric: SymmetricState::initialize(PROTOCOL_NAME),
            hs_cipher: HandshakeCipher::default(),
            local_static,
            local_ephemeral: None,
            remote_ephemeral: None,
            remote_static: None,
        }
    }

    pub fn remote_static(&self) -> Option<&PublicKey> {
        self.remote_static.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.step == Step::Done
    }

    /// Produce the next outbound handshake message.
    pub fn write_message(&mut self) -> Result<Vec<u8>, NoiseError> {
        match (self.role, self.step) {
            (Role::Initiator, Step::Zero) => {
                let e = StaticSecret::random_from_rng(OsRng);
                let e_pub = PublicKey::from(&e);
                self.symmetric.mix_hash(e_pub.as_bytes());
                let payload = self.hs_cipher.encrypt_and_hash(&mut self.symmetric, &[])?;
                self.local_ephemeral = Some(e);
                self.step = Step::One;
                Ok([e_pub.as_bytes().as_slice(), &payload].concat())
            }
            (Role::Responder, Step::One) => {
                let e_r = StaticSecret::random_from_rng(OsRng);
                let e_r_pub = PublicKey::from(&e_r);
                self.symmetric.mix_hash(e_r_pub.as_bytes());

                let remote_e = self.remote_ephemeral.ok_or(NoiseError::HandshakeAlreadyComplete)?;
                let ee = dh(&e_r, &remote_e)?;
                self.hs_cipher.set_key(self.symmetric.mix_key(&ee));

                let local_static_pub = PublicKey::from(&self.local_static);
                let encrypted_s = self.hs_cipher.encrypt_and_hash(&mut self.symmetric, local_static_pub.as_bytes())?;

                let es = dh(&self.local_static, &remote_e)?;
                self.hs_cipher.set_key(self.symmetric.mix_key(&es));

                let payload = self.hs_cipher.encrypt_and_hash(&mut self.symmetric, &[])?;

                self.local_ephemeral = Some(e_r);
                self.step = Step::Two;
                Ok([e_r_pub.as_bytes().as_slice(), &encrypted_s, &payload].concat())
            }
            (Role::Initiator, Step::Two) => {
                let local_static_pub = PublicKey::from(&self.local_static);
                let encrypted_s = self.hs_cipher.encrypt_and_hash(&mut self.symmetric, local_static_pub.as_bytes())?;

                let remote_e = self.remote_ephemeral.ok_or(NoiseError::HandshakeAlreadyComplete)?;
                let se = dh(&self.local_static, &remote_e)?;
                self.hs_cipher.set_key(self.symmetric.mix_key(&se));

                let payload = self.hs_cipher.encrypt_and_hash(&mut self.symmetric, &[])?;
                self.step = Step::Done;
                Ok([encrypted_s.as_slice(), &payload].concat())
            }
            _ => Err(NoiseError::HandshakeAlreadyComplete),
        }
    }

    /// Consume the next inbound handshake message.
    pub fn read_message(&mut self, msg: &[u8]) -> Result<(), NoiseError> {
        match (self.role, self.step) {
            (Role::Responder, Step::Zero) => {
                validate_public_key(msg.get(..32).ok_or(NoiseError::InvalidPublicKey)?)?;
                let e_i = PublicKey::from(<[u8; 32]>::try_from(&msg[..32]).unwrap());
                self.symmetric.mix_hash(e_i.as_bytes());
                self.hs_cipher.decrypt_and_hash(&mut self.symmetric, &msg[32..])?;
                self.remote_ephemeral = Some(e_i);
                self.step = Step::One;
                Ok(())
            }
            (Role::Initiator, Step::One) => {
                if msg.len() < 32 {
                    return Err(NoiseError::InvalidCiphertext);
                }
                validate_public_key(&msg[..32])?;
                let e_r = PublicKey::from(<[u8; 32]>::try_from(&msg[..32]).unwrap());
                self.symmetric.mix_hash(e_r.as_bytes());

                let local_ephemeral = self.local_ephemeral.as_ref().ok_or(NoiseError::HandshakeAlreadyComplete)?;
                let ee = dh(local_ephemeral, &e_r)?;
                self.hs_cipher.set_key(self.symmetric.mix_key(&ee));

                let encrypted_s_len = 32 + 16;
                let encrypted_s = msg.get(32..32 + encrypted_s_len).ok_or(NoiseError::Truncated)?;
                let s_r_bytes = self.hs_cipher.decrypt_and_hash(&mut self.symmetric, encrypted_s)?;
                validate_public_key(&s_r_bytes)?;
                let s_r = PublicKey::from(<[u8; 32]>::try_from(s_r_bytes.as_slice()).unwrap());

                let es = dh(local_ephemeral, &s_r)?;
                self.hs_cipher.set_key(self.symmetric.mix_key(&es));

                let payload_ct = &msg[32 + encrypted_s_len..];
                self.hs_cipher.decrypt_and_hash(&mut self.symmetric, payload_ct)?;

                self.remote_ephemeral = Some(e_r);
                self.remote_static = Some(s_r);
                self.step = Step::Two;
                Ok(())
            }
            (Role::Responder, Step::Two) => {
                let encrypted_s_len = 32 + 16;
                let encrypted_s = msg.get(..encrypted_s_len).ok_or(NoiseError::Truncated)?;
                let s_i_bytes = self.hs_cipher.decrypt_and_hash(&mut self.symmetric, encrypted_s)?;
                validate_public_key(&s_i_bytes)?;
                let s_i = PublicKey::from(<[u8; 32]>::try_from(s_i_bytes.as_slice()).unwrap());

                let local_ephemeral = self.local_ephemeral.as_ref().ok_or(NoiseError::HandshakeAlreadyComplete)?;
                let se = dh(local_ephemeral, &s_i)?;
                self.hs_cipher.set_key(self.symmetric.mix_key(&se));

                let payload_ct = &msg[encrypted_s_len..];
                self.hs_cipher.decrypt_and_hash(&mut self.symmetric, payload_ct)?;

                self.remote_static = Some(s_i);
                self.step = Step::Done;
                Ok(())
            }
            _ => Err(NoiseError::HandshakeAlreadyComplete),
        }
    }

    /// After message 3 has been written (initiator) or read (responder),
    /// derive the two transport cipher states.
    pub fn finalize(self) -> Result<(CipherState, CipherState, PublicKey), NoiseError> {
        if self.step != Step::Done {
            return Err(NoiseError::HandshakeAlreadyComplete);
        }
        let remote_static = self.remote_static.ok_or(NoiseError::MissingKeys)?;
        let role = self.role;
        let (k1, k2) = self.symmetric.split();
        let (send_key, recv_key) = match role {
            Role::Initiator => (k1, k2),
            Role::Responder => (k2, k1),
        };
        Ok((CipherState::new(send_key), CipherState::new(recv_key), remote_static))
    }
}

fn dh(local: &StaticSecret, remote: &PublicKey) -> Result<[u8; 32], NoiseError> {
    let mut shared = local.diffie_hellman(remote).to_bytes();
    if shared == [0u8; 32] {
        shared.zeroize();
        return Err(NoiseError::InvalidPublicKey);
    }
    let out = shared;
    shared.zeroize();
    Ok(out)
}

fn validate_public_key(bytes: &[u8]) -> Result<(), NoiseError> {
    if bytes.len() != 32 || bytes.iter().all(|&b| b == 0) {
        return Err(NoiseError::InvalidPublicKey);
    }
    Ok(())
}
