//! Noise_XX_25519_ChaChaPoly_SHA256 handshake and transport cipher.

pub mod cipher;
pub mod handshake;
pub mod session;
pub mod symmetric;

pub use cipher::CipherState;
pub use handshake::{HandshakeState, Role};
pub use session::{NoiseSession, SessionManager, SessionState};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NoiseError {
    #[error("cipher state has no key set")]
    UninitializedCipher,
    #[error("send nonce counter exhausted, rekey required")]
    NonceExhausted,
    #[error("ciphertext failed to decrypt or authenticate")]
    InvalidCiphertext,
    #[error("message counter falls outside the replay window or was already seen")]
    ReplayDetected,
    #[error("handshake already complete or message received out of sequence")]
    HandshakeAlreadyComplete,
    #[error("handshake finished without deriving a remote static key")]
    MissingKeys,
    #[error("peer public key is malformed or all-zero")]
    InvalidPublicKey,
    #[error("payload authentication failed")]
    AuthenticationFailed,
    #[error("handshake message truncated")]
    Truncated,
    #[error("no session exists for this peer")]
    SessionNotFound,
    #[error("session is not yet established")]
    SessionNotEstablished,
}
