//! Per-peer Noise session lifecycle: handshake progression, established
//! transport ciphers, and rekey tracking.
//!
//! A single mutex guards the whole session map. It is a point of
//! serialization for handshake steps and encrypt/decrypt calls, not a long
//! critical section — callers hold it only across the synchronous state
//! transition, never across network I/O.

use super::cipher::CipherState;
use super::handshake::{HandshakeState, Role};
use super::NoiseError;
use crate::types::now_ms;
use std::collections::HashMap;
use tokio::sync::Mutex;
use x25519_dalek::StaticSecret;

/// Rekey once a session has carried this many messages.
pub const REKEY_MESSAGE_LIMIT: u64 = 1_000_000;
/// Rekey once a session has lived this long, regardless of traffic.
pub const REKEY_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

pub enum SessionState {
    Handshaking(HandshakeState),
    Established {
        send: CipherState,
        recv: CipherState,
        remote_static: [u8; 32],
        established_at_ms: u64,
        messages_sent: u64,
    },
    Failed,
}

pub struct NoiseSession {
    state: SessionState,
}

impl NoiseSession {
    fn established(send: CipherState, recv: CipherState, remote_static: [u8; 32]) -> Self {
        Self {
            state: SessionState::Established {
                send,
                recv,
                remote_static,
                established_at_ms: now_ms(),
                messages_sent: 0,
            },
        }
    }

    pub fn remote_static(&self) -> Option<[u8; 32]> {
        match &self.state {
            SessionState::Established { remote_static, .. } => Some(*remote_static),
            _ => None,
        }
    }

    pub fn needs_rekey(&self) -> bool {
        match &self.state {
            SessionState::Established { established_at_ms, messages_sent, .. } => {
                *messages_sent >= REKEY_MESSAGE_LIMIT || now_ms().saturating_sub(*established_at_ms) >= REKEY_INTERVAL_MS
            }
            _ => false,
        }
    }
}

/// What happened as a result of feeding a frame into the handshake path.
pub enum HandshakeOutcome {
    /// Send this message back, handshake still in progress.
    Reply(Vec<u8>),
    /// Send this message back; the session is now established on our side.
    ReplyThenEstablished(Vec<u8>),
    /// The session is now established; nothing to send.
    Established,
    /// Read succeeded but there is nothing to send yet.
    Pending,
    /// The frame was a non-restart frame against an established session;
    /// it belongs on the transport decrypt path, not here.
    Ignored,
    /// The handshake failed; the session was evicted.
    Failed,
}

/// Length of a bare Noise XX message 1 (ephemeral public key, no payload).
/// Its arrival against an existing session is the wire signal that the
/// peer wants to restart the handshake.
const RESTART_FRAME_LEN: usize = 32;

pub struct SessionManager {
    local_static: StaticSecret,
    sessions: Mutex<HashMap<String, NoiseSession>>,
}

impl SessionManager {
    pub fn new(local_static: StaticSecret) -> Self {
        Self { local_static, sessions: Mutex::new(HashMap::new()) }
    }

    /// Start a handshake as initiator, returning message 1 to send.
    pub async fn initiate(&self, peer_id: &str) -> Vec<u8> {
        let mut hs = HandshakeState::new_initiator(self.local_static.clone());
        let msg1 = hs.write_message().expect("message 1 always succeeds from a fresh handshake");
        let mut sessions = self.sessions.lock().await;
        sessions.insert(peer_id.to_string(), NoiseSession { state: SessionState::Handshaking(hs) });
        msg1
    }

    /// Feed an inbound handshake-path frame through the responder rules.
    pub async fn handle_handshake_frame(&self, peer_id: &str, frame: &[u8]) -> HandshakeOutcome {
        let mut sessions = self.sessions.lock().await;
        let restart = frame.len() == RESTART_FRAME_LEN;
        let existing = sessions.remove(peer_id).map(|s| s.state);

        let mut hs = match existing {
            None => HandshakeState::new_responder(self.local_static.clone()),
            Some(SessionState::Established { .. }) if restart => HandshakeState::new_responder(self.local_static.clone()),
            Some(SessionState::Established { .. }) => return HandshakeOutcome::Ignored,
            Some(SessionState::Handshaking(_)) if restart => HandshakeState::new_responder(self.local_static.clone()),
            Some(SessionState::Handshaking(hs)) => hs,
            Some(SessionState::Failed) => HandshakeState::new_responder(self.local_static.clone()),
        };

        match advance(&mut hs, frame) {
            Err(_) => HandshakeOutcome::Failed,
            Ok(reply) if hs.is_complete() => match hs.finalize() {
                Ok((send, recv, remote_static)) => {
                    sessions.insert(peer_id.to_string(), NoiseSession::established(send, recv, remote_static.to_bytes()));
                    match reply {
                        Some(bytes) => HandshakeOutcome::ReplyThenEstablished(bytes),
                        None => HandshakeOutcome::Established,
                    }
                }
                Err(_) => HandshakeOutcome::Failed,
            },
            Ok(reply) => {
                sessions.insert(peer_id.to_string(), NoiseSession { state: SessionState::Handshaking(hs) });
                match reply {
                    Some(bytes) => HandshakeOutcome::Reply(bytes),
                    None => HandshakeOutcome::Pending,
                }
            }
        }
    }

    pub async fn encrypt_for(&self, peer_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(peer_id).ok_or(NoiseError::SessionNotFound)?;
        match &mut session.state {
            SessionState::Established { send, messages_sent, .. } => {
                let wire = send.encrypt(plaintext, &[])?;
                *messages_sent += 1;
                Ok(wire)
            }
            _ => Err(NoiseError::SessionNotEstablished),
        }
    }

    pub async fn decrypt_from(&self, peer_id: &str, wire_bytes: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(peer_id).ok_or(NoiseError::SessionNotFound)?;
        match &mut session.state {
            SessionState::Established { recv, .. } => recv.decrypt(wire_bytes, &[]),
            _ => Err(NoiseError::SessionNotEstablished),
        }
    }

    pub async fn needs_rekey(&self, peer_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.get(peer_id).map(NoiseSession::needs_rekey).unwrap_or(false)
    }

    pub async fn remote_static(&self, peer_id: &str) -> Option<[u8; 32]> {
        let sessions = self.sessions.lock().await;
        sessions.get(peer_id).and_then(NoiseSession::remote_static)
    }

    pub async fn is_established(&self, peer_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        matches!(sessions.get(peer_id).map(|s| &s.state), Some(SessionState::Established { .. }))
    }

    /// Hard reset: drop the session entirely, e.g. on emergency disconnect.
    pub async fn evict(&self, peer_id: &str) {
        self.sessions.lock().await.remove(peer_id);
    }

    pub async fn evict_all(&self) {
        self.sessions.lock().await.clear();
    }
}

fn advance(hs: &mut HandshakeState, frame: &[u8]) -> Result<Option<Vec<u8>>, NoiseError> {
    hs.read_message(frame)?;
    if hs.is_complete() {
        return Ok(None);
    }
    match hs.write_message() {
        Ok(reply) => Ok(Some(reply)),
        Err(NoiseError::HandshakeAlreadyComplete) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn manager() -> SessionManager {
        SessionManager::new(StaticSecret::random_from_rng(OsRng))
    }

    #[tokio::test]
    async fn full_handshake_via_session_managers_establishes_both_sides() {
        let initiator = manager();
        let responder = manager();

        let msg1 = initiator.initiate("responder").await;
        let outcome1 = responder.handle_handshake_frame("initiator", &msg1).await;
        let msg2 = match outcome1 {
            HandshakeOutcome::Reply(bytes) => bytes,
            _ => panic!("expected a reply to message 1"),
        };

        let outcome2 = initiator.handle_handshake_frame("responder", &msg2).await;
        let msg3 = match outcome2 {
            HandshakeOutcome::ReplyThenEstablished(bytes) => bytes,
            _ => panic!("expected initiator to establish and reply with message 3"),
        };
        assert!(initiator.is_established("responder").await);

        let outcome3 = responder.handle_handshake_frame("initiator", &msg3).await;
        assert!(matches!(outcome3, HandshakeOutcome::Established));
        assert!(responder.is_established("initiator").await);

        let wire = initiator.encrypt_for("responder", b"hi").await.unwrap();
        let plaintext = responder.decrypt_from("initiator", &wire).await.unwrap();
        assert_eq!(plaintext, b"hi");
    }

    #[tokio::test]
    async fn restart_frame_against_established_session_resets_it() {
        let initiator = manager();
        let responder = manager();
        let msg1 = initiator.initiate("responder").await;
        let msg2 = match responder.handle_handshake_frame("initiator", &msg1).await {
            HandshakeOutcome::Reply(bytes) => bytes,
            _ => panic!(),
        };
        let msg3 = match initiator.handle_handshake_frame("responder", &msg2).await {
            HandshakeOutcome::ReplyThenEstablished(bytes) => bytes,
            _ => panic!(),
        };
        responder.handle_handshake_frame("initiator", &msg3).await;
        assert!(responder.is_established("initiator").await);

        let fresh_initiator = manager();
        let restart_msg1 = fresh_initiator.initiate("responder").await;
        assert_eq!(restart_msg1.len(), RESTART_FRAME_LEN);
        let outcome = responder.handle_handshake_frame("initiator", &restart_msg1).await;
        assert!(matches!(outcome, HandshakeOutcome::Reply(_)));
        assert!(!responder.is_established("initiator").await);
    }

    #[tokio::test]
    async fn encrypt_before_established_session_fails() {
        let mgr = manager();
        let err = mgr.encrypt_for("nobody", b"x").await.unwrap_err();
        assert!(matches!(err, NoiseError::SessionNotFound));
    }
}
