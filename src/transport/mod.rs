//! Transport-layer contracts shared by the concrete radios ([`link`],
//! [`rendezvous`]) and the [`selector`] that arbitrates between them.
//!
//! The router only ever speaks to a `Arc<dyn Transport>` or, on the send
//! side, the [`crate::router::OutboundTransport`] the selector implements —
//! it never knows which radio actually carried a frame.

pub mod link;
pub mod rendezvous;
pub mod selector;

use crate::types::PEER_ID_LEN;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is not currently available")]
    Unavailable,
    #[error("no reachable transport for this peer")]
    PeerUnreachable,
    #[error("concurrent link limit reached")]
    LinkLimitReached,
    #[error("fragment reassembly failed or timed out")]
    ReassemblyFailed,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Power/availability state of a radio, mirroring a platform Bluetooth or
/// radio stack's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Unknown,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
    Resetting,
}

/// A peer as seen by one transport: liveness and signal-quality hints the
/// selector uses for arbitration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub peer_id: [u8; PEER_ID_LEN],
    pub rssi: Option<i8>,
    pub last_seen_ms: u64,
}

/// Receives events from a transport: inbound frames and connectivity churn.
/// The router implements enough of this indirectly through [`crate::router::Router::handle_inbound`];
/// transports call this trait to hand frames upward.
#[async_trait]
pub trait TransportDelegate: Send + Sync {
    async fn on_frame(&self, transport_name: &'static str, peer_id: [u8; PEER_ID_LEN], frame: Vec<u8>);
    async fn on_peer_connected(&self, transport_name: &'static str, peer_id: [u8; PEER_ID_LEN]);
    async fn on_peer_disconnected(&self, transport_name: &'static str, peer_id: [u8; PEER_ID_LEN]);
    async fn on_state_changed(&self, transport_name: &'static str, state: TransportState);
}

/// Common contract every concrete radio transport implements.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn is_available(&self) -> bool;
    async fn peer_snapshots(&self) -> Vec<PeerSnapshot>;
    async fn send_to(&self, peer_id: [u8; PEER_ID_LEN], frame: &[u8]) -> Result<(), TransportError>;
    async fn broadcast(&self, frame: &[u8]) -> Result<(), TransportError>;
}
