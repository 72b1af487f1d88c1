//! Crate-wide error taxonomy.
//!
//! Each subsystem owns its own error enum; `BitchatError` composes them for
//! callers that cross subsystem boundaries (the router, mainly). Decode and
//! resource-exhaustion errors are recoverable by design — the caller drops
//! the offending frame and continues.

use crate::noise::NoiseError;
use crate::router::RouterError;
use crate::transport::TransportError;
use crate::wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BitchatError {
    #[error("wire codec error: {0}")]
    Wire(#[from] WireError),

    #[error("noise engine error: {0}")]
    Noise(#[from] NoiseError),

    #[error("router error: {0}")]
    Router(#[from] RouterError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BitchatError>;
