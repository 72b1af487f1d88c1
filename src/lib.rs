pub mod error;
pub mod identity;
pub mod message;
pub mod noise;
pub mod router;
pub mod transport;
pub mod types;
pub mod wire;

pub use error::{BitchatError, Result};
pub use identity::Identity;
pub use router::Router;
pub use types::{BitchatMessage, MessageType, PeerId, PEER_ID_LEN};
