//! Game simulation modules

pub mod physics;
pub mod session;
pub mod snapshot;

pub use session::{GameSession, SessionHandle, SessionRegistry};

use crate::ws::protocol::ClientMsg;
use uuid::Uuid;

/// Peer event received from the connection layer
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub peer_id: Uuid,
    pub msg: ClientMsg,
}
