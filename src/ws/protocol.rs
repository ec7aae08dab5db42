//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter the lobby and take a seat in a session
    Join {
        /// Display name shown to the opponent
        name: String,
    },

    /// Move the paddle by a signed horizontal delta.
    /// The client scales this by its frame time; the server only clamps the
    /// resulting paddle position, never the delta itself.
    MovePaddle {
        delta: f32,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave the current session
    Leave,
}

/// Which side of the court a player owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    PlayerOne,
    PlayerTwo,
}

impl Slot {
    pub fn index(self) -> usize {
        match self {
            Slot::PlayerOne => 0,
            Slot::PlayerTwo => 1,
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::PlayerOne => Slot::PlayerTwo,
            Slot::PlayerTwo => Slot::PlayerOne,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        peer_id: Uuid,
        server_time: u64,
    },

    /// A player filled a slot in the session
    PlayerJoined {
        slot: Slot,
        display_name: String,
    },

    /// One-shot notice to exactly the first-joined peer. The client flips
    /// its court rendering based on this; the second peer infers player two
    /// by never receiving it. Addressed: the connection layer delivers it
    /// only to `peer_id`.
    YouArePlayerOne {
        peer_id: Uuid,
    },

    /// Full state snapshot (sent at the patch rate, and forced on join and
    /// on game over)
    Snapshot {
        /// Server tick number
        tick: u64,
        game_started: bool,
        /// Session-clock timestamp of the current round's serve
        round_started_at: u64,
        players: [PlayerView; 2],
        ball_x: f32,
        ball_y: f32,
        /// true = moving toward player two's goal line (y increasing)
        ball_direction: bool,
        ball_angle: f32,
    },

    /// The session is over; no further state changes follow this message
    SessionClosed {
        /// Set when the game ended by reaching the winning score; None when
        /// a peer disconnected
        winner: Option<Slot>,
    },

    /// Error message. Addressed: only the peer whose request failed
    /// receives it.
    Error {
        peer_id: Uuid,
        code: String,
        message: String,
    },

    /// Pong response. Addressed: only the pinging peer receives it, so
    /// the opponent's latency measurement stays untouched.
    Pong {
        peer_id: Uuid,
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    /// Peer this message is addressed to, if it is not a broadcast
    pub fn addressed_to(&self) -> Option<Uuid> {
        match self {
            ServerMsg::YouArePlayerOne { peer_id }
            | ServerMsg::Error { peer_id, .. }
            | ServerMsg::Pong { peer_id, .. } => Some(*peer_id),
            _ => None,
        }
    }
}

/// Replicated view of one player slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub display_name: String,
    /// Paddle left edge, always within [0, 500]
    pub paddle_x: f32,
    pub score: u8,
    pub has_won: bool,
}
