//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Spawn point used when a client joins without a position
pub const DEFAULT_POSITION: Position = Position { x: 192.0, y: 160.0 };

/// Animation frame as sent by the client. Relayed verbatim, so negative and
/// fractional values survive.
pub type Frame = f64;

/// 2D position in room coordinates, relayed exactly as the client sent it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Default for Position {
    fn default() -> Self {
        DEFAULT_POSITION
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter a room, leaving the current one first
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        /// Display name to adopt before joining
        #[serde(default)]
        username: Option<String>,
        /// Spawn position, defaults to `DEFAULT_POSITION`
        #[serde(default)]
        position: Option<Position>,
    },

    /// Leave the current room
    LeaveRoom,

    /// Movement update relayed to room peers
    PlayerMove { position: Position, frame: Frame },

    /// Animation cue relayed to room peers
    PlayerAnimation { animation: String, frame: Frame },

    /// Liveness check
    Ping {
        /// Client timestamp, echoed back
        #[serde(default)]
        t: Option<u64>,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    #[serde(rename_all = "camelCase")]
    Connected {
        client_id: Uuid,
        username: String,
        message: String,
        available_rooms: Vec<String>,
    },

    /// Full roster, sent only to the joining client
    #[serde(rename_all = "camelCase")]
    RoomState {
        room_id: String,
        players: Vec<PlayerInfo>,
        player_count: usize,
    },

    /// Player joined the sender's room
    PlayerJoined { player: PlayerInfo },

    /// Player left the sender's room
    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: Uuid },

    /// Occupancy change, sent to every connection
    #[serde(rename_all = "camelCase")]
    RoomUpdate { room_id: String, player_count: usize },

    #[serde(rename_all = "camelCase")]
    PlayerMoved {
        player_id: Uuid,
        position: Position,
        frame: Frame,
    },

    #[serde(rename_all = "camelCase")]
    PlayerAnimation {
        player_id: Uuid,
        animation: String,
        frame: Frame,
    },

    /// Error message
    Error { message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: Option<u64>,
    },

    /// Server is going away
    ServerShutdown { message: String },
}

/// Room membership record as seen by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: Uuid,
    pub socket_id: String,
    pub username: String,
    pub position: Position,
    pub frame: Frame,
    pub joined_at: DateTime<Utc>,
}
