//! Room presence core: connection registry, room fanout, and the lobby task

pub mod registry;
pub mod rooms;
pub mod service;

pub use service::{Lobby, LobbyHandle, LobbySnapshot};

use uuid::Uuid;

/// Lobby errors
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("Room does not exist")]
    RoomNotFound(String),

    #[error("Room {room_id} is full ({capacity} players)")]
    RoomFull { room_id: String, capacity: usize },

    #[error("Unknown client {0}")]
    UnknownIdentity(Uuid),

    #[error("Lobby is not running")]
    Unavailable,
}
