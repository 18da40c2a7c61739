//! Connection registry - every live connection and its last known state

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ws::protocol::{Frame, Position, ServerMsg};

use super::LobbyError;

/// Outbound queue for one connection
pub type Outbox = mpsc::Sender<ServerMsg>;

/// A live client connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    /// Transport-level session id
    pub session_id: String,
    pub username: String,
    pub current_room: Option<String>,
    pub position: Position,
    pub frame: Frame,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    outbox: Outbox,
}

impl Connection {
    /// Queue a message for this connection. Drops it if the queue is full or closed.
    pub fn send(&self, msg: ServerMsg) {
        match self.outbox.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = %self.id, "Outbound queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(client_id = %self.id, "Outbound queue closed");
            }
        }
    }
}

/// Default display name derived from the connection id
pub fn default_username(id: Uuid) -> String {
    format!("Player_{}", &id.to_string()[..8])
}

/// Registry of all live connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<Uuid, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new connection with a fresh id and default name
    pub fn register(&mut self, session_id: impl Into<String>, outbox: Outbox) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();

        self.connections.insert(
            id,
            Connection {
                id,
                session_id: session_id.into(),
                username: default_username(id),
                current_room: None,
                position: Position::default(),
                frame: 0.0,
                connected_at: now,
                last_activity: now,
                outbox,
            },
        );

        id
    }

    pub fn rename(&mut self, id: Uuid, username: impl Into<String>) -> Result<(), LobbyError> {
        let connection = self.lookup_mut(id)?;
        connection.username = username.into();
        Ok(())
    }

    /// Record a new position/frame. Ignored unless the connection is in a room.
    pub fn update_position(&mut self, id: Uuid, position: Position, frame: Frame) {
        if let Some(connection) = self.connections.get_mut(&id) {
            if connection.current_room.is_some() {
                connection.position = position;
                connection.frame = frame;
                connection.last_activity = Utc::now();
            }
        }
    }

    /// Refresh the last-activity timestamp
    pub fn touch(&mut self, id: Uuid) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.last_activity = Utc::now();
        }
    }

    /// Delete an entry. Callers must leave the room first.
    pub fn remove(&mut self, id: Uuid) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn lookup(&self, id: Uuid) -> Result<&Connection, LobbyError> {
        self.connections
            .get(&id)
            .ok_or(LobbyError::UnknownIdentity(id))
    }

    pub(crate) fn lookup_mut(&mut self, id: Uuid) -> Result<&mut Connection, LobbyError> {
        self.connections
            .get_mut(&id)
            .ok_or(LobbyError::UnknownIdentity(id))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Unicast; unknown ids are skipped
    pub fn send(&self, id: Uuid, msg: ServerMsg) {
        if let Some(connection) = self.connections.get(&id) {
            connection.send(msg);
        }
    }

    /// Send to every live connection
    pub fn broadcast(&self, msg: &ServerMsg) {
        for connection in self.connections.values() {
            connection.send(msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn outbox() -> (Outbox, mpsc::Receiver<ServerMsg>) {
        mpsc::channel(8)
    }

    #[test]
    fn register_assigns_default_name_and_no_room() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = outbox();
        let id = registry.register("sock-1", tx);

        let connection = assert_ok!(registry.lookup(id));
        assert_eq!(connection.username, default_username(id));
        assert!(connection.username.starts_with("Player_"));
        assert_eq!(connection.username.len(), "Player_".len() + 8);
        assert_eq!(connection.session_id, "sock-1");
        assert!(connection.current_room.is_none());
        assert_eq!(connection.position, Position { x: 192.0, y: 160.0 });
    }

    #[test]
    fn rename_unknown_identity_fails() {
        let mut registry = ConnectionRegistry::new();
        let missing = Uuid::new_v4();

        let err = assert_err!(registry.rename(missing, "ghost"));
        assert!(matches!(err, LobbyError::UnknownIdentity(id) if id == missing));
    }

    #[test]
    fn update_position_requires_a_room() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = outbox();
        let id = registry.register("sock-1", tx);
        let moved = Position { x: 1.0, y: 2.0 };

        registry.update_position(id, moved, 4.0);
        assert_eq!(registry.lookup(id).unwrap().position, Position::default());

        registry.lookup_mut(id).unwrap().current_room = Some("Main_Screen".to_string());
        registry.update_position(id, moved, 4.0);
        let connection = registry.lookup(id).unwrap();
        assert_eq!(connection.position, moved);
        assert_eq!(connection.frame, 4.0);
    }

    #[test]
    fn remove_then_lookup_is_not_found() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = outbox();
        let id = registry.register("sock-1", tx);

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert_err!(registry.lookup(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn send_to_full_queue_drops_message() {
        let mut registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        let id = registry.register("sock-1", tx);

        registry.send(id, ServerMsg::Pong { t: Some(1) });
        registry.send(id, ServerMsg::Pong { t: Some(2) });

        assert_eq!(rx.try_recv().unwrap(), ServerMsg::Pong { t: Some(1) });
        assert!(rx.try_recv().is_err());
    }
}
