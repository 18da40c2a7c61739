//! Lobby service - owns the registry and rooms, serializes every event
//!
//! All state lives on a single task. Sockets and HTTP handlers talk to it
//! through a cloneable [`LobbyHandle`], so handlers never need a lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::ws::protocol::{ClientMsg, PlayerInfo, Position, ServerMsg};

use super::registry::{ConnectionRegistry, Outbox};
use super::rooms::{Room, RoomBroadcaster};
use super::LobbyError;

/// Commands queue depth for the lobby task
const COMMAND_BUFFER: usize = 1024;

/// Occupancy of one room
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: String,
    pub player_count: usize,
    pub players: Vec<PlayerInfo>,
}

impl From<&Room> for RoomSummary {
    fn from(room: &Room) -> Self {
        Self {
            room_id: room.id().to_string(),
            player_count: room.len(),
            players: room.players(),
        }
    }
}

/// Public view of one connection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub client_id: Uuid,
    pub socket_id: String,
    pub username: String,
    pub current_room: Option<String>,
    pub position: Position,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Point-in-time copy of lobby state for status queries
#[derive(Debug, Clone, Default)]
pub struct LobbySnapshot {
    pub connections: Vec<ConnectionInfo>,
    pub rooms: Vec<RoomSummary>,
}

impl LobbySnapshot {
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomSummary> {
        self.rooms.iter().find(|r| r.room_id == room_id)
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.iter().map(|r| r.room_id.clone()).collect()
    }
}

/// Messages processed by the lobby task
#[derive(Debug)]
pub enum LobbyCommand {
    Connect {
        session_id: String,
        outbox: Outbox,
        reply: oneshot::Sender<Uuid>,
    },
    Inbound {
        client_id: Uuid,
        msg: ClientMsg,
    },
    Disconnect {
        client_id: Uuid,
        reason: String,
    },
    Snapshot {
        reply: oneshot::Sender<LobbySnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Room presence state machine
#[derive(Debug)]
pub struct Lobby {
    registry: ConnectionRegistry,
    rooms: RoomBroadcaster,
}

impl Lobby {
    pub fn new(config: &Config) -> Self {
        Self::with_rooms(config.rooms.iter().cloned(), config.room_capacity())
    }

    pub fn with_rooms<I, S>(room_ids: I, capacity: Option<usize>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registry: ConnectionRegistry::new(),
            rooms: RoomBroadcaster::new(room_ids, capacity),
        }
    }

    /// Move the lobby onto its own task and return a handle to it
    pub fn spawn(self) -> LobbyHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(self.run(rx));
        LobbyHandle { tx }
    }

    /// Process commands until every handle is dropped
    pub async fn run(mut self, mut rx: mpsc::Receiver<LobbyCommand>) {
        info!(rooms = ?self.rooms.room_ids(), "Lobby started");

        while let Some(command) = rx.recv().await {
            self.apply(command);
        }

        info!("Lobby stopped");
    }

    fn apply(&mut self, command: LobbyCommand) {
        match command {
            LobbyCommand::Connect {
                session_id,
                outbox,
                reply,
            } => {
                let id = self.connect(session_id, outbox);
                if reply.send(id).is_err() {
                    // Socket went away before registration finished
                    self.disconnect(id, "transport closed during connect");
                }
            }
            LobbyCommand::Inbound { client_id, msg } => self.handle(client_id, msg),
            LobbyCommand::Disconnect { client_id, reason } => self.disconnect(client_id, &reason),
            LobbyCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            LobbyCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    /// Register a connection and greet it
    pub fn connect(&mut self, session_id: impl Into<String>, outbox: Outbox) -> Uuid {
        let id = self.registry.register(session_id, outbox);

        if let Ok(connection) = self.registry.lookup(id) {
            info!(
                client_id = %id,
                username = %connection.username,
                socket_id = %connection.session_id,
                "Client connected"
            );

            connection.send(ServerMsg::Connected {
                client_id: id,
                username: connection.username.clone(),
                message: "Connected to multiplayer server".to_string(),
                available_rooms: self.rooms.room_ids(),
            });
        }

        id
    }

    /// Dispatch one inbound client event
    pub fn handle(&mut self, id: Uuid, msg: ClientMsg) {
        if !self.registry.contains(id) {
            debug!(client_id = %id, "Ignoring event from unknown client");
            return;
        }

        match msg {
            ClientMsg::JoinRoom {
                room_id,
                username,
                position,
            } => self.handle_join(id, room_id, username, position),
            ClientMsg::LeaveRoom => {
                self.rooms.leave(&mut self.registry, id);
            }
            ClientMsg::PlayerMove { position, frame } => {
                self.registry.touch(id);
                self.rooms.move_player(&mut self.registry, id, position, frame);
            }
            ClientMsg::PlayerAnimation { animation, frame } => {
                self.rooms.animate(&self.registry, id, animation, frame);
            }
            ClientMsg::Ping { t } => self.registry.send(id, ServerMsg::Pong { t }),
        }
    }

    fn handle_join(
        &mut self,
        id: Uuid,
        room_id: String,
        username: Option<String>,
        position: Option<Position>,
    ) {
        if let Some(username) = username.filter(|name| !name.is_empty()) {
            debug!(client_id = %id, username = %username, "Updated username");
            if let Err(e) = self.registry.rename(id, username) {
                debug!(client_id = %id, error = %e, "Rename skipped");
            }
        }

        match self.rooms.join(&mut self.registry, id, &room_id, position) {
            Ok(()) => {}
            Err(e @ (LobbyError::RoomNotFound(_) | LobbyError::RoomFull { .. })) => {
                warn!(client_id = %id, room_id = %room_id, error = %e, "Join rejected");
                self.registry.send(
                    id,
                    ServerMsg::Error {
                        message: e.to_string(),
                    },
                );
            }
            Err(e) => {
                debug!(client_id = %id, error = %e, "Join ignored");
            }
        }
    }

    /// Leave any room and forget the connection. Safe to call twice.
    pub fn disconnect(&mut self, id: Uuid, reason: &str) {
        let username = self
            .registry
            .lookup(id)
            .map(|c| c.username.clone())
            .ok();

        if self.rooms.disconnect(&mut self.registry, id) {
            info!(
                client_id = %id,
                username = username.as_deref().unwrap_or_default(),
                reason,
                "Client disconnected"
            );
        }
    }

    /// Tell every connection the server is going away
    pub fn shutdown(&self) {
        info!(connections = self.registry.len(), "Notifying clients of shutdown");
        self.registry.broadcast(&ServerMsg::ServerShutdown {
            message: "Server is shutting down".to_string(),
        });
    }

    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn room_summaries(&self) -> Vec<RoomSummary> {
        self.rooms.rooms().map(RoomSummary::from).collect()
    }

    #[cfg(test)]
    pub fn room(&self, room_id: &str) -> Option<RoomSummary> {
        self.rooms.room(room_id).map(RoomSummary::from)
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry
            .iter()
            .map(|c| ConnectionInfo {
                client_id: c.id,
                socket_id: c.session_id.clone(),
                username: c.username.clone(),
                current_room: c.current_room.clone(),
                position: c.position,
                connected_at: c.connected_at,
                last_activity: c.last_activity,
            })
            .collect()
    }

    pub fn snapshot(&self) -> LobbySnapshot {
        LobbySnapshot {
            connections: self.connections(),
            rooms: self.room_summaries(),
        }
    }
}

/// Handle to the running lobby task
#[derive(Clone)]
pub struct LobbyHandle {
    tx: mpsc::Sender<LobbyCommand>,
}

impl LobbyHandle {
    /// Register a new socket; the lobby greets it through `outbox`
    pub async fn connect(
        &self,
        session_id: impl Into<String>,
        outbox: Outbox,
    ) -> Result<Uuid, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.command(LobbyCommand::Connect {
            session_id: session_id.into(),
            outbox,
            reply,
        })
        .await?;
        rx.await.map_err(|_| LobbyError::Unavailable)
    }

    pub async fn send(&self, client_id: Uuid, msg: ClientMsg) -> Result<(), LobbyError> {
        self.command(LobbyCommand::Inbound { client_id, msg }).await
    }

    pub async fn disconnect(
        &self,
        client_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<(), LobbyError> {
        self.command(LobbyCommand::Disconnect {
            client_id,
            reason: reason.into(),
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<LobbySnapshot, LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.command(LobbyCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| LobbyError::Unavailable)
    }

    /// Resolves once every connection's outbox holds the shutdown notice
    pub async fn shutdown(&self) -> Result<(), LobbyError> {
        let (reply, rx) = oneshot::channel();
        self.command(LobbyCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| LobbyError::Unavailable)
    }

    async fn command(&self, command: LobbyCommand) -> Result<(), LobbyError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| LobbyError::Unavailable)
    }
}
