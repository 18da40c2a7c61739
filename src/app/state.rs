//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::lobby::{Lobby, LobbyHandle};

use super::SocketGuard;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lobby: LobbyHandle,
    /// Cloned into each socket task so shutdown can wait for them
    pub sockets: SocketGuard,
}

impl AppState {
    /// Build state and start the lobby task. Must run inside a tokio runtime.
    pub fn new(config: Config, sockets: SocketGuard) -> Self {
        let lobby = Lobby::new(&config).spawn();

        Self {
            config: Arc::new(config),
            lobby,
            sockets,
        }
    }
}
