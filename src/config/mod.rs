//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// Rooms available when `ROOMS` is not set
pub const DEFAULT_ROOMS: &[&str] = &["Main_Screen", "House_Screen"];

const DEFAULT_OUTBOUND_BUFFER: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(n) => n,
    None => unreachable!(),
};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Static room enumeration, fixed for the life of the process
    pub rooms: Vec<String>,
    /// Advertised per-room capacity
    pub max_players_per_room: usize,
    /// Refuse joins once a room reaches `max_players_per_room`
    pub enforce_room_capacity: bool,

    /// Max inbound WebSocket messages per second per connection
    pub input_rate_limit: u32,
    /// Outbound queue depth per connection before messages are dropped
    pub outbound_buffer: NonZeroUsize,

    /// Allowed client origins for CORS ("*" for any)
    pub client_origin: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string())
        };

        let rooms = match env::var("ROOMS") {
            Ok(raw) => parse_rooms(&raw)?,
            Err(_) => DEFAULT_ROOMS.iter().map(|r| r.to_string()).collect(),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            rooms,
            max_players_per_room: parse_var("MAX_PLAYERS_PER_ROOM", 10)?,
            enforce_room_capacity: parse_var("ENFORCE_ROOM_CAPACITY", false)?,

            input_rate_limit: parse_var("INPUT_RATE_LIMIT", 60)?,
            outbound_buffer: parse_var("OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?,

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
        })
    }

    /// Capacity the lobby should enforce, if any
    pub fn room_capacity(&self) -> Option<usize> {
        self.enforce_room_capacity.then_some(self.max_players_per_room)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            log_level: "info".to_string(),
            rooms: DEFAULT_ROOMS.iter().map(|r| r.to_string()).collect(),
            max_players_per_room: 10,
            enforce_room_capacity: false,
            input_rate_limit: 60,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            client_origin: "*".to_string(),
        }
    }
}

/// Split a comma-separated room list, dropping blanks and duplicates
fn parse_rooms(raw: &str) -> Result<Vec<String>, ConfigError> {
    let mut rooms: Vec<String> = Vec::new();
    for room in raw.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        if !rooms.iter().any(|r| r == room) {
            rooms.push(room.to_string());
        }
    }

    if rooms.is_empty() {
        return Err(ConfigError::NoRooms);
    }
    Ok(rooms)
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    parse_value(var, env::var(var).ok(), default)
}

fn parse_value<T: FromStr>(
    var: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("ROOMS must name at least one room")]
    NoRooms,
}
