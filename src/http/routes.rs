//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::lobby::service::{ConnectionInfo, RoomSummary};
use crate::lobby::LobbySnapshot;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::{PlayerInfo, Position};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.client_origin))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/rooms", get(rooms_handler))
        .route("/api/rooms/:room_id", get(room_handler))
        .route("/api/sockets", get(sockets_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// `*` allows any origin, otherwise a comma-separated allow list
fn allowed_origins(client_origin: &str) -> AllowOrigin {
    if client_origin.trim() == "*" {
        return AllowOrigin::any();
    }

    let origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    AllowOrigin::list(origins)
}

async fn snapshot(state: &AppState) -> Result<LobbySnapshot, AppError> {
    state
        .lobby
        .snapshot()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))
}

// ============================================================================
// Service banner
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexResponse {
    message: &'static str,
    port: u16,
    status: &'static str,
    transport: &'static str,
    rooms: Vec<String>,
    total_players: usize,
}

async fn index_handler(State(state): State<AppState>) -> Result<Json<IndexResponse>, AppError> {
    let snapshot = snapshot(&state).await?;

    Ok(Json(IndexResponse {
        message: "Multiplayer WebSocket Server",
        port: state.config.server_addr.port(),
        status: "running",
        transport: "WebSocket",
        rooms: snapshot.room_ids(),
        total_players: snapshot.connection_count(),
    }))
}

// ============================================================================
// Health and status
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime: f64,
    timestamp: DateTime<Utc>,
    connections: ConnectionTotals,
}

#[derive(Serialize)]
struct ConnectionTotals {
    total: usize,
    rooms: Vec<RoomOccupancy>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomOccupancy {
    room_id: String,
    players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let snapshot = snapshot(&state).await?;

    Ok(Json(HealthResponse {
        status: "healthy",
        uptime: uptime_secs(),
        timestamp: Utc::now(),
        connections: ConnectionTotals {
            total: snapshot.connection_count(),
            rooms: snapshot
                .rooms
                .iter()
                .map(|r| RoomOccupancy {
                    room_id: r.room_id.clone(),
                    players: r.player_count,
                })
                .collect(),
        },
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    connected_clients: usize,
    rooms: Vec<RoomSummary>,
    uptime: f64,
    timestamp: DateTime<Utc>,
}

async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let snapshot = snapshot(&state).await?;

    Ok(Json(StatusResponse {
        connected_clients: snapshot.connection_count(),
        rooms: snapshot.rooms,
        uptime: uptime_secs(),
        timestamp: Utc::now(),
    }))
}

// ============================================================================
// Rooms
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomListing {
    room_id: String,
    player_count: usize,
    players: Vec<RosterEntry>,
    max_players: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RosterEntry {
    id: Uuid,
    username: String,
    position: Position,
    joined_at: DateTime<Utc>,
}

impl From<&PlayerInfo> for RosterEntry {
    fn from(player: &PlayerInfo) -> Self {
        Self {
            id: player.id,
            username: player.username.clone(),
            position: player.position,
            joined_at: player.joined_at,
        }
    }
}

fn room_listings(snapshot: &LobbySnapshot, max_players: usize) -> Vec<RoomListing> {
    snapshot
        .rooms
        .iter()
        .map(|room| RoomListing {
            room_id: room.room_id.clone(),
            player_count: room.player_count,
            players: room.players.iter().map(RosterEntry::from).collect(),
            max_players,
        })
        .collect()
}

async fn rooms_handler(State(state): State<AppState>) -> Result<Json<Vec<RoomListing>>, AppError> {
    let snapshot = snapshot(&state).await?;
    Ok(Json(room_listings(
        &snapshot,
        state.config.max_players_per_room,
    )))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomDetails {
    room_id: String,
    player_count: usize,
    players: Vec<PlayerInfo>,
    is_active: bool,
}

async fn room_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomDetails>, AppError> {
    let snapshot = snapshot(&state).await?;
    let room = snapshot
        .room(&room_id)
        .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

    Ok(Json(RoomDetails {
        room_id: room.room_id.clone(),
        player_count: room.player_count,
        players: room.players.clone(),
        is_active: room.player_count > 0,
    }))
}

// ============================================================================
// Sockets
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SocketsResponse {
    total_sockets: usize,
    sockets: Vec<ConnectionInfo>,
    room_distribution: Vec<RoomCount>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomCount {
    room_id: String,
    player_count: usize,
}

async fn sockets_handler(State(state): State<AppState>) -> Result<Json<SocketsResponse>, AppError> {
    let snapshot = snapshot(&state).await?;

    let room_distribution = snapshot
        .rooms
        .iter()
        .map(|r| RoomCount {
            room_id: r.room_id.clone(),
            player_count: r.player_count,
        })
        .collect();

    Ok(Json(SocketsResponse {
        total_sockets: snapshot.connection_count(),
        sockets: snapshot.connections,
        room_distribution,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
