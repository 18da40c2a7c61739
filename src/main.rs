//! Room Presence Server - real-time multiplayer presence relay
//!
//! Clients connect over WebSocket, join one of a fixed set of rooms, and
//! relay movement and animation updates to the other occupants. A small
//! read-only HTTP surface reports connections, rosters, and uptime.

mod app;
mod config;
mod http;
mod lobby;
mod util;
mod ws;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::{socket_tracker, AppState};
use crate::config::Config;
use crate::http::build_router;
use crate::lobby::LobbyHandle;
use crate::util::time::init_server_time;

/// How long shutdown waits for sockets to flush the shutdown notice
const SOCKET_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    init_tracing(&config.log_level);
    init_server_time();

    info!("Starting Room Presence Server");
    info!("Server address: {}", config.server_addr);

    let (sockets, socket_drain) = socket_tracker();
    let state = AppState::new(config.clone(), sockets);
    let lobby = state.lobby.clone();

    let router = build_router(state);

    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);
    info!("Available rooms: {}", config.rooms.join(", "));
    info!("Status endpoints: /api/status /api/rooms /api/sockets /api/health");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(lobby))
        .await?;

    if !socket_drain.wait(SOCKET_DRAIN_TIMEOUT).await {
        warn!("Sockets still open after drain timeout, closing anyway");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Wait for Ctrl+C or SIGTERM, then tell connected clients
async fn shutdown_signal(lobby: LobbyHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }

    if let Err(e) = lobby.shutdown().await {
        warn!(error = %e, "Could not notify clients of shutdown");
    }
}
