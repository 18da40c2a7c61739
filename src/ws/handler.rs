//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::{AppState, SocketGuard};
use crate::lobby::LobbyHandle;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4().simple().to_string();
    let (ws_sink, ws_stream) = socket.split();

    let (outbox, outbound_rx) = mpsc::channel::<ServerMsg>(state.config.outbound_buffer.get());

    let client_id = match state.lobby.connect(session_id.clone(), outbox).await {
        Ok(id) => id,
        Err(e) => {
            error!(socket_id = %session_id, error = %e, "Failed to register connection");
            return;
        }
    };

    let rate_limiter = ConnectionRateLimiter::new(state.config.input_rate_limit);
    let writer_handle = tokio::spawn(run_writer(
        client_id,
        ws_sink,
        outbound_rx,
        state.sockets.clone(),
    ));

    let reason = run_reader(client_id, ws_stream, &state.lobby, &rate_limiter).await;

    if let Err(e) = state.lobby.disconnect(client_id, reason).await {
        warn!(client_id = %client_id, error = %e, "Could not report disconnect");
    }

    // The lobby drops the outbox on disconnect, which ends the writer
    if writer_handle.await.is_err() {
        debug!(client_id = %client_id, "Writer task aborted");
    }

    info!(client_id = %client_id, "WebSocket connection closed");
}

/// Reader loop: WebSocket -> lobby. Returns the disconnect reason.
async fn run_reader(
    client_id: Uuid,
    mut ws_stream: SplitStream<WebSocket>,
    lobby: &LobbyHandle,
    rate_limiter: &ConnectionRateLimiter,
) -> &'static str {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(client_id = %client_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        if lobby.send(client_id, msg).await.is_err() {
                            debug!(client_id = %client_id, "Lobby channel closed");
                            return "server shutting down";
                        }
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(client_id = %client_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!(client_id = %client_id, "Received transport ping/pong");
            }
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "Client initiated close");
                return "client namespace disconnect";
            }
            Err(e) => {
                error!(client_id = %client_id, error = %e, "WebSocket error");
                return "transport error";
            }
        }
    }

    "transport close"
}

/// Writer task: lobby outbox -> WebSocket
async fn run_writer(
    client_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
    _guard: SocketGuard,
) {
    while let Some(msg) = outbound_rx.recv().await {
        let shutting_down = matches!(msg, ServerMsg::ServerShutdown { .. });

        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(client_id = %client_id, error = %e, "WebSocket send failed");
            break;
        }

        if shutting_down {
            let _ = ws_sink.send(Message::Close(None)).await;
            break;
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
