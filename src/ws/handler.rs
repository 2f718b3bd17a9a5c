//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchHandle, PlayerInput, RoomEvent};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Outbound queue depth per connection
const OUTBOUND_BUFFER: usize = 64;

const DEFAULT_ROOM: &str = "lobby";

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Room code, defaults to the shared lobby
    #[serde(default)]
    pub room: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let room = normalize_room(query.room.as_deref());
    let player_id = Uuid::new_v4();
    info!(player_id = %player_id, room = %room, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, player_id, room, state))
}

fn normalize_room(room: Option<&str>) -> String {
    room.map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| r.chars().take(32).collect())
        .unwrap_or_else(|| DEFAULT_ROOM.to_string())
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: Uuid, room: String, state: AppState) {
    info!(player_id = %player_id, room = %room, "New WebSocket connection");

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);

    // A room that closed between lookup and attach is replaced once
    let mut handle = state.match_registry.get_or_create(&room);
    let mut attached = attach(&handle, player_id, outbound_tx.clone()).await;
    if !attached {
        state.match_registry.remove_stale(&room, handle.id);
        handle = state.match_registry.get_or_create(&room);
        attached = attach(&handle, player_id, outbound_tx).await;
    }
    if !attached {
        error!(player_id = %player_id, room = %room, "Could not attach to room");
        return;
    }

    let rate_limiter = ConnectionRateLimiter::new(state.config.input_rate_limit);
    run_session(player_id, socket, &handle, outbound_rx, rate_limiter).await;

    info!(player_id = %player_id, room = %room, "WebSocket connection closed");
}

async fn attach(
    handle: &MatchHandle,
    player_id: Uuid,
    outbound: mpsc::Sender<ServerMsg>,
) -> bool {
    handle
        .send(RoomEvent::Connected {
            player_id,
            outbound,
        })
        .await
        .is_ok()
}

/// Run the WebSocket session with read/write split
async fn run_session(
    player_id: Uuid,
    socket: WebSocket,
    handle: &MatchHandle,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
    rate_limiter: ConnectionRateLimiter,
) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer task: room messages -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> room
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        let input = PlayerInput {
                            player_id,
                            msg,
                            received_at: unix_millis(),
                        };

                        if handle.send(RoomEvent::Input(input)).await.is_err() {
                            debug!(player_id = %player_id, "Room channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    let _ = handle.send(RoomEvent::Disconnected { player_id }).await;

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
