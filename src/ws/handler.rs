//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::PeerEvent;
use crate::util::rate_limit::PeerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Longest display name the server will keep
const MAX_NAME_LEN: usize = 32;

/// WebSocket upgrade handler. Every connection is assigned a fresh peer id;
/// that id is the identity the session core authenticates moves against.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer_id = Uuid::new_v4();
    info!(peer_id = %peer_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        peer_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(peer_id = %peer_id, error = %e, "Failed to send welcome");
        return;
    }

    // The connection enters the lobby only once the client introduces
    // itself with a join
    let display_name = match await_join(peer_id, &mut ws_sink, &mut ws_stream).await {
        Some(name) => name,
        None => {
            info!(peer_id = %peer_id, "Connection closed before join");
            return;
        }
    };

    let (input_tx, snapshot_rx) = state.lobby.join_or_create(peer_id, &display_name).await;

    run_connection(peer_id, ws_sink, ws_stream, input_tx, snapshot_rx).await;

    info!(peer_id = %peer_id, "WebSocket connection closed");
}

/// Read messages until the client sends its join. Pings are answered
/// directly; anything else before the join is dropped.
async fn await_join(
    peer_id: Uuid,
    ws_sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    ws_stream: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<String> {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(ClientMsg::Join { name }) => {
                    let mut name = name.trim().to_string();
                    name.truncate(MAX_NAME_LEN);
                    if name.is_empty() {
                        name = "player".to_string();
                    }
                    return Some(name);
                }
                Ok(ClientMsg::Ping { t }) => {
                    let _ = send_msg(ws_sink, &ServerMsg::Pong { peer_id, t }).await;
                }
                Ok(_) => {
                    warn!(peer_id = %peer_id, "Message before join, ignoring");
                }
                Err(e) => {
                    warn!(peer_id = %peer_id, error = %e, "Failed to parse client message");
                }
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => {
                error!(peer_id = %peer_id, error = %e, "WebSocket error");
                return None;
            }
        }
    }
    None
}

/// Pump the connection: session broadcasts out, peer events in
async fn run_connection(
    peer_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    input_tx: mpsc::Sender<PeerEvent>,
    mut snapshot_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = PeerRateLimiter::new();

    // Writer task: replication stream -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            match snapshot_rx.recv().await {
                Ok(msg) => {
                    // Addressed messages go only to their target peer
                    if msg.addressed_to().is_some_and(|target| target != peer_id) {
                        continue;
                    }
                    let closing = matches!(msg, ServerMsg::SessionClosed { .. });
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(peer_id = %peer_id, error = %e, "WebSocket send failed");
                        break;
                    }
                    if closing {
                        // Nothing follows the termination signal
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        peer_id = %peer_id,
                        lagged_count = n,
                        "Client lagged, skipping {} snapshots", n
                    );
                    // Continue - don't disconnect for lag
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(peer_id = %peer_id, "Replication channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> session event queue
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(peer_id = %peer_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Join { .. }) => {
                        warn!(peer_id = %peer_id, "Duplicate join, ignoring");
                    }
                    Ok(client_msg) => {
                        let event = PeerEvent {
                            peer_id,
                            msg: client_msg,
                        };

                        if input_tx.send(event).await.is_err() {
                            debug!(peer_id = %peer_id, "Session event channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(peer_id = %peer_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(peer_id = %peer_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(peer_id = %peer_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(peer_id = %peer_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Disconnect is fatal to the session, consented or not
    let _ = input_tx
        .send(PeerEvent {
            peer_id,
            msg: ClientMsg::Leave,
        })
        .await;

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
