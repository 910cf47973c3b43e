//! WebSocket endpoint: upgrade, per-connection pumps, command handling.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use parley_shared::{Command, Envelope};

use crate::hub::random_id;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    username: Option<String>,
}

/// WebSocket upgrade handler; the client's identity travels in the query
/// string.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let username = query
        .username
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("anonymous-{}", random_id(5)));
    ws.on_upgrade(move |socket| handle_socket(socket, username, state))
}

async fn handle_socket(socket: WebSocket, username: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let id = state.hub.register(&username, tx.clone()).await;

    // every connection starts from the full online snapshot, self included
    let _ = tx.send(Envelope::online_users(state.hub.online_users().await));

    // forward queued envelopes to the socket
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<Command>(&text) {
                Ok(Command::Message { value }) if !value.is_empty() => {
                    state.hub.broadcast_message(&username, &value).await;
                }
                Ok(Command::Message { .. }) => {}
                Ok(Command::Typing { .. }) => state.hub.set_typing(&username).await,
                Err(e) => {
                    tracing::debug!(user = %username, "skipping unreadable command: {e}");
                }
            },
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    state.hub.unregister(id).await;
    tracing::info!(user = %username, "websocket closed");
}
