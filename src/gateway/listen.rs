//! GET /listen: real-time channel for listeners.
//!
//! The first text frame must be an `access_token` event carrying the
//! KeyHash. The relay answers with `auth`, and on success registers the
//! connection under the account's current AppKey and forwards callbacks
//! until either side disconnects.

use super::AppState;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::ConnectionId;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a fresh connection may take to present its access token.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

type WsSender = SplitSink<WebSocket, Message>;

pub async fn handle_listen(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_listen_connection(socket, state))
}

async fn handle_listen_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let handshake = tokio::time::timeout(
        Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        read_access_token(&mut ws_receiver),
    )
    .await;
    let key_hash = match handshake {
        Ok(Some(key_hash)) => key_hash,
        Ok(None) => {
            tracing::debug!("Listener left before authenticating");
            return;
        }
        Err(_) => {
            tracing::debug!("Listener handshake timed out");
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    let credential = match state.credentials.resolve_listener(&key_hash).await {
        Ok(credential) => credential,
        Err(e) => {
            tracing::warn!(error = %e, "Listener handshake rejected");
            reject(&mut ws_sender).await;
            return;
        }
    };
    let app_key = credential.app_key;

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let connection: ConnectionId = match state.registry.register(&app_key, outbound_tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(app_key = %app_key, error = %e, "Failed to register listener");
            reject(&mut ws_sender).await;
            return;
        }
    };

    if send_event(&mut ws_sender, &ServerEvent::Auth(true)).await {
        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    let Some(event) = outbound else { break };
                    let evicted = event == ServerEvent::Disconnect;
                    if !send_event(&mut ws_sender, &event).await {
                        break;
                    }
                    if evicted {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
                inbound = ws_receiver.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(text.as_str()) {
                            Ok(ClientEvent::Disconnect) => break,
                            Ok(ClientEvent::AccessToken(_)) => {
                                tracing::debug!(app_key = %app_key, "Ignoring repeated access token");
                            }
                            Err(e) => {
                                tracing::debug!(app_key = %app_key, error = %e, "Ignoring unparseable listener message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    state.registry.unregister(&app_key, connection);
    tracing::debug!(app_key = %app_key, connection, "Listener WebSocket disconnected");
}

/// Wait for the first `access_token` event. `None` if the socket closes or
/// the listener disconnects first.
async fn read_access_token(ws_receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(ClientEvent::AccessToken(key_hash)) => return Some(key_hash),
                Ok(ClientEvent::Disconnect) => return None,
                Err(e) => tracing::debug!(error = %e, "Ignoring unparseable handshake message"),
            },
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn reject(ws_sender: &mut WsSender) {
    send_event(ws_sender, &ServerEvent::Auth(false)).await;
    let _ = ws_sender.send(Message::Close(None)).await;
}

/// Serialize and send one event. Returns `false` once the socket is unusable.
async fn send_event(ws_sender: &mut WsSender, event: &ServerEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server event");
            return true;
        }
    };
    ws_sender.send(Message::Text(json.into())).await.is_ok()
}
