//! Remote-side listener: connects out to the relay, authenticates with the
//! KeyHash and surfaces callbacks to an observer.
//!
//! The client never reconnects on its own. When [`ListenerClient::run`]
//! returns, the connection is gone and the caller decides what to do next.

pub mod state;

pub use state::{ListenerMachine, ListenerState, Reaction};

use crate::auth::key_hash;
use crate::protocol::{CallbackEnvelope, ClientEvent, ServerEvent};
use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

/// Path of the real-time endpoint on the relay.
pub const LISTEN_PATH: &str = "/listen";

/// Receives listener lifecycle notifications. All methods default to no-ops.
pub trait ListenerObserver: Send {
    fn on_connect(&mut self) {}

    fn on_auth(&mut self, _accepted: bool) {}

    fn on_callback(&mut self, _envelope: CallbackEnvelope) {}

    fn on_disconnect(&mut self) {}
}

pub struct ListenerClient {
    url: String,
    app_key: String,
    machine: ListenerMachine,
}

impl ListenerClient {
    /// `server_url` is the relay's base URL (`http(s)://` or `ws(s)://`).
    pub fn new(server_url: &str, app_key: &str, app_secret: &str) -> Self {
        Self {
            url: listen_url(server_url),
            app_key: app_key.to_owned(),
            machine: ListenerMachine::new(key_hash(app_key, app_secret)),
        }
    }

    pub fn state(&self) -> ListenerState {
        self.machine.state()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect, authenticate and pump events until the connection closes or
    /// `cancel` fires. Errors only when the transport cannot be established.
    pub async fn run<O: ListenerObserver>(
        &mut self,
        observer: &mut O,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        if !self.machine.begin_connect() {
            anyhow::bail!("listener for {} is already connected", self.app_key);
        }

        tracing::info!(url = %self.url, app_key = %self.app_key, "Connecting to relay");
        let connected = tokio::select! {
            () = cancel.cancelled() => None,
            result = tokio_tungstenite::connect_async(self.url.as_str()) => Some(result),
        };
        let ws_stream = match connected {
            Some(Ok((ws_stream, _response))) => ws_stream,
            Some(Err(e)) => {
                self.machine.transport_closed();
                return Err(e).with_context(|| format!("Failed to connect to {}", self.url));
            }
            None => {
                self.machine.transport_closed();
                return Ok(());
            }
        };

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        observer.on_connect();

        let hello = serde_json::to_string(&self.machine.transport_connected())?;
        if let Err(e) = ws_sender.send(WsMessage::Text(hello.into())).await {
            tracing::warn!(error = %e, "Failed to send access token");
            self.finish(observer);
            return Ok(());
        }

        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(app_key = %self.app_key, "Listener cancelled, closing");
                    if let Ok(bye) = serde_json::to_string(&ClientEvent::Disconnect) {
                        let _ = ws_sender.send(WsMessage::Text(bye.into())).await;
                    }
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
                frame = ws_receiver.next() => frame,
            };

            let text = match frame {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Close(frame))) => {
                    tracing::info!(close_frame = ?frame, "Relay closed the connection");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Relay connection error");
                    break;
                }
                None => break,
            };

            let event = match serde_json::from_str::<ServerEvent>(text.as_str()) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unparseable relay message");
                    continue;
                }
            };

            match self.machine.receive(event) {
                Reaction::Authenticated => {
                    tracing::info!(app_key = %self.app_key, "Listener authenticated");
                    observer.on_auth(true);
                }
                Reaction::Rejected => {
                    tracing::error!(app_key = %self.app_key, "Relay rejected the application credentials");
                    observer.on_auth(false);
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
                Reaction::Callback(envelope) => observer.on_callback(envelope),
                Reaction::Closed => {
                    tracing::info!(app_key = %self.app_key, "Relay asked listener to disconnect");
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
                Reaction::Ignored => {}
            }
        }

        self.finish(observer);
        Ok(())
    }

    fn finish<O: ListenerObserver>(&mut self, observer: &mut O) {
        if self.machine.transport_closed() {
            observer.on_disconnect();
        }
    }
}

/// Map a relay base URL to its WebSocket endpoint.
pub fn listen_url(server_url: &str) -> String {
    let base = server_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_owned()
    } else {
        format!("ws://{base}")
    };

    if base.ends_with(LISTEN_PATH) {
        base
    } else {
        format!("{base}{LISTEN_PATH}")
    }
}
