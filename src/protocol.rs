//! Real-time channel event schema.
//!
//! ## Protocol
//!
//! ```text
//! Listener ──WebSocket──▸ Relay
//!   access_token  ─────────▸        hash(AppKey + AppSecret)
//!                 ◂───────── auth      true | false
//!                 ◂───────── callback  {route, payload, method}
//!   disconnect    ◂────────▸        either side
//! ```
//!
//! All messages are JSON text frames of the form
//! `{"event": "<name>", "data": <value>}`.

use serde::{Deserialize, Serialize};

/// A normalized inbound proxy call, forwarded to a listener. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    /// Route below the AppKey, always starting with `/`.
    pub route: String,
    /// Request body: parsed JSON when possible, a string otherwise, `null` when empty.
    pub payload: serde_json::Value,
    /// HTTP method of the inbound call.
    pub method: String,
}

impl CallbackEnvelope {
    /// Build an envelope from the pieces of a `/proxy/{appKey}/{route...}` call.
    /// `route` is the remainder after the AppKey segment; extra leading
    /// slashes are kept as sent.
    pub fn from_request(method: &str, route: &str, body: &[u8]) -> Self {
        let route = if route.starts_with('/') {
            route.to_owned()
        } else {
            format!("/{route}")
        };
        Self {
            route,
            payload: payload_from_body(body),
            method: method.to_ascii_uppercase(),
        }
    }
}

fn payload_from_body(body: &[u8]) -> serde_json::Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
    })
}

/// Messages sent from the listener to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake: hex SHA-256 of AppKey followed by AppSecret.
    AccessToken(String),
    Disconnect,
}

/// Messages sent from the relay to the listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake result.
    Auth(bool),
    Callback(CallbackEnvelope),
    /// The relay is closing this connection (evicted by a newer listener).
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_from_json_body() {
        let env = CallbackEnvelope::from_request("post", "orders/42", br#"{"id":42}"#);
        assert_eq!(env.route, "/orders/42");
        assert_eq!(env.method, "POST");
        assert_eq!(env.payload, json!({"id": 42}));
    }

    #[test]
    fn envelope_from_text_and_empty_bodies() {
        let text = CallbackEnvelope::from_request("PUT", "", b"plain text");
        assert_eq!(text.route, "/");
        assert_eq!(text.payload, json!("plain text"));

        let empty = CallbackEnvelope::from_request("GET", "/status", b"");
        assert_eq!(empty.route, "/status");
        assert!(empty.payload.is_null());
    }

    #[test]
    fn extra_leading_slashes_are_preserved() {
        let env = CallbackEnvelope::from_request("GET", "/x", b"");
        assert_eq!(env.route, "/x");

        let env = CallbackEnvelope::from_request("GET", "//x", b"");
        assert_eq!(env.route, "//x");
    }

    #[test]
    fn event_wire_format() {
        let auth = serde_json::to_value(ServerEvent::Auth(true)).unwrap();
        assert_eq!(auth, json!({"event": "auth", "data": true}));

        let callback = serde_json::to_value(ServerEvent::Callback(CallbackEnvelope {
            route: "/a".into(),
            payload: json!(null),
            method: "GET".into(),
        }))
        .unwrap();
        assert_eq!(callback["event"], "callback");
        assert_eq!(callback["data"]["route"], "/a");

        let bye = serde_json::to_value(ServerEvent::Disconnect).unwrap();
        assert_eq!(bye, json!({"event": "disconnect"}));
    }

    #[test]
    fn client_events_parse() {
        let token: ClientEvent =
            serde_json::from_str(r#"{"event":"access_token","data":"abc"}"#).unwrap();
        assert_eq!(token, ClientEvent::AccessToken("abc".into()));

        let bye: ClientEvent = serde_json::from_str(r#"{"event":"disconnect"}"#).unwrap();
        assert_eq!(bye, ClientEvent::Disconnect);

        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"bogus"}"#).is_err());
    }
}
