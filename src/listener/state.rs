//! Connection state machine for the listener side.
//!
//! Transport-free: the client feeds it transport transitions and decoded
//! server events, and acts on the [`Reaction`] it returns.

use crate::protocol::{CallbackEnvelope, ClientEvent, ServerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerState {
    #[default]
    Disconnected,
    Connecting,
    AuthPending,
    Authenticated,
}

/// What the client should do after an event was fed to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// Handshake accepted; callbacks will follow.
    Authenticated,
    /// Handshake refused; close the transport.
    Rejected,
    /// Surface this callback to observers.
    Callback(CallbackEnvelope),
    /// The relay asked us to go away; close the transport.
    Closed,
    /// Out-of-sequence event, nothing to do.
    Ignored,
}

#[derive(Debug)]
pub struct ListenerMachine {
    key_hash: String,
    state: ListenerState,
    /// A transport was established and its close has not been reported yet.
    open: bool,
}

impl ListenerMachine {
    pub fn new(key_hash: impl Into<String>) -> Self {
        Self {
            key_hash: key_hash.into(),
            state: ListenerState::Disconnected,
            open: false,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Disconnected → Connecting. Returns `false` if a connection is already
    /// in progress or established.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != ListenerState::Disconnected || self.open {
            return false;
        }
        self.state = ListenerState::Connecting;
        true
    }

    /// Connecting → AuthPending. Returns the handshake to send right away.
    pub fn transport_connected(&mut self) -> ClientEvent {
        self.state = ListenerState::AuthPending;
        self.open = true;
        ClientEvent::AccessToken(self.key_hash.clone())
    }

    pub fn receive(&mut self, event: ServerEvent) -> Reaction {
        match (self.state, event) {
            (ListenerState::AuthPending, ServerEvent::Auth(true)) => {
                self.state = ListenerState::Authenticated;
                Reaction::Authenticated
            }
            (ListenerState::AuthPending, ServerEvent::Auth(false)) => {
                self.state = ListenerState::Disconnected;
                Reaction::Rejected
            }
            (ListenerState::Authenticated, ServerEvent::Callback(envelope)) => {
                Reaction::Callback(envelope)
            }
            (
                ListenerState::AuthPending | ListenerState::Authenticated,
                ServerEvent::Disconnect,
            ) => {
                self.state = ListenerState::Disconnected;
                Reaction::Closed
            }
            _ => Reaction::Ignored,
        }
    }

    /// Any state → Disconnected. Returns `true` exactly once per established
    /// transport, when observers should hear about the disconnect.
    pub fn transport_closed(&mut self) -> bool {
        self.state = ListenerState::Disconnected;
        std::mem::take(&mut self.open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> CallbackEnvelope {
        CallbackEnvelope {
            route: "/orders/42".into(),
            payload: json!({"id": 42}),
            method: "POST".into(),
        }
    }

    #[test]
    fn happy_path() {
        let mut machine = ListenerMachine::new("abc");
        assert_eq!(machine.state(), ListenerState::Disconnected);

        assert!(machine.begin_connect());
        assert_eq!(machine.state(), ListenerState::Connecting);

        assert_eq!(
            machine.transport_connected(),
            ClientEvent::AccessToken("abc".into())
        );
        assert_eq!(machine.state(), ListenerState::AuthPending);

        assert_eq!(machine.receive(ServerEvent::Auth(true)), Reaction::Authenticated);
        assert_eq!(machine.state(), ListenerState::Authenticated);

        assert_eq!(
            machine.receive(ServerEvent::Callback(envelope())),
            Reaction::Callback(envelope())
        );

        assert!(machine.transport_closed());
        assert_eq!(machine.state(), ListenerState::Disconnected);
        assert!(!machine.transport_closed());
    }

    #[test]
    fn callbacks_before_auth_are_ignored() {
        let mut machine = ListenerMachine::new("abc");
        machine.begin_connect();
        machine.transport_connected();

        assert_eq!(
            machine.receive(ServerEvent::Callback(envelope())),
            Reaction::Ignored
        );
        assert_eq!(machine.state(), ListenerState::AuthPending);
    }

    #[test]
    fn rejected_auth_disconnects_and_reports_once() {
        let mut machine = ListenerMachine::new("abc");
        machine.begin_connect();
        machine.transport_connected();

        assert_eq!(machine.receive(ServerEvent::Auth(false)), Reaction::Rejected);
        assert_eq!(machine.state(), ListenerState::Disconnected);

        // Transport not closed yet: cannot start over.
        assert!(!machine.begin_connect());
        assert!(machine.transport_closed());
        assert!(machine.begin_connect());
    }

    #[test]
    fn server_disconnect_closes() {
        let mut machine = ListenerMachine::new("abc");
        machine.begin_connect();
        machine.transport_connected();
        machine.receive(ServerEvent::Auth(true));

        assert_eq!(machine.receive(ServerEvent::Disconnect), Reaction::Closed);
        assert_eq!(machine.state(), ListenerState::Disconnected);
        assert_eq!(
            machine.receive(ServerEvent::Callback(envelope())),
            Reaction::Ignored
        );
    }

    #[test]
    fn failed_connect_is_not_reported_as_disconnect() {
        let mut machine = ListenerMachine::new("abc");
        assert!(machine.begin_connect());
        assert!(!machine.begin_connect());

        assert!(!machine.transport_closed());
        assert_eq!(machine.state(), ListenerState::Disconnected);
    }
}
