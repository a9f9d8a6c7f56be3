//! Live listener connections, keyed by AppKey.
//!
//! At most one connection per AppKey is registered in this process. A
//! second registration for the same key evicts the first: the incumbent is
//! sent a `disconnect` event and its fan-out relay is cancelled before the
//! newcomer is installed.
//!
//! Exclusivity is process-local. Two instances behind a load balancer can
//! each hold a listener for the same AppKey; with the fan-out bus both
//! would then receive callbacks published by a third instance.

use crate::error::Result;
use crate::fanout::FanoutBus;
use crate::protocol::{CallbackEnvelope, ServerEvent};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identifies one accepted connection across its lifetime.
pub type ConnectionId = u64;

/// Outbound half of a listener connection.
pub type ListenerSender = mpsc::UnboundedSender<ServerEvent>;

struct ListenerEntry {
    id: ConnectionId,
    outbound: ListenerSender,
    /// Forwards fan-out traffic for this key; absent in singleton mode.
    relay: Option<JoinHandle<()>>,
}

impl Drop for ListenerEntry {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }
}

pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, ListenerEntry>>,
    next_id: AtomicU64,
    /// `None` in singleton mode: no other instance can publish for our keys.
    fanout: Option<FanoutBus>,
}

impl ListenerRegistry {
    /// Registry for a single-instance deployment.
    pub fn singleton() -> Self {
        Self::new(None)
    }

    /// Registry that subscribes every registered key on the fan-out bus.
    pub fn clustered(fanout: FanoutBus) -> Self {
        Self::new(Some(fanout))
    }

    fn new(fanout: Option<FanoutBus>) -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fanout,
        }
    }

    pub fn is_singleton(&self) -> bool {
        self.fanout.is_none()
    }

    /// Install `outbound` as the listener for `app_key`, evicting any
    /// incumbent. Fails only if the fan-out subscription cannot be opened,
    /// in which case nothing is changed.
    pub async fn register(&self, app_key: &str, outbound: ListenerSender) -> Result<ConnectionId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let relay = match &self.fanout {
            Some(bus) => {
                let mut envelopes = bus.subscribe(app_key).await?;
                let tx = outbound.clone();
                let key = app_key.to_owned();
                Some(tokio::spawn(async move {
                    while let Some(envelope) = envelopes.next().await {
                        tracing::debug!(app_key = %key, route = %envelope.route, "Relaying fan-out callback");
                        if tx.send(ServerEvent::Callback(envelope)).is_err() {
                            break;
                        }
                    }
                }))
            }
            None => None,
        };

        let evicted = self.listeners.lock().insert(
            app_key.to_owned(),
            ListenerEntry {
                id,
                outbound,
                relay,
            },
        );

        if let Some(old) = evicted {
            tracing::info!(app_key = %app_key, evicted = old.id, connection = id, "Evicting previous listener");
            let _ = old.outbound.send(ServerEvent::Disconnect);
        }

        tracing::info!(app_key = %app_key, connection = id, "Listener registered");
        Ok(id)
    }

    /// Remove the listener for `app_key` if it is still connection `id`.
    /// Returns whether an entry was removed.
    pub fn unregister(&self, app_key: &str, id: ConnectionId) -> bool {
        let removed = {
            let mut listeners = self.listeners.lock();
            match listeners.get(app_key) {
                Some(entry) if entry.id == id => listeners.remove(app_key),
                _ => None,
            }
        };

        match removed {
            Some(_) => {
                tracing::info!(app_key = %app_key, connection = id, "Listener unregistered");
                true
            }
            None => false,
        }
    }

    /// Hand an envelope to the local listener. Returns `false` if there is
    /// none. A listener closing concurrently may lose the envelope.
    pub fn deliver(&self, app_key: &str, envelope: CallbackEnvelope) -> bool {
        let listeners = self.listeners.lock();
        let Some(entry) = listeners.get(app_key) else {
            return false;
        };
        if entry.outbound.send(ServerEvent::Callback(envelope)).is_err() {
            tracing::debug!(app_key = %app_key, "Listener closed during delivery, callback dropped");
        }
        true
    }

    pub fn contains(&self, app_key: &str) -> bool {
        self.listeners.lock().contains_key(app_key)
    }

    /// Count live listeners (for diagnostics).
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────
