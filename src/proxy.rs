//! Inbound `/proxy/{app_key}/...` dispatch.
//!
//! A proxy call is answered as soon as the envelope has been handed to the
//! local listener or published on the fan-out bus. Whether the remote
//! listener ever sees it is not reported back to the caller.

use crate::auth::Credentials;
use crate::error::{RelayError, Result};
use crate::fanout::FanoutBus;
use crate::protocol::CallbackEnvelope;
use crate::registry::ListenerRegistry;
use std::sync::Arc;

/// Where a dispatched envelope went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to a listener held by this instance.
    Local,
    /// Published for whichever instance holds the listener, if any.
    Published,
}

#[derive(Clone)]
pub struct ProxyDispatcher {
    credentials: Credentials,
    registry: Arc<ListenerRegistry>,
    fanout: FanoutBus,
}

impl ProxyDispatcher {
    pub fn new(
        credentials: Credentials,
        registry: Arc<ListenerRegistry>,
        fanout: FanoutBus,
    ) -> Self {
        Self {
            credentials,
            registry,
            fanout,
        }
    }

    pub async fn dispatch(
        &self,
        method: &str,
        app_key: &str,
        route: &str,
        body: &[u8],
    ) -> Result<Dispatch> {
        if app_key.is_empty() {
            return Err(RelayError::Validation("missing application key".into()));
        }

        let Some(owner) = self.credentials.resolve_app_key(app_key).await? else {
            return Err(RelayError::NotFound(format!("unknown application key {app_key}")));
        };

        let envelope = CallbackEnvelope::from_request(method, route, body);
        tracing::debug!(
            app_key = %app_key,
            user = %owner,
            method = %envelope.method,
            route = %envelope.route,
            "Dispatching callback"
        );

        if self.registry.deliver(app_key, envelope.clone()) {
            return Ok(Dispatch::Local);
        }

        if let Err(e) = self.fanout.publish(app_key, &envelope).await {
            tracing::warn!(app_key = %app_key, error = %e, "Failed to publish callback on fan-out bus");
        }
        Ok(Dispatch::Published)
    }
}
