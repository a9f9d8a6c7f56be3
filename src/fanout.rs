//! Cross-instance callback delivery.
//!
//! When the instance that received a proxy call holds no listener for the
//! AppKey, it publishes the envelope on channel = AppKey. Whichever instance
//! holds the listener is subscribed to that channel and forwards it. Nobody
//! subscribed means the callback is gone: there is no replay.

use crate::error::Result;
use crate::protocol::CallbackEnvelope;
use crate::store::CredentialStore;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;

#[derive(Clone)]
pub struct FanoutBus {
    store: Arc<dyn CredentialStore>,
}

impl FanoutBus {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Serialize and publish an envelope on the AppKey's channel.
    pub async fn publish(&self, app_key: &str, envelope: &CallbackEnvelope) -> Result<()> {
        let payload = serde_json::to_string(envelope)?;
        self.store.publish(app_key, &payload).await
    }

    /// Envelopes published for `app_key` from now on. Undecodable messages
    /// are logged and skipped.
    pub async fn subscribe(&self, app_key: &str) -> Result<BoxStream<'static, CallbackEnvelope>> {
        let subscription = self.store.subscribe(app_key).await?;
        let channel = app_key.to_owned();

        let envelopes = subscription.filter_map(move |message| {
            let decoded = serde_json::from_str::<CallbackEnvelope>(&message);
            if let Err(e) = &decoded {
                tracing::warn!(channel = %channel, error = %e, "Unable to parse message from channel");
            }
            futures_util::future::ready(decoded.ok())
        });
        Ok(envelopes.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn envelope(route: &str) -> CallbackEnvelope {
        CallbackEnvelope {
            route: route.into(),
            payload: json!({"id": 42}),
            method: "POST".into(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_subscriber_of_same_key() {
        let bus = FanoutBus::new(Arc::new(MemoryStore::new()));
        let mut sub = bus.subscribe("k-1").await.unwrap();

        bus.publish("k-1", &envelope("/orders/42")).await.unwrap();

        assert_eq!(sub.next().await, Some(envelope("/orders/42")));
    }

    #[tokio::test]
    async fn garbage_on_channel_is_skipped() {
        let backend = Arc::new(MemoryStore::new());
        let bus = FanoutBus::new(backend.clone());
        let mut sub = bus.subscribe("k-1").await.unwrap();

        backend.publish("k-1", "not an envelope").await.unwrap();
        bus.publish("k-1", &envelope("/ok")).await.unwrap();

        assert_eq!(sub.next().await.unwrap().route, "/ok");
    }

    #[tokio::test]
    async fn publish_without_listener_is_not_an_error() {
        let bus = FanoutBus::new(Arc::new(MemoryStore::new()));
        bus.publish("k-nobody", &envelope("/lost")).await.unwrap();
    }
}
