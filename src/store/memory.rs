//! In-process credential store.
//!
//! Keys live in a plain map; each pub/sub channel is a tokio broadcast
//! sender created on first subscribe. Publishing to a channel nobody has
//! subscribed to drops the message, same as the networked backend.

use super::{CredentialStore, Subscription};
use crate::error::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Per-channel buffer. Slow subscribers lose the oldest messages.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys (diagnostics and tests).
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn create(&self, key: &str, value: &str) -> Result<bool> {
        match self.values.lock().entry(key.to_owned()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value.to_owned());
                Ok(true)
            }
        }
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        let mut values = self.values.lock();
        for key in keys {
            values.remove(key);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut channels = self.channels.lock();
        if let Some(tx) = channels.get(channel) {
            if tx.send(payload.to_owned()).is_err() {
                // Every subscriber went away; forget the channel.
                channels.remove(channel);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let rx = {
            let mut channels = self.channels.lock();
            channels
                .entry(channel.to_owned())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe()
        };

        let channel = channel.to_owned();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let channel = channel.clone();
            async move {
                match item {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Subscriber lagged, messages dropped");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del() {
        let store = MemoryStore::new();
        assert!(store.get("a").await.unwrap().is_none());

        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store
            .del(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn create_only_writes_absent_keys() {
        let store = MemoryStore::new();
        assert!(store.create("a", "1").await.unwrap());
        assert!(!store.create("a", "2").await.unwrap());
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let store = MemoryStore::new();
        let mut first = store.subscribe("k-1").await.unwrap();
        let mut second = store.subscribe("k-1").await.unwrap();

        store.publish("k-1", "hello").await.unwrap();

        assert_eq!(first.next().await.as_deref(), Some("hello"));
        assert_eq!(second.next().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let store = MemoryStore::new();
        let mut other = store.subscribe("k-2").await.unwrap();

        store.publish("k-1", "for k-1").await.unwrap();
        store.publish("k-2", "for k-2").await.unwrap();

        assert_eq!(other.next().await.as_deref(), Some("for k-2"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let store = MemoryStore::new();
        store.publish("nobody", "lost").await.unwrap();

        // A late subscriber does not see earlier messages.
        let mut late = store.subscribe("nobody").await.unwrap();
        store.publish("nobody", "seen").await.unwrap();
        assert_eq!(late.next().await.as_deref(), Some("seen"));
    }

    #[tokio::test]
    async fn dropped_subscription_releases_channel() {
        let store = MemoryStore::new();
        let sub = store.subscribe("k-1").await.unwrap();
        drop(sub);

        store.publish("k-1", "gone").await.unwrap();
        assert!(store.channels.lock().get("k-1").is_none());
    }
}
