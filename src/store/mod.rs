//! Credential store: async key-value lookups plus pub/sub channels.
//!
//! Backs every persistent lookup (account records and their reverse
//! entries) and carries the fan-out bus. A deployment uses exactly one
//! backend so that channel visibility stays coherent with key writes:
//!
//! - [`MemoryStore`]: in-process, for single-instance deployments and tests
//! - [`NatsStore`]: NATS JetStream KV for keys, NATS core subjects for channels
//!
//! Key layout:
//! - `user:{email}`       → JSON account record
//! - `appkey:{app_key}`   → email
//! - `keyhash:{key_hash}` → email
//! - `token:{digest}`     → email

pub mod memory;
pub mod nats;

pub use memory::MemoryStore;
pub use nats::NatsStore;

use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

/// Stream of payloads published on one channel. Dropping it unsubscribes.
pub type Subscription = BoxStream<'static, String>;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write `value` only if `key` is absent. Returns `false` when the key
    /// already exists; the stored value is left untouched.
    async fn create(&self, key: &str, value: &str) -> Result<bool>;

    /// Delete every listed key. Missing keys are not an error.
    async fn del(&self, keys: &[String]) -> Result<()>;

    /// Fire-and-forget publish; nobody listening is not an error.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

pub fn user_key(email: &str) -> String {
    format!("user:{email}")
}

pub fn app_key_key(app_key: &str) -> String {
    format!("appkey:{app_key}")
}

pub fn key_hash_key(key_hash: &str) -> String {
    format!("keyhash:{key_hash}")
}

pub fn token_key(token_digest: &str) -> String {
    format!("token:{token_digest}")
}

/// Open the store named by `url`: `memory` (or empty) for the in-process
/// backend, anything else is treated as a NATS server URL.
pub async fn open(url: &str, bucket: &str) -> anyhow::Result<Arc<dyn CredentialStore>> {
    let url = url.trim();
    if url.is_empty() || url.eq_ignore_ascii_case("memory") {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = NatsStore::connect(url, bucket).await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_namespaces_do_not_collide() {
        let keys = [
            user_key("k-1"),
            app_key_key("k-1"),
            key_hash_key("k-1"),
            token_key("k-1"),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[tokio::test]
    async fn open_memory_backend() {
        let store = open("memory", "unused").await.unwrap();
        assert_eq!(store.name(), "memory");

        let store = open("", "unused").await.unwrap();
        assert_eq!(store.name(), "memory");
    }
}
