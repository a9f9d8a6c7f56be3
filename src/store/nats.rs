//! NATS-backed credential store for multi-instance deployments.
//!
//! Keys go to a JetStream KV bucket, channels to plain NATS subjects. Every
//! instance connected to the same server sees the same records and the same
//! fan-out traffic.

use super::{CredentialStore, Subscription};
use crate::error::{RelayError, Result};
use anyhow::Context;
use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

/// Subject prefix for fan-out channels.
pub const CHANNEL_SUBJECT_PREFIX: &str = "callmydouble.callback";

pub struct NatsStore {
    client: async_nats::Client,
    kv: kv::Store,
}

impl NatsStore {
    /// Connect to `url` and open (or create) the KV bucket.
    pub async fn connect(url: &str, bucket: &str) -> anyhow::Result<Self> {
        tracing::info!(nats_url = %url, bucket, "Connecting credential store to NATS");
        let client = async_nats::connect(url)
            .await
            .with_context(|| format!("failed to connect to NATS at {url}"))?;

        let js = jetstream::new(client.clone());
        let kv = get_or_create_bucket(&js, bucket).await?;

        Ok(Self { client, kv })
    }
}

async fn get_or_create_bucket(js: &jetstream::Context, bucket: &str) -> anyhow::Result<kv::Store> {
    let config = kv::Config {
        bucket: bucket.to_string(),
        history: 1,
        ..Default::default()
    };
    match js.create_key_value(config).await {
        Ok(store) => Ok(store),
        Err(_) => js
            .get_key_value(bucket)
            .await
            .with_context(|| format!("failed to open KV bucket {bucket}")),
    }
}

/// KV keys only allow `[-/_=.a-zA-Z0-9]`; emails and prefixes do not fit,
/// so every key is hex-encoded.
fn encode_key(key: &str) -> String {
    hex::encode(key.as_bytes())
}

fn channel_subject(channel: &str) -> String {
    format!("{CHANNEL_SUBJECT_PREFIX}.{channel}")
}

#[async_trait]
impl CredentialStore for NatsStore {
    fn name(&self) -> &str {
        "nats"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .kv
            .get(encode_key(key))
            .await
            .map_err(RelayError::store)?;
        value
            .map(|bytes| {
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| RelayError::Store(format!("non UTF-8 value under {key}: {e}")))
            })
            .transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.kv
            .put(encode_key(key), Bytes::from(value.to_owned()))
            .await
            .map(|_| ())
            .map_err(RelayError::store)
    }

    async fn create(&self, key: &str, value: &str) -> Result<bool> {
        match self
            .kv
            .create(encode_key(key), Bytes::from(value.to_owned()))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(RelayError::store(e)),
        }
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.kv
                .delete(encode_key(key))
                .await
                .map_err(RelayError::store)?;
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.client
            .publish(channel_subject(channel), Bytes::from(payload.to_owned()))
            .await
            .map_err(RelayError::store)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let subscriber = self
            .client
            .subscribe(channel_subject(channel))
            .await
            .map_err(RelayError::store)?;

        let stream = subscriber.filter_map(|message| async move {
            match String::from_utf8(message.payload.to_vec()) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!(subject = %message.subject, error = %e, "Dropping non UTF-8 fan-out message");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
