// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NATS episode sink.
//!
//! Publishes each message as a JSON [`EpisodeRecord`] to
//! `{prefix}.episodes.{boid}.{modality}`; a downstream recorder persists them
//! to object storage and the relational index.

use async_trait::async_trait;
use tracing::info;

use super::{EpisodeRecord, EpisodeSink};
use crate::error::MuxError;
use crate::router::{Message, TopicKey};

/// NATS connection settings for the episode sink.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub token: Option<String>,
    pub prefix: String,
}

pub struct NatsSink {
    client: async_nats::Client,
    prefix: String,
}

impl NatsSink {
    /// Connect to the NATS server and return a sink.
    pub async fn connect(config: &NatsConfig) -> anyhow::Result<Self> {
        let mut opts = async_nats::ConnectOptions::new();
        if let Some(ref token) = config.token {
            opts = opts.token(token.clone());
        }
        opts = opts.retry_on_initial_connect();

        info!(url = %config.url, prefix = %config.prefix, "connecting NATS episode sink");
        let client = opts.connect(&config.url).await?;
        info!("NATS episode sink connected");

        Ok(Self { client, prefix: config.prefix.clone() })
    }
}

/// Subject for one topic's episodes.
pub fn subject(prefix: &str, topic: &TopicKey) -> String {
    format!("{prefix}.episodes.{}.{}", topic.boid, topic.modality)
}

#[async_trait]
impl EpisodeSink for NatsSink {
    async fn append(&self, topic: &TopicKey, message: &Message) -> Result<(), MuxError> {
        let record = EpisodeRecord::new(topic, message);
        let json = serde_json::to_vec(&record).map_err(|_| MuxError::Internal)?;
        self.client.publish(subject(&self.prefix, topic), json.into()).await.map_err(|e| {
            tracing::debug!(topic = %topic, err = %e, "NATS episode publish failed");
            MuxError::Retryable
        })
    }
}

#[cfg(test)]
#[path = "nats_tests.rs"]
mod tests;
