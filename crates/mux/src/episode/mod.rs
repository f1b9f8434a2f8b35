// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Episode sink: durable copies of modality traffic, off the real-time path.
//!
//! The router hands every boid-topic message to a [`worker::SinkQueue`]; a
//! background worker appends it to an [`EpisodeSink`] with retries. Sink
//! trouble never reaches the publisher.

pub mod nats;
pub mod worker;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::MuxError;
use crate::router::{Message, TopicKey};

/// Durable append target (object storage + relational index live behind it).
#[async_trait]
pub trait EpisodeSink: Send + Sync {
    /// Persist one message. `Err(MuxError::Retryable)` asks for a retry;
    /// any other error drops the message.
    async fn append(&self, topic: &TopicKey, message: &Message) -> Result<(), MuxError>;
}

/// Serialized form of one episode entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub boid: String,
    pub modality: String,
    pub seq: u64,
    pub publisher: String,
    pub timestamp_ms: u64,
    /// Base64 (standard alphabet) payload.
    pub payload: String,
}

impl EpisodeRecord {
    pub fn new(topic: &TopicKey, message: &Message) -> Self {
        Self {
            boid: topic.boid.clone(),
            modality: topic.modality.clone(),
            seq: message.seq,
            publisher: message.publisher.id().to_owned(),
            timestamp_ms: message.timestamp_ms,
            payload: base64::engine::general_purpose::STANDARD.encode(&message.payload),
        }
    }
}

/// Sink that only logs. Used when no durable backend is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EpisodeSink for LogSink {
    async fn append(&self, topic: &TopicKey, message: &Message) -> Result<(), MuxError> {
        tracing::debug!(topic = %topic, seq = message.seq, bytes = message.payload.len(), "episode");
        Ok(())
    }
}

/// In-memory sink that can be told to fail a number of times first.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<EpisodeRecord>>,
    failures_left: Mutex<u32>,
    attempts: Mutex<u32>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` appends with `Retryable`.
    pub fn failing(n: u32) -> Self {
        let sink = Self::default();
        *sink.failures_left.lock() = n;
        sink
    }

    pub fn records(&self) -> Vec<EpisodeRecord> {
        self.records.lock().clone()
    }

    /// Total append calls, including failed ones.
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock()
    }
}

#[async_trait]
impl EpisodeSink for MemorySink {
    async fn append(&self, topic: &TopicKey, message: &Message) -> Result<(), MuxError> {
        *self.attempts.lock() += 1;
        {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(MuxError::Retryable);
            }
        }
        self.records.lock().push(EpisodeRecord::new(topic, message));
        Ok(())
    }
}
