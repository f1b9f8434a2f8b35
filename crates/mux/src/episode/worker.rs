// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded hand-off queue and retrying worker in front of an [`EpisodeSink`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::EpisodeSink;
use crate::router::{Message, TopicKey};

/// Retry schedule for sink appends.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per message, including the first.
    pub attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Producer side of the sink queue. `offer` never waits.
#[derive(Clone)]
pub struct SinkQueue {
    tx: mpsc::Sender<(TopicKey, Arc<Message>)>,
}

impl SinkQueue {
    pub fn offer(&self, topic: &TopicKey, message: Arc<Message>) {
        match self.tx.try_send((topic.clone(), message)) {
            Ok(()) => {}
            Err(TrySendError::Full((topic, message))) => {
                warn!(topic = %topic, seq = message.seq, "episode queue full, dropping");
            }
            Err(TrySendError::Closed((topic, message))) => {
                debug!(topic = %topic, seq = message.seq, "episode worker gone, dropping");
            }
        }
    }
}

/// Spawn the sink worker and return its queue.
pub fn spawn_sink_worker(
    sink: Arc<dyn EpisodeSink>,
    depth: usize,
    policy: RetryPolicy,
    shutdown: CancellationToken,
) -> SinkQueue {
    let (tx, mut rx) = mpsc::channel::<(TopicKey, Arc<Message>)>(depth.max(1));

    tokio::spawn(async move {
        loop {
            let (topic, message) = tokio::select! {
                _ = shutdown.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            deliver(sink.as_ref(), &topic, &message, policy, &shutdown).await;
        }
        debug!("episode sink worker shutting down");
    });

    SinkQueue { tx }
}

/// Double `current`, capped at `max`. Saturates instead of overflowing.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Append one message, retrying retryable failures with exponential backoff.
///
/// Returns whether the message was persisted.
pub async fn deliver(
    sink: &dyn EpisodeSink,
    topic: &TopicKey,
    message: &Message,
    policy: RetryPolicy,
    shutdown: &CancellationToken,
) -> bool {
    let mut backoff = policy.base_backoff;
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        match sink.append(topic, message).await {
            Ok(()) => return true,
            Err(e) if e.is_retryable() && attempt < attempts => {
                debug!(topic = %topic, seq = message.seq, attempt, err = %e, "episode append failed, retrying");
                tokio::select! {
                    _ = shutdown.cancelled() => return false,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = next_backoff(backoff, policy.max_backoff);
            }
            Err(e) => {
                warn!(topic = %topic, seq = message.seq, attempt, err = %e, "episode append failed, dropping");
                return false;
            }
        }
    }
    false
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
