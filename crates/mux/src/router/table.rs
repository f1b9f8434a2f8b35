// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic table: per-topic subscriber/publisher sets and fan-out.
//!
//! Each topic has its own lock. Finding a topic takes the table read lock;
//! the write lock is only held to create or unlink one. Lock order is always
//! table, then topic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::{DisconnectReason, Message, TopicKey};
use crate::clock::Clock;
use crate::error::MuxError;
use crate::events::FabricEvent;
use crate::identity::Principal;

/// Close signal shared between a topic slot and the connection handle.
#[derive(Clone, Default)]
pub struct Closer {
    token: tokio_util::sync::CancellationToken,
    reason: Arc<Mutex<Option<DisconnectReason>>>,
}

impl Closer {
    /// Record `reason` (first one wins) and wake the connection.
    pub fn close(&self, reason: DisconnectReason) {
        self.reason.lock().get_or_insert(reason);
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<DisconnectReason> {
        *self.reason.lock()
    }

    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

struct SubscriberSlot {
    tx: mpsc::Sender<Arc<Message>>,
    closer: Closer,
    /// Who was admitted; rechecked when the boid's access rules change.
    principal: Principal,
}

#[derive(Default)]
struct TopicInner {
    next_seq: u64,
    subscribers: HashMap<u64, SubscriberSlot>,
    publishers: HashMap<u64, Closer>,
    /// Unlinked from the table; joiners must create a fresh topic.
    closed: bool,
}

impl TopicInner {
    fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.publishers.is_empty()
    }
}

struct Topic {
    inner: Mutex<TopicInner>,
}

impl Topic {
    fn new() -> Self {
        Self { inner: Mutex::new(TopicInner { next_seq: 1, ..Default::default() }) }
    }
}

/// Which set a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

/// A subscriber's end of the topic: its bounded queue and close signal.
pub struct SubscriberEnd {
    pub id: u64,
    pub rx: mpsc::Receiver<Arc<Message>>,
    pub closer: Closer,
}

/// Snapshot of one topic for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct TopicStats {
    pub topic: String,
    pub subscribers: usize,
    pub publishers: usize,
    pub next_seq: u64,
}

/// All live topics.
pub struct TopicTable {
    topics: RwLock<HashMap<TopicKey, Arc<Topic>>>,
    next_conn: AtomicU64,
    queue_depth: usize,
    clock: Arc<dyn Clock>,
}

impl TopicTable {
    pub fn new(queue_depth: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
            clock,
        }
    }

    fn conn_id(&self) -> u64 {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Run `f` against the live topic for `key`, creating it if needed.
    ///
    /// Retries if the topic is unlinked between lookup and lock.
    fn with_live_topic<T>(&self, key: &TopicKey, f: impl FnOnce(&mut TopicInner) -> T) -> T {
        loop {
            let existing = self.topics.read().get(key).cloned();
            if let Some(topic) = existing {
                let mut inner = topic.inner.lock();
                if inner.closed {
                    continue;
                }
                return f(&mut inner);
            }

            let mut topics = self.topics.write();
            if topics.contains_key(key) {
                // Lost the race to create it.
                continue;
            }
            let topic = Arc::new(Topic::new());
            topics.insert(key.clone(), Arc::clone(&topic));
            let mut inner = topic.inner.lock();
            drop(topics);
            let out = f(&mut inner);
            drop(inner);

            info!(topic = %key, "topic opened");
            self.emit(key, FabricEvent::TopicOpened { topic: key.to_string() });
            return out;
        }
    }

    /// Add a subscriber connection admitted as `principal`.
    pub fn join_subscriber(&self, key: &TopicKey, principal: &Principal) -> SubscriberEnd {
        let id = self.conn_id();
        let closer = Closer::default();
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let slot = SubscriberSlot { tx, closer: closer.clone(), principal: principal.clone() };
        self.with_live_topic(key, |inner| {
            inner.subscribers.insert(id, slot);
        });
        debug!(topic = %key, conn = id, %principal, "subscriber joined");
        SubscriberEnd { id, rx, closer }
    }

    /// Add a publisher connection.
    pub fn join_publisher(&self, key: &TopicKey) -> (u64, Closer) {
        let id = self.conn_id();
        let closer = Closer::default();
        self.with_live_topic(key, |inner| {
            inner.publishers.insert(id, closer.clone());
        });
        debug!(topic = %key, conn = id, "publisher joined");
        (id, closer)
    }

    /// Remove a connection; tear the topic down if both sets drained.
    pub fn leave(&self, key: &TopicKey, role: Role, id: u64) {
        let Some(topic) = self.topics.read().get(key).cloned() else {
            return;
        };
        let drained = {
            let mut inner = topic.inner.lock();
            match role {
                Role::Subscriber => {
                    if let Some(slot) = inner.subscribers.remove(&id) {
                        slot.closer.close(DisconnectReason::Unsubscribed);
                    }
                }
                Role::Publisher => {
                    if let Some(closer) = inner.publishers.remove(&id) {
                        closer.close(DisconnectReason::Unsubscribed);
                    }
                }
            }
            inner.is_empty()
        };
        debug!(topic = %key, conn = id, ?role, "connection left");
        if drained {
            self.teardown_if_empty(key);
        }
    }

    /// Unlink `key` if it has no connections left.
    fn teardown_if_empty(&self, key: &TopicKey) {
        let removed = {
            let mut topics = self.topics.write();
            let Some(topic) = topics.get(key).cloned() else {
                return;
            };
            let mut inner = topic.inner.lock();
            if !inner.is_empty() || inner.closed {
                return;
            }
            inner.closed = true;
            drop(inner);
            topics.remove(key).is_some()
        };
        if removed {
            info!(topic = %key, "topic closed");
            self.emit(key, FabricEvent::TopicClosed { topic: key.to_string() });
        }
    }

    /// Sequence `payload` and offer it to every current subscriber.
    ///
    /// Never waits on a subscriber: a full queue sheds that subscriber. A
    /// publish to a topic nobody is attached to is not delivered anywhere and
    /// does not open the topic; it is stamped as the first message of a
    /// fresh topic. With `require_subscriber`, a topic without subscribers
    /// yields `TopicClosed` instead.
    pub fn publish(
        &self,
        key: &TopicKey,
        publisher: &Principal,
        payload: Bytes,
        require_subscriber: bool,
    ) -> Result<Arc<Message>, MuxError> {
        let timestamp_ms = self.clock.now_ms();
        loop {
            let Some(topic) = self.topics.read().get(key).cloned() else {
                if require_subscriber {
                    return Err(MuxError::TopicClosed);
                }
                return Ok(Arc::new(Message {
                    seq: 1,
                    publisher: publisher.clone(),
                    timestamp_ms,
                    payload,
                }));
            };

            let mut inner = topic.inner.lock();
            if inner.closed {
                continue;
            }
            if require_subscriber && inner.subscribers.is_empty() {
                return Err(MuxError::TopicClosed);
            }
            let message = Arc::new(Message {
                seq: inner.next_seq,
                publisher: publisher.clone(),
                timestamp_ms,
                payload,
            });
            inner.next_seq += 1;
            fan_out(key, &mut inner, &message);
            let drained = inner.is_empty();
            drop(inner);

            if drained {
                self.teardown_if_empty(key);
            }
            return Ok(message);
        }
    }

    /// Publish to `key` only if it already exists and has subscribers.
    pub fn publish_if_subscribed(&self, key: &TopicKey, publisher: &Principal, payload: Bytes) {
        let Some(topic) = self.topics.read().get(key).cloned() else {
            return;
        };
        let mut inner = topic.inner.lock();
        if inner.closed || inner.subscribers.is_empty() {
            return;
        }
        let message = Arc::new(Message {
            seq: inner.next_seq,
            publisher: publisher.clone(),
            timestamp_ms: self.clock.now_ms(),
            payload,
        });
        inner.next_seq += 1;
        fan_out(key, &mut inner, &message);
    }

    /// Close every topic under `boid`, disconnecting all of their connections.
    pub fn close_boid(&self, boid: &str, reason: DisconnectReason) -> usize {
        self.close_where(|key| key.boid == boid, reason)
    }

    /// Disconnect subscribers on `boid`'s topics that `admits` no longer
    /// lets in. Messages queued before the check are still delivered.
    pub fn shed_subscribers(
        &self,
        boid: &str,
        admits: impl Fn(&str, &Principal) -> bool,
        reason: DisconnectReason,
    ) -> usize {
        let topics: Vec<(TopicKey, Arc<Topic>)> = self
            .topics
            .read()
            .iter()
            .filter(|(k, _)| k.boid == boid)
            .map(|(k, t)| (k.clone(), Arc::clone(t)))
            .collect();

        let mut shed = 0;
        for (key, topic) in topics {
            let drained = {
                let mut inner = topic.inner.lock();
                let denied: Vec<u64> = inner
                    .subscribers
                    .iter()
                    .filter(|(_, slot)| !admits(key.modality.as_str(), &slot.principal))
                    .map(|(id, _)| *id)
                    .collect();
                if inner.closed || denied.is_empty() {
                    continue;
                }
                for id in denied {
                    if let Some(slot) = inner.subscribers.remove(&id) {
                        info!(topic = %key, conn = id, principal = %slot.principal, %reason, "subscriber shed");
                        slot.closer.close(reason);
                        shed += 1;
                    }
                }
                inner.is_empty()
            };
            if drained {
                self.teardown_if_empty(&key);
            }
        }
        shed
    }

    /// Close every topic.
    pub fn close_all(&self, reason: DisconnectReason) -> usize {
        self.close_where(|_| true, reason)
    }

    fn close_where(&self, pred: impl Fn(&TopicKey) -> bool, reason: DisconnectReason) -> usize {
        let closed: Vec<TopicKey> = {
            let mut topics = self.topics.write();
            let keys: Vec<TopicKey> = topics.keys().filter(|k| pred(k)).cloned().collect();
            for key in &keys {
                if let Some(topic) = topics.remove(key) {
                    let mut inner = topic.inner.lock();
                    inner.closed = true;
                    for (_, slot) in inner.subscribers.drain() {
                        slot.closer.close(reason);
                    }
                    for (_, closer) in inner.publishers.drain() {
                        closer.close(reason);
                    }
                }
            }
            keys
        };
        for key in &closed {
            info!(topic = %key, ?reason, "topic torn down");
            self.emit(key, FabricEvent::TopicClosed { topic: key.to_string() });
        }
        closed.len()
    }

    /// Publish a lifecycle event on `system/events` for a non-system topic.
    fn emit(&self, about: &TopicKey, event: FabricEvent) {
        if about.is_system() {
            return;
        }
        if let Ok(json) = serde_json::to_vec(&event) {
            self.publish_if_subscribed(&TopicKey::events(), &Principal::System, json.into());
        }
    }

    pub fn contains(&self, key: &TopicKey) -> bool {
        self.topics.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.topics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Vec<TopicStats> {
        let topics: Vec<(TopicKey, Arc<Topic>)> =
            self.topics.read().iter().map(|(k, t)| (k.clone(), Arc::clone(t))).collect();
        let mut stats: Vec<TopicStats> = topics
            .into_iter()
            .map(|(key, topic)| {
                let inner = topic.inner.lock();
                TopicStats {
                    topic: key.to_string(),
                    subscribers: inner.subscribers.len(),
                    publishers: inner.publishers.len(),
                    next_seq: inner.next_seq,
                }
            })
            .collect();
        stats.sort_by(|a, b| a.topic.cmp(&b.topic));
        stats
    }
}

/// Offer `message` to every subscriber, shedding the ones that cannot keep up.
fn fan_out(key: &TopicKey, inner: &mut TopicInner, message: &Arc<Message>) {
    let mut dropped = Vec::new();
    for (id, slot) in &inner.subscribers {
        match slot.tx.try_send(Arc::clone(message)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(topic = %key, conn = id, seq = message.seq, "subscriber queue full, shedding");
                dropped.push((*id, DisconnectReason::SlowConsumer));
            }
            Err(TrySendError::Closed(_)) => {
                dropped.push((*id, DisconnectReason::Unsubscribed));
            }
        }
    }
    for (id, reason) in dropped {
        if let Some(slot) = inner.subscribers.remove(&id) {
            slot.closer.close(reason);
        }
    }
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod tests;
