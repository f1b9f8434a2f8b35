// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Modality router: per-topic publish/subscribe with registry-backed admission.

pub mod table;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::episode::worker::SinkQueue;
use crate::error::MuxError;
use crate::events::{FabricEvent, EVENTS_MODALITY};
use crate::identity::Principal;
use crate::names;
use crate::registry::{bounded, BoidRecord, Registry};

use self::table::{Closer, Role, SubscriberEnd, TopicStats, TopicTable};

/// A `(boid-name, modality-name)` channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicKey {
    pub boid: String,
    pub modality: String,
}

impl TopicKey {
    /// The system segment is matched case-insensitively and stored in its
    /// canonical spelling, so every spelling names the same topic.
    pub fn new(boid: impl Into<String>, modality: impl Into<String>) -> Self {
        let mut boid = boid.into();
        if names::is_system(&boid) {
            boid = names::SYSTEM.to_owned();
        }
        Self { boid, modality: modality.into() }
    }

    /// The built-in `system/events` topic.
    pub fn events() -> Self {
        Self::new(names::SYSTEM, EVENTS_MODALITY)
    }

    pub fn is_system(&self) -> bool {
        names::is_system(&self.boid)
    }

    /// Parse `boid/modality`.
    pub fn parse(s: &str) -> Option<Self> {
        let (boid, modality) = s.split_once('/')?;
        if boid.is_empty() || modality.is_empty() || modality.contains('/') {
            return None;
        }
        Some(Self::new(boid, modality))
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.boid, self.modality)
    }
}

/// One routed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Strictly increasing, gap-free per topic.
    pub seq: u64,
    pub publisher: Principal,
    pub timestamp_ms: u64,
    pub payload: Bytes,
}

/// Why a connection was dropped from its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Outbound queue was full when a message arrived.
    SlowConsumer,
    BoidReaped,
    Unregistered,
    /// The connection left on its own.
    Unsubscribed,
    /// The subscriber lost access to a private modality.
    Revoked,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlowConsumer => "slow_consumer",
            Self::BoidReaped => "boid_reaped",
            Self::Unregistered => "unregistered",
            Self::Unsubscribed => "unsubscribed",
            Self::Revoked => "revoked",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router knobs.
#[derive(Debug, Clone)]
pub struct RouterPolicy {
    /// Per-subscriber outbound queue depth.
    pub queue_depth: usize,
    /// Reject publishes to topics with no subscribers.
    pub require_subscriber: bool,
    /// Deadline for registry lookups made during admission.
    pub registry_timeout: Duration,
}

impl Default for RouterPolicy {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            require_subscriber: false,
            registry_timeout: Duration::from_secs(2),
        }
    }
}

pub struct ModalityRouter {
    table: Arc<TopicTable>,
    registry: Arc<dyn Registry>,
    sink: Option<SinkQueue>,
    policy: RouterPolicy,
}

impl ModalityRouter {
    pub fn new(
        registry: Arc<dyn Registry>,
        sink: Option<SinkQueue>,
        policy: RouterPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let table = Arc::new(TopicTable::new(policy.queue_depth, clock));
        Self { table, registry, sink, policy }
    }

    async fn lookup(&self, boid: &str) -> Result<BoidRecord, MuxError> {
        bounded(self.policy.registry_timeout, self.registry.lookup(boid)).await
    }

    /// Only the owner publishes to a boid's topics; only the router's own
    /// identity publishes to the system namespace.
    pub async fn authorize_publish(
        &self,
        key: &TopicKey,
        principal: &Principal,
    ) -> Result<(), MuxError> {
        names::validate_modality(&key.modality)?;
        if key.is_system() {
            return if principal.is_system() { Ok(()) } else { Err(MuxError::Unauthorized) };
        }
        if names::is_reserved(&key.boid) {
            return Err(MuxError::Reserved);
        }
        match self.lookup(&key.boid).await {
            Ok(record) if record.is_owned_by(principal) => Ok(()),
            Ok(_) | Err(MuxError::NotFound) => Err(MuxError::Unauthorized),
            Err(e) => Err(e),
        }
    }

    /// Subscribing needs the boid to exist; private modalities additionally
    /// need the owner or a granted collaborator. System topics are open to
    /// every authenticated principal.
    pub async fn authorize_subscribe(
        &self,
        key: &TopicKey,
        principal: &Principal,
    ) -> Result<(), MuxError> {
        names::validate_modality(&key.modality)?;
        if key.is_system() {
            return Ok(());
        }
        if names::is_reserved(&key.boid) {
            return Err(MuxError::Reserved);
        }
        let record = self.lookup(&key.boid).await?;
        if record.may_subscribe(principal, &key.modality) {
            Ok(())
        } else {
            Err(MuxError::Unauthorized)
        }
    }

    /// One-shot publish.
    pub async fn publish(
        &self,
        key: &TopicKey,
        principal: &Principal,
        payload: Bytes,
    ) -> Result<u64, MuxError> {
        self.authorize_publish(key, principal).await?;
        self.route(key, principal, payload)
    }

    /// Sequence, fan out, and hand a copy to the episode sink.
    fn route(&self, key: &TopicKey, principal: &Principal, payload: Bytes) -> Result<u64, MuxError> {
        let message =
            self.table.publish(key, principal, payload, self.policy.require_subscriber)?;
        debug!(topic = %key, seq = message.seq, bytes = message.payload.len(), "published");
        if let Some(ref sink) = self.sink {
            if !key.is_system() {
                sink.offer(key, Arc::clone(&message));
            }
        }
        Ok(message.seq)
    }

    /// Attach a subscriber. Messages arrive in publish order until the
    /// subscription is dropped or the router closes it.
    pub async fn subscribe(
        &self,
        key: &TopicKey,
        principal: &Principal,
    ) -> Result<Subscription, MuxError> {
        self.authorize_subscribe(key, principal).await?;
        let end = self.table.join_subscriber(key, principal);
        let subscription = Subscription { key: key.clone(), end, table: Arc::clone(&self.table) };

        // The record may have changed between admission and join: the boid
        // departed (its teardown would have missed this connection) or access
        // to the modality was revoked. Dropping the subscription leaves.
        if !key.is_system() {
            let record = self.lookup(&key.boid).await?;
            if !record.may_subscribe(principal, &key.modality) {
                return Err(MuxError::Unauthorized);
            }
        }
        Ok(subscription)
    }

    /// Recheck live subscribers on `record`'s topics after its access rules
    /// changed, disconnecting the ones it no longer admits.
    pub fn enforce_access(&self, record: &BoidRecord) -> usize {
        let shed = self.table.shed_subscribers(
            &record.name,
            |modality, principal| record.may_subscribe(principal, modality),
            DisconnectReason::Revoked,
        );
        if shed > 0 {
            debug!(boid = %record.name, shed, "access rechecked");
        }
        shed
    }

    /// Attach a persistent publisher connection.
    pub async fn open_publisher(
        self: &Arc<Self>,
        key: &TopicKey,
        principal: &Principal,
    ) -> Result<PublisherHandle, MuxError> {
        self.authorize_publish(key, principal).await?;
        let (id, closer) = self.table.join_publisher(key);
        let handle = PublisherHandle {
            key: key.clone(),
            id,
            closer,
            principal: principal.clone(),
            router: Arc::clone(self),
        };

        // Same recheck as subscribe: the owner may have departed meanwhile.
        self.authorize_publish(key, principal).await?;
        Ok(handle)
    }

    /// Publish a lifecycle event on `system/events` as the router itself.
    pub fn emit(&self, event: &FabricEvent) {
        debug!(subject = event.subject(), ?event, "fabric event");
        if let Ok(json) = serde_json::to_vec(event) {
            self.table.publish_if_subscribed(&TopicKey::events(), &Principal::System, json.into());
        }
    }

    /// Tear down every topic of `boid`.
    pub fn close_boid(&self, boid: &str, reason: DisconnectReason) -> usize {
        self.table.close_boid(boid, reason)
    }

    pub fn close_all(&self, reason: DisconnectReason) -> usize {
        self.table.close_all(reason)
    }

    pub fn topic_count(&self) -> usize {
        self.table.len()
    }

    pub fn has_topic(&self, key: &TopicKey) -> bool {
        self.table.contains(key)
    }

    pub fn stats(&self) -> Vec<TopicStats> {
        self.table.stats()
    }
}

/// A subscriber connection. Dropping it leaves the topic immediately.
pub struct Subscription {
    key: TopicKey,
    end: SubscriberEnd,
    table: Arc<TopicTable>,
}

impl Subscription {
    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    /// Next message, or the reason the subscription ended.
    ///
    /// Messages already queued before a close are still delivered first.
    pub async fn recv(&mut self) -> Result<Arc<Message>, DisconnectReason> {
        match self.end.rx.recv().await {
            Some(message) => Ok(message),
            None => Err(self.end.closer.reason().unwrap_or(DisconnectReason::Unsubscribed)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end.closer.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.table.leave(&self.key, Role::Subscriber, self.end.id);
    }
}

/// A persistent publisher connection. Dropping it leaves the topic.
pub struct PublisherHandle {
    key: TopicKey,
    id: u64,
    closer: Closer,
    principal: Principal,
    router: Arc<ModalityRouter>,
}

impl PublisherHandle {
    pub fn key(&self) -> &TopicKey {
        &self.key
    }

    pub fn publish(&self, payload: Bytes) -> Result<u64, MuxError> {
        if self.closer.is_closed() {
            return Err(MuxError::TopicClosed);
        }
        self.router.route(&self.key, &self.principal, payload)
    }

    /// Resolves when the router closes this publisher.
    pub async fn closed(&self) -> DisconnectReason {
        self.closer.closed().await;
        self.closer.reason().unwrap_or(DisconnectReason::Unsubscribed)
    }
}

impl Drop for PublisherHandle {
    fn drop(&mut self) {
        self.router.table.leave(&self.key, Role::Publisher, self.id);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
