// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boid registry: the source of truth for which boids are alive.
//!
//! The [`Registry`] trait is the narrow seam the router and transports talk
//! to. [`memory::MemoryRegistry`] is the single-process implementation; a
//! consensus-backed or sharded remote store slots in behind the same trait.

pub mod listing;
pub mod memory;

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MuxError;
use crate::identity::Principal;

/// Metadata key listing modalities that only collaborators may subscribe to.
pub const PRIVATE_MODALITIES_KEY: &str = "private_modalities";

/// Liveness of a registered boid, driven purely by heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Active,
    Stale,
    Reaped,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stale => "stale",
            Self::Reaped => "reaped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "stale" => Some(Self::Stale),
            "reaped" => Some(Self::Reaped),
            _ => None,
        }
    }
}

/// A registered boid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoidRecord {
    pub name: String,
    /// Template/profile the boid derives from (e.g. `rover`, `arm`).
    pub kind: String,
    /// Principal that registered the boid; the only one allowed to mutate it.
    pub owner: Principal,
    pub state: Liveness,
    pub last_heartbeat_ms: u64,
    pub registered_at_ms: u64,
    /// Bumped on every mutation.
    pub version: u64,
    /// Distinguishes successive registrations of the same name.
    #[serde(default)]
    pub incarnation: u64,
    /// Modalities the boid publishes or subscribes to.
    #[serde(default)]
    pub modalities: BTreeSet<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Principals granted access to this boid's private modalities.
    #[serde(default)]
    pub collaborators: BTreeSet<String>,
}

impl BoidRecord {
    pub fn is_owned_by(&self, principal: &Principal) -> bool {
        &self.owner == principal
    }

    /// Whether `modality` is marked private in the record metadata.
    pub fn is_private(&self, modality: &str) -> bool {
        self.metadata
            .get(PRIVATE_MODALITIES_KEY)
            .and_then(|v| v.as_array())
            .is_some_and(|arr| arr.iter().any(|m| m.as_str() == Some(modality)))
    }

    /// Subscribe admission for one of this boid's modalities.
    pub fn may_subscribe(&self, principal: &Principal, modality: &str) -> bool {
        if !self.is_private(modality) {
            return true;
        }
        match principal {
            Principal::System => true,
            Principal::Peer(name) => self.is_owned_by(principal) || self.collaborators.contains(name),
        }
    }
}

/// Register request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub modalities: BTreeSet<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Heartbeat that also replaces advertised modalities and/or metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordUpdate {
    #[serde(default)]
    pub modalities: Option<BTreeSet<String>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Result of a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub record: BoidRecord,
    /// The boid was Stale and is Active again.
    pub revived: bool,
}

/// Filter for [`Registry::list_page`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub state: Option<Liveness>,
    #[serde(default)]
    pub modality: Option<String>,
}

impl ListFilter {
    pub fn matches(&self, record: &BoidRecord) -> bool {
        self.kind.as_ref().is_none_or(|k| &record.kind == k)
            && self.state.is_none_or(|s| record.state == s)
            && self.modality.as_ref().is_none_or(|m| record.modalities.contains(m))
    }
}

/// One page of a listing, ordered by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPage {
    pub records: Vec<BoidRecord>,
    /// Cursor for the next page, if the page was full.
    pub next: Option<String>,
}

/// What an expiry sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireReport {
    pub stale: Vec<String>,
    pub reaped: Vec<String>,
}

impl ExpireReport {
    pub fn is_empty(&self) -> bool {
        self.stale.is_empty() && self.reaped.is_empty()
    }
}

/// The registry contract.
///
/// Only the owning principal may mutate a record. The expiry sweep is the
/// only other path that changes liveness or removes records.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Create a record. Exactly one of any set of concurrent registrations
    /// for the same name succeeds; the rest get `NameConflict`. A name still
    /// held by a tombstone is `Retryable`.
    async fn register(
        &self,
        registration: Registration,
        principal: &Principal,
    ) -> Result<BoidRecord, MuxError>;

    async fn heartbeat(&self, name: &str, principal: &Principal)
        -> Result<HeartbeatAck, MuxError>;

    async fn update(
        &self,
        name: &str,
        principal: &Principal,
        update: RecordUpdate,
    ) -> Result<HeartbeatAck, MuxError>;

    async fn lookup(&self, name: &str) -> Result<BoidRecord, MuxError>;

    /// Up to `limit` records with names strictly after `after`.
    async fn list_page(
        &self,
        filter: &ListFilter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, MuxError>;

    /// Advance liveness by heartbeat age.
    ///
    /// Reaped records stay behind as tombstones: invisible to lookups, but
    /// holding the name until [`Registry::release`] is called once the
    /// boid's topics and resources are torn down. Tombstones left over from
    /// an earlier pass are reported as reaped again.
    async fn expire(&self) -> Result<ExpireReport, MuxError>;

    /// Tombstone a record on behalf of its owner. The name stays held until
    /// [`Registry::release`].
    async fn unregister(&self, name: &str, principal: &Principal)
        -> Result<BoidRecord, MuxError>;

    /// Drop the tombstone for `name`, freeing it for a new registration.
    /// Returns false when there is no tombstone to drop.
    async fn release(&self, name: &str) -> Result<bool, MuxError>;

    async fn grant(
        &self,
        name: &str,
        principal: &Principal,
        collaborator: &str,
    ) -> Result<BoidRecord, MuxError>;

    async fn revoke(
        &self,
        name: &str,
        principal: &Principal,
        collaborator: &str,
    ) -> Result<BoidRecord, MuxError>;

    async fn count(&self) -> Result<usize, MuxError>;
}

/// Run a registry call with a deadline. Elapsed deadlines surface as
/// `Retryable` rather than hanging the caller.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, MuxError>
where
    F: Future<Output = Result<T, MuxError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "registry call timed out");
            Err(MuxError::Retryable)
        }
    }
}
