// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-process registry.
//!
//! Records are spread over a fixed number of shards keyed by name hash. Each
//! shard is an ordered map behind its own `RwLock`; each record sits behind
//! its own `Mutex`. Heartbeats and lookups only take a shard read lock plus
//! the record lock, so they never block each other across records.
//!
//! Departed records linger as `Reaped` tombstones until released, so a name
//! cannot be claimed again while the previous holder is still being torn
//! down.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::{
    BoidRecord, ExpireReport, HeartbeatAck, ListFilter, ListPage, Liveness, RecordUpdate,
    Registration, Registry,
};
use crate::clock::{Clock, SystemClock};
use crate::error::MuxError;
use crate::identity::Principal;
use crate::names;

const SHARDS: usize = 16;

type Slot = Arc<Mutex<BoidRecord>>;

/// Liveness windows, measured from the last heartbeat.
#[derive(Debug, Clone, Copy)]
pub struct Windows {
    /// Active records older than this become Stale.
    pub stale_after: Duration,
    /// Stale records older than this are reaped. Must exceed `stale_after`.
    pub reap_after: Duration,
}

pub struct MemoryRegistry {
    shards: Vec<RwLock<BTreeMap<String, Slot>>>,
    windows: Windows,
    clock: Arc<dyn Clock>,
    incarnations: AtomicU64,
}

impl MemoryRegistry {
    pub fn new(windows: Windows) -> Self {
        Self::with_clock(windows, Arc::new(SystemClock))
    }

    pub fn with_clock(windows: Windows, clock: Arc<dyn Clock>) -> Self {
        let shards = (0..SHARDS).map(|_| RwLock::new(BTreeMap::new())).collect();
        Self { shards, windows, clock, incarnations: AtomicU64::new(0) }
    }

    fn shard(&self, name: &str) -> &RwLock<BTreeMap<String, Slot>> {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    fn slot(&self, name: &str) -> Result<Slot, MuxError> {
        self.shard(name).read().get(name).cloned().ok_or(MuxError::NotFound)
    }

    /// Apply `f` to a record owned by `principal`.
    fn mutate_owned<T>(
        &self,
        name: &str,
        principal: &Principal,
        f: impl FnOnce(&mut BoidRecord) -> T,
    ) -> Result<T, MuxError> {
        let slot = self.slot(name)?;
        let mut record = slot.lock();
        // A reaped record is gone even if the sweep has not unlinked it yet.
        if record.state == Liveness::Reaped {
            return Err(MuxError::NotFound);
        }
        if !record.is_owned_by(principal) {
            return Err(MuxError::Unauthorized);
        }
        Ok(f(&mut record))
    }

    fn touch(&self, record: &mut BoidRecord) -> bool {
        let now = self.clock.now_ms();
        // Later timestamp wins against any concurrent writer.
        record.last_heartbeat_ms = record.last_heartbeat_ms.max(now);
        record.version += 1;
        let revived = record.state == Liveness::Stale;
        record.state = Liveness::Active;
        revived
    }

    /// One pass of the liveness state machine over a single record.
    fn sweep_record(&self, record: &mut BoidRecord, now: u64) -> Option<Liveness> {
        let age = Duration::from_millis(now.saturating_sub(record.last_heartbeat_ms));
        match record.state {
            Liveness::Active if age > self.windows.stale_after => {
                record.state = Liveness::Stale;
                record.version += 1;
                Some(Liveness::Stale)
            }
            // Stale always precedes Reaped: an Active record past both windows
            // only becomes Stale on this pass.
            Liveness::Stale if age > self.windows.reap_after => {
                record.state = Liveness::Reaped;
                record.version += 1;
                Some(Liveness::Reaped)
            }
            // A tombstone nobody released; report it again so teardown reruns.
            Liveness::Reaped if age > self.windows.reap_after => Some(Liveness::Reaped),
            _ => None,
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(
        &self,
        registration: Registration,
        principal: &Principal,
    ) -> Result<BoidRecord, MuxError> {
        names::validate_boid_name(&registration.name)?;
        for modality in &registration.modalities {
            names::validate_modality(modality)?;
        }

        let now = self.clock.now_ms();
        let record = BoidRecord {
            name: registration.name.clone(),
            kind: registration.kind,
            owner: principal.clone(),
            state: Liveness::Active,
            last_heartbeat_ms: now,
            registered_at_ms: now,
            version: 1,
            incarnation: self.incarnations.fetch_add(1, Ordering::Relaxed) + 1,
            modalities: registration.modalities,
            metadata: registration.metadata,
            collaborators: Default::default(),
        };

        let mut shard = self.shard(&registration.name).write();
        if let Some(existing) = shard.get(&registration.name) {
            // The previous holder is still being torn down.
            if existing.lock().state == Liveness::Reaped {
                return Err(MuxError::Retryable);
            }
            return Err(MuxError::NameConflict);
        }
        shard.insert(registration.name.clone(), Arc::new(Mutex::new(record.clone())));
        drop(shard);

        info!(boid = %record.name, kind = %record.kind, owner = %principal, "boid registered");
        Ok(record)
    }

    async fn heartbeat(
        &self,
        name: &str,
        principal: &Principal,
    ) -> Result<HeartbeatAck, MuxError> {
        self.mutate_owned(name, principal, |record| {
            let revived = self.touch(record);
            HeartbeatAck { record: record.clone(), revived }
        })
    }

    async fn update(
        &self,
        name: &str,
        principal: &Principal,
        update: RecordUpdate,
    ) -> Result<HeartbeatAck, MuxError> {
        if let Some(ref modalities) = update.modalities {
            for modality in modalities {
                names::validate_modality(modality)?;
            }
        }
        self.mutate_owned(name, principal, |record| {
            if let Some(modalities) = update.modalities {
                record.modalities = modalities;
            }
            if let Some(metadata) = update.metadata {
                record.metadata = metadata;
            }
            let revived = self.touch(record);
            HeartbeatAck { record: record.clone(), revived }
        })
    }

    async fn lookup(&self, name: &str) -> Result<BoidRecord, MuxError> {
        let slot = self.slot(name)?;
        let record = slot.lock();
        if record.state == Liveness::Reaped {
            return Err(MuxError::NotFound);
        }
        Ok(record.clone())
    }

    async fn list_page(
        &self,
        filter: &ListFilter,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, MuxError> {
        if limit == 0 {
            return Err(MuxError::BadRequest);
        }
        let lower = match after {
            Some(name) => Bound::Excluded(name.to_owned()),
            None => Bound::Unbounded,
        };

        // Each shard contributes at most `limit` matches; the merged prefix is
        // then the global first page.
        let mut merged = Vec::new();
        for shard in &self.shards {
            let slots: Vec<Slot> = shard
                .read()
                .range((lower.clone(), Bound::Unbounded))
                .map(|(_, slot)| Arc::clone(slot))
                .collect();
            let mut taken = 0;
            for slot in slots {
                if taken == limit {
                    break;
                }
                let record = slot.lock();
                if record.state != Liveness::Reaped && filter.matches(&record) {
                    merged.push(record.clone());
                    taken += 1;
                }
            }
        }
        merged.sort_by(|a, b| a.name.cmp(&b.name));
        merged.truncate(limit);

        let next = if merged.len() == limit { merged.last().map(|r| r.name.clone()) } else { None };
        Ok(ListPage { records: merged, next })
    }

    async fn expire(&self) -> Result<ExpireReport, MuxError> {
        let now = self.clock.now_ms();
        let mut report = ExpireReport::default();

        for shard in &self.shards {
            let slots: Vec<(String, Slot)> =
                shard.read().iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect();

            for (name, slot) in slots {
                let transition = self.sweep_record(&mut slot.lock(), now);
                match transition {
                    Some(Liveness::Stale) => {
                        info!(boid = %name, "boid stale");
                        report.stale.push(name);
                    }
                    Some(Liveness::Reaped) => {
                        info!(boid = %name, "boid reaped");
                        report.reaped.push(name);
                    }
                    _ => {}
                }
            }
        }
        report.stale.sort();
        report.reaped.sort();

        if !report.is_empty() {
            debug!(stale = report.stale.len(), reaped = report.reaped.len(), "expiry sweep");
        }
        Ok(report)
    }

    async fn unregister(
        &self,
        name: &str,
        principal: &Principal,
    ) -> Result<BoidRecord, MuxError> {
        let record = self.mutate_owned(name, principal, |record| {
            record.state = Liveness::Reaped;
            record.version += 1;
            let departed = record.clone();
            // A tombstone the caller never releases is picked up by the sweep
            // a full reap window from now.
            record.last_heartbeat_ms = self.clock.now_ms();
            departed
        })?;
        info!(boid = %name, "boid unregistered");
        Ok(record)
    }

    async fn release(&self, name: &str) -> Result<bool, MuxError> {
        let mut shard = self.shard(name).write();
        let tombstone = shard.get(name).is_some_and(|slot| slot.lock().state == Liveness::Reaped);
        if tombstone {
            shard.remove(name);
            debug!(boid = %name, "name released");
        }
        Ok(tombstone)
    }

    async fn grant(
        &self,
        name: &str,
        principal: &Principal,
        collaborator: &str,
    ) -> Result<BoidRecord, MuxError> {
        if collaborator.is_empty() {
            return Err(MuxError::BadRequest);
        }
        self.mutate_owned(name, principal, |record| {
            if record.collaborators.insert(collaborator.to_owned()) {
                record.version += 1;
            }
            record.clone()
        })
    }

    async fn revoke(
        &self,
        name: &str,
        principal: &Principal,
        collaborator: &str,
    ) -> Result<BoidRecord, MuxError> {
        self.mutate_owned(name, principal, |record| {
            if record.collaborators.remove(collaborator) {
                record.version += 1;
            }
            record.clone()
        })
    }

    async fn count(&self) -> Result<usize, MuxError> {
        Ok(self
            .shards
            .iter()
            .map(|s| s.read().values().filter(|slot| slot.lock().state != Liveness::Reaped).count())
            .sum())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
