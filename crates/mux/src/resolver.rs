// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource naming: `<boid-name>/<resource-glob>` to storage locator.
//!
//! Boid names come from the registry; glob-to-locator mappings live in the
//! resolver's own table. The `system` segment resolves against built-in,
//! router-owned resources instead.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::MuxError;
use crate::identity::Principal;
use crate::names;
use crate::registry::{bounded, Registry};

/// Opaque storage locator (`s3://bucket/key`, `https://...`, `builtin:health`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(pub String);

impl Locator {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the built-in resource, if this is a `builtin:` locator.
    pub fn builtin(&self) -> Option<&str> {
        self.0.strip_prefix("builtin:")
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Built-in resources under the system namespace.
pub const BUILTIN_RESOURCES: &[(&str, &str)] =
    &[("health", "builtin:health"), ("boids", "builtin:boids"), ("events", "builtin:events")];

struct Entry {
    glob: String,
    pattern: Regex,
    /// Characters before the first wildcard; longer prefixes win.
    literal_prefix: usize,
    locator: Locator,
    /// Registration of the boid this mapping belongs to; 0 for built-ins.
    incarnation: u64,
}

impl Entry {
    fn new(glob: &str, locator: Locator, incarnation: u64) -> Result<Self, MuxError> {
        Ok(Self {
            glob: glob.to_owned(),
            pattern: compile_glob(glob)?,
            literal_prefix: glob.find(['*', '?']).unwrap_or(glob.len()),
            locator,
            incarnation,
        })
    }

    fn is_literal(&self) -> bool {
        self.literal_prefix == self.glob.len()
    }
}

/// Translate a resource glob into an anchored regex.
///
/// `*` matches within one path segment, `**` across segments, `?` one
/// character other than `/`.
pub fn compile_glob(glob: &str) -> Result<Regex, MuxError> {
    let mut re = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                re.push_str(".*");
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|_| MuxError::BadRequest)
}

fn validate_glob(glob: &str) -> Result<(), MuxError> {
    if glob.is_empty()
        || glob.starts_with('/')
        || glob.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(MuxError::BadRequest);
    }
    Ok(())
}

pub struct ResourceResolver {
    table: RwLock<HashMap<String, Vec<Entry>>>,
    registry: Arc<dyn Registry>,
    registry_timeout: Duration,
}

impl ResourceResolver {
    pub fn new(registry: Arc<dyn Registry>, registry_timeout: Duration) -> Self {
        let mut system = Vec::new();
        for (glob, locator) in BUILTIN_RESOURCES {
            if let Ok(entry) = Entry::new(glob, Locator::new(*locator), 0) {
                system.push(entry);
            }
        }
        let mut table = HashMap::new();
        table.insert(names::SYSTEM.to_owned(), system);
        Self { table: RwLock::new(table), registry, registry_timeout }
    }

    /// Map `boid/glob` to `locator`.
    ///
    /// Re-registering the same mapping is a no-op; mapping an existing glob to
    /// a different locator is a `Conflict`. Mappings left behind by an earlier
    /// registration of the same name never count.
    pub async fn register(
        &self,
        boid: &str,
        glob: &str,
        locator: Locator,
        principal: &Principal,
    ) -> Result<(), MuxError> {
        validate_glob(glob)?;
        if locator.as_str().is_empty() {
            return Err(MuxError::BadRequest);
        }

        let (key, incarnation) = if names::is_reserved(boid) {
            if !(names::is_system(boid) && principal.is_system()) {
                return Err(MuxError::Reserved);
            }
            (names::SYSTEM.to_owned(), 0)
        } else {
            let record = bounded(self.registry_timeout, self.registry.lookup(boid)).await?;
            if !record.is_owned_by(principal) {
                return Err(MuxError::Unauthorized);
            }
            (boid.to_owned(), record.incarnation)
        };

        let entry = Entry::new(glob, locator, incarnation)?;
        let mut table = self.table.write();
        let entries = table.entry(key).or_default();
        entries.retain(|e| e.incarnation == incarnation);
        if let Some(existing) = entries.iter().find(|e| e.glob == glob) {
            return if existing.locator == entry.locator { Ok(()) } else { Err(MuxError::Conflict) };
        }
        info!(boid, glob, locator = %entry.locator, "resource registered");
        entries.push(entry);
        Ok(())
    }

    /// Resolve `boid/resource` to a locator. Reads only.
    pub async fn resolve(&self, path: &str) -> Result<Locator, MuxError> {
        let (boid, resource) = names::split_resource_path(path).ok_or(MuxError::NotFound)?;

        if names::is_reserved(boid) {
            if names::is_system(boid) {
                if let Some(locator) = self.lookup_in(names::SYSTEM, resource, 0) {
                    return Ok(locator);
                }
            }
            return Err(MuxError::Reserved);
        }

        // A boid that has left the registry has no resources.
        let record = bounded(self.registry_timeout, self.registry.lookup(boid)).await?;
        self.lookup_in(boid, resource, record.incarnation).ok_or(MuxError::NotFound)
    }

    /// Exact mappings win; otherwise the glob with the longest literal prefix,
    /// then the earliest registered.
    fn lookup_in(&self, boid: &str, resource: &str, incarnation: u64) -> Option<Locator> {
        let table = self.table.read();
        let entries: Vec<&Entry> =
            table.get(boid)?.iter().filter(|e| e.incarnation == incarnation).collect();
        if let Some(exact) = entries.iter().find(|e| e.is_literal() && e.glob == resource) {
            return Some(exact.locator.clone());
        }
        let mut best: Option<&Entry> = None;
        for entry in entries.into_iter().filter(|e| !e.is_literal()) {
            if entry.pattern.is_match(resource)
                && best.is_none_or(|b| entry.literal_prefix > b.literal_prefix)
            {
                best = Some(entry);
            }
        }
        best.map(|e| e.locator.clone())
    }

    /// Drop every mapping of a boid that left the registry.
    pub fn purge_boid(&self, boid: &str) -> usize {
        if names::is_reserved(boid) {
            return 0;
        }
        let removed = self.table.write().remove(boid).map(|v| v.len()).unwrap_or(0);
        if removed > 0 {
            info!(boid, removed, "resources purged");
        }
        removed
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
