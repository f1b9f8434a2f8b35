// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity gate: turns a presented credential into a principal.
//!
//! The real identity provider lives outside the fabric. The gates here are
//! the in-process adapters: a static token table for deployments and an open
//! gate for local development.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MuxError;

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Principal {
    /// The router's own trusted identity. Owns the reserved namespace.
    System,
    /// Any other authenticated boid, client, or service.
    Peer(String),
}

impl Principal {
    pub fn peer(name: impl Into<String>) -> Self {
        Self::Peer(name.into())
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    /// Stable identity string recorded as a boid's owner.
    pub fn id(&self) -> &str {
        match self {
            Self::System => crate::names::SYSTEM,
            Self::Peer(name) => name,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Peer(name) => write!(f, "peer:{name}"),
        }
    }
}

/// Authenticates credentials presented by boids and clients.
#[async_trait]
pub trait IdentityGate: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<Principal, MuxError>;
}

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// One entry of the identity file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub principal: String,
}

/// Identity file contents: `{"tokens": [{"token": "...", "principal": "rover1"}]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityFile {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

/// Static token table. Unknown tokens are rejected.
pub struct TokenGate {
    system_token: Option<String>,
    tokens: HashMap<String, String>,
}

impl TokenGate {
    pub fn new(system_token: Option<String>, file: IdentityFile) -> Self {
        let tokens = file.tokens.into_iter().map(|e| (e.token, e.principal)).collect();
        Self { system_token, tokens }
    }

    /// Load the token table from a JSON identity file.
    pub fn from_file(system_token: Option<String>, path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: IdentityFile = serde_json::from_str(&contents)?;
        Ok(Self::new(system_token, file))
    }
}

#[async_trait]
impl IdentityGate for TokenGate {
    async fn authenticate(&self, credential: &str) -> Result<Principal, MuxError> {
        if let Some(ref system) = self.system_token {
            if constant_time_eq(credential, system) {
                return Ok(Principal::System);
            }
        }
        // Compare against every entry so lookup time does not depend on the match.
        let mut found = None;
        for (token, principal) in &self.tokens {
            if constant_time_eq(credential, token) {
                found = Some(principal);
            }
        }
        found.map(Principal::peer).ok_or(MuxError::Unauthorized)
    }
}

/// Development gate: the credential *is* the principal name.
///
/// The configured system token still maps to [`Principal::System`]; the
/// literal string `system` is refused so nobody can claim the namespace by
/// name alone.
pub struct OpenGate {
    system_token: Option<String>,
}

impl OpenGate {
    pub fn new(system_token: Option<String>) -> Self {
        Self { system_token }
    }
}

#[async_trait]
impl IdentityGate for OpenGate {
    async fn authenticate(&self, credential: &str) -> Result<Principal, MuxError> {
        if let Some(ref system) = self.system_token {
            if constant_time_eq(credential, system) {
                return Ok(Principal::System);
            }
        }
        if credential.is_empty() || crate::names::is_system(credential) {
            return Err(MuxError::Unauthorized);
        }
        Ok(Principal::peer(credential))
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
