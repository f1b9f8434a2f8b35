// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boid and modality name rules, and the reserved namespace.
//!
//! The reserved check is the same set-membership test for boid registration,
//! topic authorization, and resource resolution.

use crate::error::MuxError;

/// The router-owned namespace segment.
pub const SYSTEM: &str = "system";

/// Boid-name segments withheld from ordinary registration.
pub const RESERVED_SEGMENTS: &[&str] = &[SYSTEM, "api", "admin", "modalities", "ws"];

/// Maximum length of a boid or modality name.
pub const MAX_NAME_LEN: usize = 63;

/// Whether `segment` is withheld from user registration.
pub fn is_reserved(segment: &str) -> bool {
    RESERVED_SEGMENTS.iter().any(|r| r.eq_ignore_ascii_case(segment))
}

/// Whether `segment` names the system namespace itself.
pub fn is_system(segment: &str) -> bool {
    segment.eq_ignore_ascii_case(SYSTEM)
}

/// Validate a name's shape: lowercase ASCII alphanumerics, `-` and `_`,
/// starting with an alphanumeric.
fn valid_shape(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    first_ok && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Validate a boid name for registration.
pub fn validate_boid_name(name: &str) -> Result<(), MuxError> {
    if !valid_shape(name) || is_reserved(name) {
        return Err(MuxError::InvalidName);
    }
    Ok(())
}

/// Validate a modality name (`vision`, `proprioception`, ...).
pub fn validate_modality(name: &str) -> Result<(), MuxError> {
    if !valid_shape(name) {
        return Err(MuxError::InvalidName);
    }
    Ok(())
}

/// Split a resource path `<boid-name>/<resource>` into its two parts.
///
/// Leading slashes are ignored. Returns `None` if either part is empty.
pub fn split_resource_path(path: &str) -> Option<(&str, &str)> {
    let path = path.trim_start_matches('/');
    let (boid, rest) = path.split_once('/')?;
    if boid.is_empty() || rest.is_empty() {
        return None;
    }
    Some((boid, rest))
}

#[cfg(test)]
#[path = "names_tests.rs"]
mod tests;
