// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::MuxError;
use crate::identity::{IdentityGate, Principal};
use crate::state::FabricState;

/// Bearer credential from HTTP headers, if any.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization").and_then(|v| v.to_str().ok())?.strip_prefix("Bearer ")
}

/// Authenticate a presented credential; a missing one is `Unauthorized`.
pub async fn authenticate(
    gate: &dyn IdentityGate,
    credential: Option<&str>,
) -> Result<Principal, MuxError> {
    match credential {
        Some(c) if !c.is_empty() => gate.authenticate(c).await,
        _ => Err(MuxError::Unauthorized),
    }
}

/// Axum middleware that authenticates the bearer credential and attaches the
/// resulting [`Principal`] as a request extension.
///
/// Exempt: `/api/v1/health` and WebSocket upgrades under `/modalities/`,
/// which authenticate in their handlers.
pub async fn auth_layer(
    state: State<Arc<FabricState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/api/v1/health" || path.starts_with("/modalities/") {
        return next.run(req).await;
    }

    let result = authenticate(state.gate.as_ref(), bearer(req.headers())).await;
    match result {
        Ok(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(code) => code.to_http_response("unauthorized").into_response(),
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
