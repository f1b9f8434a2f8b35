// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the fabric.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::FabricState;

/// Build the axum `Router` with all fabric routes.
pub fn build_router(state: Arc<FabricState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Registry
        .route("/api/v1/boids", post(http::register_boid).get(http::list_boids))
        .route(
            "/api/v1/boids/{name}",
            get(http::get_boid).delete(http::unregister_boid).patch(http::update_boid),
        )
        .route("/api/v1/boids/{name}/heartbeat", post(http::heartbeat))
        .route("/api/v1/boids/{name}/grants", post(http::grant))
        .route("/api/v1/boids/{name}/grants/{collaborator}", delete(http::revoke))
        // Router
        .route("/api/v1/modalities/{boid}/{modality}/publish", post(http::publish))
        .route("/api/v1/topics", get(http::topics))
        // Resources
        .route("/api/v1/resources", post(http::register_resource))
        .route("/api/v1/resolve/{*path}", get(http::resolve))
        // WebSocket connections (auth via header or query)
        .route("/modalities/{boid}/{modality}/pub", get(ws::publisher_ws))
        .route("/modalities/{boid}/{modality}/sub", get(ws::subscriber_ws))
        // Public resource surface: /<boid>/<resource...>
        .fallback(http::serve_resource)
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
