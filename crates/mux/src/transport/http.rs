// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the fabric API.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::MuxError;
use crate::events::FabricEvent;
use crate::identity::Principal;
use crate::registry::listing::{self, DEFAULT_PAGE};
use crate::registry::{
    BoidRecord, HeartbeatAck, ListFilter, ListPage, Liveness, RecordUpdate, Registration,
};
use crate::resolver::Locator;
use crate::router::table::TopicStats;
use crate::router::{DisconnectReason, TopicKey};
use crate::state::FabricState;

/// Largest page a single list request may ask for.
pub const MAX_PAGE: usize = 1000;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub hostname: String,
    pub boid_count: usize,
    pub topic_count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub modality: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GrantRequest {
    pub collaborator: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub topic: String,
    pub seq: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub boid: String,
    pub glob: String,
    pub locator: Locator,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub path: String,
    pub locator: Locator,
}

// -- Handlers -----------------------------------------------------------------

async fn health_body(s: &FabricState) -> HealthResponse {
    let boid_count = s.registry_call(s.registry.count()).await.unwrap_or_default();
    HealthResponse {
        status: "running".to_owned(),
        hostname: s.config.hostname(),
        boid_count,
        topic_count: s.router.topic_count(),
    }
}

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<FabricState>>) -> impl IntoResponse {
    Json(health_body(&s).await)
}

/// `POST /api/v1/boids`: register a boid owned by the caller.
pub async fn register_boid(
    State(s): State<Arc<FabricState>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<Registration>,
) -> Result<Response, MuxError> {
    let record = s.registry_call(s.registry.register(req, &principal)).await?;
    s.router.emit(&FabricEvent::BoidRegistered {
        boid: record.name.clone(),
        kind: record.kind.clone(),
    });
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

/// `GET /api/v1/boids`: one page of boids, ordered by name.
pub async fn list_boids(
    State(s): State<Arc<FabricState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListPage>, MuxError> {
    let state = match q.state.as_deref() {
        Some(raw) => Some(Liveness::parse(raw).ok_or(MuxError::BadRequest)?),
        None => None,
    };
    let filter = ListFilter { kind: q.kind, state, modality: q.modality };
    let limit = q.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    let page = s.registry_call(s.registry.list_page(&filter, q.after.as_deref(), limit)).await?;
    Ok(Json(page))
}

/// `GET /api/v1/boids/{name}`
pub async fn get_boid(
    State(s): State<Arc<FabricState>>,
    Path(name): Path<String>,
) -> Result<Json<BoidRecord>, MuxError> {
    Ok(Json(s.registry_call(s.registry.lookup(&name)).await?))
}

/// `DELETE /api/v1/boids/{name}`: owner removes the boid; its topics close.
pub async fn unregister_boid(
    State(s): State<Arc<FabricState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<BoidRecord>, MuxError> {
    let record = s.registry_call(s.registry.unregister(&name, &principal)).await?;
    s.boid_departed(&record.name, DisconnectReason::Unregistered).await;
    Ok(Json(record))
}

fn announce_revival(s: &FabricState, ack: &HeartbeatAck) {
    if ack.revived {
        tracing::info!(boid = %ack.record.name, "boid active again");
        s.router.emit(&FabricEvent::BoidActive { boid: ack.record.name.clone() });
    }
}

/// `POST /api/v1/boids/{name}/heartbeat`
pub async fn heartbeat(
    State(s): State<Arc<FabricState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<HeartbeatAck>, MuxError> {
    let ack = s.registry_call(s.registry.heartbeat(&name, &principal)).await?;
    announce_revival(&s, &ack);
    Ok(Json(ack))
}

/// `PATCH /api/v1/boids/{name}`: heartbeat that replaces modalities/metadata.
pub async fn update_boid(
    State(s): State<Arc<FabricState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(update): Json<RecordUpdate>,
) -> Result<Json<HeartbeatAck>, MuxError> {
    let ack = s.registry_call(s.registry.update(&name, &principal, update)).await?;
    // New metadata may have made a modality private.
    s.router.enforce_access(&ack.record);
    announce_revival(&s, &ack);
    Ok(Json(ack))
}

/// `POST /api/v1/boids/{name}/grants`
pub async fn grant(
    State(s): State<Arc<FabricState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(req): Json<GrantRequest>,
) -> Result<Json<BoidRecord>, MuxError> {
    let record =
        s.registry_call(s.registry.grant(&name, &principal, &req.collaborator)).await?;
    tracing::info!(boid = %name, collaborator = %req.collaborator, "collaborator granted");
    Ok(Json(record))
}

/// `DELETE /api/v1/boids/{name}/grants/{collaborator}`
pub async fn revoke(
    State(s): State<Arc<FabricState>>,
    Extension(principal): Extension<Principal>,
    Path((name, collaborator)): Path<(String, String)>,
) -> Result<Json<BoidRecord>, MuxError> {
    let record = s.registry_call(s.registry.revoke(&name, &principal, &collaborator)).await?;
    let dropped = s.router.enforce_access(&record);
    tracing::info!(boid = %name, collaborator = %collaborator, dropped, "collaborator revoked");
    Ok(Json(record))
}

/// `POST /api/v1/modalities/{boid}/{modality}/publish`: one-shot publish of
/// the raw request body.
pub async fn publish(
    State(s): State<Arc<FabricState>>,
    Extension(principal): Extension<Principal>,
    Path((boid, modality)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<PublishResponse>, MuxError> {
    let key = TopicKey::new(boid, modality);
    let seq = s.router.publish(&key, &principal, body).await?;
    Ok(Json(PublishResponse { topic: key.to_string(), seq }))
}

/// `GET /api/v1/topics`
pub async fn topics(State(s): State<Arc<FabricState>>) -> Json<Vec<TopicStats>> {
    Json(s.router.stats())
}

/// `POST /api/v1/resources`: map `boid/glob` to a storage locator.
pub async fn register_resource(
    State(s): State<Arc<FabricState>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<ResourceRequest>,
) -> Result<Response, MuxError> {
    s.resolver.register(&req.boid, &req.glob, req.locator.clone(), &principal).await?;
    let body = ResourceResponse { path: format!("{}/{}", req.boid, req.glob), locator: req.locator };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// `GET /api/v1/resolve/{*path}`
pub async fn resolve(
    State(s): State<Arc<FabricState>>,
    Path(path): Path<String>,
) -> Result<Json<ResourceResponse>, MuxError> {
    let locator = s.resolver.resolve(&path).await?;
    Ok(Json(ResourceResponse { path, locator }))
}

/// Fallback: `GET /<boid>/<resource...>`: the public resource surface.
///
/// Built-in system resources are served inline; `http(s)` locators redirect;
/// anything else is described as JSON.
pub async fn serve_resource(
    State(s): State<Arc<FabricState>>,
    method: Method,
    uri: Uri,
) -> Result<Response, MuxError> {
    if method != Method::GET {
        return Err(MuxError::NotFound);
    }
    let path = uri.path().trim_start_matches('/').to_owned();
    let locator = s.resolver.resolve(&path).await?;

    match locator.builtin() {
        Some("health") => return Ok(Json(health_body(&s).await).into_response()),
        Some("boids") => {
            // The whole roster, fetched page by page.
            let roster = listing::list(Arc::clone(&s.registry), ListFilter::default(), DEFAULT_PAGE);
            let records: Vec<BoidRecord> = s.registry_call(roster.try_collect()).await?;
            return Ok(Json(records).into_response());
        }
        Some("events") => {
            let events = TopicKey::events();
            let body = serde_json::json!({
                "topic": events.to_string(),
                "subscribe": format!("/modalities/{}/{}/sub", events.boid, events.modality),
            });
            return Ok(Json(body).into_response());
        }
        _ => {}
    }

    if locator.as_str().starts_with("http://") || locator.as_str().starts_with("https://") {
        return Ok((StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, locator.to_string())])
            .into_response());
    }
    Ok(Json(ResourceResponse { path, locator }).into_response())
}
