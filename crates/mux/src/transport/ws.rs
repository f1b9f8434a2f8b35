// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket publisher and subscriber connections.
//!
//! Admission happens before the upgrade, so an unauthorized or unknown topic
//! is refused with an HTTP error instead of an open-then-close socket.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::MuxError;
use crate::identity::Principal;
use crate::router::{DisconnectReason, Message, PublisherHandle, Subscription, TopicKey};
use crate::state::FabricState;
use crate::transport::auth;

/// Query parameters for WS upgrades.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Server-to-client frames, JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsFrame {
    Subscribed { topic: String },
    Message { seq: u64, publisher: String, timestamp_ms: u64, payload: String },
    Ack { seq: u64 },
    Error { code: String, message: String },
    Closed { reason: DisconnectReason },
}

impl WsFrame {
    pub fn message(message: &Message) -> Self {
        Self::Message {
            seq: message.seq,
            publisher: message.publisher.id().to_owned(),
            timestamp_ms: message.timestamp_ms,
            payload: base64::engine::general_purpose::STANDARD.encode(&message.payload),
        }
    }

    pub fn error(err: MuxError) -> Self {
        Self::Error { code: err.as_str().to_owned(), message: err.default_message().to_owned() }
    }
}

type WsSender = SplitSink<WebSocket, WsMessage>;

async fn send_frame(tx: &mut WsSender, frame: &WsFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    tx.send(WsMessage::Text(text.into())).await
}

/// Send the closing reason, then the close frame.
async fn send_closed(tx: &mut WsSender, reason: DisconnectReason) {
    let _ = send_frame(tx, &WsFrame::Closed { reason }).await;
    let _ = tx.send(WsMessage::Close(None)).await;
}

/// Bearer header first, then `?token=`.
async fn ws_principal(
    state: &FabricState,
    headers: &HeaderMap,
    query: &WsQuery,
) -> Result<Principal, MuxError> {
    let credential = auth::bearer(headers).or(query.token.as_deref());
    auth::authenticate(state.gate.as_ref(), credential).await
}

/// `GET /modalities/{boid}/{modality}/pub`
pub async fn publisher_ws(
    State(state): State<Arc<FabricState>>,
    Path((boid, modality)): Path<(String, String)>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let key = TopicKey::new(boid, modality);
    let principal = match ws_principal(&state, &headers, &query).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let handle = match state.router.open_publisher(&key, &principal).await {
        Ok(h) => h,
        Err(e) => {
            tracing::debug!(topic = %key, %principal, err = %e, "publisher refused");
            return e.into_response();
        }
    };
    tracing::info!(topic = %key, %principal, "publisher connected");
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| run_publisher(socket, handle, shutdown)).into_response()
}

/// Per-connection publisher loop: every text or binary frame is a payload.
async fn run_publisher(socket: WebSocket, handle: PublisherHandle, shutdown: CancellationToken) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let reason = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Some(DisconnectReason::Shutdown),
            reason = handle.closed() => break Some(reason),

            msg = ws_rx.next() => {
                let payload = match msg {
                    Some(Ok(WsMessage::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                    Some(Ok(WsMessage::Binary(data))) => data,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break None,
                    Some(Ok(_)) => continue,
                };
                let frame = match handle.publish(payload) {
                    Ok(seq) => WsFrame::Ack { seq },
                    Err(e) => WsFrame::error(e),
                };
                if send_frame(&mut ws_tx, &frame).await.is_err() {
                    break None;
                }
            }
        }
    };

    tracing::info!(topic = %handle.key(), reason = ?reason, "publisher disconnected");
    if let Some(reason) = reason {
        send_closed(&mut ws_tx, reason).await;
    }
}

/// `GET /modalities/{boid}/{modality}/sub`
pub async fn subscriber_ws(
    State(state): State<Arc<FabricState>>,
    Path((boid, modality)): Path<(String, String)>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let key = TopicKey::new(boid, modality);
    let principal = match ws_principal(&state, &headers, &query).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let subscription = match state.router.subscribe(&key, &principal).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(topic = %key, %principal, err = %e, "subscriber refused");
            return e.into_response();
        }
    };
    tracing::info!(topic = %key, %principal, "subscriber connected");
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| run_subscriber(socket, subscription, shutdown)).into_response()
}

/// Per-connection subscriber loop. Inbound frames other than close are ignored.
async fn run_subscriber(socket: WebSocket, mut sub: Subscription, shutdown: CancellationToken) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let subscribed = WsFrame::Subscribed { topic: sub.key().to_string() };
    if send_frame(&mut ws_tx, &subscribed).await.is_err() {
        return;
    }

    let reason = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Some(DisconnectReason::Shutdown),

            next = sub.recv() => {
                match next {
                    Ok(message) => {
                        if send_frame(&mut ws_tx, &WsFrame::message(&message)).await.is_err() {
                            break None;
                        }
                    }
                    Err(reason) => break Some(reason),
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break None,
                    _ => {}
                }
            }
        }
    };

    tracing::info!(topic = %sub.key(), reason = ?reason, "subscriber disconnected");
    if let Some(reason) = reason {
        send_closed(&mut ws_tx, reason).await;
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
