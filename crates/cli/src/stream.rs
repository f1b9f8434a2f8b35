// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket publisher and subscriber connections to a modality topic.

use base64::Engine;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use boidmux::error::MuxError;
use boidmux::router::DisconnectReason;
use boidmux::transport::ws::WsFrame;

use crate::client::FabricClient;
use crate::error::ApiError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Which end of a topic to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    fn segment(self) -> &'static str {
        match self {
            Self::Publisher => "pub",
            Self::Subscriber => "sub",
        }
    }
}

/// Build the WebSocket URL for a topic from the HTTP base URL.
pub fn ws_url(
    base: &str,
    boid: &str,
    modality: &str,
    role: Role,
    token: Option<&str>,
) -> anyhow::Result<Url> {
    let base = base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_owned()
    } else {
        anyhow::bail!("unsupported URL scheme: {base}");
    };
    let mut url = Url::parse(&format!("{ws_base}/modalities/{boid}/{modality}/{}", role.segment()))?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// Open a socket; a refused upgrade surfaces as an [`ApiError`].
async fn connect(client: &FabricClient, boid: &str, modality: &str, role: Role) -> anyhow::Result<Socket> {
    let url = ws_url(client.base_url(), boid, modality, role, client.token())?;
    match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((socket, _)) => Ok(socket),
        Err(tungstenite::Error::Http(resp)) => {
            let body = resp.body().clone().unwrap_or_default();
            Err(ApiError::from_body(resp.status().as_u16(), &body).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Next JSON frame from the router, or `None` once the socket ends.
async fn next_frame(socket: &mut Socket) -> anyhow::Result<Option<WsFrame>> {
    while let Some(msg) = socket.next().await {
        match msg? {
            Message::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
            Message::Close(_) => return Ok(None),
            _ => continue,
        }
    }
    Ok(None)
}

/// One event seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message { seq: u64, publisher: String, timestamp_ms: u64, payload: Bytes },
    /// The router closed the subscription and said why.
    Closed(DisconnectReason),
    /// The socket ended without a reason.
    Dropped,
}

/// Subscriber connection.
pub struct Subscriber {
    socket: Socket,
    topic: String,
}

impl Subscriber {
    pub async fn connect(client: &FabricClient, boid: &str, modality: &str) -> anyhow::Result<Self> {
        let mut socket = connect(client, boid, modality, Role::Subscriber).await?;
        match next_frame(&mut socket).await? {
            Some(WsFrame::Subscribed { topic }) => Ok(Self { socket, topic }),
            Some(WsFrame::Closed { reason }) => anyhow::bail!("subscription closed: {reason}"),
            other => anyhow::bail!("unexpected first frame: {other:?}"),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn next(&mut self) -> anyhow::Result<Delivery> {
        loop {
            match next_frame(&mut self.socket).await? {
                Some(WsFrame::Message { seq, publisher, timestamp_ms, payload }) => {
                    let payload = base64::engine::general_purpose::STANDARD.decode(payload)?;
                    return Ok(Delivery::Message {
                        seq,
                        publisher,
                        timestamp_ms,
                        payload: Bytes::from(payload),
                    });
                }
                Some(WsFrame::Closed { reason }) => return Ok(Delivery::Closed(reason)),
                Some(_) => continue,
                None => return Ok(Delivery::Dropped),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

/// Publisher connection. Each payload is acknowledged with its sequence number.
pub struct Publisher {
    socket: Socket,
}

impl Publisher {
    pub async fn connect(client: &FabricClient, boid: &str, modality: &str) -> anyhow::Result<Self> {
        let socket = connect(client, boid, modality, Role::Publisher).await?;
        Ok(Self { socket })
    }

    /// Publish one payload and wait for the router's answer.
    pub async fn send(&mut self, payload: Bytes) -> anyhow::Result<u64> {
        self.socket.send(Message::Binary(payload)).await?;
        match next_frame(&mut self.socket).await? {
            Some(WsFrame::Ack { seq }) => Ok(seq),
            Some(WsFrame::Error { code, message }) => {
                let code = MuxError::from_code(&code);
                let status = code.map_or(0, |c| c.http_status());
                Err(ApiError { status, code, message }.into())
            }
            Some(WsFrame::Closed { reason }) => anyhow::bail!("publisher closed: {reason}"),
            Some(other) => anyhow::bail!("unexpected frame: {other:?}"),
            None => anyhow::bail!("publisher connection dropped"),
        }
    }

    pub async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
