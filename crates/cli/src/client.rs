// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the fabric API.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use boidmux::registry::{BoidRecord, HeartbeatAck, ListPage, RecordUpdate, Registration};
use boidmux::resolver::Locator;
use boidmux::transport::http::{
    GrantRequest, HealthResponse, PublishResponse, ResourceRequest, ResourceResponse,
};

use crate::error::ApiError;

/// HTTP client wrapper for one fabric router.
#[derive(Clone)]
pub struct FabricClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

/// Query for [`FabricClient::list`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl FabricClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        crate::ensure_crypto();
        let client = Client::builder().timeout(Duration::from_secs(10)).build().unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), token, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send and decode; non-2xx becomes an [`ApiError`].
    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> anyhow::Result<T> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(ApiError::from_body(status.as_u16(), &body).into());
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// `GET /api/v1/health`
    pub async fn health(&self) -> anyhow::Result<HealthResponse> {
        self.send(self.request(Method::GET, "/api/v1/health")).await
    }

    pub async fn register(&self, registration: &Registration) -> anyhow::Result<BoidRecord> {
        self.send(self.request(Method::POST, "/api/v1/boids").json(registration)).await
    }

    pub async fn heartbeat(&self, name: &str) -> anyhow::Result<HeartbeatAck> {
        let path = format!("/api/v1/boids/{name}/heartbeat");
        self.send(self.request(Method::POST, &path)).await
    }

    pub async fn update(&self, name: &str, update: &RecordUpdate) -> anyhow::Result<HeartbeatAck> {
        let path = format!("/api/v1/boids/{name}");
        self.send(self.request(Method::PATCH, &path).json(update)).await
    }

    pub async fn lookup(&self, name: &str) -> anyhow::Result<BoidRecord> {
        self.send(self.request(Method::GET, &format!("/api/v1/boids/{name}"))).await
    }

    pub async fn list(&self, query: &ListQuery) -> anyhow::Result<ListPage> {
        self.send(self.request(Method::GET, "/api/v1/boids").query(query)).await
    }

    /// Every matching boid, following the page cursor from `query.after`.
    pub async fn list_all(&self, mut query: ListQuery) -> anyhow::Result<Vec<BoidRecord>> {
        let mut records = Vec::new();
        loop {
            let page = self.list(&query).await?;
            records.extend(page.records);
            match page.next {
                Some(next) => query.after = Some(next),
                None => return Ok(records),
            }
        }
    }

    pub async fn unregister(&self, name: &str) -> anyhow::Result<BoidRecord> {
        self.send(self.request(Method::DELETE, &format!("/api/v1/boids/{name}"))).await
    }

    pub async fn grant(&self, name: &str, collaborator: &str) -> anyhow::Result<BoidRecord> {
        let body = GrantRequest { collaborator: collaborator.to_owned() };
        let path = format!("/api/v1/boids/{name}/grants");
        self.send(self.request(Method::POST, &path).json(&body)).await
    }

    pub async fn revoke(&self, name: &str, collaborator: &str) -> anyhow::Result<BoidRecord> {
        let path = format!("/api/v1/boids/{name}/grants/{collaborator}");
        self.send(self.request(Method::DELETE, &path)).await
    }

    /// One-shot publish without holding a publisher connection.
    pub async fn publish(
        &self,
        boid: &str,
        modality: &str,
        payload: Bytes,
    ) -> anyhow::Result<PublishResponse> {
        let path = format!("/api/v1/modalities/{boid}/{modality}/publish");
        self.send(self.request(Method::POST, &path).body(payload)).await
    }

    pub async fn register_resource(
        &self,
        boid: &str,
        glob: &str,
        locator: &str,
    ) -> anyhow::Result<ResourceResponse> {
        let body = ResourceRequest {
            boid: boid.to_owned(),
            glob: glob.to_owned(),
            locator: Locator::new(locator),
        };
        self.send(self.request(Method::POST, "/api/v1/resources").json(&body)).await
    }

    pub async fn resolve(&self, path: &str) -> anyhow::Result<ResourceResponse> {
        let path = format!("/api/v1/resolve/{}", path.trim_start_matches('/'));
        self.send(self.request(Method::GET, &path)).await
    }
}
