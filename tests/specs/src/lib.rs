// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end fabric tests.
//!
//! Runs a real fabric server on a loopback port inside the test process and
//! exercises it over HTTP and WebSocket through the `boid` client.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use boid::client::FabricClient;
use boidmux::config::{LogFormat, MuxConfig};

pub use boid::ensure_crypto;

pub const SYSTEM_TOKEN: &str = "spec-system";

/// A running fabric server that shuts down on drop.
pub struct FabricProcess {
    port: u16,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

/// Liveness and queue knobs for a [`FabricProcess`].
pub struct FabricBuilder {
    stale_ms: u64,
    reap_ms: u64,
    expiry_ms: u64,
    queue_depth: usize,
}

impl Default for FabricBuilder {
    fn default() -> Self {
        Self { stale_ms: 15_000, reap_ms: 60_000, expiry_ms: 1_000, queue_depth: 256 }
    }
}

impl FabricBuilder {
    /// Shrink the liveness windows so expiry happens within a test.
    pub fn windows(mut self, stale: Duration, reap: Duration, sweep: Duration) -> Self {
        self.stale_ms = stale.as_millis() as u64;
        self.reap_ms = reap.as_millis() as u64;
        self.expiry_ms = sweep.as_millis() as u64;
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    fn config(&self, port: u16) -> MuxConfig {
        MuxConfig {
            host: "127.0.0.1".into(),
            port,
            hostname: Some("fabric.spec".into()),
            system_token: Some(SYSTEM_TOKEN.into()),
            identity_file: None,
            stale_ms: self.stale_ms,
            reap_ms: self.reap_ms,
            expiry_ms: self.expiry_ms,
            queue_depth: self.queue_depth,
            require_subscriber: false,
            sink_queue_depth: 256,
            sink_retry_attempts: 1,
            sink_backoff_ms: 10,
            registry_timeout_ms: 2_000,
            nats_url: None,
            nats_token: None,
            nats_prefix: "boid".into(),
            log_format: LogFormat::Text,
        }
    }

    /// Bind a loopback port and serve until the process handle drops.
    pub async fn spawn(self) -> anyhow::Result<FabricProcess> {
        ensure_crypto();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let shutdown = CancellationToken::new();
        let state = boidmux::build_state(self.config(port), shutdown.clone()).await?;
        let handle = tokio::spawn(boidmux::serve(listener, state));
        Ok(FabricProcess { port, shutdown, handle })
    }
}

impl FabricProcess {
    pub fn build() -> FabricBuilder {
        FabricBuilder::default()
    }

    /// Serve with default windows and wait until healthy.
    pub async fn start() -> anyhow::Result<Self> {
        let fabric = Self::build().spawn().await?;
        fabric.wait_healthy(Duration::from_secs(5)).await?;
        Ok(fabric)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Client acting as `principal` (a boid name, or [`SYSTEM_TOKEN`]).
    pub fn client(&self, principal: &str) -> FabricClient {
        FabricClient::new(&self.base_url(), Some(principal.to_owned()))
    }

    /// Client with no bearer token.
    pub fn anonymous(&self) -> FabricClient {
        FabricClient::new(&self.base_url(), None)
    }

    /// Poll health until it answers or `timeout` passes.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let client = self.anonymous();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("fabric did not become healthy within {timeout:?}");
            }
            if let Ok(health) = client.health().await {
                if health.status == "running" {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Cancel and wait for the server to finish draining.
    pub async fn stop(mut self, timeout: Duration) -> anyhow::Result<()> {
        self.shutdown.cancel();
        tokio::time::timeout(timeout, &mut self.handle).await???;
        Ok(())
    }
}

impl Drop for FabricProcess {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}
