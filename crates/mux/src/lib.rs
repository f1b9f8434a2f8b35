// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boidmux: boid registry, modality router, and resource naming for a robot
//! coordination fabric.

pub mod clock;
pub mod config;
pub mod episode;
pub mod error;
pub mod events;
pub mod expiry;
pub mod identity;
pub mod names;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod state;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::clock::SystemClock;
use crate::config::MuxConfig;
use crate::episode::nats::NatsSink;
use crate::episode::worker::spawn_sink_worker;
use crate::episode::{EpisodeSink, LogSink};
use crate::expiry::spawn_expiry_sweeper;
use crate::identity::{IdentityGate, OpenGate, TokenGate};
use crate::registry::memory::MemoryRegistry;
use crate::router::DisconnectReason;
use crate::state::FabricState;
use crate::transport::build_router;

/// Assemble registry, episode sink, router, resolver, and identity gate.
pub async fn build_state(
    config: MuxConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<Arc<FabricState>> {
    config.validate()?;

    let gate: Arc<dyn IdentityGate> = match config.identity_file {
        Some(ref path) => Arc::new(TokenGate::from_file(config.system_token.clone(), path)?),
        None => {
            tracing::warn!("no identity file configured; bearer values are taken as principal names");
            Arc::new(OpenGate::new(config.system_token.clone()))
        }
    };

    let sink: Arc<dyn EpisodeSink> = match config.nats() {
        Some(nats) => Arc::new(NatsSink::connect(&nats).await?),
        None => Arc::new(LogSink),
    };
    let queue =
        spawn_sink_worker(sink, config.sink_queue_depth, config.retry_policy(), shutdown.clone());

    let registry = Arc::new(MemoryRegistry::new(config.windows()));
    Ok(FabricState::new(config, registry, gate, Some(queue), Arc::new(SystemClock), shutdown))
}

/// Serve the fabric on `listener` until the state's shutdown token fires.
///
/// Every open subscription is closed with reason `shutdown` before the
/// listener drains.
pub async fn serve(listener: TcpListener, state: Arc<FabricState>) -> anyhow::Result<()> {
    let sweeper = spawn_expiry_sweeper(Arc::clone(&state));
    let router = build_router(Arc::clone(&state));

    let shutdown = state.shutdown.clone();
    let fabric = Arc::clone(&state.router);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            let closed = fabric.close_all(DisconnectReason::Shutdown);
            tracing::info!(closed, "shutting down");
        })
        .await?;

    let _ = sweeper.await;
    Ok(())
}

/// Run the fabric server until `shutdown` is cancelled.
pub async fn run(config: MuxConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = build_state(config, shutdown).await?;
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("boidmux listening on {addr}");
    serve(listener, state).await
}
