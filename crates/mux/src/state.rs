// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::MuxConfig;
use crate::episode::worker::SinkQueue;
use crate::error::MuxError;
use crate::events::FabricEvent;
use crate::identity::IdentityGate;
use crate::registry::{bounded, Registry};
use crate::resolver::ResourceResolver;
use crate::router::{DisconnectReason, ModalityRouter};

/// Shared fabric state handed to every handler and background task.
pub struct FabricState {
    pub registry: Arc<dyn Registry>,
    pub router: Arc<ModalityRouter>,
    pub resolver: Arc<ResourceResolver>,
    pub gate: Arc<dyn IdentityGate>,
    pub config: MuxConfig,
    pub shutdown: CancellationToken,
}

impl FabricState {
    /// Wire the router and resolver around an existing registry.
    pub fn new(
        config: MuxConfig,
        registry: Arc<dyn Registry>,
        gate: Arc<dyn IdentityGate>,
        sink: Option<SinkQueue>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let router = Arc::new(ModalityRouter::new(
            Arc::clone(&registry),
            sink,
            config.router_policy(),
            clock,
        ));
        let resolver =
            Arc::new(ResourceResolver::new(Arc::clone(&registry), config.registry_timeout()));
        Arc::new(Self { registry, router, resolver, gate, config, shutdown })
    }

    /// Run a registry call under the configured deadline.
    pub async fn registry_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, MuxError>>,
    ) -> Result<T, MuxError> {
        bounded(self.config.registry_timeout(), fut).await
    }

    /// A boid left the registry: close its topics, drop its resources, tell
    /// `system/events`, then free the name. Until the release, registering
    /// the name again is refused, so teardown never touches a successor.
    pub async fn boid_departed(&self, boid: &str, reason: DisconnectReason) {
        let closed = self.router.close_boid(boid, reason);
        let purged = self.resolver.purge_boid(boid);
        tracing::info!(boid, %reason, closed, purged, "boid departed");
        let event = match reason {
            DisconnectReason::BoidReaped => FabricEvent::BoidReaped { boid: boid.to_owned() },
            _ => FabricEvent::BoidUnregistered { boid: boid.to_owned() },
        };
        self.router.emit(&event);

        // A failed release is retried by the next expiry sweep.
        if let Err(e) = self.registry_call(self.registry.release(boid)).await {
            tracing::warn!(boid, err = %e, "name release failed");
        }
    }
}
