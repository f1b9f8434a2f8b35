// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background expiry sweep: ages boids Active -> Stale -> Reaped.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::events::FabricEvent;
use crate::registry::ExpireReport;
use crate::router::DisconnectReason;
use crate::state::FabricState;

/// Run one sweep and apply its consequences to the router and resolver.
pub async fn sweep(state: &FabricState) -> Option<ExpireReport> {
    let report = match state.registry_call(state.registry.expire()).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(err = %e, "expiry sweep failed");
            return None;
        }
    };

    for boid in &report.stale {
        state.router.emit(&FabricEvent::BoidStale { boid: boid.clone() });
    }
    for boid in &report.reaped {
        state.boid_departed(boid, DisconnectReason::BoidReaped).await;
    }
    Some(report)
}

/// Spawn the periodic sweeper. Exits on shutdown.
pub fn spawn_expiry_sweeper(state: Arc<FabricState>) -> JoinHandle<()> {
    let interval = state.config.expiry_interval();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            sweep(&state).await;
        }
        tracing::debug!("expiry sweeper stopped");
    })
}
