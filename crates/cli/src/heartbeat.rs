// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boid liveness loop.
//!
//! Registers on startup (retrying while the router is unreachable), heartbeats
//! on an interval, re-registers if the router reaped the boid, and
//! unregisters on shutdown.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use boidmux::error::MuxError;
use boidmux::registry::Registration;

use crate::client::FabricClient;
use crate::error::api_code;

/// Heartbeat loop settings.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub registration: Registration,
    pub interval: Duration,
    /// Registration attempts before giving up.
    pub register_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub unregister_on_exit: bool,
}

impl HeartbeatConfig {
    pub fn new(registration: Registration, interval: Duration) -> Self {
        Self {
            registration,
            interval,
            register_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            unregister_on_exit: true,
        }
    }
}

/// Summary of a finished heartbeat loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub beats: u64,
    pub reregistrations: u64,
    pub unregistered: bool,
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
pub fn backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}

/// Register, treating an existing record we own as success.
async fn register(client: &FabricClient, config: &HeartbeatConfig) -> anyhow::Result<()> {
    match client.register(&config.registration).await {
        Ok(record) => {
            info!(boid = %record.name, version = record.version, "registered");
            Ok(())
        }
        Err(e) if api_code(&e) == Some(MuxError::NameConflict) => {
            // Ours already (a restart within the stale window)? A heartbeat tells.
            client.heartbeat(&config.registration.name).await.map(|_| ()).map_err(|_| e)
        }
        Err(e) => Err(e),
    }
}

async fn register_with_retry(
    client: &FabricClient,
    config: &HeartbeatConfig,
    shutdown: &CancellationToken,
) -> anyhow::Result<bool> {
    let mut attempt = 0;
    loop {
        match register(client, config).await {
            Ok(()) => return Ok(true),
            Err(e) => {
                let code = api_code(&e);
                let transient = code.is_none() || code.is_some_and(|c| c.is_retryable());
                attempt += 1;
                if !transient || attempt >= config.register_attempts {
                    return Err(e);
                }
                let delay = backoff(attempt - 1, config.base_backoff, config.max_backoff);
                debug!(attempt, err = %e, "registration failed, retrying in {delay:?}");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return Ok(false),
                }
            }
        }
    }
}

/// Run the heartbeat loop until `shutdown` fires.
pub async fn run(
    client: &FabricClient,
    config: &HeartbeatConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<HeartbeatReport> {
    let mut report = HeartbeatReport::default();
    let name = config.registration.name.clone();

    if !register_with_retry(client, config, &shutdown).await? {
        return Ok(report);
    }

    let mut failures = 0u32;
    loop {
        let delay = if failures == 0 {
            config.interval
        } else {
            backoff(failures - 1, config.base_backoff, config.interval.max(config.base_backoff))
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }

        match client.heartbeat(&name).await {
            Ok(ack) => {
                failures = 0;
                report.beats += 1;
                if ack.revived {
                    info!(boid = %name, "active again");
                }
            }
            Err(e) if api_code(&e) == Some(MuxError::NotFound) => {
                warn!(boid = %name, "reaped by the router, registering again");
                if register_with_retry(client, config, &shutdown).await? {
                    report.reregistrations += 1;
                }
            }
            Err(e) if matches!(api_code(&e), Some(MuxError::Unauthorized)) => {
                // Someone else owns the name now.
                return Err(e);
            }
            Err(e) => {
                failures += 1;
                debug!(boid = %name, failures, err = %e, "heartbeat failed");
            }
        }
    }

    if config.unregister_on_exit {
        match client.unregister(&name).await {
            Ok(_) => {
                info!(boid = %name, "unregistered");
                report.unregistered = true;
            }
            Err(e) => warn!(boid = %name, err = %e, "unregister failed"),
        }
    }
    Ok(report)
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
