// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::episode::nats::NatsConfig;
use crate::episode::worker::RetryPolicy;
use crate::registry::memory::Windows;
use crate::router::RouterPolicy;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the boidmux fabric server.
#[derive(Debug, Clone, clap::Args)]
pub struct MuxConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "BOID_MUX_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9850, env = "BOID_MUX_PORT")]
    pub port: u16,

    /// Name this router reports in health responses.
    #[arg(long, env = "BOID_MUX_HOSTNAME")]
    pub hostname: Option<String>,

    /// Credential that authenticates as the router's own system identity.
    #[arg(long, env = "BOID_MUX_SYSTEM_TOKEN")]
    pub system_token: Option<String>,

    /// JSON token table (`{"tokens":[{"token":..,"principal":..}]}`).
    /// Without it, the bearer value is taken as the principal name.
    #[arg(long, env = "BOID_MUX_IDENTITY_FILE")]
    pub identity_file: Option<PathBuf>,

    /// Heartbeat age (ms) after which a boid is Stale.
    #[arg(long, default_value_t = 15_000, env = "BOID_MUX_STALE_MS")]
    pub stale_ms: u64,

    /// Heartbeat age (ms) after which a boid is Reaped and removed.
    #[arg(long, default_value_t = 60_000, env = "BOID_MUX_REAP_MS")]
    pub reap_ms: u64,

    /// Expiry sweep interval in milliseconds.
    #[arg(long, default_value_t = 1_000, env = "BOID_MUX_EXPIRY_MS")]
    pub expiry_ms: u64,

    /// Per-subscriber outbound queue depth.
    #[arg(long, default_value_t = 256, env = "BOID_MUX_QUEUE_DEPTH")]
    pub queue_depth: usize,

    /// Reject publishes to topics that have no subscribers.
    #[arg(long, env = "BOID_MUX_REQUIRE_SUBSCRIBER")]
    pub require_subscriber: bool,

    /// Episode sink hand-off queue depth.
    #[arg(long, default_value_t = 4096, env = "BOID_MUX_SINK_QUEUE_DEPTH")]
    pub sink_queue_depth: usize,

    /// Attempts per episode record before it is dropped.
    #[arg(long, default_value_t = 5, env = "BOID_MUX_SINK_RETRY_ATTEMPTS")]
    pub sink_retry_attempts: u32,

    /// Base backoff between sink retries in milliseconds.
    #[arg(long, default_value_t = 100, env = "BOID_MUX_SINK_BACKOFF_MS")]
    pub sink_backoff_ms: u64,

    /// Deadline for registry calls in milliseconds.
    #[arg(long, default_value_t = 2_000, env = "BOID_MUX_REGISTRY_TIMEOUT_MS")]
    pub registry_timeout_ms: u64,

    /// NATS server URL for the episode sink. Episodes are only logged when unset.
    #[arg(long, env = "BOID_MUX_NATS_URL")]
    pub nats_url: Option<String>,

    /// NATS auth token.
    #[arg(long, env = "BOID_MUX_NATS_TOKEN")]
    pub nats_token: Option<String>,

    /// NATS subject prefix.
    #[arg(long, default_value = "boid", env = "BOID_MUX_NATS_PREFIX")]
    pub nats_prefix: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "BOID_MUX_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl MuxConfig {
    pub fn stale_window(&self) -> Duration {
        Duration::from_millis(self.stale_ms)
    }

    pub fn reap_window(&self) -> Duration {
        Duration::from_millis(self.reap_ms)
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms)
    }

    pub fn windows(&self) -> Windows {
        Windows { stale_after: self.stale_window(), reap_after: self.reap_window() }
    }

    pub fn router_policy(&self) -> RouterPolicy {
        RouterPolicy {
            queue_depth: self.queue_depth,
            require_subscriber: self.require_subscriber,
            registry_timeout: self.registry_timeout(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.sink_retry_attempts,
            base_backoff: Duration::from_millis(self.sink_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn nats(&self) -> Option<NatsConfig> {
        self.nats_url.as_ref().map(|url| NatsConfig {
            url: url.clone(),
            token: self.nats_token.clone(),
            prefix: self.nats_prefix.clone(),
        })
    }

    /// Name reported by `/api/v1/health`.
    pub fn hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }

    /// Reject configurations the fabric cannot honor.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.stale_ms > 0, "stale window must be positive");
        anyhow::ensure!(
            self.reap_ms > self.stale_ms,
            "reap window ({}ms) must exceed stale window ({}ms)",
            self.reap_ms,
            self.stale_ms
        );
        anyhow::ensure!(self.expiry_ms > 0, "expiry interval must be positive");
        anyhow::ensure!(self.queue_depth > 0, "subscriber queue depth must be positive");
        anyhow::ensure!(self.sink_queue_depth > 0, "sink queue depth must be positive");
        anyhow::ensure!(self.sink_retry_attempts > 0, "sink retry attempts must be positive");
        anyhow::ensure!(self.registry_timeout_ms > 0, "registry timeout must be positive");
        if let Some(ref token) = self.system_token {
            anyhow::ensure!(!token.is_empty(), "system token must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
