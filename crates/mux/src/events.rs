// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fabric lifecycle events published on the built-in `system/events` topic.

use serde::{Deserialize, Serialize};

/// Modality name of the built-in event topic under the system namespace.
pub const EVENTS_MODALITY: &str = "events";

/// Registry and topic lifecycle changes, as seen by `system/events` subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FabricEvent {
    BoidRegistered { boid: String, kind: String },
    /// A Stale boid heartbeated again.
    BoidActive { boid: String },
    BoidStale { boid: String },
    BoidReaped { boid: String },
    BoidUnregistered { boid: String },
    TopicOpened { topic: String },
    TopicClosed { topic: String },
}

impl FabricEvent {
    /// Return the boid or topic this event concerns.
    pub fn subject(&self) -> &str {
        match self {
            Self::BoidRegistered { boid, .. }
            | Self::BoidActive { boid }
            | Self::BoidStale { boid }
            | Self::BoidReaped { boid }
            | Self::BoidUnregistered { boid } => boid,
            Self::TopicOpened { topic } | Self::TopicClosed { topic } => topic,
        }
    }
}
