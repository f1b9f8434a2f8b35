// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests against a live fabric server over HTTP and WebSocket.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use boid::client::ListQuery;
use boid::error::{api_code, ApiError};
use boid::heartbeat::{self, HeartbeatConfig};
use boid::stream::{Delivery, Publisher, Subscriber};
use boidmux::error::MuxError;
use boidmux::registry::{Liveness, Registration};
use boidmux::router::DisconnectReason;
use boid_specs::{FabricProcess, SYSTEM_TOKEN};

const TIMEOUT: Duration = Duration::from_secs(5);

fn rover(name: &str, modalities: &[&str]) -> Registration {
    Registration {
        name: name.into(),
        kind: "rover".into(),
        modalities: modalities.iter().map(|m| m.to_string()).collect(),
        ..Default::default()
    }
}

async fn next(sub: &mut Subscriber) -> anyhow::Result<Delivery> {
    tokio::time::timeout(TIMEOUT, sub.next()).await?
}

#[tokio::test]
async fn health_reports_running() -> anyhow::Result<()> {
    let fabric = FabricProcess::start().await?;
    let health = fabric.anonymous().health().await?;
    assert_eq!(health.status, "running");
    assert_eq!(health.hostname, "fabric.spec");
    assert_eq!(health.boid_count, 0);
    Ok(())
}

#[tokio::test]
async fn publisher_acks_and_subscribers_see_order() -> anyhow::Result<()> {
    let fabric = FabricProcess::start().await?;
    let owner = fabric.client("rover1");
    owner.register(&rover("rover1", &["control"])).await?;

    let mut first = Subscriber::connect(&fabric.client("ops"), "rover1", "control").await?;
    let mut second = Subscriber::connect(&fabric.client("arm2"), "rover1", "control").await?;
    assert_eq!(first.topic(), "rover1/control");

    let mut publisher = Publisher::connect(&owner, "rover1", "control").await?;
    for i in 1..=20u64 {
        let seq = publisher.send(Bytes::from(format!("cmd-{i}"))).await?;
        assert_eq!(seq, i);
    }

    for sub in [&mut first, &mut second] {
        for i in 1..=20u64 {
            match next(sub).await? {
                Delivery::Message { seq, publisher: from, payload, .. } => {
                    assert_eq!(seq, i);
                    assert_eq!(from, "rover1");
                    assert_eq!(payload, Bytes::from(format!("cmd-{i}")));
                }
                other => anyhow::bail!("expected message {i}, got {other:?}"),
            }
        }
    }
    publisher.close().await;
    Ok(())
}

#[tokio::test]
async fn silent_boid_is_reaped_and_subscribers_told() -> anyhow::Result<()> {
    let fabric = FabricProcess::build()
        .windows(Duration::from_millis(200), Duration::from_millis(600), Duration::from_millis(50))
        .spawn()
        .await?;
    fabric.wait_healthy(TIMEOUT).await?;

    let owner = fabric.client("rover1");
    owner.register(&rover("rover1", &["control"])).await?;
    let mut sub = Subscriber::connect(&fabric.client("ops"), "rover1", "control").await?;
    let mut publisher = Publisher::connect(&owner, "rover1", "control").await?;
    publisher.send(Bytes::from_static(b"m1")).await?;
    publisher.send(Bytes::from_static(b"m2")).await?;

    for expected in [&b"m1"[..], &b"m2"[..]] {
        match next(&mut sub).await? {
            Delivery::Message { payload, .. } => assert_eq!(payload, expected),
            other => anyhow::bail!("expected message, got {other:?}"),
        }
    }
    assert_eq!(next(&mut sub).await?, Delivery::Closed(DisconnectReason::BoidReaped));

    let lookup = owner.lookup("rover1").await;
    assert_eq!(lookup.as_ref().err().and_then(api_code), Some(MuxError::NotFound));

    // The name is free again once teardown has released it.
    let claimant = fabric.client("rover2");
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    let record = loop {
        match claimant.register(&rover("rover1", &[])).await {
            Ok(record) => break record,
            Err(e) if api_code(&e) == Some(MuxError::Retryable) => {
                anyhow::ensure!(tokio::time::Instant::now() < deadline, "name never released");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => return Err(e),
        }
    };
    assert_eq!(record.state, Liveness::Active);
    Ok(())
}

#[tokio::test]
async fn refusals_carry_codes() -> anyhow::Result<()> {
    let fabric = FabricProcess::start().await?;
    fabric.client("rover1").register(&rover("rover1", &["control"])).await?;

    let err = fabric.anonymous().lookup("rover1").await.err();
    assert_eq!(err.as_ref().and_then(api_code), Some(MuxError::Unauthorized));

    let err = fabric.client("ops").lookup("ghost").await.err();
    assert_eq!(err.as_ref().and_then(api_code), Some(MuxError::NotFound));

    let err = fabric.client("rover2").register(&rover("rover1", &[])).await.err();
    assert_eq!(err.as_ref().and_then(api_code), Some(MuxError::NameConflict));

    // Only the owner publishes.
    let err = Publisher::connect(&fabric.client("ops"), "rover1", "control").await.err();
    let refused = err.as_ref().and_then(|e| e.downcast_ref::<ApiError>());
    assert_eq!(refused.map(|e| (e.status, e.code)), Some((401, Some(MuxError::Unauthorized))));

    let err = Subscriber::connect(&fabric.anonymous(), "rover1", "control").await.err();
    assert_eq!(err.as_ref().and_then(api_code), Some(MuxError::Unauthorized));

    let err = fabric.client("ops").register(&rover("system", &[])).await.err();
    assert_eq!(err.as_ref().and_then(api_code), Some(MuxError::InvalidName));
    Ok(())
}

#[tokio::test]
async fn heartbeat_loop_keeps_boid_alive_and_unregisters() -> anyhow::Result<()> {
    let fabric = FabricProcess::build()
        .windows(Duration::from_millis(300), Duration::from_millis(900), Duration::from_millis(50))
        .spawn()
        .await?;
    fabric.wait_healthy(TIMEOUT).await?;

    let client = fabric.client("rover1");
    let config = HeartbeatConfig::new(rover("rover1", &["vision"]), Duration::from_millis(50));
    let shutdown = CancellationToken::new();
    let task = {
        let client = client.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { heartbeat::run(&client, &config, shutdown).await })
    };

    // Well past the reap window; the loop keeps it Active.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let record = fabric.client("ops").lookup("rover1").await?;
    assert_eq!(record.state, Liveness::Active);

    shutdown.cancel();
    let report = tokio::time::timeout(TIMEOUT, task).await???;
    assert!(report.beats > 0);
    assert!(report.unregistered);

    let err = fabric.client("ops").lookup("rover1").await.err();
    assert_eq!(err.as_ref().and_then(api_code), Some(MuxError::NotFound));
    Ok(())
}

#[tokio::test]
async fn resources_resolve_under_boid_names() -> anyhow::Result<()> {
    let fabric = FabricProcess::start().await?;
    let owner = fabric.client("rover1");
    owner.register(&rover("rover1", &[])).await?;

    owner.register_resource("rover1", "maps/*", "s3://maps/rover1/").await?;
    let resolved = fabric.client("ops").resolve("rover1/maps/site-a").await?;
    assert_eq!(resolved.locator.as_str(), "s3://maps/rover1/");

    let health = fabric.client("ops").resolve("system/health").await?;
    assert_eq!(health.locator.as_str(), "builtin:health");

    let err = fabric.client("ops").resolve("rover1/logs/today").await.err();
    assert_eq!(err.as_ref().and_then(api_code), Some(MuxError::NotFound));

    owner.unregister("rover1").await?;
    let err = fabric.client("ops").resolve("rover1/maps/site-a").await.err();
    assert_eq!(err.as_ref().and_then(api_code), Some(MuxError::NotFound));
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_subscriptions() -> anyhow::Result<()> {
    let fabric = FabricProcess::start().await?;
    fabric.client("rover1").register(&rover("rover1", &["control"])).await?;
    let mut sub = Subscriber::connect(&fabric.client("ops"), "rover1", "control").await?;

    let system = fabric.client(SYSTEM_TOKEN);
    assert_eq!(system.lookup("rover1").await?.name, "rover1");

    fabric.stop(TIMEOUT).await?;
    assert_eq!(next(&mut sub).await?, Delivery::Closed(DisconnectReason::Shutdown));
    Ok(())
}

#[tokio::test]
async fn list_all_follows_every_page() -> anyhow::Result<()> {
    let fabric = FabricProcess::start().await?;
    for i in 0..40 {
        let name = format!("boid{i:02}");
        fabric.client(&name).register(&rover(&name, &[])).await?;
    }

    let ops = fabric.client("ops");
    let first = ops.list(&ListQuery { limit: Some(16), ..Default::default() }).await?;
    assert_eq!(first.records.len(), 16);
    assert_eq!(first.next.as_deref(), Some("boid15"));

    let all = ops.list_all(ListQuery { limit: Some(16), ..Default::default() }).await?;
    let names: Vec<String> = all.into_iter().map(|r| r.name).collect();
    let expected: Vec<String> = (0..40).map(|i| format!("boid{i:02}")).collect();
    assert_eq!(names, expected);
    Ok(())
}
