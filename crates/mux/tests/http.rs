// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the fabric HTTP API.
//!
//! Uses `axum_test::TestServer`: no real TCP needed.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use boidmux::clock::ManualClock;
use boidmux::config::{LogFormat, MuxConfig};
use boidmux::events::FabricEvent;
use boidmux::identity::{OpenGate, Principal};
use boidmux::registry::memory::MemoryRegistry;
use boidmux::router::{DisconnectReason, TopicKey};
use boidmux::state::FabricState;
use boidmux::transport::build_router;

const SYSTEM_TOKEN: &str = "sys-secret";

fn test_config() -> MuxConfig {
    MuxConfig {
        host: "127.0.0.1".into(),
        port: 0,
        hostname: Some("fabric.test".into()),
        system_token: Some(SYSTEM_TOKEN.into()),
        identity_file: None,
        stale_ms: 15_000,
        reap_ms: 60_000,
        expiry_ms: 1_000,
        queue_depth: 64,
        require_subscriber: false,
        sink_queue_depth: 64,
        sink_retry_attempts: 1,
        sink_backoff_ms: 1,
        registry_timeout_ms: 1_000,
        nats_url: None,
        nats_token: None,
        nats_prefix: "boid".into(),
        log_format: LogFormat::Text,
    }
}

fn test_state() -> Arc<FabricState> {
    let config = test_config();
    let clock = Arc::new(ManualClock::new(1_000));
    let registry = Arc::new(MemoryRegistry::with_clock(config.windows(), clock.clone()));
    let gate = Arc::new(OpenGate::new(config.system_token.clone()));
    FabricState::new(config, registry, gate, None, clock, CancellationToken::new())
}

fn test_server(state: Arc<FabricState>) -> anyhow::Result<TestServer> {
    Ok(TestServer::new(build_router(state))?)
}

async fn register(server: &TestServer, name: &str, body: serde_json::Value) {
    let resp = server.post("/api/v1/boids").authorization_bearer(name).json(&body).await;
    resp.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn health_needs_no_credential() -> anyhow::Result<()> {
    let server = test_server(test_state())?;
    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["hostname"], "fabric.test");
    assert_eq!(body["boid_count"], 0);
    Ok(())
}

#[tokio::test]
async fn api_rejects_missing_credential() -> anyhow::Result<()> {
    let server = test_server(test_state())?;
    let resp = server.get("/api/v1/boids").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn register_lookup_and_name_taken() -> anyhow::Result<()> {
    let server = test_server(test_state())?;
    register(&server, "rover1", serde_json::json!({"name": "rover1", "kind": "rover"})).await;

    let resp = server.get("/api/v1/boids/rover1").authorization_bearer("viewer").await;
    resp.assert_status_ok();
    let record: serde_json::Value = resp.json();
    assert_eq!(record["kind"], "rover");
    assert_eq!(record["state"], "active");
    assert_eq!(record["owner"], serde_json::json!({"kind": "peer", "name": "rover1"}));

    let again = server
        .post("/api/v1/boids")
        .authorization_bearer("impostor")
        .json(&serde_json::json!({"name": "rover1"}))
        .await;
    again.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = again.json();
    assert_eq!(body["error"]["code"], "NAME_CONFLICT");
    Ok(())
}

#[tokio::test]
async fn reserved_names_are_invalid() -> anyhow::Result<()> {
    let server = test_server(test_state())?;
    for name in ["system", "api", "Bad Name"] {
        let resp = server
            .post("/api/v1/boids")
            .authorization_bearer(SYSTEM_TOKEN)
            .json(&serde_json::json!({"name": name}))
            .await;
        resp.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = resp.json();
        assert_eq!(body["error"]["code"], "INVALID_NAME");
    }
    Ok(())
}

#[tokio::test]
async fn only_owner_heartbeats_and_updates() -> anyhow::Result<()> {
    let server = test_server(test_state())?;
    register(&server, "arm2", serde_json::json!({"name": "arm2", "kind": "arm"})).await;

    let denied = server.post("/api/v1/boids/arm2/heartbeat").authorization_bearer("x").await;
    denied.assert_status(StatusCode::UNAUTHORIZED);

    let ok = server.post("/api/v1/boids/arm2/heartbeat").authorization_bearer("arm2").await;
    ok.assert_status_ok();
    let ack: serde_json::Value = ok.json();
    assert_eq!(ack["revived"], false);

    let updated = server
        .patch("/api/v1/boids/arm2")
        .authorization_bearer("arm2")
        .json(&serde_json::json!({"modalities": ["proprioception"]}))
        .await;
    updated.assert_status_ok();
    let ack: serde_json::Value = updated.json();
    assert_eq!(ack["record"]["modalities"], serde_json::json!(["proprioception"]));
    Ok(())
}

#[tokio::test]
async fn list_pages_and_filters() -> anyhow::Result<()> {
    let server = test_server(test_state())?;
    for name in ["a1", "a2", "a3"] {
        register(&server, name, serde_json::json!({"name": name, "kind": "rover"})).await;
    }
    register(&server, "c1", serde_json::json!({"name": "c1", "kind": "camera"})).await;

    let page = server
        .get("/api/v1/boids")
        .add_query_param("kind", "rover")
        .add_query_param("limit", 2)
        .authorization_bearer("ops")
        .await;
    page.assert_status_ok();
    let body: serde_json::Value = page.json();
    let names: Vec<&str> =
        body["records"].as_array().into_iter().flatten().filter_map(|r| r["name"].as_str()).collect();
    assert_eq!(names, vec!["a1", "a2"]);
    assert_eq!(body["next"], "a2");

    let rest = server
        .get("/api/v1/boids")
        .add_query_param("kind", "rover")
        .add_query_param("after", "a2")
        .authorization_bearer("ops")
        .await;
    let body: serde_json::Value = rest.json();
    assert_eq!(body["records"][0]["name"], "a3");

    let bad = server.get("/api/v1/boids?state=sleepy").authorization_bearer("ops").await;
    bad.assert_status(StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn unregister_closes_topics_and_announces() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state))?;
    register(&server, "rover1", serde_json::json!({"name": "rover1"})).await;

    let key = TopicKey::new("rover1", "vision");
    let mut sub = state.router.subscribe(&key, &Principal::peer("viewer")).await?;
    let mut events = state.router.subscribe(&TopicKey::events(), &Principal::peer("ops")).await?;

    let resp = server.delete("/api/v1/boids/rover1").authorization_bearer("rover1").await;
    resp.assert_status_ok();

    assert_eq!(sub.recv().await.err(), Some(DisconnectReason::Unregistered));
    let mut seen = Vec::new();
    while let Ok(Ok(message)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        seen.push(serde_json::from_slice::<FabricEvent>(&message.payload)?);
    }
    assert!(seen.contains(&FabricEvent::TopicClosed { topic: "rover1/vision".into() }));
    assert!(seen.contains(&FabricEvent::BoidUnregistered { boid: "rover1".into() }));

    let gone = server.get("/api/v1/boids/rover1").authorization_bearer("ops").await;
    gone.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn one_shot_publish_respects_ownership() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state))?;
    register(&server, "rover1", serde_json::json!({"name": "rover1"})).await;

    let mut sub = state
        .router
        .subscribe(&TopicKey::new("rover1", "control"), &Principal::peer("viewer"))
        .await?;

    let resp = server
        .post("/api/v1/modalities/rover1/control/publish")
        .authorization_bearer("rover1")
        .bytes(bytes::Bytes::from_static(b"forward"))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["seq"], 1);
    assert_eq!(body["topic"], "rover1/control");

    let message = sub.recv().await.map_err(|r| anyhow::anyhow!("closed: {r}"))?;
    assert_eq!(message.payload.as_ref(), b"forward");

    let denied = server
        .post("/api/v1/modalities/rover1/control/publish")
        .authorization_bearer("mallory")
        .bytes(bytes::Bytes::from_static(b"spoof"))
        .await;
    denied.assert_status(StatusCode::UNAUTHORIZED);

    let system = server
        .post("/api/v1/modalities/system/announcements/publish")
        .authorization_bearer("rover1")
        .bytes(bytes::Bytes::from_static(b"x"))
        .await;
    system.assert_status(StatusCode::UNAUTHORIZED);

    let trusted = server
        .post("/api/v1/modalities/system/announcements/publish")
        .authorization_bearer(SYSTEM_TOKEN)
        .bytes(bytes::Bytes::from_static(b"x"))
        .await;
    trusted.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn topics_lists_live_topics() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state))?;
    register(&server, "rover1", serde_json::json!({"name": "rover1"})).await;
    let _sub = state
        .router
        .subscribe(&TopicKey::new("rover1", "vision"), &Principal::peer("viewer"))
        .await?;

    let resp = server.get("/api/v1/topics").authorization_bearer("ops").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body[0]["topic"], "rover1/vision");
    assert_eq!(body[0]["subscribers"], 1);
    Ok(())
}

#[tokio::test]
async fn resources_register_and_resolve() -> anyhow::Result<()> {
    let server = test_server(test_state())?;
    register(&server, "boida", serde_json::json!({"name": "boida"})).await;

    let created = server
        .post("/api/v1/resources")
        .authorization_bearer("boida")
        .json(&serde_json::json!({
            "boid": "boida",
            "glob": "foo.png",
            "locator": "https://cdn.example/boida/foo.png",
        }))
        .await;
    created.assert_status(StatusCode::CREATED);

    let resolved = server.get("/api/v1/resolve/boida/foo.png").authorization_bearer("ops").await;
    resolved.assert_status_ok();
    let body: serde_json::Value = resolved.json();
    assert_eq!(body["locator"], "https://cdn.example/boida/foo.png");

    let public = server.get("/boida/foo.png").authorization_bearer("ops").await;
    public.assert_status(StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(public.header("location"), "https://cdn.example/boida/foo.png");

    let clash = server
        .post("/api/v1/resources")
        .authorization_bearer("boida")
        .json(&serde_json::json!({"boid": "boida", "glob": "foo.png", "locator": "s3://other"}))
        .await;
    clash.assert_status(StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn system_resources_are_reserved() -> anyhow::Result<()> {
    let server = test_server(test_state())?;

    let denied = server
        .post("/api/v1/resources")
        .authorization_bearer("boida")
        .json(&serde_json::json!({"boid": "system", "glob": "foo.png", "locator": "s3://x"}))
        .await;
    denied.assert_status(StatusCode::FORBIDDEN);
    let body: serde_json::Value = denied.json();
    assert_eq!(body["error"]["code"], "RESERVED");

    let health = server.get("/system/health").authorization_bearer("ops").await;
    health.assert_status_ok();
    let body: serde_json::Value = health.json();
    assert_eq!(body["status"], "running");

    let missing = server.get("/system/secrets").authorization_bearer("ops").await;
    missing.assert_status(StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn private_modality_grant_flow() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state))?;
    register(
        &server,
        "rover1",
        serde_json::json!({"name": "rover1", "metadata": {"private_modalities": ["vision"]}}),
    )
    .await;

    let key = TopicKey::new("rover1", "vision");
    let viewer = Principal::peer("viewer");
    assert!(state.router.subscribe(&key, &viewer).await.is_err());

    let granted = server
        .post("/api/v1/boids/rover1/grants")
        .authorization_bearer("rover1")
        .json(&serde_json::json!({"collaborator": "viewer"}))
        .await;
    granted.assert_status_ok();
    let mut live = state.router.subscribe(&key, &viewer).await?;

    let revoked =
        server.delete("/api/v1/boids/rover1/grants/viewer").authorization_bearer("rover1").await;
    revoked.assert_status_ok();
    assert!(state.router.subscribe(&key, &viewer).await.is_err());

    // The subscription opened under the grant does not outlive it.
    let sent = server
        .post("/api/v1/modalities/rover1/vision/publish")
        .authorization_bearer("rover1")
        .bytes(bytes::Bytes::from_static(b"secret"))
        .await;
    sent.assert_status_ok();
    assert_eq!(live.recv().await.err(), Some(DisconnectReason::Revoked));
    Ok(())
}

#[tokio::test]
async fn unregistered_name_is_free_once_torn_down() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state))?;
    register(&server, "rover1", serde_json::json!({"name": "rover1"})).await;
    let resp = server.delete("/api/v1/boids/rover1").authorization_bearer("rover1").await;
    resp.assert_status_ok();

    let again = server
        .post("/api/v1/boids")
        .authorization_bearer("newcomer")
        .json(&serde_json::json!({"name": "rover1"}))
        .await;
    again.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = again.json();
    assert_eq!(body["owner"]["name"], "newcomer");
    Ok(())
}

#[tokio::test]
async fn system_boids_serves_the_whole_roster() -> anyhow::Result<()> {
    let server = test_server(test_state())?;
    for i in 0..70 {
        let name = format!("boid{i:02}");
        register(&server, &name, serde_json::json!({"name": name})).await;
    }

    let resp = server.get("/system/boids").authorization_bearer("ops").await;
    resp.assert_status_ok();
    let body: Vec<serde_json::Value> = resp.json();
    assert_eq!(body.len(), 70);
    assert_eq!(body[0]["name"], "boid00");
    assert_eq!(body[69]["name"], "boid69");
    Ok(())
}

#[tokio::test]
async fn registration_is_announced_on_system_events() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state))?;
    let mut events = state.router.subscribe(&TopicKey::events(), &Principal::peer("ops")).await?;

    register(&server, "rover1", serde_json::json!({"name": "rover1", "kind": "rover"})).await;

    let message = events.recv().await.map_err(|r| anyhow::anyhow!("closed: {r}"))?;
    let event: FabricEvent = serde_json::from_slice(&message.payload)?;
    assert_eq!(event, FabricEvent::BoidRegistered { boid: "rover1".into(), kind: "rover".into() });
    assert_eq!(message.publisher, Principal::System);
    Ok(())
}
