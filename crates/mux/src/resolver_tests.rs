// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use super::*;
use crate::registry::memory::{MemoryRegistry, Windows};
use crate::registry::Registration;

async fn resolver_with(boids: &[&str]) -> anyhow::Result<ResourceResolver> {
    let registry = Arc::new(MemoryRegistry::new(Windows {
        stale_after: Duration::from_secs(15),
        reap_after: Duration::from_secs(60),
    }));
    for boid in boids {
        let reg = Registration { name: (*boid).to_owned(), ..Default::default() };
        registry.register(reg, &Principal::peer(*boid)).await?;
    }
    Ok(ResourceResolver::new(registry, Duration::from_secs(1)))
}

fn loc(s: &str) -> Locator {
    Locator::new(s)
}

#[tokio::test]
async fn registered_resource_round_trips() -> anyhow::Result<()> {
    let resolver = resolver_with(&["boida"]).await?;
    let owner = Principal::peer("boida");
    resolver.register("boida", "foo.png", loc("s3://bucket/a/foo.png"), &owner).await?;

    assert_eq!(resolver.resolve("boida/foo.png").await?, loc("s3://bucket/a/foo.png"));
    assert_eq!(resolver.resolve("/boida/foo.png").await?, loc("s3://bucket/a/foo.png"));
    assert_eq!(resolver.resolve("boida/bar.png").await, Err(MuxError::NotFound));
    Ok(())
}

#[tokio::test]
async fn system_registration_outside_trusted_identity_is_reserved() -> anyhow::Result<()> {
    let resolver = resolver_with(&["boida"]).await?;
    let result =
        resolver.register("system", "foo.png", loc("s3://x"), &Principal::peer("boida")).await;
    assert_eq!(result, Err(MuxError::Reserved));
    let result = resolver.register("api", "foo.png", loc("s3://x"), &Principal::System).await;
    assert_eq!(result, Err(MuxError::Reserved));

    resolver.register("system", "foo.png", loc("s3://sys/foo.png"), &Principal::System).await?;
    assert_eq!(resolver.resolve("system/foo.png").await?, loc("s3://sys/foo.png"));
    Ok(())
}

#[tokio::test]
async fn builtin_system_resources_resolve() -> anyhow::Result<()> {
    let resolver = resolver_with(&[]).await?;
    let health = resolver.resolve("system/health").await?;
    assert_eq!(health.builtin(), Some("health"));
    assert_eq!(resolver.resolve("system/nothing-here").await, Err(MuxError::Reserved));
    assert_eq!(resolver.resolve("api/health").await, Err(MuxError::Reserved));
    Ok(())
}

#[tokio::test]
async fn conflicting_locator_is_rejected_identical_is_idempotent() -> anyhow::Result<()> {
    let resolver = resolver_with(&["boida"]).await?;
    let owner = Principal::peer("boida");
    resolver.register("boida", "foo.png", loc("s3://one"), &owner).await?;
    resolver.register("boida", "foo.png", loc("s3://one"), &owner).await?;
    let clash = resolver.register("boida", "foo.png", loc("s3://two"), &owner).await;
    assert_eq!(clash, Err(MuxError::Conflict));
    assert_eq!(resolver.resolve("boida/foo.png").await?, loc("s3://one"));
    assert_eq!(resolver.purge_boid("boida"), 1);
    Ok(())
}

#[tokio::test]
async fn only_owner_registers_and_boid_must_exist() -> anyhow::Result<()> {
    let resolver = resolver_with(&["boida"]).await?;
    let stranger = resolver.register("boida", "x", loc("s3://x"), &Principal::peer("b")).await;
    assert_eq!(stranger, Err(MuxError::Unauthorized));
    let ghost = resolver.register("ghost", "x", loc("s3://x"), &Principal::peer("ghost")).await;
    assert_eq!(ghost, Err(MuxError::NotFound));
    assert_eq!(resolver.resolve("ghost/x").await, Err(MuxError::NotFound));
    Ok(())
}

#[tokio::test]
async fn globs_prefer_exact_then_longest_prefix() -> anyhow::Result<()> {
    let resolver = resolver_with(&["cam"]).await?;
    let owner = Principal::peer("cam");
    resolver.register("cam", "**", loc("s3://catch-all"), &owner).await?;
    resolver.register("cam", "frames/*.jpg", loc("s3://frames"), &owner).await?;
    resolver.register("cam", "frames/latest.jpg", loc("s3://latest"), &owner).await?;

    assert_eq!(resolver.resolve("cam/frames/latest.jpg").await?, loc("s3://latest"));
    assert_eq!(resolver.resolve("cam/frames/0001.jpg").await?, loc("s3://frames"));
    assert_eq!(resolver.resolve("cam/frames/deep/0001.jpg").await?, loc("s3://catch-all"));
    assert_eq!(resolver.resolve("cam/readme.txt").await?, loc("s3://catch-all"));
    Ok(())
}

#[tokio::test]
async fn malformed_globs_are_bad_requests() -> anyhow::Result<()> {
    let resolver = resolver_with(&["boida"]).await?;
    let owner = Principal::peer("boida");
    for glob in ["", "/abs", "a//b", "../escape", "a/./b"] {
        let result = resolver.register("boida", glob, loc("s3://x"), &owner).await;
        assert_eq!(result, Err(MuxError::BadRequest), "glob {glob:?}");
    }
    let empty = resolver.register("boida", "ok", loc(""), &owner).await;
    assert_eq!(empty, Err(MuxError::BadRequest));
    Ok(())
}

#[tokio::test]
async fn purge_removes_boid_resources_only() -> anyhow::Result<()> {
    let resolver = resolver_with(&["boida"]).await?;
    resolver.register("boida", "a", loc("s3://a"), &Principal::peer("boida")).await?;
    assert_eq!(resolver.purge_boid("boida"), 1);
    assert_eq!(resolver.resolve("boida/a").await, Err(MuxError::NotFound));
    assert_eq!(resolver.purge_boid("system"), 0);
    assert_eq!(resolver.resolve("system/health").await?, loc("builtin:health"));
    Ok(())
}

#[tokio::test]
async fn mappings_of_an_earlier_registration_are_ignored() -> anyhow::Result<()> {
    let registry = Arc::new(MemoryRegistry::new(Windows {
        stale_after: Duration::from_secs(15),
        reap_after: Duration::from_secs(60),
    }));
    let first = Principal::peer("first");
    let reg = Registration { name: "boida".to_owned(), ..Default::default() };
    registry.register(reg.clone(), &first).await?;
    let resolver = ResourceResolver::new(registry.clone(), Duration::from_secs(1));
    resolver.register("boida", "map.png", loc("s3://first/map.png"), &first).await?;

    // The name changes hands without a purge in between, as when a slow
    // registration lands after the departure teardown.
    registry.unregister("boida", &first).await?;
    registry.release("boida").await?;
    let second = Principal::peer("second");
    registry.register(reg, &second).await?;

    assert_eq!(resolver.resolve("boida/map.png").await, Err(MuxError::NotFound));
    resolver.register("boida", "map.png", loc("s3://second/map.png"), &second).await?;
    assert_eq!(resolver.resolve("boida/map.png").await?, loc("s3://second/map.png"));
    assert_eq!(resolver.purge_boid("boida"), 1);
    Ok(())
}

#[test]
fn glob_translation() -> anyhow::Result<()> {
    let re = compile_glob("img/*.png")?;
    assert!(re.is_match("img/a.png"));
    assert!(!re.is_match("img/sub/a.png"));
    assert!(!re.is_match("img/a.pngx"));

    let re = compile_glob("v?.(1)")?;
    assert!(re.is_match("v1.(1)"));
    assert!(!re.is_match("v12.(1)"));
    Ok(())
}

proptest! {
    #[test]
    fn literal_globs_match_only_themselves(s in "[a-z0-9._-]{1,16}", t in "[a-z0-9._-]{1,16}") {
        let re = compile_glob(&s).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(re.is_match(&s));
        prop_assert_eq!(re.is_match(&t), s == t);
    }
}
