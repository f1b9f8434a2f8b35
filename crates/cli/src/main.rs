// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::error;

use boid::client::{FabricClient, ListQuery};
use boid::heartbeat::{self, HeartbeatConfig};
use boid::stream::{Delivery, Publisher, Subscriber};
use boidmux::registry::{BoidRecord, Registration};

#[derive(Parser)]
#[command(name = "boid", version, about = "Client for the boid fabric")]
struct Cli {
    /// Fabric router URL
    #[arg(long, global = true, env = "BOID_URL", default_value = "http://127.0.0.1:9850")]
    url: String,

    /// Bearer token (the boid name, or the system token)
    #[arg(long, global = true, env = "BOID_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct RegistrationArgs {
    name: String,

    #[arg(long, default_value = "")]
    kind: String,

    /// Advertised modality (repeatable)
    #[arg(long = "modality")]
    modalities: Vec<String>,

    /// Metadata entry `key=value`; JSON values are kept as JSON (repeatable)
    #[arg(long = "meta", value_parser = parse_meta)]
    metadata: Vec<(String, serde_json::Value)>,
}

impl RegistrationArgs {
    fn into_registration(self) -> Registration {
        Registration {
            name: self.name,
            kind: self.kind,
            modalities: self.modalities.into_iter().collect::<BTreeSet<_>>(),
            metadata: self.metadata.into_iter().collect(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Register a boid once
    Register(RegistrationArgs),
    /// Register and keep a boid alive until interrupted
    Heartbeat {
        #[command(flatten)]
        registration: RegistrationArgs,

        #[arg(long, default_value = "5000")]
        interval_ms: u64,

        /// Leave the record in place on exit
        #[arg(long)]
        keep: bool,
    },
    /// Show one boid
    Lookup { name: String },
    /// List boids
    List {
        #[arg(long)]
        kind: Option<String>,
        /// active or stale
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        modality: Option<String>,
        #[arg(long)]
        after: Option<String>,
        /// Page size
        #[arg(long)]
        limit: Option<usize>,
        /// Print a single page and the cursor for the next one
        #[arg(long)]
        page: bool,
    },
    /// Remove a boid
    Unregister { name: String },
    /// Let another peer subscribe to a private modality
    Grant { name: String, collaborator: String },
    /// Withdraw a grant
    Revoke { name: String, collaborator: String },
    /// Publish a message, or each stdin line when no message is given
    Publish { boid: String, modality: String, message: Option<String> },
    /// Print messages on a topic until it closes
    Subscribe {
        boid: String,
        modality: String,
        /// Exit after this many messages
        #[arg(long)]
        count: Option<u64>,
    },
    /// Map a resource glob under a boid to a locator
    ResourceRegister { boid: String, glob: String, locator: String },
    /// Resolve a resource path to its locator
    Resolve { path: String },
}

fn parse_meta(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s.split_once('=').ok_or_else(|| format!("expected key=value: {s}"))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_owned()));
    Ok((key.to_owned(), value))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_table(records: &[BoidRecord]) {
    let name_w = records.iter().map(|r| r.name.len()).max().unwrap_or(0).max(4);
    let kind_w = records.iter().map(|r| r.kind.len()).max().unwrap_or(0).max(4);
    println!("{:<name_w$}  {:<kind_w$}  {:<6}  MODALITIES", "NAME", "KIND", "STATE");
    for r in records {
        let modalities: Vec<&str> = r.modalities.iter().map(String::as_str).collect();
        println!(
            "{:<name_w$}  {:<kind_w$}  {:<6}  {}",
            r.name,
            r.kind,
            r.state.as_str(),
            modalities.join(",")
        );
    }
}

fn interrupt_token() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let cancel = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    shutdown
}

async fn publish_lines(client: &FabricClient, boid: &str, modality: &str) -> anyhow::Result<()> {
    let mut publisher = Publisher::connect(client, boid, modality).await?;
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let seq = publisher.send(Bytes::from(line)).await?;
        eprintln!("ack {seq}");
    }
    publisher.close().await;
    Ok(())
}

async fn subscribe(
    client: &FabricClient,
    boid: &str,
    modality: &str,
    count: Option<u64>,
) -> anyhow::Result<()> {
    let mut subscriber = Subscriber::connect(client, boid, modality).await?;
    eprintln!("subscribed to {}", subscriber.topic());
    let shutdown = interrupt_token();
    let mut received = 0u64;
    loop {
        let delivery = tokio::select! {
            d = subscriber.next() => d?,
            _ = shutdown.cancelled() => break,
        };
        match delivery {
            Delivery::Message { seq, publisher, payload, .. } => {
                println!("{seq} {publisher} {}", String::from_utf8_lossy(&payload));
                received += 1;
                if count.is_some_and(|n| received >= n) {
                    break;
                }
            }
            Delivery::Closed(reason) => {
                eprintln!("closed: {reason}");
                return Ok(());
            }
            Delivery::Dropped => anyhow::bail!("connection dropped"),
        }
    }
    subscriber.close().await;
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = FabricClient::new(&cli.url, cli.token);
    match cli.command {
        Command::Register(args) => print_json(&client.register(&args.into_registration()).await?),
        Command::Heartbeat { registration, interval_ms, keep } => {
            let mut config = HeartbeatConfig::new(
                registration.into_registration(),
                Duration::from_millis(interval_ms),
            );
            config.unregister_on_exit = !keep;
            let report = heartbeat::run(&client, &config, interrupt_token()).await?;
            eprintln!(
                "{} heartbeats, {} re-registrations, unregistered: {}",
                report.beats, report.reregistrations, report.unregistered
            );
            Ok(())
        }
        Command::Lookup { name } => print_json(&client.lookup(&name).await?),
        Command::List { kind, state, modality, after, limit, page } => {
            let query = ListQuery { kind, state, modality, after, limit };
            if !page {
                print_table(&client.list_all(query).await?);
                return Ok(());
            }
            let page = client.list(&query).await?;
            print_table(&page.records);
            if let Some(next) = page.next {
                eprintln!("more after {next}");
            }
            Ok(())
        }
        Command::Unregister { name } => print_json(&client.unregister(&name).await?),
        Command::Grant { name, collaborator } => {
            print_json(&client.grant(&name, &collaborator).await?)
        }
        Command::Revoke { name, collaborator } => {
            print_json(&client.revoke(&name, &collaborator).await?)
        }
        Command::Publish { boid, modality, message: Some(message) } => {
            print_json(&client.publish(&boid, &modality, Bytes::from(message)).await?)
        }
        Command::Publish { boid, modality, message: None } => {
            publish_lines(&client, &boid, &modality).await
        }
        Command::Subscribe { boid, modality, count } => {
            subscribe(&client, &boid, &modality, count).await
        }
        Command::ResourceRegister { boid, glob, locator } => {
            print_json(&client.register_resource(&boid, &glob, &locator).await?)
        }
        Command::Resolve { path } => print_json(&client.resolve(&path).await?),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
