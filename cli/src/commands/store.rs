// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Keyed log store commands
//!
//! Commands: serve, bucket, buckets

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tracing::info;

use fleetlock_core::domain::config::FleetlockConfig;
use fleetlock_core::domain::store::KeyValueBucket;
use fleetlock_core::infrastructure::memory_store::InMemoryStore;
use fleetlock_core::presentation::api::router;

use super::{connect, parse_duration};
use crate::process::shutdown_signal;

#[derive(Subcommand)]
pub enum StoreCommand {
    /// Serve an in-memory store over HTTP
    Serve {
        /// Listen address (default: spec.server.listen)
        #[arg(short, long)]
        listen: Option<String>,

        /// TTL of the election bucket created on startup
        #[arg(long, default_value = "60s", value_parser = parse_duration)]
        election_ttl: Duration,
    },

    /// Create a bucket, or change its TTL
    Bucket {
        name: String,

        #[arg(long, default_value = "60s", value_parser = parse_duration)]
        ttl: Duration,
    },

    /// List buckets and their TTLs
    Buckets,
}

pub async fn handle_command(command: StoreCommand, config: FleetlockConfig) -> Result<()> {
    match command {
        StoreCommand::Serve {
            listen,
            election_ttl,
        } => serve(&config, listen, election_ttl).await,
        StoreCommand::Bucket { name, ttl } => create_bucket(&config, &name, ttl).await,
        StoreCommand::Buckets => list_buckets(&config).await,
    }
}

async fn serve(config: &FleetlockConfig, listen: Option<String>, election_ttl: Duration) -> Result<()> {
    let addr = listen.unwrap_or_else(|| config.spec.server.listen.clone());

    let store = InMemoryStore::new();
    store.create_bucket(&config.spec.election.bucket, election_ttl);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(
        "Store listening on {} (election bucket {} with TTL {})",
        addr,
        config.spec.election.bucket,
        humantime::format_duration(election_ttl)
    );

    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Store server failed")?;

    info!("Store stopped");
    Ok(())
}

async fn create_bucket(config: &FleetlockConfig, name: &str, ttl: Duration) -> Result<()> {
    let store = connect(config)?;

    let status = store
        .create_bucket(name, ttl)
        .await
        .with_context(|| format!("Failed to create bucket {}", name))?;

    println!(
        "{}",
        format!(
            "✓ Bucket {} ready with TTL {}",
            status.bucket,
            humantime::format_duration(status.ttl)
        )
        .green()
    );

    Ok(())
}

async fn list_buckets(config: &FleetlockConfig) -> Result<()> {
    let store = connect(config)?;

    let names = store.bucket_names().await.context("Failed to list buckets")?;
    if names.is_empty() {
        println!("{}", "No buckets found".yellow());
        return Ok(());
    }

    println!("{:<32} {:<12} {}", "BUCKET".bold(), "TTL".bold(), "VALUES".bold());
    for name in names {
        let status = store.bucket(&name).status().await?;
        println!(
            "{:<32} {:<12} {}",
            status.bucket,
            humantime::format_duration(status.ttl).to_string(),
            status.values
        );
    }

    Ok(())
}
