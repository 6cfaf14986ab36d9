// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Fleetlock CLI
//!
//! The `fleetlock` binary runs commands under leader election or governor
//! control and serves the HTTP keyed log store those primitives use.
//!
//! ## Commands
//!
//! - `fleetlock store serve|bucket|buckets` - Keyed log store
//! - `fleetlock election run|info` - Leader elections
//! - `fleetlock governor add|view|list|run|evict|reset` - Concurrency governors
//! - `fleetlock config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use fleetlock_cli::commands::{self, ConfigCommand, ElectionCommand, GovernorCommand, StoreCommand};
use fleetlock_core::domain::config::FleetlockConfig;

/// Fleetlock - leader elections and concurrency governors for fleets
#[derive(Parser)]
#[command(name = "fleetlock")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "FLEETLOCK_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FLEETLOCK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Expose Prometheus metrics on this port
    #[arg(long, global = true, env = "FLEETLOCK_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Keyed log store
    #[command(name = "store")]
    Store {
        #[command(subcommand)]
        command: StoreCommand,
    },

    /// Leader elections
    #[command(name = "election")]
    Election {
        #[command(subcommand)]
        command: ElectionCommand,
    },

    /// Concurrency governors
    #[command(name = "governor")]
    Governor {
        #[command(subcommand)]
        command: GovernorCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = FleetlockConfig::load_or_default(cli.config.clone())
        .context("Failed to load configuration")?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.spec.observability.log_level.clone());
    init_logging(&log_level)?;

    if let Some(port) = cli.metrics_port.or(config.spec.observability.metrics_port) {
        init_metrics(port)?;
    }

    match cli.command {
        Some(Commands::Store { command }) => commands::store::handle_command(command, config).await,
        Some(Commands::Election { command }) => {
            commands::election::handle_command(command, config).await
        }
        Some(Commands::Governor { command }) => {
            commands::governor::handle_command(command, config).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus exporter")?;

    tracing::info!("Metrics exposed on :{}/metrics", port);
    Ok(())
}
