// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Concurrency governor commands
//!
//! Commands: add, view, list, evict, reset, run

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fleetlock_core::domain::config::FleetlockConfig;
use fleetlock_core::domain::events::CoordinationEvent;
use fleetlock_core::domain::governor::{default_subject, GovernorError, GovernorOptions, GovernorSpec};
use fleetlock_core::infrastructure::event_bus::{EventBus, EventBusError, EventReceiver};
use fleetlock_core::infrastructure::http_store::HttpStore;
use fleetlock_core::{list_governors, Governor, GovernorManager};

use super::{connect, parse_duration};
use crate::process;

#[derive(Subcommand)]
pub enum GovernorCommand {
    /// Create a governor, or update it with --force
    Add {
        name: String,

        /// Maximum concurrent slots
        limit: u64,

        /// How long before slots expire (default: spec.governor.max_age)
        #[arg(value_parser = parse_duration)]
        expire: Option<Duration>,

        #[arg(long)]
        replicas: Option<u32>,

        /// Apply changes to an existing governor
        #[arg(long)]
        force: bool,
    },

    /// View the configuration and occupancy of a governor
    View { name: String },

    /// List known governors
    List,

    /// Remove a worker from a slot
    Evict { name: String, sequence: u64 },

    /// Vacate every slot
    Reset { name: String },

    /// Runs a command subject to governor control
    Run {
        name: String,

        /// Maximum amount of time to wait to obtain a slot (default: spec.governor.max_wait)
        #[arg(long, value_parser = parse_duration)]
        max_wait: Option<Duration>,

        /// Interval for attempting to get a slot (default: spec.governor.interval)
        #[arg(long, value_parser = parse_duration)]
        interval: Option<Duration>,

        /// Instead of limiting concurrent runs, limit runs per governor period
        #[arg(long)]
        max_per_period: bool,

        /// Command to execute
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

pub async fn handle_command(command: GovernorCommand, config: FleetlockConfig) -> Result<()> {
    let store = Arc::new(connect(&config)?);

    match command {
        GovernorCommand::Add {
            name,
            limit,
            expire,
            replicas,
            force,
        } => {
            let spec = GovernorSpec {
                subject: default_subject(&name),
                name,
                limit,
                max_age: expire.unwrap_or(config.spec.governor.max_age),
                replicas: replicas.unwrap_or(config.spec.governor.replicas),
            };
            add(store, spec, force).await
        }
        GovernorCommand::View { name } => view(store, &name).await,
        GovernorCommand::List => list(store).await,
        GovernorCommand::Evict { name, sequence } => evict(store, &name, sequence).await,
        GovernorCommand::Reset { name } => reset(store, &name).await,
        GovernorCommand::Run {
            name,
            max_wait,
            interval,
            max_per_period,
            command,
        } => {
            let max_wait = max_wait.unwrap_or(config.spec.governor.max_wait);
            let interval = interval.unwrap_or(config.spec.governor.interval);
            let code = run(store, &config, &name, max_wait, interval, max_per_period, &command).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}

async fn open(store: Arc<HttpStore>, name: &str) -> Result<GovernorManager> {
    GovernorManager::open(store, name)
        .await
        .with_context(|| format!("Failed to load governor {}", name))
}

async fn add(store: Arc<HttpStore>, spec: GovernorSpec, force: bool) -> Result<()> {
    let name = spec.name.clone();
    let wanted = spec.clone();

    let manager = GovernorManager::new(store, spec, force)
        .await
        .with_context(|| format!("Failed to create governor {}", name))?;

    if !force && !wanted.matches(&manager.config()) {
        warn!("Governor {} exists with different settings, use --force to update", name);
    }

    println!("{}", format!("✓ Governor {} ready", name).green());
    println!();
    print_manager(&manager).await
}

async fn view(store: Arc<HttpStore>, name: &str) -> Result<()> {
    let manager = open(store, name).await?;
    print_manager(&manager).await
}

async fn print_manager(manager: &GovernorManager) -> Result<()> {
    let active = manager.active().await?;
    let last_active = manager.last_active().await?;

    let limit = match manager.limit() {
        -1 => "unlimited".to_string(),
        n => n.to_string(),
    };

    println!("{}", format!("Configuration for governor {}", manager.name()).bold());
    println!();
    println!("       Capacity: {}", limit);
    println!("        Expires: {}", humantime::format_duration(manager.max_age()));
    println!("       Replicas: {}", manager.replicas());
    println!("        Subject: {}", manager.subject());
    println!("         Active: {}", active);
    match last_active {
        Some(at) => println!("    Last Active: {}", at.to_rfc3339()),
        None => println!("    Last Active: {}", "never".dimmed()),
    }

    Ok(())
}

async fn list(store: Arc<HttpStore>) -> Result<()> {
    let names = list_governors(store.as_ref())
        .await
        .context("Failed to list governors")?;

    if names.is_empty() {
        println!("{}", "No governors found".yellow());
        return Ok(());
    }

    println!("{:<32} {:<10} {:<10} {}", "NAME".bold(), "CAPACITY".bold(), "ACTIVE".bold(), "EXPIRES".bold());
    for name in names {
        let manager = open(store.clone(), &name).await?;
        let active = manager.active().await?;
        println!(
            "{:<32} {:<10} {:<10} {}",
            name,
            manager.limit(),
            active,
            humantime::format_duration(manager.max_age())
        );
    }

    Ok(())
}

async fn evict(store: Arc<HttpStore>, name: &str, sequence: u64) -> Result<()> {
    let bus = EventBus::with_default_capacity();
    let mut events = bus.subscribe();

    let manager = open(store, name).await?.with_event_bus(bus);
    let identity = manager
        .evict(sequence)
        .await
        .with_context(|| format!("Failed to evict slot {} from {}", sequence, name))?;

    log_events(&mut events);
    println!("{}", format!("✓ Evicted {} from slot {}", identity, sequence).green());

    Ok(())
}

async fn reset(store: Arc<HttpStore>, name: &str) -> Result<()> {
    let manager = open(store, name).await?;
    manager
        .reset()
        .await
        .with_context(|| format!("Failed to reset governor {}", name))?;

    println!("{}", format!("✓ Governor {} reset", name).green());
    Ok(())
}

/// Log governor events published so far.
fn log_events(events: &mut EventReceiver) {
    loop {
        match events.try_recv() {
            Ok(CoordinationEvent::Governor(event)) => info!("{}", event),
            Ok(_) | Err(EventBusError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

async fn run(
    store: Arc<HttpStore>,
    config: &FleetlockConfig,
    name: &str,
    max_wait: Duration,
    interval: Duration,
    max_per_period: bool,
    command: &[String],
) -> Result<i32> {
    if interval < Duration::from_secs(1) {
        bail!("interval should be >=1s");
    }

    let (executable, args) = process::parse_command(command)?;

    let bus = EventBus::with_default_capacity();
    let mut events = bus.subscribe();

    let governor = Governor::new(
        name,
        store,
        GovernorOptions {
            interval,
            backoff: config.spec.governor.backoff.policy(),
            leave_on_completion: !max_per_period,
            ..Default::default()
        },
    )
    .with_event_bus(bus);

    let ctx = CancellationToken::new();
    let deadline = tokio::time::Instant::now() + max_wait;

    let lease = match governor
        .start_with_deadline(&ctx, &config.spec.identity, Some(deadline))
        .await
    {
        Ok(lease) => lease,
        Err(GovernorError::DeadlineExceeded { .. }) if max_per_period => {
            log_events(&mut events);
            return Ok(0);
        }
        Err(e) => {
            log_events(&mut events);
            bail!("could not get a execution slot: {}", e);
        }
    };
    log_events(&mut events);

    let mut child = match process::spawn(&executable, &args) {
        Ok(child) => child,
        Err(e) => {
            if let Err(release) = lease.release().await {
                warn!("Could not release slot {}: {}", lease.sequence(), release);
            }
            return Err(e);
        }
    };

    let status = tokio::select! {
        status = child.wait() => status,
        _ = process::shutdown_signal() => {
            if let Err(e) = lease.release().await {
                warn!("Could not release slot {}: {}", lease.sequence(), e);
            }
            child.wait().await
        }
    };

    if let Err(e) = lease.release().await {
        warn!("Could not release slot {}: {}", lease.sequence(), e);
    }
    log_events(&mut events);

    match status {
        Ok(status) => Ok(process::exit_code(status)),
        Err(e) => {
            println!("execution failed: {}", e);
            Ok(1)
        }
    }
}
