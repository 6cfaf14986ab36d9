// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Leader election commands
//!
//! Commands: run, info

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fleetlock_core::domain::config::FleetlockConfig;
use fleetlock_core::domain::election::{ElectionOptions, ValidationBounds};
use fleetlock_core::domain::events::ElectionEvent;
use fleetlock_core::domain::store::KeyValueBucket;
use fleetlock_core::infrastructure::event_bus::{EventBus, EventBusError};
use fleetlock_core::Election;

use super::connect;
use crate::process::{self, Notify};

/// Time a freshly started command gets before it is told it leads.
const STARTUP_GRACE: Duration = Duration::from_secs(1);

#[derive(Subcommand)]
pub enum ElectionCommand {
    /// Runs a command under leader election control
    Run {
        /// The name for the election to campaign in
        name: String,

        /// Use a specific bucket for elections (default: spec.election.bucket)
        #[arg(long)]
        bucket: Option<String>,

        /// Terminates the command when leadership is lost
        #[arg(long)]
        terminate: bool,

        /// Command to execute
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// View information about an election bucket
    Info {
        #[arg(long)]
        bucket: Option<String>,
    },
}

pub async fn handle_command(command: ElectionCommand, config: FleetlockConfig) -> Result<()> {
    match command {
        ElectionCommand::Run {
            name,
            bucket,
            terminate,
            command,
        } => {
            let bucket = bucket.unwrap_or_else(|| config.spec.election.bucket.clone());
            let code = run(&config, &name, &bucket, terminate, &command).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        ElectionCommand::Info { bucket } => {
            let bucket = bucket.unwrap_or_else(|| config.spec.election.bucket.clone());
            show_info(&config, &bucket).await
        }
    }
}

/// Owns the supervised command across leadership changes.
struct Supervisor {
    executable: String,
    args: Vec<String>,
    terminate_on_lost: bool,
    child: Option<Child>,
    signaled: bool,
}

impl Supervisor {
    fn new(executable: String, args: Vec<String>, terminate_on_lost: bool) -> Self {
        Self {
            executable,
            args,
            terminate_on_lost,
            child: None,
            signaled: false,
        }
    }

    async fn on_won(&mut self) -> Result<()> {
        info!("Became leader");

        if self.child.is_none() {
            self.child = Some(process::spawn(&self.executable, &self.args)?);
            tokio::time::sleep(STARTUP_GRACE).await;
        }

        if !self.signaled {
            if let Some(child) = self.child.as_mut() {
                process::notify(child, Notify::Leader);
                self.signaled = true;
            }
        }

        Ok(())
    }

    async fn on_lost(&mut self) {
        info!("Leadership lost");
        self.signaled = false;

        let Some(child) = self.child.as_mut() else {
            return;
        };

        if self.terminate_on_lost {
            warn!("Sending SIGINT to {:?}", child.id());
            process::notify(child, Notify::Interrupt);
            tokio::time::sleep(Duration::from_secs(1)).await;
            warn!("Sending SIGTERM to {:?}", child.id());
            process::notify(child, Notify::Terminate);
        } else {
            warn!("Sending SIGUSR2 to {:?}", child.id());
            process::notify(child, Notify::Follower);
        }
    }

    /// Terminate the command after an interrupt. A follower that never
    /// started one exits cleanly.
    async fn interrupted(&mut self) -> std::io::Result<i32> {
        match self.child.as_mut() {
            Some(child) => {
                process::notify(child, Notify::Terminate);
                Ok(process::exit_code(child.wait().await?))
            }
            None => Ok(0),
        }
    }

    /// Resolves when the command exits, never while none is running.
    async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        match self.child.as_mut() {
            Some(child) => child.wait().await,
            None => std::future::pending().await,
        }
    }
}

async fn run(
    config: &FleetlockConfig,
    name: &str,
    bucket: &str,
    terminate: bool,
    command: &[String],
) -> Result<i32> {
    let (executable, args) = process::parse_command(command)?;

    let store = connect(config)?;
    let kv: Arc<dyn KeyValueBucket> = Arc::new(store.bucket(bucket));

    let identity = config.spec.identity.clone();
    let bus = EventBus::with_default_capacity();
    let mut events = bus.subscribe_election(identity.clone());

    let election = Election::new(
        identity,
        name,
        kv,
        ElectionOptions {
            campaign_interval: config.spec.election.campaign_interval,
            backoff: config.spec.election.backoff.policy(),
            listener: Some(Arc::new(bus.clone())),
            bounds: ValidationBounds::production(),
        },
    )
    .await
    .with_context(|| format!("Cannot join election {} in bucket {}", name, bucket))?;

    let ctx = CancellationToken::new();
    let runner = election.clone();
    let run_ctx = ctx.clone();
    let campaign = tokio::spawn(async move { runner.start(&run_ctx).await });

    let mut supervisor = Supervisor::new(executable, args, terminate);
    let shutdown = process::shutdown_signal();
    tokio::pin!(shutdown);

    let code = loop {
        tokio::select! {
            _ = &mut shutdown => {
                election.stop().await;
                break supervisor.interrupted().await?;
            }
            status = supervisor.wait() => {
                let code = process::exit_code(status?);
                if code != 0 {
                    error!("Execution failed with exit code: {}", code);
                }
                break code;
            }
            event = events.recv() => match event {
                Ok(ElectionEvent::LeadershipWon { .. }) => supervisor.on_won().await?,
                Ok(ElectionEvent::LeadershipLost { .. }) => supervisor.on_lost().await,
                Err(EventBusError::Lagged(_)) => continue,
                Err(e) => bail!("Election events stopped: {}", e),
            },
        }
    };

    election.stop().await;
    ctx.cancel();
    campaign.await??;

    Ok(code)
}

/// Warning for TTLs that make a poor election bucket.
fn ttl_warning(bucket: &str, ttl: Duration) -> Option<String> {
    let shown = humantime::format_duration(ttl);

    if ttl < Duration::from_secs(5) {
        Some(format!("{} is not a valid election bucket, maximum age {} is too low", bucket, shown))
    } else if ttl > Duration::from_secs(3600) {
        Some(format!("{} is not a valid election bucket, maximum age {} is too high", bucket, shown))
    } else if ttl > Duration::from_secs(60) {
        Some(format!("{} has a very high maximum age of {}, recovery time will be slow", bucket, shown))
    } else {
        None
    }
}

async fn show_info(config: &FleetlockConfig, bucket: &str) -> Result<()> {
    let store = connect(config)?;
    let kv = store.bucket(bucket);

    let status = kv
        .status()
        .await
        .with_context(|| format!("Cannot access bucket {}", bucket))?;

    if let Some(warning) = ttl_warning(&status.bucket, status.ttl) {
        println!("{} {}", "WARNING:".yellow().bold(), warning);
        println!();
    }

    println!("{}", format!("Election bucket information for {}", status.bucket).bold());
    println!();
    println!("  Maximum Time: {}", humantime::format_duration(status.ttl));
    println!("     Elections: {}", status.values);

    let entries = kv.entries().await.context("Cannot load elections")?;
    if !entries.is_empty() {
        println!();
        println!("{:<32} {}", "ELECTION".bold(), "LEADER".bold());
        for entry in entries {
            println!("{:<32} {}", entry.key, entry.value_string());
        }
    }

    Ok(())
}
