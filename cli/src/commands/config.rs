// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use fleetlock_core::domain::config::FleetlockConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with default values
    Generate {
        #[arg(short, long, default_value = "./fleetlock.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(&output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = FleetlockConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  --config flag: {}", path.display()),
            None => println!("  --config flag: {}", "(not set)".dimmed()),
        }
        for (i, path) in FleetlockConfig::search_paths().iter().enumerate() {
            let marker = if path.exists() { "found".green() } else { "missing".dimmed() };
            println!("  {}. {} ({})", i + 1, path.display(), marker);
        }
        println!();
    }

    let spec = &config.spec;

    println!("{}", "Current configuration:".bold());
    println!("  Identity: {}", spec.identity);
    println!();

    println!("{}", "Store:".bold());
    println!("  Endpoint: {}", spec.store.endpoint);
    println!("  Request timeout: {}", humantime::format_duration(spec.store.request_timeout));
    println!("  Serve on: {}", spec.server.listen);
    println!();

    println!("{}", "Election:".bold());
    println!("  Bucket: {}", spec.election.bucket);
    match spec.election.campaign_interval {
        Some(interval) => println!("  Campaign interval: {}", humantime::format_duration(interval)),
        None => println!("  Campaign interval: {}", "(0.75 * bucket TTL)".dimmed()),
    }
    println!("  Backoff: {:?}", spec.election.backoff);
    println!();

    println!("{}", "Governor:".bold());
    println!("  Interval: {}", humantime::format_duration(spec.governor.interval));
    println!("  Max wait: {}", humantime::format_duration(spec.governor.max_wait));
    println!("  Max age: {}", humantime::format_duration(spec.governor.max_age));
    println!("  Replicas: {}", spec.governor.replicas);
    println!("  Backoff: {:?}", spec.governor.backoff);
    println!();

    println!("{}", "Observability:".bold());
    println!("  Log level: {}", spec.observability.log_level);
    match spec.observability.metrics_port {
        Some(port) => println!("  Metrics port: {}", port),
        None => println!("  Metrics port: {}", "(disabled)".dimmed()),
    }

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = FleetlockConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

pub(crate) fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists, use --force to overwrite", output.display());
    }

    FleetlockConfig::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
