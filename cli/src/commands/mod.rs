// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Fleetlock CLI

pub mod config;
pub mod election;
pub mod governor;
pub mod store;

pub use self::config::ConfigCommand;
pub use self::election::ElectionCommand;
pub use self::governor::GovernorCommand;
pub use self::store::StoreCommand;

use std::time::Duration;

use anyhow::{Context, Result};
use fleetlock_core::domain::config::FleetlockConfig;
use fleetlock_core::infrastructure::http_store::HttpStore;

/// Client for the configured store endpoint.
pub(crate) fn connect(config: &FleetlockConfig) -> Result<HttpStore> {
    HttpStore::new(&config.spec.store.endpoint, config.spec.store.request_timeout)
        .with_context(|| format!("Failed to connect to store at {}", config.spec.store.endpoint))
}

/// Parse durations such as `30s` or `5m` on the command line.
pub(crate) fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("soon").is_err());
    }
}
