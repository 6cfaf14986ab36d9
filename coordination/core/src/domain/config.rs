// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Coordination Configuration - Kubernetes-style manifest
//
// Defines the configuration consumed by fleetlock processes:
// - Participant identity (election candidate / governor worker name)
// - Keyed log store endpoint
// - Election bucket and campaign interval defaults
// - Governor retry defaults
// - Store server and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::backoff::{Backoff, BackoffPolicy};

pub const API_VERSION: &str = "fleetlock.io/v1";
pub const KIND: &str = "CoordinationConfig";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetlockConfig {
    /// API version (must be "fleetlock.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CoordinationConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: CoordinationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationSpec {
    /// Name written into election keys and governor slots
    pub identity: String,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub election: ElectionConfig,

    #[serde(default)]
    pub governor: GovernorConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the keyed log store
    #[serde(default = "default_store_endpoint")]
    pub endpoint: String,

    /// Per request timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Bucket holding election keys
    #[serde(default = "default_election_bucket")]
    pub bucket: String,

    /// Override for the derived 0.75 * TTL interval
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub campaign_interval: Option<Duration>,

    #[serde(default)]
    pub backoff: BackoffChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Pause between slot attempts
    #[serde(default = "default_governor_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// How long `governor run` waits for a slot
    #[serde(default = "default_max_wait", with = "humantime_serde")]
    pub max_wait: Duration,

    /// Max age used when creating governors
    #[serde(default = "default_max_age", with = "humantime_serde")]
    pub max_age: Duration,

    #[serde(default = "default_replicas")]
    pub replicas: u32,

    #[serde(default)]
    pub backoff: BackoffChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for `store serve`
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus exporter port, disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

/// Named retry curve selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffChoice {
    #[default]
    None,
    FiveSec,
    TwentySec,
}

impl BackoffChoice {
    pub fn policy(&self) -> Option<Arc<dyn Backoff>> {
        match self {
            BackoffChoice::None => None,
            BackoffChoice::FiveSec => Some(Arc::new(BackoffPolicy::five_sec())),
            BackoffChoice::TwentySec => Some(Arc::new(BackoffPolicy::twenty_sec())),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_store_endpoint(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            bucket: default_election_bucket(),
            campaign_interval: None,
            backoff: BackoffChoice::None,
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            interval: default_governor_interval(),
            max_wait: default_max_wait(),
            max_age: default_max_age(),
            replicas: default_replicas(),
            backoff: BackoffChoice::None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

impl Default for CoordinationSpec {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            store: StoreConfig::default(),
            election: ElectionConfig::default(),
            governor: GovernorConfig::default(),
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for FleetlockConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: default_identity(),
                labels: None,
            },
            spec: CoordinationSpec::default(),
        }
    }
}

impl FleetlockConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Paths checked during discovery, in precedence order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(path) = std::env::var("FLEETLOCK_CONFIG_PATH") {
            paths.push(PathBuf::from(path));
        }

        paths.push(PathBuf::from("./fleetlock.yaml"));

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".fleetlock").join("config.yaml"));
        }

        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/fleetlock/config.yaml"));
        #[cfg(windows)]
        paths.push(PathBuf::from("C:\\ProgramData\\Fleetlock\\config.yaml"));

        paths
    }

    /// Discover configuration file using precedence order
    /// 1. FLEETLOCK_CONFIG_PATH environment variable
    /// 2. ./fleetlock.yaml (working directory)
    /// 3. ~/.fleetlock/config.yaml (user home)
    /// 4. /etc/fleetlock/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|p| p.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations, using defaults");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FLEETLOCK_STORE_URL") {
            if val.is_empty() {
                tracing::warn!("Ignoring empty FLEETLOCK_STORE_URL");
            } else {
                tracing::info!("Environment override: FLEETLOCK_STORE_URL={}", val);
                self.spec.store.endpoint = val;
            }
        }

        if let Ok(val) = std::env::var("FLEETLOCK_IDENTITY") {
            if !val.is_empty() {
                tracing::info!("Environment override: FLEETLOCK_IDENTITY={}", val);
                self.spec.identity = val;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.identity.is_empty() {
            anyhow::bail!("spec.identity cannot be empty");
        }

        if self.spec.store.endpoint.is_empty() {
            anyhow::bail!("spec.store.endpoint cannot be empty");
        }

        if self.spec.election.bucket.is_empty() {
            anyhow::bail!("spec.election.bucket cannot be empty");
        }

        if self.spec.governor.interval < Duration::from_secs(1) {
            anyhow::bail!(
                "spec.governor.interval should be >=1s, got {:?}",
                self.spec.governor.interval
            );
        }

        Ok(())
    }
}

fn default_identity() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "fleetlock-node".to_string())
}

fn default_store_endpoint() -> String {
    "http://127.0.0.1:7420".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_election_bucket() -> String {
    "FLEETLOCK_LEADER_ELECTION".to_string()
}

fn default_governor_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_wait() -> Duration {
    Duration::from_secs(300)
}

fn default_max_age() -> Duration {
    Duration::from_secs(3600)
}

fn default_replicas() -> u32 {
    1
}

fn default_listen() -> String {
    "127.0.0.1:7420".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let config = FleetlockConfig::default();
        assert_eq!(config.api_version, API_VERSION);
        assert_eq!(config.kind, KIND);
        assert!(!config.spec.identity.is_empty());
        assert_eq!(config.spec.election.bucket, "FLEETLOCK_LEADER_ELECTION");
        assert_eq!(config.spec.governor.interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let yaml = r#"
apiVersion: fleetlock.io/v1
kind: CoordinationConfig
metadata:
  name: edge-7
spec:
  identity: edge-7.example.net
  store:
    endpoint: http://store.example.net:7420
  election:
    campaign_interval: 45s
    backoff: twenty_sec
  governor:
    interval: 2s
    max_wait: 10m
"#;

        let config = FleetlockConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.metadata.name, "edge-7");
        assert_eq!(config.spec.identity, "edge-7.example.net");
        assert_eq!(config.spec.store.endpoint, "http://store.example.net:7420");
        assert_eq!(config.spec.store.request_timeout, Duration::from_secs(5));
        assert_eq!(config.spec.election.campaign_interval, Some(Duration::from_secs(45)));
        assert_eq!(config.spec.election.backoff, BackoffChoice::TwentySec);
        assert!(config.spec.election.backoff.policy().is_some());
        assert_eq!(config.spec.governor.interval, Duration::from_secs(2));
        assert_eq!(config.spec.governor.max_wait, Duration::from_secs(600));
        assert_eq!(config.spec.governor.backoff, BackoffChoice::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetlock.yaml");

        let mut config = FleetlockConfig::default();
        config.spec.identity = "worker-1".to_string();
        config.spec.observability.metrics_port = Some(9464);
        config.to_yaml_file(&path).unwrap();

        let loaded = FleetlockConfig::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.observability.metrics_port, Some(9464));
        assert_eq!(loaded.spec.store.endpoint, config.spec.store.endpoint);
    }

    #[test]
    fn test_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let res = FleetlockConfig::load_or_default(Some(dir.path().join("absent.yaml")));
        assert!(res.is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = FleetlockConfig::default();
        assert!(config.validate().is_ok());

        config.api_version = "wrong/v1".to_string();
        assert!(config.validate().is_err());
        config.api_version = API_VERSION.to_string();

        config.kind = "NodeConfig".to_string();
        assert!(config.validate().is_err());
        config.kind = KIND.to_string();

        config.spec.identity = "".to_string();
        assert!(config.validate().is_err());
        config.spec.identity = "node".to_string();

        config.spec.store.endpoint = "".to_string();
        assert!(config.validate().is_err());
        config.spec.store.endpoint = "http://localhost:7420".to_string();

        config.spec.governor.interval = Duration::from_millis(200);
        assert!(config.validate().is_err());
    }
}
