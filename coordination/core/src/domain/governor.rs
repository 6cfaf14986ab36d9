// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Governor Domain Types
//!
//! A governor bounds how many workers across a fleet may run a named piece of
//! work at once. It is backed by an admission stream whose message cap equals
//! the limit and which rejects writes once full (discard-new). Each message is
//! one occupied slot; workers delete their message when done and max-age
//! eviction reclaims slots from workers that never came back.
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Naming, stream configuration and options for governors

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::backoff::Backoff;
use crate::domain::store::{DiscardPolicy, StorageClass, StoreError, StreamConfig};

/// Default pause between slot attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on a single slot attempt against the store.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

const STREAM_PREFIX: &str = "GOVERNOR_";

/// Name of the stream backing governor `name`.
pub fn stream_name(name: &str) -> String {
    format!("{STREAM_PREFIX}{name}")
}

/// Governor name for a backing stream, if it is one.
pub fn governor_name(stream: &str) -> Option<&str> {
    stream.strip_prefix(STREAM_PREFIX)
}

/// Subject campaign requests are sent to unless overridden.
pub fn default_subject(name: &str) -> String {
    format!("$GOVERNOR.campaign.{name}")
}

/// Limit of a governor without a slot cap, stored as `-1` on the stream.
pub const UNLIMITED: u64 = u64::MAX;

/// Desired shape of a governor's admission stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorSpec {
    pub name: String,
    pub subject: String,
    /// Slot cap, [`UNLIMITED`] or anything beyond `i64::MAX` means no cap.
    pub limit: u64,
    pub max_age: Duration,
    pub replicas: u32,
}

impl GovernorSpec {
    /// Stream configuration enforcing the hard cap.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            name: stream_name(&self.name),
            description: Some(format!("Concurrency Governor {}", self.name)),
            subjects: vec![self.subject.clone()],
            max_messages: i64::try_from(self.limit).unwrap_or(-1),
            max_age: self.max_age,
            replicas: self.replicas.max(1),
            storage: StorageClass::File,
            discard: DiscardPolicy::New,
            duplicate_window: Duration::ZERO,
        }
    }

    /// Whether `config` already matches this spec.
    pub fn matches(&self, config: &StreamConfig) -> bool {
        let wanted = self.stream_config();

        config.max_age == wanted.max_age
            && config.max_messages == wanted.max_messages
            && config.subjects == wanted.subjects
            && config.replicas == wanted.replicas
    }

    /// Spec describing an already existing stream.
    pub fn from_stream(name: &str, config: &StreamConfig) -> Self {
        Self {
            name: name.to_string(),
            subject: config
                .subjects
                .first()
                .cloned()
                .unwrap_or_else(|| default_subject(name)),
            limit: u64::try_from(config.max_messages).unwrap_or(UNLIMITED),
            max_age: config.max_age,
            replicas: config.replicas,
        }
    }
}

/// Options shared by the governor client and manager.
#[derive(Clone)]
pub struct GovernorOptions {
    /// Fixed pause between slot attempts when no backoff is set.
    pub interval: Duration,
    pub backoff: Option<Arc<dyn Backoff>>,
    /// Subject override, defaults to [`default_subject`].
    pub subject: Option<String>,
    /// When false the slot is kept after release, so occupancy only ends
    /// through max-age eviction. Limits runs per period rather than
    /// concurrent runs.
    pub leave_on_completion: bool,
    pub attempt_timeout: Duration,
}

impl Default for GovernorOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            backoff: None,
            subject: None,
            leave_on_completion: true,
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }
}

impl fmt::Debug for GovernorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernorOptions")
            .field("interval", &self.interval)
            .field("backoff", &self.backoff.is_some())
            .field("subject", &self.subject)
            .field("leave_on_completion", &self.leave_on_completion)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl GovernorOptions {
    pub fn subject_for(&self, name: &str) -> String {
        self.subject.clone().unwrap_or_else(|| default_subject(name))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("governor {0} is already running")]
    AlreadyRunning(String),

    #[error("unknown governor {0}")]
    UnknownGovernor(String),

    #[error("campaign on governor {governor} cancelled")]
    Cancelled { governor: String },

    #[error("deadline exceeded waiting for a slot on governor {governor}")]
    DeadlineExceeded { governor: String },

    #[error("{operation} on governor {governor} via {target} failed: {source}")]
    Store {
        operation: &'static str,
        governor: String,
        target: String,
        #[source]
        source: StoreError,
    },
}

impl GovernorError {
    pub(crate) fn store(
        operation: &'static str,
        governor: &str,
        target: &str,
        source: StoreError,
    ) -> Self {
        GovernorError::Store {
            operation,
            governor: governor.to_string(),
            target: target.to_string(),
            source,
        }
    }

    /// The wrapped store error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            GovernorError::Store { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether the campaign ended through the caller's token or deadline.
    pub fn is_context(&self) -> bool {
        matches!(
            self,
            GovernorError::Cancelled { .. } | GovernorError::DeadlineExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming() {
        assert_eq!(stream_name("backups"), "GOVERNOR_backups");
        assert_eq!(governor_name("GOVERNOR_backups"), Some("backups"));
        assert_eq!(governor_name("ORDERS"), None);
        assert_eq!(default_subject("backups"), "$GOVERNOR.campaign.backups");
    }

    #[test]
    fn test_stream_config_is_hard_cap() {
        let spec = GovernorSpec {
            name: "backups".to_string(),
            subject: default_subject("backups"),
            limit: 10,
            max_age: Duration::from_secs(600),
            replicas: 3,
        };

        let config = spec.stream_config();
        assert_eq!(config.name, "GOVERNOR_backups");
        assert_eq!(config.max_messages, 10);
        assert_eq!(config.discard, DiscardPolicy::New);
        assert_eq!(config.storage, StorageClass::File);
        assert_eq!(config.duplicate_window, Duration::ZERO);
        assert_eq!(config.description.as_deref(), Some("Concurrency Governor backups"));
        assert!(spec.matches(&config));

        let mut changed = config.clone();
        changed.max_messages = 11;
        assert!(!spec.matches(&changed));
    }

    #[test]
    fn test_spec_from_stream_roundtrip() {
        let spec = GovernorSpec {
            name: "reports".to_string(),
            subject: "custom.subject".to_string(),
            limit: 4,
            max_age: Duration::from_secs(60),
            replicas: 1,
        };

        let loaded = GovernorSpec::from_stream("reports", &spec.stream_config());
        assert_eq!(loaded, spec);
    }

    #[test]
    fn test_unbounded_stream_stays_unbounded() {
        let spec = GovernorSpec {
            name: "open".to_string(),
            subject: default_subject("open"),
            limit: UNLIMITED,
            max_age: Duration::from_secs(60),
            replicas: 1,
        };
        let config = StreamConfig {
            max_messages: -1,
            ..spec.stream_config()
        };

        let spec = GovernorSpec::from_stream("open", &config);
        assert_eq!(spec.limit, UNLIMITED);
        assert_eq!(spec.stream_config().max_messages, -1);
        assert!(spec.matches(&config));
    }

    #[test]
    fn test_options_subject_override() {
        let mut opts = GovernorOptions::default();
        assert_eq!(opts.subject_for("x"), "$GOVERNOR.campaign.x");
        assert!(opts.leave_on_completion);

        opts.subject = Some("fleet.gov.x".to_string());
        assert_eq!(opts.subject_for("x"), "fleet.gov.x");
    }
}
