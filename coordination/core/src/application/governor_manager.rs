// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Governor Manager
//!
//! Administrative side of a governor: provisions the admission stream, keeps
//! its configuration in line with the requested limit, and offers operational
//! overrides (purge, evict a stuck worker).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::domain::events::{GovernorEvent, GovernorEventType};
use crate::domain::governor::{governor_name, stream_name, GovernorError, GovernorSpec};
use crate::domain::store::{StreamConfig, StreamStore};
use crate::infrastructure::event_bus::EventBus;

pub struct GovernorManager {
    name: String,
    stream: String,
    store: Arc<dyn StreamStore>,
    config: RwLock<StreamConfig>,
    events: Option<EventBus>,
}

impl GovernorManager {
    /// Load or create the governor described by `spec`.
    ///
    /// A `spec.limit` of zero only loads an existing governor and fails with
    /// [`GovernorError::UnknownGovernor`] otherwise, so nothing is provisioned
    /// without a limit. With `update` set, an existing stream is brought in
    /// line with `spec`.
    pub async fn new(
        store: Arc<dyn StreamStore>,
        spec: GovernorSpec,
        update: bool,
    ) -> Result<Self, GovernorError> {
        if spec.limit == 0 {
            return Self::open(store, &spec.name).await;
        }

        let stream = stream_name(&spec.name);
        let config = store
            .load_or_create_stream(&spec.stream_config())
            .await
            .map_err(|e| GovernorError::store("load", &spec.name, &stream, e))?;

        let manager = Self {
            name: spec.name.clone(),
            stream,
            store,
            config: RwLock::new(config),
            events: None,
        };

        if update {
            manager.update_config(spec).await?;
        }

        Ok(manager)
    }

    /// Load an existing governor, adopting its stored settings.
    pub async fn open(store: Arc<dyn StreamStore>, name: &str) -> Result<Self, GovernorError> {
        let stream = stream_name(name);

        let config = match store.stream_config(&stream).await {
            Ok(config) => config,
            Err(e) if e.is_not_found() => {
                return Err(GovernorError::UnknownGovernor(name.to_string()));
            }
            Err(e) => return Err(GovernorError::store("load", name, &stream, e)),
        };

        Ok(Self {
            name: name.to_string(),
            stream,
            store,
            config: RwLock::new(config),
            events: None,
        })
    }

    /// Publish eviction events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Cached stream configuration as last loaded or written.
    pub fn config(&self) -> StreamConfig {
        self.config.read().clone()
    }

    /// Maximum concurrent slots, `-1` when the stream is unbounded.
    pub fn limit(&self) -> i64 {
        self.config.read().max_messages
    }

    pub fn max_age(&self) -> Duration {
        self.config.read().max_age
    }

    pub fn replicas(&self) -> u32 {
        self.config.read().replicas
    }

    pub fn subject(&self) -> String {
        self.current_spec().subject
    }

    pub async fn set_limit(&self, limit: u64) -> Result<(), GovernorError> {
        let mut spec = self.current_spec();
        spec.limit = limit;
        self.update_config(spec).await
    }

    pub async fn set_max_age(&self, max_age: Duration) -> Result<(), GovernorError> {
        let mut spec = self.current_spec();
        spec.max_age = max_age;
        self.update_config(spec).await
    }

    pub async fn set_subject(&self, subject: impl Into<String>) -> Result<(), GovernorError> {
        let mut spec = self.current_spec();
        spec.subject = subject.into();
        self.update_config(spec).await
    }

    /// Remove every held slot.
    pub async fn reset(&self) -> Result<(), GovernorError> {
        info!(governor = %self.name, "Resetting governor");
        self.store
            .purge(&self.stream)
            .await
            .map_err(|e| GovernorError::store("reset", &self.name, &self.stream, e))
    }

    /// Number of occupied slots.
    pub async fn active(&self) -> Result<u64, GovernorError> {
        self.store
            .stream_info(&self.stream)
            .await
            .map(|state| state.messages)
            .map_err(|e| GovernorError::store("active", &self.name, &self.stream, e))
    }

    /// Time the most recent slot was taken, `None` when never used.
    pub async fn last_active(&self) -> Result<Option<DateTime<Utc>>, GovernorError> {
        self.store
            .stream_info(&self.stream)
            .await
            .map(|state| state.last_time)
            .map_err(|e| GovernorError::store("info", &self.name, &self.stream, e))
    }

    /// Force-remove slot `sequence`, returning the worker that held it.
    pub async fn evict(&self, sequence: u64) -> Result<String, GovernorError> {
        let message = self
            .store
            .read_message(&self.stream, sequence)
            .await
            .map_err(|e| GovernorError::store("evict", &self.name, &self.stream, e))?;

        self.store
            .delete_message(&self.stream, sequence)
            .await
            .map_err(|e| GovernorError::store("evict", &self.name, &self.stream, e))?;

        let worker = String::from_utf8_lossy(&message.data).into_owned();
        info!(governor = %self.name, worker = %worker, seq = sequence, "Evicted slot");

        if let Some(bus) = &self.events {
            bus.publish_governor_event(GovernorEvent::new(
                &self.name,
                &worker,
                sequence,
                GovernorEventType::Eviction,
            ));
        }

        Ok(worker)
    }

    /// Refresh the cached configuration from the store.
    pub async fn reload(&self) -> Result<(), GovernorError> {
        let config = self
            .store
            .stream_config(&self.stream)
            .await
            .map_err(|e| GovernorError::store("load", &self.name, &self.stream, e))?;

        *self.config.write() = config;
        Ok(())
    }

    fn current_spec(&self) -> GovernorSpec {
        GovernorSpec::from_stream(&self.name, &self.config.read())
    }

    async fn update_config(&self, spec: GovernorSpec) -> Result<(), GovernorError> {
        let current = self.config.read().clone();
        if spec.matches(&current) {
            return Ok(());
        }

        debug!(
            governor = %self.name,
            limit = spec.limit,
            max_age = ?spec.max_age,
            subject = %spec.subject,
            "Updating governor configuration"
        );

        let mut wanted = spec.stream_config();
        wanted.storage = current.storage;

        let updated = self
            .store
            .update_stream(&wanted)
            .await
            .map_err(|e| GovernorError::store("update", &self.name, &self.stream, e))?;

        *self.config.write() = updated;
        Ok(())
    }
}

/// Names of all governors known to `store`, sorted.
pub async fn list_governors(store: &dyn StreamStore) -> Result<Vec<String>, GovernorError> {
    let streams = store
        .stream_names(None)
        .await
        .map_err(|e| GovernorError::store("list", "*", "streams", e))?;

    let mut names: Vec<String> = streams
        .iter()
        .filter_map(|stream| governor_name(stream))
        .map(str::to_string)
        .collect();

    names.sort();
    Ok(names)
}
