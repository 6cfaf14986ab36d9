// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # In-Memory Keyed Log Store
//!
//! Process-local implementation of [`KeyValueBucket`] and [`StreamStore`],
//! used by the test suites and served over HTTP by `fleetlock store serve`.
//!
//! Expiry is lazy: bucket TTL and stream max-age are enforced whenever an
//! entry or stream is touched. Ages are measured with `tokio::time::Instant`
//! so tests running on paused time see deterministic eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::store::{
    BucketStatus, DiscardPolicy, KeyValueBucket, KvEntry, StoreError, StreamConfig, StreamMessage,
    StreamState, StreamStore,
};

/// Buckets and streams held in process memory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    buckets: Arc<RwLock<HashMap<String, Arc<InMemoryBucket>>>>,
    streams: Arc<RwLock<HashMap<String, StreamData>>>,
}

/// A single key/value bucket with TTL eviction.
pub struct InMemoryBucket {
    name: String,
    data: Mutex<BucketData>,
}

struct BucketData {
    ttl: Duration,
    sequence: u64,
    entries: BTreeMap<String, StoredEntry>,
}

struct StoredEntry {
    value: Vec<u8>,
    sequence: u64,
    created: DateTime<Utc>,
    written: Instant,
}

struct StreamData {
    config: StreamConfig,
    messages: BTreeMap<u64, StoredMessage>,
    last_sequence: u64,
    last_time: Option<DateTime<Utc>>,
}

struct StoredMessage {
    subject: String,
    data: Vec<u8>,
    time: DateTime<Utc>,
    written: Instant,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create bucket `name` or update the TTL of an existing one.
    ///
    /// A zero TTL keeps entries forever.
    pub fn create_bucket(&self, name: &str, ttl: Duration) -> Arc<InMemoryBucket> {
        let mut buckets = self.buckets.write();

        let bucket = buckets
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(bucket = name, ?ttl, "Creating bucket");
                Arc::new(InMemoryBucket {
                    name: name.to_string(),
                    data: Mutex::new(BucketData {
                        ttl,
                        sequence: 0,
                        entries: BTreeMap::new(),
                    }),
                })
            })
            .clone();

        bucket.data.lock().ttl = ttl;
        bucket
    }

    pub fn bucket(&self, name: &str) -> Result<Arc<InMemoryBucket>, StoreError> {
        self.buckets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("bucket {name}")))
    }

    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn delete_bucket(&self, name: &str) -> Result<(), StoreError> {
        self.buckets
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("bucket {name}")))
    }

    /// Remove a stream and all of its messages.
    pub fn delete_stream(&self, stream: &str) -> Result<(), StoreError> {
        self.streams
            .write()
            .remove(stream)
            .map(|_| ())
            .ok_or_else(|| stream_not_found(stream))
    }

    fn with_stream<T>(
        &self,
        stream: &str,
        f: impl FnOnce(&mut StreamData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut streams = self.streams.write();
        let data = streams
            .get_mut(stream)
            .ok_or_else(|| stream_not_found(stream))?;

        data.expire();
        f(data)
    }
}

fn stream_not_found(stream: &str) -> StoreError {
    StoreError::NotFound(format!("stream {stream}"))
}

fn validate_stream_config(config: &StreamConfig) -> Result<(), StoreError> {
    if config.name.is_empty() {
        return Err(StoreError::InvalidConfig("stream name is required".to_string()));
    }
    if config.name.contains(['.', '*', '>', ' ']) {
        return Err(StoreError::InvalidConfig(format!(
            "invalid stream name {}",
            config.name
        )));
    }
    if config.subjects.is_empty() {
        return Err(StoreError::InvalidConfig(format!(
            "stream {} needs at least one subject",
            config.name
        )));
    }
    if config.max_messages < -1 {
        return Err(StoreError::InvalidConfig(format!(
            "max messages must be -1 or greater, got {}",
            config.max_messages
        )));
    }
    Ok(())
}

/// Every subject must route to exactly one stream, so no other stream may
/// listen on a subject `config` would also take.
fn check_overlap(
    streams: &HashMap<String, StreamData>,
    config: &StreamConfig,
) -> Result<(), StoreError> {
    let overlapping = streams
        .values()
        .filter(|s| s.config.name != config.name)
        .find(|s| {
            config.subjects.iter().any(|subject| {
                s.config
                    .subjects
                    .iter()
                    .any(|other| subject_matches(other, subject) || subject_matches(subject, other))
            })
        });

    match overlapping {
        Some(other) => Err(StoreError::InvalidConfig(format!(
            "subjects overlap with stream {}",
            other.config.name
        ))),
        None => Ok(()),
    }
}

/// Token-wise subject match supporting `*` (one token) and `>` (the rest).
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

impl StreamData {
    fn expire(&mut self) {
        if self.config.max_age.is_zero() {
            return;
        }

        let max_age = self.config.max_age;
        self.messages.retain(|_, m| m.written.elapsed() < max_age);
    }

    fn trim_to_limit(&mut self) {
        let Ok(limit) = usize::try_from(self.config.max_messages) else {
            return;
        };

        while self.messages.len() > limit {
            self.messages.pop_first();
        }
    }

    fn listens_on(&self, subject: &str) -> bool {
        self.config
            .subjects
            .iter()
            .any(|pattern| subject_matches(pattern, subject))
    }

    fn state(&self) -> StreamState {
        StreamState {
            messages: self.messages.len() as u64,
            first_sequence: self
                .messages
                .keys()
                .next()
                .copied()
                .unwrap_or(self.last_sequence + 1),
            last_sequence: self.last_sequence,
            last_time: self.last_time,
        }
    }
}

impl BucketData {
    fn expire(&mut self) {
        if self.ttl.is_zero() {
            return;
        }

        let ttl = self.ttl;
        self.entries.retain(|_, e| e.written.elapsed() < ttl);
    }

    fn write(&mut self, key: &str, value: &[u8]) -> u64 {
        self.sequence += 1;
        let now = Utc::now();

        let created = self
            .entries
            .get(key)
            .map(|e| e.created)
            .unwrap_or(now);

        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_vec(),
                sequence: self.sequence,
                created,
                written: Instant::now(),
            },
        );

        self.sequence
    }

    fn live_sequence(&self, key: &str) -> u64 {
        self.entries.get(key).map(|e| e.sequence).unwrap_or(0)
    }
}

impl InMemoryBucket {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn locked(&self) -> parking_lot::MutexGuard<'_, BucketData> {
        let mut data = self.data.lock();
        data.expire();
        data
    }
}

#[async_trait]
impl KeyValueBucket for InMemoryBucket {
    async fn status(&self) -> Result<BucketStatus, StoreError> {
        let data = self.locked();
        Ok(BucketStatus {
            bucket: self.name.clone(),
            ttl: data.ttl,
            values: data.entries.len() as u64,
        })
    }

    async fn create(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        let mut data = self.locked();
        if data.entries.contains_key(key) {
            return Err(StoreError::AlreadyExists { key: key.to_string() });
        }

        Ok(data.write(key, value))
    }

    async fn update(&self, key: &str, value: &[u8], last: u64) -> Result<u64, StoreError> {
        let mut data = self.locked();
        let actual = data.live_sequence(key);
        if actual == 0 || actual != last {
            return Err(StoreError::WrongSequence {
                key: key.to_string(),
                expected: last,
                actual,
            });
        }

        Ok(data.write(key, value))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        Ok(self.locked().write(key, value))
    }

    async fn get(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        let data = self.locked();
        Ok(data.entries.get(key).map(|e| KvEntry {
            key: key.to_string(),
            value: e.value.clone(),
            sequence: e.sequence,
            created: e.created,
        }))
    }

    async fn delete(&self, key: &str, last: Option<u64>) -> Result<(), StoreError> {
        let mut data = self.locked();

        if let Some(last) = last {
            let actual = data.live_sequence(key);
            if actual != last {
                return Err(StoreError::WrongSequence {
                    key: key.to_string(),
                    expected: last,
                    actual,
                });
            }
        }

        data.entries.remove(key);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<KvEntry>, StoreError> {
        let data = self.locked();
        Ok(data
            .entries
            .iter()
            .map(|(key, e)| KvEntry {
                key: key.clone(),
                value: e.value.clone(),
                sequence: e.sequence,
                created: e.created,
            })
            .collect())
    }
}

#[async_trait]
impl StreamStore for InMemoryStore {
    async fn stream_exists(&self, stream: &str) -> Result<bool, StoreError> {
        Ok(self.streams.read().contains_key(stream))
    }

    async fn load_or_create_stream(&self, config: &StreamConfig) -> Result<StreamConfig, StoreError> {
        let mut streams = self.streams.write();
        if let Some(existing) = streams.get(&config.name) {
            return Ok(existing.config.clone());
        }

        validate_stream_config(config)?;

        check_overlap(&streams, config)?;

        debug!(stream = %config.name, subjects = ?config.subjects, "Creating stream");
        streams.insert(
            config.name.clone(),
            StreamData {
                config: config.clone(),
                messages: BTreeMap::new(),
                last_sequence: 0,
                last_time: None,
            },
        );

        Ok(config.clone())
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamConfig, StoreError> {
        validate_stream_config(config)?;

        let mut streams = self.streams.write();
        check_overlap(&streams, config)?;

        let data = streams
            .get_mut(&config.name)
            .ok_or_else(|| stream_not_found(&config.name))?;

        debug!(stream = %config.name, max_messages = config.max_messages, "Updating stream");
        data.expire();
        data.config = config.clone();
        data.trim_to_limit();
        Ok(data.config.clone())
    }

    async fn stream_config(&self, stream: &str) -> Result<StreamConfig, StoreError> {
        self.with_stream(stream, |data| Ok(data.config.clone()))
    }

    async fn stream_names(&self, subject: Option<&str>) -> Result<Vec<String>, StoreError> {
        let streams = self.streams.read();
        let mut names: Vec<String> = streams
            .values()
            .filter(|s| subject.map_or(true, |subject| s.listens_on(subject)))
            .map(|s| s.config.name.clone())
            .collect();

        names.sort();
        Ok(names)
    }

    async fn append(&self, subject: &str, data: &[u8]) -> Result<u64, StoreError> {
        let mut streams = self.streams.write();
        let stream = streams
            .values_mut()
            .find(|s| s.listens_on(subject))
            .ok_or_else(|| StoreError::NoResponders(subject.to_string()))?;

        stream.expire();

        if let Ok(limit) = usize::try_from(stream.config.max_messages) {
            if stream.messages.len() >= limit {
                match stream.config.discard {
                    DiscardPolicy::New => {
                        return Err(StoreError::CapacityFull {
                            stream: stream.config.name.clone(),
                        })
                    }
                    DiscardPolicy::Old => {
                        while !stream.messages.is_empty() && stream.messages.len() >= limit {
                            stream.messages.pop_first();
                        }
                    }
                }
            }
        }

        // a zero cap with discard-old leaves no room at all
        if stream.config.max_messages == 0 {
            return Err(StoreError::CapacityFull {
                stream: stream.config.name.clone(),
            });
        }

        let now = Utc::now();
        stream.last_sequence += 1;
        stream.last_time = Some(now);
        stream.messages.insert(
            stream.last_sequence,
            StoredMessage {
                subject: subject.to_string(),
                data: data.to_vec(),
                time: now,
                written: Instant::now(),
            },
        );

        Ok(stream.last_sequence)
    }

    async fn read_message(&self, stream: &str, sequence: u64) -> Result<StreamMessage, StoreError> {
        self.with_stream(stream, |data| {
            data.messages
                .get(&sequence)
                .map(|m| StreamMessage {
                    subject: m.subject.clone(),
                    sequence,
                    data: m.data.clone(),
                    time: m.time,
                })
                .ok_or_else(|| StoreError::NotFound(format!("message {sequence} in {stream}")))
        })
    }

    async fn delete_message(&self, stream: &str, sequence: u64) -> Result<(), StoreError> {
        self.with_stream(stream, |data| {
            data.messages
                .remove(&sequence)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(format!("message {sequence} in {stream}")))
        })
    }

    async fn purge(&self, stream: &str) -> Result<(), StoreError> {
        self.with_stream(stream, |data| {
            data.messages.clear();
            Ok(())
        })
    }

    async fn stream_info(&self, stream: &str) -> Result<StreamState, StoreError> {
        self.with_stream(stream, |data| Ok(data.state()))
    }
}
