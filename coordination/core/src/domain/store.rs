// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Keyed Log Store Contract
//!
//! The election and governor primitives are clients of an external replicated
//! log. This module defines the slice of that store they rely on:
//!
//! | Trait | Used by | Guarantees relied upon |
//! |-------|---------|------------------------|
//! | [`KeyValueBucket`] | `Election` | create-if-absent, compare-and-set on sequence, bucket TTL eviction |
//! | [`StreamStore`] | `Governor`, `GovernorManager` | max-message cap with discard-new, max-age eviction, delete by sequence |
//!
//! Sequences are assigned by the store only. Callers never invent them.
//!
//! Implementations live in `crate::infrastructure` (`InMemoryStore`,
//! `HttpStore`).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single key/value entry as held by a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvEntry {
    pub key: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    /// Store-assigned revision of this entry.
    pub sequence: u64,
    pub created: DateTime<Utc>,
}

impl KvEntry {
    /// Value interpreted as a campaigner name.
    pub fn value_string(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// Bucket level configuration relevant to campaigners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStatus {
    pub bucket: String,
    /// Entries not rewritten within this window are evicted.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Live entries in the bucket.
    pub values: u64,
}

/// Admission behaviour once a stream reaches its message cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardPolicy {
    /// Reject new writes (hard cap).
    New,
    /// Evict the oldest entry to make room (sliding window).
    Old,
}

/// Durability class of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    File,
    Memory,
}

/// Administrative configuration of an admission stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub subjects: Vec<String>,
    /// Maximum retained messages, `-1` for unlimited.
    pub max_messages: i64,
    /// Messages older than this are evicted, zero disables eviction.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    pub replicas: u32,
    pub storage: StorageClass,
    pub discard: DiscardPolicy,
    /// Publish de-duplication window, zero disables it.
    #[serde(with = "humantime_serde", default)]
    pub duplicate_window: Duration,
}

/// Runtime state of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub messages: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    /// Time of the most recent write, `None` when nothing was ever written.
    pub last_time: Option<DateTime<Utc>>,
}

/// A message read back from a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub subject: String,
    pub sequence: u64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub time: DateTime<Utc>,
}

/// Serde adapter carrying raw bytes as standard base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Errors returned by a keyed log store.
///
/// Serializable so the HTTP store can carry them across the wire unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StoreError {
    #[error("key {key} already exists")]
    AlreadyExists { key: String },

    #[error("wrong last sequence for {key}: expected {expected}, found {actual}")]
    WrongSequence { key: String, expected: u64, actual: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("maximum messages exceeded on {stream}")]
    CapacityFull { stream: String },

    #[error("no stream matches subject {0}")]
    NoResponders(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// True for conditions that are part of normal contention rather than
    /// failures: a taken key, a stale sequence or a full admission stream.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyExists { .. }
                | StoreError::WrongSequence { .. }
                | StoreError::CapacityFull { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Key/value view of a bucket with optimistic concurrency and TTL eviction.
#[async_trait]
pub trait KeyValueBucket: Send + Sync {
    /// Bucket configuration, chiefly the TTL.
    async fn status(&self) -> Result<BucketStatus, StoreError>;

    /// Write `value` only when `key` holds no live entry.
    async fn create(&self, key: &str, value: &[u8]) -> Result<u64, StoreError>;

    /// Write `value` only when the live entry for `key` has sequence `last`.
    async fn update(&self, key: &str, value: &[u8], last: u64) -> Result<u64, StoreError>;

    /// Unconditional write.
    async fn put(&self, key: &str, value: &[u8]) -> Result<u64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<KvEntry>, StoreError>;

    /// Remove `key`, optionally only when its sequence equals `last`.
    async fn delete(&self, key: &str, last: Option<u64>) -> Result<(), StoreError>;

    /// All live entries, ordered by key.
    async fn entries(&self) -> Result<Vec<KvEntry>, StoreError>;
}

/// Stream administration and admission operations.
#[async_trait]
pub trait StreamStore: Send + Sync {
    async fn stream_exists(&self, stream: &str) -> Result<bool, StoreError>;

    /// Return the existing stream's configuration or create it from `config`.
    async fn load_or_create_stream(&self, config: &StreamConfig) -> Result<StreamConfig, StoreError>;

    /// Replace the configuration of an existing stream.
    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamConfig, StoreError>;

    async fn stream_config(&self, stream: &str) -> Result<StreamConfig, StoreError>;

    /// Names of streams, optionally only those listening on `subject`.
    async fn stream_names(&self, subject: Option<&str>) -> Result<Vec<String>, StoreError>;

    /// Append to whichever stream listens on `subject`.
    async fn append(&self, subject: &str, data: &[u8]) -> Result<u64, StoreError>;

    async fn read_message(&self, stream: &str, sequence: u64) -> Result<StreamMessage, StoreError>;

    async fn delete_message(&self, stream: &str, sequence: u64) -> Result<(), StoreError>;

    /// Remove every message, keeping the sequence counter.
    async fn purge(&self, stream: &str) -> Result<(), StoreError>;

    async fn stream_info(&self, stream: &str) -> Result<StreamState, StoreError>;
}
