// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP client for a keyed log store served by `fleetlock store serve`.
//!
//! Implements [`StreamStore`] directly and hands out [`HttpBucket`] handles
//! implementing [`KeyValueBucket`]. Store errors come back as serialized
//! [`StoreError`] bodies and are returned unchanged, so contention is
//! classified the same way as against an in-process store.

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::store::{
    base64_bytes, BucketStatus, KeyValueBucket, KvEntry, StoreError, StreamConfig, StreamMessage,
    StreamState, StreamStore,
};

/// Request and response bodies shared with `presentation::api`.
pub mod wire {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ValueRequest {
        #[serde(with = "base64_bytes")]
        pub value: Vec<u8>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct UpdateRequest {
        #[serde(with = "base64_bytes")]
        pub value: Vec<u8>,
        pub last: u64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct PublishRequest {
        pub subject: String,
        #[serde(with = "base64_bytes")]
        pub data: Vec<u8>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct CreateBucketRequest {
        #[serde(with = "humantime_serde")]
        pub ttl: Duration,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct SequenceResponse {
        pub sequence: u64,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct DeleteQuery {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub last: Option<u64>,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct SubjectQuery {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub subject: Option<String>,
    }
}

use wire::*;

/// Bytes left as-is inside a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Escape a bucket, key or stream name for use as one URL path segment.
fn segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
}

/// A bucket reached through an [`HttpStore`].
#[derive(Debug, Clone)]
pub struct HttpBucket {
    store: HttpStore,
    bucket: String,
}

impl HttpStore {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    /// Handle for bucket `name`. Nothing is checked until first use.
    pub fn bucket(&self, name: &str) -> HttpBucket {
        HttpBucket {
            store: self.clone(),
            bucket: name.to_string(),
        }
    }

    pub async fn create_bucket(&self, name: &str, ttl: Duration) -> Result<BucketStatus, StoreError> {
        let request = self
            .request(Method::PUT, &format!("/v1/buckets/{}", segment(name)))
            .json(&CreateBucketRequest { ttl });
        self.send_json(request).await
    }

    pub async fn bucket_names(&self) -> Result<Vec<String>, StoreError> {
        self.send_json(self.request(Method::GET, "/v1/buckets")).await
    }

    pub async fn health(&self) -> Result<(), StoreError> {
        self.send_empty(self.request(Method::GET, "/health")).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "Store request");
        self.client.request(method, url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(e.to_string())
            } else {
                StoreError::Transport(e.to_string())
            }
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();

        match serde_json::from_str::<StoreError>(&error_text) {
            Ok(store_error) => Err(store_error),
            Err(_) => Err(StoreError::Transport(format!("{status}: {error_text}"))),
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Transport(format!("failed to parse response: {e}")))
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), StoreError> {
        self.send(request).await.map(|_| ())
    }

    async fn send_sequence(&self, request: RequestBuilder) -> Result<u64, StoreError> {
        let response: SequenceResponse = self.send_json(request).await?;
        Ok(response.sequence)
    }
}

impl HttpBucket {
    fn key_path(&self, key: &str) -> String {
        format!("/v1/buckets/{}/keys/{}", segment(&self.bucket), segment(key))
    }
}

#[async_trait]
impl KeyValueBucket for HttpBucket {
    async fn status(&self) -> Result<BucketStatus, StoreError> {
        let request = self
            .store
            .request(Method::GET, &format!("/v1/buckets/{}", segment(&self.bucket)));
        self.store.send_json(request).await
    }

    async fn create(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        let request = self
            .store
            .request(Method::POST, &format!("{}/create", self.key_path(key)))
            .json(&ValueRequest { value: value.to_vec() });
        self.store.send_sequence(request).await
    }

    async fn update(&self, key: &str, value: &[u8], last: u64) -> Result<u64, StoreError> {
        let request = self
            .store
            .request(Method::POST, &format!("{}/update", self.key_path(key)))
            .json(&UpdateRequest {
                value: value.to_vec(),
                last,
            });
        self.store.send_sequence(request).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<u64, StoreError> {
        let request = self
            .store
            .request(Method::PUT, &self.key_path(key))
            .json(&ValueRequest { value: value.to_vec() });
        self.store.send_sequence(request).await
    }

    async fn get(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        let request = self.store.request(Method::GET, &self.key_path(key));
        self.store.send_json(request).await
    }

    async fn delete(&self, key: &str, last: Option<u64>) -> Result<(), StoreError> {
        let request = self
            .store
            .request(Method::DELETE, &self.key_path(key))
            .query(&DeleteQuery { last });
        self.store.send_empty(request).await
    }

    async fn entries(&self) -> Result<Vec<KvEntry>, StoreError> {
        let request = self
            .store
            .request(Method::GET, &format!("/v1/buckets/{}/keys", segment(&self.bucket)));
        self.store.send_json(request).await
    }
}

#[async_trait]
impl StreamStore for HttpStore {
    async fn stream_exists(&self, stream: &str) -> Result<bool, StoreError> {
        match self.stream_config(stream).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn load_or_create_stream(&self, config: &StreamConfig) -> Result<StreamConfig, StoreError> {
        self.send_json(self.request(Method::POST, "/v1/streams").json(config))
            .await
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamConfig, StoreError> {
        let request = self
            .request(Method::PUT, &format!("/v1/streams/{}", segment(&config.name)))
            .json(config);
        self.send_json(request).await
    }

    async fn stream_config(&self, stream: &str) -> Result<StreamConfig, StoreError> {
        self.send_json(self.request(Method::GET, &format!("/v1/streams/{}", segment(stream))))
            .await
    }

    async fn stream_names(&self, subject: Option<&str>) -> Result<Vec<String>, StoreError> {
        let request = self.request(Method::GET, "/v1/streams").query(&SubjectQuery {
            subject: subject.map(str::to_string),
        });
        self.send_json(request).await
    }

    async fn append(&self, subject: &str, data: &[u8]) -> Result<u64, StoreError> {
        let request = self.request(Method::POST, "/v1/publish").json(&PublishRequest {
            subject: subject.to_string(),
            data: data.to_vec(),
        });
        self.send_sequence(request).await
    }

    async fn read_message(&self, stream: &str, sequence: u64) -> Result<StreamMessage, StoreError> {
        self.send_json(self.request(
            Method::GET,
            &format!("/v1/streams/{}/messages/{sequence}", segment(stream)),
        ))
        .await
    }

    async fn delete_message(&self, stream: &str, sequence: u64) -> Result<(), StoreError> {
        self.send_empty(self.request(
            Method::DELETE,
            &format!("/v1/streams/{}/messages/{sequence}", segment(stream)),
        ))
        .await
    }

    async fn purge(&self, stream: &str) -> Result<(), StoreError> {
        self.send_empty(self.request(Method::POST, &format!("/v1/streams/{}/purge", segment(stream))))
            .await
    }

    async fn stream_info(&self, stream: &str) -> Result<StreamState, StoreError> {
        self.send_json(self.request(Method::GET, &format!("/v1/streams/{}/info", segment(stream))))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash() {
        let store = HttpStore::new("http://127.0.0.1:7420/", Duration::from_secs(1)).unwrap();
        assert_eq!(store.endpoint(), "http://127.0.0.1:7420");
    }

    #[test]
    fn test_wire_bodies() {
        let body = serde_json::to_value(UpdateRequest {
            value: b"node".to_vec(),
            last: 9,
        })
        .unwrap();
        assert_eq!(body["value"], "bm9kZQ==");
        assert_eq!(body["last"], 9);

        let ttl: CreateBucketRequest = serde_json::from_str(r#"{"ttl":"30s"}"#).unwrap();
        assert_eq!(ttl.ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_names_are_escaped_as_one_segment() {
        assert_eq!(segment("GOVERNOR_jobs"), "GOVERNOR_jobs");
        assert_eq!(segment("jobs/nightly?x"), "jobs%2Fnightly%3Fx");
        assert_eq!(segment("a b#c"), "a%20b%23c");

        let bucket = HttpStore::new("http://127.0.0.1:7420", Duration::from_secs(1))
            .unwrap()
            .bucket("LE/x");
        assert_eq!(bucket.key_path("../reset"), "/v1/buckets/LE%2Fx/keys/..%2Freset");
    }

    #[tokio::test]
    async fn test_unreachable_store_is_transport_error() {
        let store = HttpStore::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = store.stream_info("GOVERNOR_x").await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_) | StoreError::Timeout(_)));
        assert!(!err.is_contention());
    }
}
