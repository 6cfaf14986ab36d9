// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API serving an [`InMemoryStore`].
//!
//! Failures are returned as the serialized [`StoreError`] with a matching
//! status so `HttpStore` can hand the same error back to its caller.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};

use crate::domain::store::{
    BucketStatus, KeyValueBucket, KvEntry, StoreError, StreamConfig, StreamMessage, StreamState,
    StreamStore,
};
use crate::infrastructure::http_store::wire::{
    CreateBucketRequest, DeleteQuery, PublishRequest, SequenceResponse, SubjectQuery,
    UpdateRequest, ValueRequest,
};
use crate::infrastructure::memory_store::InMemoryStore;

#[derive(Clone)]
pub struct ApiState {
    store: InMemoryStore,
    start_time: Instant,
}

impl ApiState {
    pub fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            start_time: Instant::now(),
        }
    }
}

/// [`StoreError`] as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            StoreError::AlreadyExists { .. } | StoreError::WrongSequence { .. } => {
                StatusCode::CONFLICT
            }
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::CapacityFull { .. } => StatusCode::TOO_MANY_REQUESTS,
            StoreError::NoResponders(_) => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            StoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            StoreError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.0)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(store: InMemoryStore) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/buckets", get(list_buckets_handler))
        .route(
            "/v1/buckets/{bucket}",
            put(create_bucket_handler)
                .get(bucket_status_handler)
                .delete(delete_bucket_handler),
        )
        .route("/v1/buckets/{bucket}/keys", get(list_keys_handler))
        .route(
            "/v1/buckets/{bucket}/keys/{key}",
            get(get_key_handler)
                .put(put_key_handler)
                .delete(delete_key_handler),
        )
        .route("/v1/buckets/{bucket}/keys/{key}/create", post(create_key_handler))
        .route("/v1/buckets/{bucket}/keys/{key}/update", post(update_key_handler))
        .route(
            "/v1/streams",
            get(list_streams_handler).post(load_or_create_stream_handler),
        )
        .route(
            "/v1/streams/{stream}",
            get(stream_config_handler)
                .put(update_stream_handler)
                .delete(delete_stream_handler),
        )
        .route("/v1/streams/{stream}/info", get(stream_info_handler))
        .route("/v1/streams/{stream}/purge", post(purge_stream_handler))
        .route(
            "/v1/streams/{stream}/messages/{sequence}",
            get(read_message_handler).delete(delete_message_handler),
        )
        .route("/v1/publish", post(publish_handler))
        .with_state(Arc::new(ApiState::new(store)))
}

async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

async fn list_buckets_handler(State(state): State<Arc<ApiState>>) -> Json<Vec<String>> {
    Json(state.store.bucket_names())
}

async fn create_bucket_handler(
    State(state): State<Arc<ApiState>>,
    Path(bucket): Path<String>,
    Json(request): Json<CreateBucketRequest>,
) -> ApiResult<BucketStatus> {
    let bucket = state.store.create_bucket(&bucket, request.ttl);
    Ok(Json(bucket.status().await?))
}

async fn bucket_status_handler(
    State(state): State<Arc<ApiState>>,
    Path(bucket): Path<String>,
) -> ApiResult<BucketStatus> {
    Ok(Json(state.store.bucket(&bucket)?.status().await?))
}

async fn delete_bucket_handler(
    State(state): State<Arc<ApiState>>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_bucket(&bucket)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_keys_handler(
    State(state): State<Arc<ApiState>>,
    Path(bucket): Path<String>,
) -> ApiResult<Vec<KvEntry>> {
    Ok(Json(state.store.bucket(&bucket)?.entries().await?))
}

async fn get_key_handler(
    State(state): State<Arc<ApiState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> ApiResult<Option<KvEntry>> {
    Ok(Json(state.store.bucket(&bucket)?.get(&key).await?))
}

async fn put_key_handler(
    State(state): State<Arc<ApiState>>,
    Path((bucket, key)): Path<(String, String)>,
    Json(request): Json<ValueRequest>,
) -> ApiResult<SequenceResponse> {
    let sequence = state.store.bucket(&bucket)?.put(&key, &request.value).await?;
    Ok(Json(SequenceResponse { sequence }))
}

async fn delete_key_handler(
    State(state): State<Arc<ApiState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    state.store.bucket(&bucket)?.delete(&key, query.last).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_key_handler(
    State(state): State<Arc<ApiState>>,
    Path((bucket, key)): Path<(String, String)>,
    Json(request): Json<ValueRequest>,
) -> ApiResult<SequenceResponse> {
    let sequence = state
        .store
        .bucket(&bucket)?
        .create(&key, &request.value)
        .await?;
    Ok(Json(SequenceResponse { sequence }))
}

async fn update_key_handler(
    State(state): State<Arc<ApiState>>,
    Path((bucket, key)): Path<(String, String)>,
    Json(request): Json<UpdateRequest>,
) -> ApiResult<SequenceResponse> {
    let sequence = state
        .store
        .bucket(&bucket)?
        .update(&key, &request.value, request.last)
        .await?;
    Ok(Json(SequenceResponse { sequence }))
}

async fn list_streams_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SubjectQuery>,
) -> ApiResult<Vec<String>> {
    Ok(Json(state.store.stream_names(query.subject.as_deref()).await?))
}

async fn load_or_create_stream_handler(
    State(state): State<Arc<ApiState>>,
    Json(config): Json<StreamConfig>,
) -> ApiResult<StreamConfig> {
    Ok(Json(state.store.load_or_create_stream(&config).await?))
}

async fn stream_config_handler(
    State(state): State<Arc<ApiState>>,
    Path(stream): Path<String>,
) -> ApiResult<StreamConfig> {
    Ok(Json(state.store.stream_config(&stream).await?))
}

async fn update_stream_handler(
    State(state): State<Arc<ApiState>>,
    Path(stream): Path<String>,
    Json(config): Json<StreamConfig>,
) -> ApiResult<StreamConfig> {
    if config.name != stream {
        return Err(StoreError::InvalidConfig(format!(
            "stream name {} does not match {stream}",
            config.name
        ))
        .into());
    }

    Ok(Json(state.store.update_stream(&config).await?))
}

async fn delete_stream_handler(
    State(state): State<Arc<ApiState>>,
    Path(stream): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_stream(&stream)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stream_info_handler(
    State(state): State<Arc<ApiState>>,
    Path(stream): Path<String>,
) -> ApiResult<StreamState> {
    Ok(Json(state.store.stream_info(&stream).await?))
}

async fn purge_stream_handler(
    State(state): State<Arc<ApiState>>,
    Path(stream): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.purge(&stream).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_message_handler(
    State(state): State<Arc<ApiState>>,
    Path((stream, sequence)): Path<(String, u64)>,
) -> ApiResult<StreamMessage> {
    Ok(Json(state.store.read_message(&stream, sequence).await?))
}

async fn delete_message_handler(
    State(state): State<Arc<ApiState>>,
    Path((stream, sequence)): Path<(String, u64)>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_message(&stream, sequence).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn publish_handler(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<PublishRequest>,
) -> ApiResult<SequenceResponse> {
    let sequence = state.store.append(&request.subject, &request.data).await?;
    Ok(Json(SequenceResponse { sequence }))
}
