// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP store API tests: router level via `oneshot`, and end to end through
//! `HttpStore` against a served router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use fleetlock_core::domain::governor::{default_subject, GovernorSpec};
use fleetlock_core::domain::store::{KeyValueBucket, StoreError, StreamStore};
use fleetlock_core::infrastructure::http_store::HttpStore;
use fleetlock_core::infrastructure::memory_store::InMemoryStore;
use fleetlock_core::presentation::api::router;
use fleetlock_core::{Governor, GovernorManager};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = router(InMemoryStore::new());
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_create_conflict_maps_to_409() {
    let store = InMemoryStore::new();
    store.create_bucket("LE", Duration::from_secs(30));
    let app = router(store);

    let body = serde_json::json!({ "value": "bm9kZS0x" });
    let first = app
        .clone()
        .oneshot(json_request("POST", "/v1/buckets/LE/keys/leader/create", body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_json(first).await["sequence"], 1);

    let second = app
        .oneshot(json_request("POST", "/v1/buckets/LE/keys/leader/create", body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let error = body_json(second).await;
    assert_eq!(error["kind"], "already_exists");
    assert_eq!(error["detail"]["key"], "leader");
}

#[tokio::test]
async fn test_full_stream_maps_to_429() {
    let store = InMemoryStore::new();
    let spec = GovernorSpec {
        name: "jobs".to_string(),
        subject: default_subject("jobs"),
        limit: 1,
        max_age: Duration::from_secs(60),
        replicas: 1,
    };
    store.load_or_create_stream(&spec.stream_config()).await.unwrap();
    let app = router(store);

    let publish = serde_json::json!({ "subject": "$GOVERNOR.campaign.jobs", "data": "YQ==" });
    let ok = app
        .clone()
        .oneshot(json_request("POST", "/v1/publish", publish.clone()))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let full = app
        .oneshot(json_request("POST", "/v1/publish", publish))
        .await
        .unwrap();
    assert_eq!(full.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(full).await["kind"], "capacity_full");
}

#[tokio::test]
async fn test_unknown_bucket_is_404() {
    let app = router(InMemoryStore::new());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/buckets/NOPE")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["kind"], "not_found");
}

async fn serve() -> HttpStore {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router(InMemoryStore::new())).await.unwrap();
    });

    HttpStore::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_http_store_bucket_roundtrip() {
    let store = serve().await;
    store.health().await.unwrap();

    let status = store.create_bucket("LE", Duration::from_secs(30)).await.unwrap();
    assert_eq!(status.ttl, Duration::from_secs(30));

    let bucket = store.bucket("LE");
    let seq = bucket.create("leader", b"node-1").await.unwrap();
    assert!(matches!(
        bucket.create("leader", b"node-2").await,
        Err(StoreError::AlreadyExists { .. })
    ));

    let next = bucket.update("leader", b"node-1", seq).await.unwrap();
    assert!(matches!(
        bucket.update("leader", b"node-1", seq).await,
        Err(StoreError::WrongSequence { expected, actual, .. }) if expected == seq && actual == next
    ));

    let entry = bucket.get("leader").await.unwrap().unwrap();
    assert_eq!(entry.value_string(), "node-1");
    assert_eq!(bucket.entries().await.unwrap().len(), 1);

    bucket.delete("leader", Some(next)).await.unwrap();
    assert!(bucket.get("leader").await.unwrap().is_none());
    assert_eq!(store.bucket_names().await.unwrap(), vec!["LE"]);
}

#[tokio::test]
async fn test_http_store_escapes_names() {
    let store = serve().await;
    store.create_bucket("LE/nightly", Duration::from_secs(30)).await.unwrap();

    let bucket = store.bucket("LE/nightly");
    let seq = bucket.create("jobs/nightly?x#1", b"node-1").await.unwrap();
    bucket.update("jobs/nightly?x#1", b"node-1", seq).await.unwrap();

    let entry = bucket.get("jobs/nightly?x#1").await.unwrap().unwrap();
    assert_eq!(entry.key, "jobs/nightly?x#1");
    assert!(bucket.get("jobs").await.unwrap().is_none());

    bucket.delete("jobs/nightly?x#1", None).await.unwrap();
    assert!(bucket.entries().await.unwrap().is_empty());
    assert_eq!(store.bucket_names().await.unwrap(), vec!["LE/nightly"]);
}

#[tokio::test]
async fn test_governor_over_http() {
    let store = Arc::new(serve().await);

    let spec = GovernorSpec {
        name: "backups".to_string(),
        subject: default_subject("backups"),
        limit: 1,
        max_age: Duration::from_secs(600),
        replicas: 1,
    };
    let manager = GovernorManager::new(store.clone(), spec, false).await.unwrap();
    assert_eq!(manager.limit(), 1);

    let governor = Governor::new("backups", store.clone(), Default::default());
    let lease = governor.start(&CancellationToken::new(), "node-1").await.unwrap();
    assert_eq!(manager.active().await.unwrap(), 1);

    let other = Governor::new("backups", store.clone(), Default::default());
    let deadline = tokio::time::Instant::now() + Duration::from_millis(600);
    assert!(other
        .start_with_deadline(&CancellationToken::new(), "node-2", Some(deadline))
        .await
        .unwrap_err()
        .is_context());

    lease.release().await.unwrap();
    assert_eq!(manager.active().await.unwrap(), 0);
    assert!(manager.last_active().await.unwrap().is_some());

    assert!(store.stream_exists("GOVERNOR_backups").await.unwrap());
    assert!(!store.stream_exists("GOVERNOR_missing").await.unwrap());
}
