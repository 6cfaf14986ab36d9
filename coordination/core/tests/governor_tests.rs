// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for governor admission, release and administration.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetlock_core::domain::backoff::BackoffPolicy;
use fleetlock_core::domain::events::{CoordinationEvent, GovernorEventType};
use fleetlock_core::domain::governor::{default_subject, GovernorError, GovernorOptions, GovernorSpec};
use fleetlock_core::domain::store::{
    StoreError, StreamConfig, StreamMessage, StreamState, StreamStore,
};
use fleetlock_core::infrastructure::event_bus::EventBus;
use fleetlock_core::infrastructure::memory_store::InMemoryStore;
use fleetlock_core::{Governor, GovernorManager};
use tokio_util::sync::CancellationToken;

fn spec(name: &str, limit: u64, max_age: Duration) -> GovernorSpec {
    GovernorSpec {
        name: name.to_string(),
        subject: default_subject(name),
        limit,
        max_age,
        replicas: 1,
    }
}

fn fast_options() -> GovernorOptions {
    GovernorOptions {
        interval: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Delegating store that counts slot deletions and can fail the next one.
struct CountingStore {
    inner: InMemoryStore,
    deletes: AtomicUsize,
    fail_next_delete: AtomicBool,
}

impl CountingStore {
    fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            deletes: AtomicUsize::new(0),
            fail_next_delete: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StreamStore for CountingStore {
    async fn stream_exists(&self, stream: &str) -> Result<bool, StoreError> {
        self.inner.stream_exists(stream).await
    }

    async fn load_or_create_stream(&self, config: &StreamConfig) -> Result<StreamConfig, StoreError> {
        self.inner.load_or_create_stream(config).await
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamConfig, StoreError> {
        self.inner.update_stream(config).await
    }

    async fn stream_config(&self, stream: &str) -> Result<StreamConfig, StoreError> {
        self.inner.stream_config(stream).await
    }

    async fn stream_names(&self, subject: Option<&str>) -> Result<Vec<String>, StoreError> {
        self.inner.stream_names(subject).await
    }

    async fn append(&self, subject: &str, data: &[u8]) -> Result<u64, StoreError> {
        self.inner.append(subject, data).await
    }

    async fn read_message(&self, stream: &str, sequence: u64) -> Result<StreamMessage, StoreError> {
        self.inner.read_message(stream, sequence).await
    }

    async fn delete_message(&self, stream: &str, sequence: u64) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Transport("connection reset".to_string()));
        }
        self.inner.delete_message(stream, sequence).await
    }

    async fn purge(&self, stream: &str) -> Result<(), StoreError> {
        self.inner.purge(stream).await
    }

    async fn stream_info(&self, stream: &str) -> Result<StreamState, StoreError> {
        self.inner.stream_info(stream).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_admission_never_exceeds_limit() {
    let store = Arc::new(InMemoryStore::new());
    GovernorManager::new(store.clone(), spec("batch", 100, Duration::from_secs(3600)), false)
        .await
        .unwrap();

    let holding = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let ctx = CancellationToken::new();

    let mut workers = Vec::new();
    for n in 0..1000 {
        let governor = Governor::new("batch", store.clone(), fast_options());
        let holding = holding.clone();
        let peak = peak.clone();
        let completed = completed.clone();
        let ctx = ctx.clone();

        workers.push(tokio::spawn(async move {
            let lease = governor.start(&ctx, &format!("worker-{n}")).await.unwrap();

            let now = holding.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(50)).await;

            holding.fetch_sub(1, Ordering::SeqCst);
            lease.release().await.unwrap();
            completed.fetch_add(1, Ordering::SeqCst);
        }));
    }

    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(completed.load(Ordering::SeqCst), 1000);
    assert!(peak.load(Ordering::SeqCst) <= 100);
    assert_eq!(peak.load(Ordering::SeqCst), 100);
    assert_eq!(store.stream_info("GOVERNOR_batch").await.unwrap().messages, 0);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let store = Arc::new(CountingStore::new(InMemoryStore::new()));
    GovernorManager::new(store.clone(), spec("jobs", 2, Duration::from_secs(60)), false)
        .await
        .unwrap();

    let governor = Governor::new("jobs", store.clone(), GovernorOptions::default());
    let lease = governor.start(&CancellationToken::new(), "w1").await.unwrap();

    lease.release().await.unwrap();
    lease.release().await.unwrap();
    lease.release().await.unwrap();

    assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
    assert!(lease.is_released().await);
    assert!(!governor.is_running());
}

#[tokio::test]
async fn test_failed_release_can_be_retried() {
    let store = Arc::new(CountingStore::new(InMemoryStore::new()));
    GovernorManager::new(store.clone(), spec("jobs", 1, Duration::from_secs(60)), false)
        .await
        .unwrap();

    let governor = Governor::new("jobs", store.clone(), GovernorOptions::default());
    let lease = governor.start(&CancellationToken::new(), "w1").await.unwrap();

    store.fail_next_delete.store(true, Ordering::SeqCst);
    let err = lease.release().await.unwrap_err();
    assert!(matches!(err.store_error(), Some(StoreError::Transport(_))));
    assert!(!lease.is_released().await);
    assert!(governor.is_running());
    assert_eq!(store.stream_info("GOVERNOR_jobs").await.unwrap().messages, 1);

    lease.release().await.unwrap();
    lease.release().await.unwrap();

    assert_eq!(store.deletes.load(Ordering::SeqCst), 2);
    assert_eq!(store.stream_info("GOVERNOR_jobs").await.unwrap().messages, 0);
}

#[tokio::test]
async fn test_release_after_eviction_succeeds() {
    let store = Arc::new(InMemoryStore::new());
    let manager = GovernorManager::new(store.clone(), spec("jobs", 1, Duration::from_secs(60)), false)
        .await
        .unwrap();

    let governor = Governor::new("jobs", store.clone(), GovernorOptions::default());
    let lease = governor.start(&CancellationToken::new(), "stuck").await.unwrap();

    assert_eq!(manager.evict(lease.sequence()).await.unwrap(), "stuck");
    lease.release().await.unwrap();
    assert!(!governor.is_running());
}

#[tokio::test]
async fn test_evict_frees_slot_for_new_claimant() {
    let store = Arc::new(InMemoryStore::new());
    let bus = EventBus::new(32);
    let mut events = bus.subscribe();

    let manager = GovernorManager::new(store.clone(), spec("jobs", 1, Duration::from_secs(60)), false)
        .await
        .unwrap()
        .with_event_bus(bus.clone());

    let holder = Governor::new("jobs", store.clone(), fast_options());
    let held = holder.start(&CancellationToken::new(), "node-a").await.unwrap();

    let claimant = Governor::new("jobs", store.clone(), fast_options());
    let ctx = CancellationToken::new();
    let waiting = {
        let ctx = ctx.clone();
        tokio::spawn(async move { claimant.start(&ctx, "node-b").await.map(|l| l.sequence()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    assert_eq!(manager.evict(held.sequence()).await.unwrap(), "node-a");

    let seq = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(seq > held.sequence());

    let err = manager.evict(held.sequence()).await.unwrap_err();
    assert!(err.store_error().is_some_and(|e| e.is_not_found()));

    match events.recv().await.unwrap() {
        CoordinationEvent::Governor(event) => {
            assert_eq!(event.event_type, GovernorEventType::Eviction);
            assert_eq!(event.identity, "node-a");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_leaves_no_orphan() {
    let store = Arc::new(InMemoryStore::new());
    GovernorManager::new(store.clone(), spec("jobs", 1, Duration::from_secs(3600)), false)
        .await
        .unwrap();

    let holder = Governor::new("jobs", store.clone(), GovernorOptions::default());
    let _held = holder.start(&CancellationToken::new(), "holder").await.unwrap();

    let waiter = Arc::new(Governor::new("jobs", store.clone(), GovernorOptions::default()));
    let ctx = CancellationToken::new();
    let handle = {
        let waiter = waiter.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { waiter.start(&ctx, "waiter").await.map(|l| l.sequence()) })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(waiter.is_running());
    ctx.cancel();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, GovernorError::Cancelled { .. }));
    assert!(err.is_context());
    assert!(!waiter.is_running());
    assert_eq!(store.stream_info("GOVERNOR_jobs").await.unwrap().messages, 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_publishes_timeout() {
    let store = Arc::new(InMemoryStore::new());
    GovernorManager::new(store.clone(), spec("jobs", 1, Duration::from_secs(3600)), false)
        .await
        .unwrap();

    let bus = EventBus::new(32);
    let mut events = bus.subscribe();

    let holder = Governor::new("jobs", store.clone(), GovernorOptions::default());
    let _held = holder.start(&CancellationToken::new(), "holder").await.unwrap();

    let waiter = Governor::new("jobs", store.clone(), GovernorOptions::default()).with_event_bus(bus);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let err = waiter
        .start_with_deadline(&CancellationToken::new(), "waiter", Some(deadline))
        .await
        .unwrap_err();

    assert!(matches!(err, GovernorError::DeadlineExceeded { .. }));
    match events.try_recv().unwrap() {
        CoordinationEvent::Governor(event) => {
            assert_eq!(event.event_type, GovernorEventType::Timeout);
            assert_eq!(event.sequence, 0);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_keep_slot_until_max_age() {
    let store = Arc::new(InMemoryStore::new());
    let manager = GovernorManager::new(store.clone(), spec("hourly", 1, Duration::from_secs(60)), false)
        .await
        .unwrap();

    let options = GovernorOptions {
        leave_on_completion: false,
        ..Default::default()
    };

    let first = Governor::new("hourly", store.clone(), options.clone());
    let lease = first.start(&CancellationToken::new(), "run-1").await.unwrap();
    lease.release().await.unwrap();
    assert!(!first.is_running());
    assert_eq!(manager.active().await.unwrap(), 1);

    let second = Governor::new("hourly", store.clone(), options);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let err = second
        .start_with_deadline(&CancellationToken::new(), "run-2", Some(deadline))
        .await
        .unwrap_err();
    assert!(matches!(err, GovernorError::DeadlineExceeded { .. }));

    tokio::time::sleep(Duration::from_secs(31)).await;
    let lease = second.start(&CancellationToken::new(), "run-2").await.unwrap();
    assert_eq!(lease.sequence(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_driven_retries() {
    let store = Arc::new(InMemoryStore::new());
    GovernorManager::new(store.clone(), spec("jobs", 1, Duration::from_secs(3600)), false)
        .await
        .unwrap();

    let holder = Governor::new("jobs", store.clone(), GovernorOptions::default());
    let held = holder.start(&CancellationToken::new(), "holder").await.unwrap();

    let options = GovernorOptions {
        backoff: Some(Arc::new(BackoffPolicy::five_sec())),
        ..Default::default()
    };
    let waiter = Governor::new("jobs", store.clone(), options);

    let release = async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        held.release().await.unwrap();
    };
    let cancel = CancellationToken::new();
    let (lease, ()) = tokio::join!(waiter.start(&cancel, "waiter"), release);

    assert_eq!(lease.unwrap().sequence(), 2);
}

#[tokio::test]
async fn test_manager_set_limit_takes_effect() {
    let store = Arc::new(InMemoryStore::new());
    let manager = GovernorManager::new(store.clone(), spec("jobs", 1, Duration::from_secs(60)), false)
        .await
        .unwrap();

    let a = Governor::new("jobs", store.clone(), fast_options());
    let _a = a.start(&CancellationToken::new(), "a").await.unwrap();

    manager.set_limit(2).await.unwrap();
    assert_eq!(manager.limit(), 2);

    let b = Governor::new("jobs", store.clone(), fast_options());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    b.start_with_deadline(&CancellationToken::new(), "b", Some(deadline))
        .await
        .unwrap();
    assert_eq!(manager.active().await.unwrap(), 2);
}
