// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Leader Election
//!
//! Single-leader mutual exclusion among any number of campaigners sharing one
//! key in a [`KeyValueBucket`]. Whoever manages to `create` the key is leader
//! and keeps it by rewriting the key with the sequence it last saw. The bucket
//! TTL evicts the key of a leader that stops renewing.
//!
//! All state transitions happen inside a single tick under the campaign lock:
//!
//! | State | Tick action | Success | Failure |
//! |-------|-------------|---------|---------|
//! | Candidate | `create(key)` | Leader, grace notifier spawned | stay Candidate, `tries += 1` |
//! | Leader | `update(key, last_seq)` | stay Leader | Candidate, grace cancelled, lost fired |
//!
//! A new leader does not announce itself straight away. A displaced leader
//! only notices on its next tick, up to one campaign interval later, so the
//! won notification is deferred by `interval + 50ms` and only fires if the
//! leadership is still held when the delay expires.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Campaign loop and leadership state machine

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::backoff::{interruptible_sleep, Backoff};
use crate::domain::election::{
    derived_interval, ElectionError, ElectionListener, ElectionOptions, ElectionState, GRACE_SLACK,
};
use crate::domain::store::KeyValueBucket;
use crate::infrastructure::telemetry;

/// A participant in one election.
///
/// Cloning yields another handle to the same participant, which is how
/// [`Election::stop`] and [`Election::is_leader`] are reached while
/// [`Election::start`] is blocking on another task.
#[derive(Clone)]
pub struct Election {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    key: String,
    bucket: Arc<dyn KeyValueBucket>,
    ttl: Duration,
    interval: Duration,
    backoff: Option<Arc<dyn Backoff>>,
    listener: Option<Arc<dyn ElectionListener>>,
    campaign: Mutex<Campaign>,
    /// Pending won notification; narrower than `campaign` so a failed renewal
    /// can cancel it without racing the notifier.
    grace: parking_lot::Mutex<Option<CancellationToken>>,
}

#[derive(Debug)]
struct Campaign {
    state: ElectionState,
    last_seq: Option<u64>,
    tries: u32,
    /// Incremented on every leadership acquisition.
    term: u64,
    /// Incremented on every `start`.
    run: u64,
    started: bool,
    cancel: Option<CancellationToken>,
}

impl Election {
    /// Join the election for `key` in `bucket` as `name`.
    ///
    /// Reads the bucket TTL, derives the campaign interval and validates both
    /// against `options.bounds`.
    pub async fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        bucket: Arc<dyn KeyValueBucket>,
        options: ElectionOptions,
    ) -> Result<Self, ElectionError> {
        let name = name.into();
        let key = key.into();

        let status = bucket.status().await.map_err(ElectionError::BucketStatus)?;
        let ttl = status.ttl;
        options.bounds.check_ttl(ttl)?;

        let interval = options
            .campaign_interval
            .unwrap_or_else(|| derived_interval(ttl));
        options.bounds.check_interval(interval, ttl)?;

        if interval.is_zero() {
            return Err(ElectionError::ZeroInterval);
        }

        debug!(election = %name, key = %key, ?ttl, ?interval, "Campaign interval configured");
        telemetry::set_campaign_interval(&name, interval);

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                key,
                bucket,
                ttl,
                interval,
                backoff: options.backoff,
                listener: options.listener,
                campaign: Mutex::new(Campaign {
                    state: ElectionState::Unknown,
                    last_seq: None,
                    tries: 0,
                    term: 0,
                    run: 0,
                    started: false,
                    cancel: None,
                }),
                grace: parking_lot::Mutex::new(None),
            }),
        })
    }

    /// Campaign until `ctx` is cancelled or [`Election::stop`] is called.
    pub async fn start(&self, ctx: &CancellationToken) -> Result<(), ElectionError> {
        let (token, run) = {
            let mut campaign = self.inner.campaign.lock().await;
            if campaign.started {
                return Err(ElectionError::AlreadyRunning);
            }

            let token = ctx.child_token();
            campaign.started = true;
            campaign.run += 1;
            campaign.cancel = Some(token.clone());
            campaign.state = ElectionState::Candidate;
            (token, campaign.run)
        };

        self.inner.campaign_loop(token, run).await;

        Ok(())
    }

    /// End the campaign. When leader, the lost notification has fired by the
    /// time this returns.
    pub async fn stop(&self) {
        let (token, run) = {
            let campaign = self.inner.campaign.lock().await;
            if !campaign.started {
                return;
            }
            (campaign.cancel.clone(), campaign.run)
        };

        if let Some(token) = token {
            token.cancel();
        }

        self.inner.shutdown(run).await;
    }

    pub async fn is_leader(&self) -> bool {
        self.inner.campaign.lock().await.state == ElectionState::Leader
    }

    pub async fn state(&self) -> ElectionState {
        self.inner.campaign.lock().await.state
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn campaign_interval(&self) -> Duration {
        self.inner.interval
    }
}

impl Inner {
    async fn campaign_loop(self: &Arc<Self>, token: CancellationToken, run: u64) {
        // spread out simultaneous startups
        let splay = self.splay();

        if interruptible_sleep(&token, splay).await.is_ok() {
            let mut delay = self.tick(&token).await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {
                        delay = self.tick(&token).await;
                    }
                }
            }
        }

        self.shutdown(run).await;
    }

    fn splay(&self) -> Duration {
        let max = self.interval.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }

        Duration::from_millis(rand::rng().random_range(0..max))
    }

    /// One campaign attempt. Returns the delay before the next one.
    async fn tick(self: &Arc<Self>, token: &CancellationToken) -> Duration {
        let mut campaign = self.campaign.lock().await;

        // stop() may have won the lock while this tick was waiting
        if token.is_cancelled() {
            return self.interval;
        }

        if let Some(listener) = &self.listener {
            listener.on_campaign(&self.name, campaign.state);
        }
        telemetry::record_campaign(&self.name, campaign.state);

        match campaign.state {
            ElectionState::Leader => self.maintain_leadership(&mut campaign).await,
            ElectionState::Candidate => self.campaign_for_leadership(&mut campaign, token).await,
            ElectionState::Unknown => {
                warn!(election = %self.name, "Campaigned while in unknown state");
            }
        }

        match &self.backoff {
            Some(backoff) => backoff.duration(campaign.tries),
            None => self.interval,
        }
    }

    async fn campaign_for_leadership(
        self: &Arc<Self>,
        campaign: &mut MutexGuard<'_, Campaign>,
        token: &CancellationToken,
    ) {
        let seq = match self.bucket.create(&self.key, self.name.as_bytes()).await {
            Ok(seq) => seq,
            Err(e) => {
                campaign.tries = campaign.tries.saturating_add(1);
                if e.is_contention() {
                    debug!(election = %self.name, tries = campaign.tries, "Leadership held elsewhere");
                } else {
                    warn!(election = %self.name, error = %e, "Campaign attempt failed");
                }
                return;
            }
        };

        campaign.last_seq = Some(seq);
        campaign.state = ElectionState::Leader;
        campaign.tries = 0;
        campaign.term += 1;

        telemetry::set_leader(&self.name, true);
        info!(election = %self.name, key = %self.key, seq, "Became leader, waiting out grace period");

        self.spawn_grace_notifier(campaign.term, token);
    }

    /// Announce the win once the previous leader has had a full interval to
    /// notice its loss.
    fn spawn_grace_notifier(self: &Arc<Self>, term: u64, token: &CancellationToken) {
        let grace = token.child_token();
        *self.grace.lock() = Some(grace.clone());

        let inner = Arc::clone(self);
        let delay = self.interval + GRACE_SLACK;

        tokio::spawn(async move {
            if interruptible_sleep(&grace, delay).await.is_err() {
                return;
            }

            let campaign = inner.campaign.lock().await;
            if grace.is_cancelled() || campaign.term != term {
                return;
            }

            if campaign.state == ElectionState::Leader {
                info!(election = %inner.name, "Leadership confirmed");
                inner.notify_won();
            } else {
                inner.notify_lost();
            }
        });
    }

    async fn maintain_leadership(&self, campaign: &mut MutexGuard<'_, Campaign>) {
        let Some(last) = campaign.last_seq else {
            warn!(election = %self.name, "Leader without a sequence, standing down");
            self.step_down(campaign);
            return;
        };

        match self.bucket.update(&self.key, self.name.as_bytes(), last).await {
            Ok(seq) => campaign.last_seq = Some(seq),
            Err(e) => {
                debug!(election = %self.name, error = %e, "Key update failed, moving to candidate state");
                self.step_down(campaign);
            }
        }
    }

    /// Leave the leader state: cancel any pending won notification and fire lost.
    fn step_down(&self, campaign: &mut Campaign) {
        campaign.state = ElectionState::Candidate;
        campaign.last_seq = None;

        if let Some(grace) = self.grace.lock().take() {
            grace.cancel();
        }

        telemetry::set_leader(&self.name, false);
        info!(election = %self.name, "Leadership lost");
        self.notify_lost();
    }

    async fn shutdown(&self, run: u64) {
        let mut campaign = self.campaign.lock().await;
        if campaign.run != run || !campaign.started {
            return;
        }

        campaign.started = false;
        if let Some(token) = campaign.cancel.take() {
            token.cancel();
        }

        if campaign.state == ElectionState::Leader {
            debug!(election = %self.name, "Calling leader lost during shutdown");
            self.step_down(&mut campaign);
        } else {
            campaign.state = ElectionState::Candidate;
            campaign.last_seq = None;
        }

        campaign.tries = 0;
    }

    fn notify_won(&self) {
        if let Some(listener) = &self.listener {
            listener.on_won(&self.name);
        }
    }

    fn notify_lost(&self) {
        if let Some(listener) = &self.listener {
            listener.on_lost(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::election::ValidationBounds;
    use crate::infrastructure::memory_store::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        won: AtomicUsize,
        lost: AtomicUsize,
        campaigns: AtomicUsize,
    }

    impl ElectionListener for Counter {
        fn on_won(&self, _: &str) {
            self.won.fetch_add(1, Ordering::SeqCst);
        }

        fn on_lost(&self, _: &str) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }

        fn on_campaign(&self, _: &str, _: ElectionState) {
            self.campaigns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_options(listener: Arc<Counter>) -> ElectionOptions {
        ElectionOptions {
            listener: Some(listener),
            bounds: ValidationBounds::disabled(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_interval_from_bucket() {
        let store = InMemoryStore::new();
        let bucket = store.create_bucket("LE", Duration::from_millis(500));

        let counter = Arc::new(Counter::default());
        let election = Election::new("member 1", "election", bucket, test_options(counter))
            .await
            .unwrap();

        assert_eq!(election.campaign_interval(), Duration::from_millis(375));
        assert_eq!(election.ttl(), Duration::from_millis(500));
        assert_eq!(election.state().await, ElectionState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let store = InMemoryStore::new();
        let bucket = store.create_bucket("LE", Duration::from_secs(30));
        let counter = Arc::new(Counter::default());

        let election = Election::new("a", "k", bucket, test_options(counter))
            .await
            .unwrap();

        let ctx = CancellationToken::new();
        let runner = election.clone();
        let run_ctx = ctx.clone();
        let handle = tokio::spawn(async move { runner.start(&run_ctx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            election.start(&ctx).await,
            Err(ElectionError::AlreadyRunning)
        ));

        ctx.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_won_after_grace_and_lost_on_stop() {
        let store = InMemoryStore::new();
        let bucket = store.create_bucket("LE", Duration::from_secs(40));
        let counter = Arc::new(Counter::default());

        let election = Election::new("solo", "k", bucket.clone(), test_options(counter.clone()))
            .await
            .unwrap();

        let ctx = CancellationToken::new();
        let runner = election.clone();
        let run_ctx = ctx.clone();
        let handle = tokio::spawn(async move { runner.start(&run_ctx).await });

        // splay is below one interval, so the key is taken within 30s
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(election.is_leader().await);
        let entry = bucket.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value_string(), "solo");

        // won only after a further interval + slack
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(counter.won.load(Ordering::SeqCst), 1);
        assert_eq!(counter.lost.load(Ordering::SeqCst), 0);

        election.stop().await;
        assert_eq!(counter.lost.load(Ordering::SeqCst), 1);
        assert!(!election.is_leader().await);

        handle.await.unwrap().unwrap();
        assert_eq!(counter.lost.load(Ordering::SeqCst), 1);
        assert!(counter.campaigns.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_not_started_is_noop() {
        let store = InMemoryStore::new();
        let bucket = store.create_bucket("LE", Duration::from_secs(30));
        let counter = Arc::new(Counter::default());

        let election = Election::new("a", "k", bucket, test_options(counter.clone()))
            .await
            .unwrap();

        election.stop().await;
        assert_eq!(counter.lost.load(Ordering::SeqCst), 0);
        assert_eq!(election.state().await, ElectionState::Unknown);
    }
}
