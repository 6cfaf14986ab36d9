// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Governor Client
//!
//! Obtains one slot on a governor for the lifetime of a piece of work. A slot
//! is a message appended to the governor's admission stream; the store rejects
//! appends once the stream holds `limit` messages, which is the signal to wait
//! and retry.
//!
//! ```text
//! idle ──start()──▶ campaigning ──append ok──▶ holding(seq) ──release()──▶ idle
//!                       │  ▲
//!            capacity   │  │ tick
//!              full     ▼  │
//!                     waiting
//! ```
//!
//! Cancellation and deadlines are only observed between attempts, so a slot
//! is never appended on behalf of a caller that has already given up.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Slot acquisition and release

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::{GovernorEvent, GovernorEventType};
use crate::domain::governor::{stream_name, GovernorError, GovernorOptions};
use crate::domain::store::{StoreError, StreamStore};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::telemetry::{self, outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occupancy {
    Idle,
    Campaigning,
    Holding(u64),
}

/// Client side of a governor, one per worker.
pub struct Governor {
    name: String,
    stream: String,
    subject: String,
    store: Arc<dyn StreamStore>,
    options: GovernorOptions,
    events: Option<EventBus>,
    occupancy: Arc<Mutex<Occupancy>>,
}

impl Governor {
    pub fn new(name: impl Into<String>, store: Arc<dyn StreamStore>, options: GovernorOptions) -> Self {
        let name = name.into();

        Self {
            stream: stream_name(&name),
            subject: options.subject_for(&name),
            name,
            store,
            options,
            events: None,
            occupancy: Arc::new(Mutex::new(Occupancy::Idle)),
        }
    }

    /// Publish enter/exit/timeout events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Whether a campaign is in progress or a slot is held.
    pub fn is_running(&self) -> bool {
        *self.occupancy.lock() != Occupancy::Idle
    }

    /// Block until a slot is obtained for `worker` or `ctx` is cancelled.
    pub async fn start(&self, ctx: &CancellationToken, worker: &str) -> Result<SlotLease, GovernorError> {
        self.start_with_deadline(ctx, worker, None).await
    }

    /// As [`Governor::start`], giving up with
    /// [`GovernorError::DeadlineExceeded`] once `deadline` passes.
    pub async fn start_with_deadline(
        &self,
        ctx: &CancellationToken,
        worker: &str,
        deadline: Option<Instant>,
    ) -> Result<SlotLease, GovernorError> {
        let guard = CampaignGuard::enter(&self.occupancy)
            .ok_or_else(|| GovernorError::AlreadyRunning(self.name.clone()))?;

        let lease = self.campaign(ctx, worker, deadline).await?;
        guard.hold(lease.sequence);

        Ok(lease)
    }

    async fn campaign(
        &self,
        ctx: &CancellationToken,
        worker: &str,
        deadline: Option<Instant>,
    ) -> Result<SlotLease, GovernorError> {
        let mut tries: u32 = 0;

        loop {
            if ctx.is_cancelled() {
                return Err(GovernorError::Cancelled {
                    governor: self.name.clone(),
                });
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(self.timed_out(worker));
            }

            match self.attempt(worker).await {
                Ok(seq) => {
                    telemetry::record_governor_attempt(&self.name, outcome::ACQUIRED);
                    info!(governor = %self.name, worker, seq, "Obtained slot");
                    self.publish(worker, seq, GovernorEventType::Enter);

                    return Ok(self.lease(worker, seq));
                }
                Err(StoreError::CapacityFull { .. }) => {
                    telemetry::record_governor_attempt(&self.name, outcome::FULL);
                    tries = tries.saturating_add(1);
                    debug!(governor = %self.name, worker, tries, "Governor is full, waiting for a slot");
                }
                Err(e) => {
                    telemetry::record_governor_attempt(&self.name, outcome::ERROR);
                    warn!(governor = %self.name, worker, error = %e, "Slot attempt failed");
                    return Err(GovernorError::store("append", &self.name, &self.subject, e));
                }
            }

            let delay = match &self.options.backoff {
                Some(backoff) => backoff.duration(tries),
                None => self.options.interval,
            };

            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    return Err(GovernorError::Cancelled { governor: self.name.clone() });
                }
                _ = expired => {
                    return Err(self.timed_out(worker));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, worker: &str) -> Result<u64, StoreError> {
        match tokio::time::timeout(
            self.options.attempt_timeout,
            self.store.append(&self.subject, worker.as_bytes()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(format!("append to {}", self.subject))),
        }
    }

    fn timed_out(&self, worker: &str) -> GovernorError {
        debug!(governor = %self.name, worker, "Deadline passed without obtaining a slot");
        self.publish(worker, 0, GovernorEventType::Timeout);

        GovernorError::DeadlineExceeded {
            governor: self.name.clone(),
        }
    }

    fn lease(&self, worker: &str, sequence: u64) -> SlotLease {
        SlotLease {
            governor: self.name.clone(),
            stream: self.stream.clone(),
            worker: worker.to_string(),
            sequence,
            leave: self.options.leave_on_completion,
            store: Arc::clone(&self.store),
            occupancy: Arc::clone(&self.occupancy),
            events: self.events.clone(),
            released: tokio::sync::Mutex::new(false),
        }
    }

    fn publish(&self, worker: &str, seq: u64, event_type: GovernorEventType) {
        if let Some(bus) = &self.events {
            bus.publish_governor_event(GovernorEvent::new(&self.name, worker, seq, event_type));
        }
    }
}

/// Marks a governor as campaigning. Dropping the guard, including when the
/// `start` future itself is dropped, returns the governor to idle unless a
/// slot was handed out.
struct CampaignGuard<'a> {
    occupancy: &'a Mutex<Occupancy>,
    armed: bool,
}

impl<'a> CampaignGuard<'a> {
    fn enter(occupancy: &'a Mutex<Occupancy>) -> Option<Self> {
        let mut state = occupancy.lock();
        if *state != Occupancy::Idle {
            return None;
        }
        *state = Occupancy::Campaigning;

        Some(Self {
            occupancy,
            armed: true,
        })
    }

    fn hold(mut self, sequence: u64) {
        *self.occupancy.lock() = Occupancy::Holding(sequence);
        self.armed = false;
    }
}

impl Drop for CampaignGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.occupancy.lock() = Occupancy::Idle;
        }
    }
}

/// A held slot. Dropping the lease without releasing it leaves the slot
/// occupied until the governor's max age evicts it.
pub struct SlotLease {
    governor: String,
    stream: String,
    worker: String,
    sequence: u64,
    leave: bool,
    store: Arc<dyn StreamStore>,
    occupancy: Arc<Mutex<Occupancy>>,
    events: Option<EventBus>,
    released: tokio::sync::Mutex<bool>,
}

impl std::fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotLease")
            .field("governor", &self.governor)
            .field("worker", &self.worker)
            .field("sequence", &self.sequence)
            .field("leave", &self.leave)
            .finish()
    }
}

impl SlotLease {
    /// Store sequence of the slot message.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn governor(&self) -> &str {
        &self.governor
    }

    pub async fn is_released(&self) -> bool {
        *self.released.lock().await
    }

    /// Vacate the slot.
    ///
    /// Only the first successful call touches the store. A slot that is
    /// already gone (evicted or expired) counts as vacated. When the governor
    /// was configured not to leave on completion the message is kept and only
    /// the client is marked idle.
    pub async fn release(&self) -> Result<(), GovernorError> {
        let mut released = self.released.lock().await;
        if *released || self.sequence == 0 {
            return Ok(());
        }

        if self.leave {
            match self.store.delete_message(&self.stream, self.sequence).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(governor = %self.governor, seq = self.sequence, "Slot already vacated");
                }
                Err(e) => {
                    return Err(GovernorError::store("release", &self.governor, &self.stream, e));
                }
            }

            telemetry::record_slot_released(&self.governor);
            debug!(governor = %self.governor, worker = %self.worker, seq = self.sequence, "Vacated slot");

            if let Some(bus) = &self.events {
                bus.publish_governor_event(GovernorEvent::new(
                    &self.governor,
                    &self.worker,
                    self.sequence,
                    GovernorEventType::Exit,
                ));
            }
        }

        *released = true;

        let mut occupancy = self.occupancy.lock();
        if *occupancy == Occupancy::Holding(self.sequence) {
            *occupancy = Occupancy::Idle;
        }

        Ok(())
    }
}
