// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for Coordination Events
//
// In-memory event streaming over tokio broadcast channels. Elections publish
// won/lost through the `ElectionListener` impl below, governors publish slot
// lifecycle events directly. The CLI subscribes to drive child processes and
// print progress.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::election::{ElectionListener, ElectionState};
use crate::domain::events::{CoordinationEvent, ElectionEvent, GovernorEvent};

/// Event bus for publishing and subscribing to coordination events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<CoordinationEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Slow receivers lag once more than `capacity` events are buffered.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_election_event(&self, event: ElectionEvent) {
        self.publish(CoordinationEvent::Election(event));
    }

    pub fn publish_governor_event(&self, event: GovernorEvent) {
        self.publish(CoordinationEvent::Governor(event));
    }

    fn publish(&self, event: CoordinationEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all coordination events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to leadership changes of a single election
    pub fn subscribe_election(&self, election: impl Into<String>) -> ElectionEventReceiver {
        ElectionEventReceiver {
            receiver: self.sender.subscribe(),
            election: election.into(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl ElectionListener for EventBus {
    fn on_won(&self, election: &str) {
        self.publish_election_event(ElectionEvent::LeadershipWon {
            election: election.to_string(),
            at: Utc::now(),
        });
    }

    fn on_lost(&self, election: &str) {
        self.publish_election_event(ElectionEvent::LeadershipLost {
            election: election.to_string(),
            at: Utc::now(),
        });
    }

    fn on_campaign(&self, election: &str, state: ElectionState) {
        debug!(election, %state, "Campaigning");
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all coordination events
pub struct EventReceiver {
    receiver: broadcast::Receiver<CoordinationEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<CoordinationEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<CoordinationEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to one election's won/lost events
pub struct ElectionEventReceiver {
    receiver: broadcast::Receiver<CoordinationEvent>,
    election: String,
}

impl ElectionEventReceiver {
    pub async fn recv(&mut self) -> Result<ElectionEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;

            if let CoordinationEvent::Election(election_event) = event {
                if self.matches(&election_event) {
                    return Ok(election_event);
                }
            }
        }
    }

    fn matches(&self, event: &ElectionEvent) -> bool {
        match event {
            ElectionEvent::LeadershipWon { election, .. }
            | ElectionEvent::LeadershipLost { election, .. } => election == &self.election,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
