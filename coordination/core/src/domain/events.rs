// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordination lifecycle events published on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ElectionEvent {
    LeadershipWon {
        election: String,
        at: DateTime<Utc>,
    },
    LeadershipLost {
        election: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorEventType {
    /// A slot was obtained through campaigning.
    Enter,
    /// A slot was vacated by its holder.
    Exit,
    /// No slot could be obtained before the deadline.
    Timeout,
    /// A slot was removed through the administrative API.
    Eviction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorEvent {
    pub governor: String,
    /// Worker identity that entered, left or was evicted.
    pub identity: String,
    /// Slot sequence, zero when no slot was held.
    pub sequence: u64,
    pub event_type: GovernorEventType,
    pub at: DateTime<Utc>,
}

impl GovernorEvent {
    pub fn new(governor: &str, identity: &str, sequence: u64, event_type: GovernorEventType) -> Self {
        Self {
            governor: governor.to_string(),
            identity: identity.to_string(),
            sequence,
            event_type,
            at: Utc::now(),
        }
    }
}

impl fmt::Display for GovernorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.event_type {
            GovernorEventType::Enter => write!(
                f,
                "[governor] {}: obtained slot {} on {}",
                self.identity, self.sequence, self.governor
            ),
            GovernorEventType::Exit if self.sequence > 0 => write!(
                f,
                "[governor] {}: vacated slot {} on {}",
                self.identity, self.sequence, self.governor
            ),
            GovernorEventType::Exit => {
                write!(f, "[governor] {}: vacated {}", self.identity, self.governor)
            }
            GovernorEventType::Timeout => write!(
                f,
                "[governor] {}: timeout while waiting for a slot on {}",
                self.identity, self.governor
            ),
            GovernorEventType::Eviction => write!(
                f,
                "[governor] {}: evicted from slot {} on {}",
                self.identity, self.sequence, self.governor
            ),
        }
    }
}

/// Unified event type carried by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    Election(ElectionEvent),
    Governor(GovernorEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governor_event_display() {
        let enter = GovernorEvent::new("backups", "node1", 12, GovernorEventType::Enter);
        assert_eq!(enter.to_string(), "[governor] node1: obtained slot 12 on backups");

        let exit = GovernorEvent::new("backups", "node1", 0, GovernorEventType::Exit);
        assert_eq!(exit.to_string(), "[governor] node1: vacated backups");
    }

    #[test]
    fn test_event_json_shape() {
        let event = CoordinationEvent::Governor(GovernorEvent::new(
            "backups",
            "node1",
            3,
            GovernorEventType::Eviction,
        ));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "governor");
        assert_eq!(json["event_type"], "eviction");
        assert_eq!(json["sequence"], 3);
    }
}
