// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Metric names and recording helpers.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! process installs a recorder (the CLI installs the Prometheus exporter).

use std::time::Duration;

use crate::domain::election::ElectionState;

pub const ELECTION_CAMPAIGNS: &str = "fleetlock_election_campaigns_total";
pub const ELECTION_LEADER: &str = "fleetlock_election_leader";
pub const ELECTION_INTERVAL: &str = "fleetlock_election_campaign_interval_seconds";
pub const GOVERNOR_ATTEMPTS: &str = "fleetlock_governor_attempts_total";
pub const GOVERNOR_RELEASES: &str = "fleetlock_governor_slots_released_total";

/// Outcome label values for governor attempts.
pub mod outcome {
    pub const ACQUIRED: &str = "acquired";
    pub const FULL: &str = "full";
    pub const ERROR: &str = "error";
}

pub fn record_campaign(election: &str, state: ElectionState) {
    metrics::counter!(
        ELECTION_CAMPAIGNS,
        "election" => election.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

pub fn set_leader(election: &str, leader: bool) {
    metrics::gauge!(ELECTION_LEADER, "election" => election.to_string())
        .set(if leader { 1.0 } else { 0.0 });
}

pub fn set_campaign_interval(election: &str, interval: Duration) {
    metrics::gauge!(ELECTION_INTERVAL, "election" => election.to_string())
        .set(interval.as_secs_f64());
}

pub fn record_governor_attempt(governor: &str, outcome: &'static str) {
    metrics::counter!(
        GOVERNOR_ATTEMPTS,
        "governor" => governor.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_slot_released(governor: &str) {
    metrics::counter!(GOVERNOR_RELEASES, "governor" => governor.to_string()).increment(1);
}
