// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Election Domain Types
//!
//! State, configuration and observer contracts for single-leader elections
//! over a [`KeyValueBucket`](crate::domain::store::KeyValueBucket).
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`ElectionState`] | Unknown / Candidate / Leader |
//! | [`ValidationBounds`] | TTL and campaign interval limits checked at construction |
//! | [`ElectionOptions`] | Interval override, backoff, listener, bounds |
//! | [`ElectionListener`] | Won / lost / campaign notifications |
//! | [`ElectionError`] | Construction and usage failures |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::backoff::Backoff;
use crate::domain::store::StoreError;

/// Fixed slack added to the grace period before announcing a win.
pub const GRACE_SLACK: Duration = Duration::from_millis(50);

/// Fraction of the bucket TTL used as the default campaign interval.
pub const DEFAULT_INTERVAL_RATIO: f64 = 0.75;

/// Where a participant stands in an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionState {
    /// Not started.
    Unknown,
    /// Campaigning, not the leader.
    Candidate,
    /// Holds the election key.
    Leader,
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionState::Unknown => write!(f, "unknown"),
            ElectionState::Candidate => write!(f, "candidate"),
            ElectionState::Leader => write!(f, "leader"),
        }
    }
}

/// Limits applied to the bucket TTL and campaign interval when an election
/// is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationBounds {
    pub enabled: bool,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    pub min_interval: Duration,
    /// Minimum gap between the campaign interval and the TTL.
    pub min_margin: Duration,
}

impl ValidationBounds {
    /// TTL within `[30s, 1h]`, interval of at least 5s leaving 5s before the TTL.
    pub const fn production() -> Self {
        Self {
            enabled: true,
            min_ttl: Duration::from_secs(30),
            max_ttl: Duration::from_secs(3600),
            min_interval: Duration::from_secs(5),
            min_margin: Duration::from_secs(5),
        }
    }

    /// No checks, for short-lived test buckets.
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::production()
        }
    }

    /// Reject a bucket TTL outside the configured window.
    pub fn check_ttl(&self, ttl: Duration) -> Result<(), ElectionError> {
        if !self.enabled {
            return Ok(());
        }

        if ttl < self.min_ttl {
            return Err(ElectionError::TtlTooShort { ttl, min: self.min_ttl });
        }

        if ttl > self.max_ttl {
            return Err(ElectionError::TtlTooLong { ttl, max: self.max_ttl });
        }

        Ok(())
    }

    /// Reject a campaign interval that is too small or too close to the TTL.
    pub fn check_interval(&self, interval: Duration, ttl: Duration) -> Result<(), ElectionError> {
        if !self.enabled {
            return Ok(());
        }

        if interval < self.min_interval {
            return Err(ElectionError::IntervalTooSmall { interval, min: self.min_interval });
        }

        if ttl.saturating_sub(interval) < self.min_margin {
            return Err(ElectionError::IntervalTooCloseToTtl { interval, ttl });
        }

        Ok(())
    }
}

impl Default for ValidationBounds {
    fn default() -> Self {
        Self::production()
    }
}

/// Receives election transitions.
///
/// Notifications are delivered from the campaign task while it holds the
/// election state lock, so implementations must not call back into the same
/// `Election`.
pub trait ElectionListener: Send + Sync {
    /// Leadership was won and the grace period has passed.
    fn on_won(&self, _election: &str) {}

    /// Leadership was lost, stepped down from, or relinquished on stop.
    fn on_lost(&self, _election: &str) {}

    /// A campaign tick is about to run in `state`.
    fn on_campaign(&self, _election: &str, _state: ElectionState) {}
}

/// Optional knobs for an election.
#[derive(Clone, Default)]
pub struct ElectionOptions {
    /// Overrides the derived `0.75 * ttl` interval.
    pub campaign_interval: Option<Duration>,
    /// When set, ticks are spaced by `backoff.duration(failed_tries)`.
    pub backoff: Option<Arc<dyn Backoff>>,
    pub listener: Option<Arc<dyn ElectionListener>>,
    pub bounds: ValidationBounds,
}

impl fmt::Debug for ElectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectionOptions")
            .field("campaign_interval", &self.campaign_interval)
            .field("backoff", &self.backoff.is_some())
            .field("listener", &self.listener.is_some())
            .field("bounds", &self.bounds)
            .finish()
    }
}

/// Default campaign interval for a bucket TTL.
pub fn derived_interval(ttl: Duration) -> Duration {
    ttl.mul_f64(DEFAULT_INTERVAL_RATIO)
}

#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    #[error("bucket TTL {ttl:?} should be {min:?} or more")]
    TtlTooShort { ttl: Duration, min: Duration },

    #[error("bucket TTL {ttl:?} should be less than or equal to {max:?}")]
    TtlTooLong { ttl: Duration, max: Duration },

    #[error("campaign interval {interval:?} too small, minimum is {min:?}")]
    IntervalTooSmall { interval: Duration, min: Duration },

    #[error("campaign interval {interval:?} is too close to bucket ttl {ttl:?}")]
    IntervalTooCloseToTtl { interval: Duration, ttl: Duration },

    #[error("campaign interval must be greater than zero")]
    ZeroInterval,

    #[error("election already running")]
    AlreadyRunning,

    #[error("could not read status of election bucket: {0}")]
    BucketStatus(#[source] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_bounds() {
        let bounds = ValidationBounds::production();

        assert!(matches!(
            bounds.check_ttl(Duration::from_secs(1)),
            Err(ElectionError::TtlTooShort { .. })
        ));
        assert!(matches!(
            bounds.check_ttl(Duration::from_secs(2 * 3600)),
            Err(ElectionError::TtlTooLong { .. })
        ));
        assert!(bounds.check_ttl(Duration::from_secs(30)).is_ok());
        assert!(bounds.check_ttl(Duration::from_secs(3600)).is_ok());
    }

    #[test]
    fn test_interval_bounds() {
        let bounds = ValidationBounds::production();
        let ttl = Duration::from_secs(30);

        assert!(bounds.check_interval(derived_interval(ttl), ttl).is_ok());
        assert!(matches!(
            bounds.check_interval(Duration::from_secs(4), ttl),
            Err(ElectionError::IntervalTooSmall { .. })
        ));
        assert!(matches!(
            bounds.check_interval(Duration::from_secs(26), ttl),
            Err(ElectionError::IntervalTooCloseToTtl { .. })
        ));
        assert!(matches!(
            bounds.check_interval(Duration::from_secs(40), ttl),
            Err(ElectionError::IntervalTooCloseToTtl { .. })
        ));
    }

    #[test]
    fn test_disabled_bounds_accept_anything() {
        let bounds = ValidationBounds::disabled();
        assert!(bounds.check_ttl(Duration::from_millis(500)).is_ok());
        assert!(bounds
            .check_interval(Duration::from_millis(375), Duration::from_millis(500))
            .is_ok());
    }

    #[test]
    fn test_derived_interval() {
        assert_eq!(derived_interval(Duration::from_millis(500)), Duration::from_millis(375));
        assert_eq!(derived_interval(Duration::from_secs(60)), Duration::from_secs(45));
    }
}
