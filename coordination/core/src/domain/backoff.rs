// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Retry Backoff Policies
//!
//! Jittered, saturating retry delays shared by elections and governors.
//!
//! A [`BackoffPolicy`] is a table of millisecond values indexed by attempt
//! number. Attempts beyond the end of the table reuse the last entry. Every
//! returned delay is jittered uniformly within `[v/2, 3v/2]` so peers that
//! retry in lockstep drift apart.
//!
//! Policies are plain values handed to constructors; there is no process-wide
//! default table.
//!
//! # Architecture
//!
//! - **Layer:** Domain
//! - **Purpose:** Retry interval policy

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Produces the delay to wait before attempt `n` of a retry loop.
pub trait Backoff: Send + Sync {
    /// Time to sleep for the nth invocation.
    fn duration(&self, n: u32) -> Duration;
}

/// Millisecond table backoff with jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    millis: Vec<u64>,
}

/// The wait was interrupted because the governing token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("backoff interrupted by cancellation")]
pub struct Interrupted;

/// Outcome of [`BackoffPolicy::retry`] when no attempt succeeded.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("retry cancelled after {attempts} attempts")]
    Cancelled {
        attempts: u32,
        /// Error from the most recent attempt, if one ran.
        last: Option<E>,
    },
}

impl BackoffPolicy {
    /// Build a policy from a millisecond table.
    ///
    /// An empty table yields a policy that never waits.
    pub fn from_millis(millis: Vec<u64>) -> Self {
        Self { millis }
    }

    /// Caps at 5 seconds: 25ms, then 100ms steps up to 5000ms.
    pub fn five_sec() -> Self {
        let mut millis = vec![25];
        millis.extend((1..=50).map(|step| step * 100));
        Self::from_millis(millis)
    }

    /// Caps at 20 seconds: 500ms steps from 500ms up to 20000ms.
    pub fn twenty_sec() -> Self {
        Self::from_millis((1..=40).map(|step| step * 500).collect())
    }

    /// Look up a named policy, as used in configuration files.
    pub fn named(name: &str) -> Option<Self> {
        match name {
            "five_sec" => Some(Self::five_sec()),
            "twenty_sec" => Some(Self::twenty_sec()),
            _ => None,
        }
    }

    /// Un-jittered table value for attempt `n`.
    pub fn base(&self, n: u32) -> Duration {
        let Some(last) = self.millis.len().checked_sub(1) else {
            return Duration::ZERO;
        };

        let idx = (n as usize).min(last);
        Duration::from_millis(self.millis[idx])
    }

    /// Sleep for the jittered duration of attempt `n`, returning early when
    /// `ctx` is cancelled.
    pub async fn sleep(&self, ctx: &CancellationToken, n: u32) -> Result<(), Interrupted> {
        interruptible_sleep(ctx, self.duration(n)).await
    }

    /// Invoke `attempt` until it succeeds or `ctx` is cancelled.
    ///
    /// Cancellation is checked before every attempt and interrupts the sleep
    /// between attempts. The callback receives the zero-based attempt number.
    pub async fn retry<F, Fut, T, E>(
        &self,
        ctx: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut tries: u32 = 0;
        let mut last = None;

        loop {
            if ctx.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: tries, last });
            }

            match attempt(tries).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!(attempt = tries, error = %e, "attempt failed, backing off");
                    last = Some(e);
                }
            }

            if self.sleep(ctx, tries).await.is_err() {
                return Err(RetryError::Cancelled {
                    attempts: tries + 1,
                    last,
                });
            }

            tries = tries.saturating_add(1);
        }
    }
}

impl Backoff for BackoffPolicy {
    fn duration(&self, n: u32) -> Duration {
        jitter(self.base(n))
    }
}

/// Uniform pick in `[d/2, 3d/2]`.
fn jitter(d: Duration) -> Duration {
    let millis = d.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }

    let half = millis / 2;
    Duration::from_millis(rand::rng().random_range(half..=millis + half))
}

/// Sleep for `duration` unless `ctx` is cancelled first.
pub async fn interruptible_sleep(
    ctx: &CancellationToken,
    duration: Duration,
) -> Result<(), Interrupted> {
    if ctx.is_cancelled() {
        return Err(Interrupted);
    }

    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(Interrupted),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
