// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Domain Layer
//!
//! Pure types and contracts for elections and governors. The only I/O here is
//! configuration file loading.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`backoff`] | `Backoff`, `BackoffPolicy` |
//! | [`store`] | `KeyValueBucket`, `StreamStore`, `StoreError` |
//! | [`election`] | `ElectionState`, `ElectionOptions`, `ElectionListener` |
//! | [`governor`] | `GovernorSpec`, `GovernorOptions`, `GovernorError` |
//! | [`events`] | `CoordinationEvent` |
//! | [`config`] | `FleetlockConfig` |

pub mod backoff;
pub mod config;
pub mod election;
pub mod events;
pub mod governor;
pub mod store;
