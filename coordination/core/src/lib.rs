// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleetlock Core
//!
//! Leader election and concurrency governors built on a keyed log store.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Distributed coordination primitives

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use application::election::Election;
pub use application::governor::{Governor, SlotLease};
pub use application::governor_manager::{list_governors, GovernorManager};
