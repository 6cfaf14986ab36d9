// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod http_store;
pub mod memory_store;
pub mod telemetry;

pub use event_bus::EventBus;
pub use http_store::{HttpBucket, HttpStore};
pub use memory_store::{InMemoryBucket, InMemoryStore};
