// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod election;
pub mod governor;
pub mod governor_manager;
