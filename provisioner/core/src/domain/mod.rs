// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: record types, policy, capability traits and pure renderers

pub mod account;
pub mod artifacts;
pub mod config;
pub mod identity;
pub mod path_sanitizer;
pub mod policy;
pub mod server_config;
