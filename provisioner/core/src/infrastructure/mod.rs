// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure layer
//!
//! Adapters behind the domain's interfaces:
//!
//! - **record_store** - declarative record tree (read and edit)
//! - **system_identity** - host account databases via shadow-utils
//! - **memory** - in-memory identity store for tests and dry runs
//! - **atomic_file**, **file_lock** - temp-file installs and advisory locks
//! - **command** - external tools with timeout and bounded retry
//! - **network** - passive address discovery

pub mod atomic_file;
pub mod command;
pub mod file_lock;
pub mod memory;
pub mod network;
pub mod record_store;
pub mod system_identity;
