// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the FTP provisioner CLI

pub mod accounts;
pub mod config;
pub mod reconcile;
pub mod start;

pub use self::accounts::AccountsCommand;
pub use self::config::ConfigCommand;
