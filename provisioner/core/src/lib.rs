// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! FTP Provisioner Core
//!
//! Reconciles declarative FTP sub-account records with the operating
//! system and the server's own account artifacts.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Record parsing, account policy, reconciliation passes
//!
//! A pass reads every owner's records, decides each one against the
//! account policy, provisions groups, accounts, directories and quotas
//! through an [`IdentityStore`](domain::identity::IdentityStore), then
//! rebuilds the authentication store and per-account fragments wholesale.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
