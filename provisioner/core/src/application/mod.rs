// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod identity_reconciler;
pub mod quota_reconciler;
pub mod reconciler;
pub mod server_state;
pub mod startup;

// Re-export the pass driver and orchestrator for convenience
pub use reconciler::{ReconcileError, ReconcileReport, Reconciler};
pub use startup::{render_main_config, Prepared, StartupError, StartupOrchestrator};
