// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `start` command: the container entrypoint
//!
//! Fatal misconfiguration (unreadable TLS material, a missing template, an
//! authentication store that cannot be written) exits non-zero before the
//! server is launched.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use ftp_provisioner_core::application::StartupOrchestrator;
use ftp_provisioner_core::domain::config::ProvisionerConfig;
use ftp_provisioner_core::infrastructure::network::SystemAddressProbe;

use super::reconcile::{build_reconciler, print_summary};
use crate::launch;

pub async fn handle_command(config_override: Option<PathBuf>) -> Result<()> {
    let config = ProvisionerConfig::load_or_default(config_override).context("Failed to load configuration")?;

    let reconciler = build_reconciler(&config, false).await?;
    let probe = SystemAddressProbe;
    let prepared = StartupOrchestrator::new(&config, reconciler, &probe)
        .prepare()
        .await
        .context("Startup aborted")?;

    print_summary(&prepared.report);
    println!(
        "{}",
        format!("✓ Main configuration installed: {}", config.server.config_path.display()).green()
    );
    info!(
        pasv_address = prepared.parameters.pasv_address.as_deref().unwrap_or("(none)"),
        tls = prepared.parameters.tls.is_some(),
        "startup preparation complete"
    );

    let code = launch::launch(&config.server).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
