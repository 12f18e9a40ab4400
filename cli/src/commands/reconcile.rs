// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `reconcile` command and the wiring shared by every command that runs a pass

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use ftp_provisioner_core::application::{ReconcileReport, Reconciler};
use ftp_provisioner_core::domain::config::ProvisionerConfig;
use ftp_provisioner_core::domain::identity::IdentityStore;
use ftp_provisioner_core::infrastructure::command::{CommandRunner, ProcessRunner};
use ftp_provisioner_core::infrastructure::memory::InMemoryIdentityStore;
use ftp_provisioner_core::infrastructure::system_identity::SystemIdentityStore;

pub async fn handle_command(config_override: Option<PathBuf>, dry_run: bool, json: bool) -> Result<()> {
    let config = ProvisionerConfig::load_or_default(config_override).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let report = build_reconciler(&config, dry_run)
        .await?
        .run_pass()
        .await
        .context("Reconciliation pass failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

/// Wire a reconciler to the host. Dry runs work on an in-memory copy of
/// the account database so the plan is computed without mutation.
pub async fn build_reconciler(config: &ProvisionerConfig, dry_run: bool) -> Result<Reconciler> {
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(
        config.identity.command_timeout(),
        config.identity.max_retries,
        config.identity.retry_delay(),
    ));
    let system = SystemIdentityStore::with_runner(&config.identity, &config.quota, runner.clone())
        .confined_to(&config.storage.root);

    let store: Arc<dyn IdentityStore> = if dry_run {
        let snapshot = system
            .snapshot()
            .await
            .context("Failed to read the account database")?;
        let quota_available = system.quota_available().await;
        info!(users = snapshot.users().count(), "dry run: working on a copy of the account database");
        Arc::new(
            InMemoryIdentityStore::seeded(&snapshot)
                .observing_filesystem()
                .with_quota_available(quota_available),
        )
    } else {
        Arc::new(system)
    };

    Ok(Reconciler::from_config(config, store, runner).dry_run(dry_run))
}

pub fn print_summary(report: &ReconcileReport) {
    let title = if report.dry_run {
        "Reconciliation plan (dry run)"
    } else {
        "Reconciliation complete"
    };
    if report.is_clean() {
        println!("{}", format!("✓ {}", title).green());
    } else {
        println!("{}", format!("⚠ {}", title).yellow());
    }
    println!();

    println!("  Owners: {}", report.owners);
    println!(
        "  Provisioned: {} ({} unchanged)",
        report.provisioned.len(),
        report.unchanged
    );

    if report.skipped_lines > 0 {
        println!("  Skipped lines: {}", report.skipped_lines.to_string().yellow());
    }
    for rejected in &report.rejected {
        println!(
            "  {} {}/{}: {} [{}]",
            "rejected".yellow(),
            rejected.owner,
            rejected.account,
            rejected.reason,
            rejected.rule.dimmed()
        );
    }
    for failed in &report.failed {
        println!(
            "  {} {}/{}: {}",
            "failed".red(),
            failed.owner,
            failed.account,
            failed.error
        );
    }

    let groups = &report.groups;
    if groups.created + groups.members_added > 0 || !groups.unresolved_members.is_empty() {
        println!(
            "  Groups: {} created, {} members added",
            groups.created, groups.members_added
        );
        for member in &groups.unresolved_members {
            println!("  {} {}", "unresolved member".yellow(), member);
        }
    }
    for group in groups.rejected.iter().chain(&groups.failed) {
        println!("  {} {}", "group skipped".yellow(), group);
    }

    if report.quotas.unavailable {
        println!("  Quotas: {}", "facility unavailable, not applied".yellow());
    } else if report.quotas.applied > 0 {
        println!("  Quotas: {} applied", report.quotas.applied);
    }

    for removed in &report.removed {
        println!(
            "  {} {}/{} ({:?}{})",
            "removed".cyan(),
            removed.owner,
            removed.account,
            removed.action,
            if removed.changed { "" } else { ", already applied" }
        );
    }

    let state = &report.server_state;
    println!(
        "  Authentication store: {} entries, {}",
        state.entries,
        if state.auth_store_changed { "changed" } else { "unchanged" }
    );
    if state.fragments_pruned > 0 {
        println!("  Stale fragments pruned: {}", state.fragments_pruned);
    }
}
