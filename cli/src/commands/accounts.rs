// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Account record management commands
//!
//! Commands: list, add, update, remove, purge-owner
//!
//! Every mutation edits the owner's `users.list` under its advisory lock
//! and can trigger an immediate reconciliation pass with `--reconcile`.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use ftp_provisioner_core::domain::account::{
    validate_credential_hash, validate_home_path, AccountRecord, ScopedAccount,
};
use ftp_provisioner_core::domain::config::ProvisionerConfig;
use ftp_provisioner_core::domain::path_sanitizer::PathSanitizer;
use ftp_provisioner_core::domain::policy::AccountPolicy;
use ftp_provisioner_core::infrastructure::record_store::{AccountUpdate, RecordStore};

use super::reconcile::{build_reconciler, print_summary};

#[derive(Subcommand)]
pub enum AccountsCommand {
    /// List account records
    List {
        /// Only this owner's accounts
        #[arg(long)]
        owner: Option<String>,
    },

    /// Add an account record
    Add {
        owner: String,
        name: String,

        /// Pre-hashed credential (crypt(3) format), installed verbatim
        #[arg(long, value_parser = parse_credential_hash)]
        credential_hash: String,

        /// Home directory, inside the owner's base directory
        #[arg(long, value_parser = parse_folder)]
        folder: PathBuf,

        #[arg(long)]
        uid: Option<u32>,

        #[arg(long)]
        gid: Option<u32>,

        /// Soft quota in MB
        #[arg(long, requires = "quota_hard")]
        quota_soft: Option<u64>,

        /// Hard quota in MB
        #[arg(long, requires = "quota_soft")]
        quota_hard: Option<u64>,

        #[command(flatten)]
        reconcile: ReconcileFlag,
    },

    /// Change an account's credential hash and/or folder
    Update {
        owner: String,
        name: String,

        #[arg(long, value_parser = parse_credential_hash)]
        credential_hash: Option<String>,

        #[arg(long, value_parser = parse_folder)]
        folder: Option<PathBuf>,

        #[command(flatten)]
        reconcile: ReconcileFlag,
    },

    /// Remove an account record
    Remove {
        owner: String,
        name: String,

        #[command(flatten)]
        reconcile: ReconcileFlag,
    },

    /// Remove all of an owner's records
    #[command(name = "purge-owner")]
    PurgeOwner {
        owner: String,

        #[command(flatten)]
        reconcile: ReconcileFlag,
    },
}

#[derive(Args)]
pub struct ReconcileFlag {
    /// Run a reconciliation pass after the change
    #[arg(long)]
    reconcile: bool,
}

pub async fn handle_command(command: AccountsCommand, config_override: Option<PathBuf>) -> Result<()> {
    let config = ProvisionerConfig::load_or_default(config_override).context("Failed to load configuration")?;
    let store = RecordStore::new(&config.records.root, &config.storage.root)
        .with_lock_timeout(config.policy.lock_timeout());
    let policy = AccountPolicy::new(&config.storage.root);

    let reconcile = match command {
        AccountsCommand::List { owner } => {
            list(&store, &config.storage.root, owner.as_deref());
            false
        }
        AccountsCommand::Add {
            owner,
            name,
            credential_hash,
            folder,
            uid,
            gid,
            quota_soft,
            quota_hard,
            reconcile,
        } => {
            let mut record = AccountRecord::new(name, credential_hash);
            record.home_path = Some(folder);
            record.uid = uid;
            record.gid = gid;
            record.quota_soft_mb = quota_soft;
            record.quota_hard_mb = quota_hard;

            let added = store
                .add(&owner, record, &policy, config.policy.max_accounts_per_owner)
                .await
                .with_context(|| format!("Failed to add account for owner '{}'", owner))?;
            println!(
                "{}",
                format!("✓ Account {} added for {}", added.name, owner).green()
            );
            reconcile.reconcile
        }
        AccountsCommand::Update {
            owner,
            name,
            credential_hash,
            folder,
            reconcile,
        } => {
            if credential_hash.is_none() && folder.is_none() {
                anyhow::bail!("Nothing to update: pass --credential-hash and/or --folder");
            }
            let changes = AccountUpdate {
                credential_hash,
                home_path: folder,
            };
            store
                .update(&owner, &name, changes, &policy)
                .await
                .with_context(|| format!("Failed to update account '{}'", name))?;
            println!("{}", format!("✓ Account {} updated", name).green());
            reconcile.reconcile
        }
        AccountsCommand::Remove { owner, name, reconcile } => {
            store
                .remove(&owner, &name)
                .await
                .with_context(|| format!("Failed to remove account '{}'", name))?;
            println!("{}", format!("✓ Account {} removed", name).green());
            reconcile.reconcile
        }
        AccountsCommand::PurgeOwner { owner, reconcile } => {
            let names = store
                .purge_owner(&owner)
                .await
                .with_context(|| format!("Failed to purge owner '{}'", owner))?;
            println!(
                "{}",
                format!("✓ Owner {} purged ({} accounts)", owner, names.len()).green()
            );
            reconcile.reconcile
        }
    };

    if reconcile {
        config.validate().context("Configuration validation failed")?;
        let report = build_reconciler(&config, false)
            .await?
            .run_pass()
            .await
            .context("Reconciliation pass failed")?;
        println!();
        print_summary(&report);
    }
    Ok(())
}

fn parse_credential_hash(value: &str) -> Result<String, String> {
    validate_credential_hash(value)?;
    Ok(value.to_string())
}

fn parse_folder(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    validate_home_path(&path)?;
    Ok(path)
}

fn list(store: &RecordStore, storage_root: &Path, owner: Option<&str>) {
    let accounts = store.list(owner);
    if accounts.is_empty() {
        println!("{}", "No account records".dimmed());
        return;
    }

    println!(
        "{}",
        format!("{:<16} {:<24} {:<40} {}", "OWNER", "ACCOUNT", "FOLDER", "QUOTA (MB)").bold()
    );
    for account in &accounts {
        println!(
            "{:<16} {:<24} {:<40} {}",
            account.scope.owner,
            account.record.name,
            folder_display(account, storage_root),
            quota_display(&account.record)
        );
    }
}

/// Folder relative to the storage root, as operators enter it
fn folder_display(account: &ScopedAccount, storage_root: &Path) -> String {
    let home = account
        .record
        .home_path
        .clone()
        .unwrap_or_else(|| account.scope.base_dir.join(&account.record.name));
    match PathSanitizer::new().strip_boundary(&home, storage_root) {
        Ok(relative) => relative.display().to_string(),
        Err(_) => format!("{} (outside storage root)", home.display()),
    }
}

fn quota_display(record: &AccountRecord) -> String {
    match (record.quota_soft_mb, record.quota_hard_mb) {
        (Some(soft), Some(hard)) => format!("{}/{}", soft, hard),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftp_provisioner_core::domain::account::OwnerScope;

    fn scoped(line: &str) -> ScopedAccount {
        ScopedAccount {
            scope: OwnerScope::under("/home", "siteA"),
            record: AccountRecord::parse_line(line).unwrap().unwrap(),
            source: PathBuf::from("users.list"),
            line: 1,
        }
    }

    #[test]
    fn test_folder_display() {
        let root = Path::new("/home");
        assert_eq!(folder_display(&scoped("alice|h|/home/siteA/www|||"), root), "siteA/www");
        assert_eq!(folder_display(&scoped("bob|h||||"), root), "siteA/bob");
        assert_eq!(
            folder_display(&scoped("eve|h|/etc/eve|||"), root),
            "/etc/eve (outside storage root)"
        );
    }

    #[test]
    fn test_arguments_refuse_field_separators() {
        assert!(parse_credential_hash("$6$salt$hash").is_ok());
        assert!(parse_credential_hash("$M$|/home/siteA/m").is_err());
        assert!(parse_credential_hash("$M$:0").is_err());
        assert!(parse_folder("/home/siteA/www").is_ok());
        assert!(parse_folder("/home/siteA/m\nroot").is_err());
    }

    #[test]
    fn test_quota_display() {
        assert_eq!(quota_display(&scoped("alice|h||||1024|2048").record), "1024/2048");
        assert_eq!(quota_display(&scoped("bob|h||||1024|").record), "-");
    }
}
