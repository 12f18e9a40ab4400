// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reconciliation Pass
//!
//! Drives one full pass over the record tree:
//!
//! 1. Take the pass lock (`<records_root>/.reconcile.lock`)
//! 2. Load every owner's records; malformed lines are skipped
//! 3. Snapshot the account database and decide each record
//! 4. Provision accepted accounts, then declared groups, then quotas
//! 5. Apply the removal policy to accounts that left the records
//! 6. Rebuild the server-state artifacts from what was provisioned
//!
//! Only the last step (and failing to read the account database at all) can
//! fail the pass. Everything else is logged and counted in the
//! [`ReconcileReport`].

use crate::application::identity_reconciler::{GroupReport, IdentityReconciler};
use crate::application::quota_reconciler::{QuotaReconciler, QuotaReport};
use crate::application::server_state::{ServerStateReconciler, ServerStateReport, StateConsistencyError};
use crate::domain::account::RecordError;
use crate::domain::artifacts::ProvisionedAccount;
use crate::domain::config::{ProvisionerConfig, RemovalPolicy};
use crate::domain::identity::{Change, IdentityStore, ProvisioningError};
use crate::domain::policy::{AccountPlan, AccountPolicy, Decision};
use crate::infrastructure::command::CommandRunner;
use crate::infrastructure::file_lock::FileLock;
use crate::infrastructure::record_store::RecordStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const PASS_LOCK_FILE: &str = ".reconcile.lock";

/// Failures that abort a pass
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    StateConsistency(#[from] StateConsistencyError),

    #[error("account database unavailable: {0}")]
    IdentityUnavailable(#[source] ProvisioningError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub owner: String,
    pub account: String,
    pub rule: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedAccount {
    pub owner: String,
    pub account: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedAccount {
    pub owner: String,
    pub account: String,
    pub action: RemovalPolicy,
    pub changed: bool,
}

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub owners: usize,
    pub skipped_lines: usize,
    pub rejected: Vec<RejectedRecord>,
    pub provisioned: Vec<String>,
    /// Provisioned accounts that needed no change
    pub unchanged: usize,
    pub failed: Vec<FailedAccount>,
    pub groups: GroupReport,
    pub quotas: QuotaReport,
    pub removed: Vec<RemovedAccount>,
    pub server_state: ServerStateReport,
}

impl ReconcileReport {
    /// Whether every declared record made it into the server artifacts
    pub fn is_clean(&self) -> bool {
        self.skipped_lines == 0 && self.rejected.is_empty() && self.failed.is_empty()
    }
}

pub struct Reconciler {
    records: RecordStore,
    policy: AccountPolicy,
    store: Arc<dyn IdentityStore>,
    identity: IdentityReconciler,
    quotas: QuotaReconciler,
    server_state: ServerStateReconciler,
    removal: RemovalPolicy,
    lock_path: PathBuf,
    lock_timeout: Duration,
    dry_run: bool,
}

impl Reconciler {
    pub fn from_config(
        config: &ProvisionerConfig,
        store: Arc<dyn IdentityStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            records: RecordStore::new(&config.records.root, &config.storage.root)
                .with_lock_timeout(config.policy.lock_timeout()),
            policy: AccountPolicy::new(&config.storage.root),
            identity: IdentityReconciler::new(store.clone(), config.server.nologin_shell.clone()),
            quotas: QuotaReconciler::new(store.clone()),
            server_state: ServerStateReconciler::new(&config.server, runner),
            store,
            removal: config.policy.removed_accounts,
            lock_path: config.records.root.join(PASS_LOCK_FILE),
            lock_timeout: config.policy.lock_timeout(),
            dry_run: false,
        }
    }

    /// Compute the pass without taking the lock or writing artifacts.
    /// Pair with an in-memory identity store.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn run_pass(&self) -> Result<ReconcileReport, ReconcileError> {
        let _lock = if self.dry_run {
            None
        } else {
            let lock = FileLock::acquire(&self.lock_path, self.lock_timeout)
                .await
                .map_err(StateConsistencyError::from)?;
            debug!(lock = %lock.path().display(), "pass lock acquired");
            Some(lock)
        };

        let mut report = ReconcileReport {
            dry_run: self.dry_run,
            ..ReconcileReport::default()
        };

        let set = self.records.load();
        report.owners = set.owners.len();
        report.skipped_lines = set.errors.len();
        for err in &set.errors {
            warn!(error = %err, "record skipped");
        }
        let records_complete = !set.errors.iter().any(|e| matches!(e, RecordError::Unreadable { .. }));

        let snapshot = self
            .store
            .snapshot()
            .await
            .map_err(ReconcileError::IdentityUnavailable)?;

        let decisions = self.policy.validate_all(&set.accounts, &snapshot);
        let mut plans: Vec<AccountPlan> = Vec::new();
        for (account, decision) in set.accounts.iter().zip(decisions) {
            match decision {
                Decision::Accepted(plan) => plans.push(plan),
                Decision::Rejected(violation) => {
                    warn!(
                        owner = %account.scope.owner,
                        account = %account.record.name,
                        rule = violation.rule(),
                        source = %account.source.display(),
                        line = account.line,
                        base_dir = %account.scope.base_dir.display(),
                        "record rejected: {}", violation
                    );
                    report.rejected.push(RejectedRecord {
                        owner: account.scope.owner.clone(),
                        account: account.record.name.clone(),
                        rule: violation.rule(),
                        reason: violation.to_string(),
                    });
                }
            }
        }

        let mut provisioned: Vec<ProvisionedAccount> = Vec::new();
        let mut provisioned_plans: Vec<&AccountPlan> = Vec::new();
        for plan in &plans {
            match self.identity.provision(plan).await {
                Ok(outcome) => {
                    if outcome.mutations() == 0 {
                        report.unchanged += 1;
                    }
                    report.provisioned.push(plan.name.clone());
                    provisioned.push(outcome.account);
                    provisioned_plans.push(plan);
                }
                Err(e) => {
                    error!(owner = %plan.owner, account = %plan.name, error = %e, "account provisioning failed, skipped");
                    report.failed.push(FailedAccount {
                        owner: plan.owner.clone(),
                        account: plan.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let owners: BTreeSet<String> = set.owners.iter().map(|s| s.owner.clone()).collect();
        report.groups = self.identity.reconcile_groups(&set.groups, &provisioned, &owners).await;
        report.quotas = self.quotas.apply(&provisioned_plans).await;

        if records_complete {
            let declared: BTreeSet<String> = set.accounts.iter().map(|a| a.record.name.clone()).collect();
            report.removed = self.apply_removal_policy(&declared).await;
        } else {
            warn!("record tree only partially readable, removal policy skipped for this pass");
        }

        report.server_state = if self.dry_run {
            self.server_state.preview(&provisioned)
        } else {
            self.server_state.rebuild(&provisioned).await?
        };

        info!(
            dry_run = self.dry_run,
            owners = report.owners,
            provisioned = report.provisioned.len(),
            unchanged = report.unchanged,
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            skipped_lines = report.skipped_lines,
            removed = report.removed.len(),
            "reconciliation pass complete"
        );
        Ok(report)
    }

    async fn apply_removal_policy(&self, declared: &BTreeSet<String>) -> Vec<RemovedAccount> {
        let Some(previous) = self.server_state.load_manifest() else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        for entry in previous.removed_since(declared) {
            let result = match self.removal {
                RemovalPolicy::Retain => Ok(Change::Unchanged),
                RemovalPolicy::Lock => self.store.lock_user(&entry.name).await,
                RemovalPolicy::Delete => self.store.remove_user(&entry.name).await,
            };
            match result {
                Ok(change) => {
                    info!(
                        owner = %entry.owner,
                        account = %entry.name,
                        policy = ?self.removal,
                        changed = change.is_mutation(),
                        "account removed from records"
                    );
                    removed.push(RemovedAccount {
                        owner: entry.owner.clone(),
                        account: entry.name.clone(),
                        action: self.removal,
                        changed: change.is_mutation(),
                    });
                }
                Err(e) => {
                    warn!(owner = %entry.owner, account = %entry.name, policy = ?self.removal, error = %e, "removal policy failed");
                }
            }
        }
        removed
    }
}
