// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! System Identity Reconciler
//!
//! Applies accepted account plans and group records to the OS account
//! database through an [`IdentityStore`]:
//!
//! 1. Resolve the primary group (reuse, create with gid, or owner's shared group)
//! 2. Create or correct the account (FTP-only shell, home path)
//! 3. Install the pre-hashed credential when it differs from the current one
//! 4. Create the home directory and hand it to (account, group)
//!
//! A failure on one account is returned to the caller, which logs it and
//! moves on. Nothing here aborts a pass.

use crate::domain::account::ScopedGroup;
use crate::domain::artifacts::ProvisionedAccount;
use crate::domain::identity::{Change, GroupSpec, IdentityStore, ProvisioningError, UserSpec};
use crate::domain::policy::{AccountPlan, GroupAssignment};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What provisioning one account changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountOutcome {
    pub account: ProvisionedAccount,
    pub uid: u32,
    pub gid: u32,
    pub group_change: Change,
    pub user_change: Change,
    pub credential_changed: bool,
    pub directory_change: Change,
}

impl AccountOutcome {
    pub fn mutations(&self) -> usize {
        [self.group_change, self.user_change, self.directory_change]
            .iter()
            .filter(|c| c.is_mutation())
            .count()
            + usize::from(self.credential_changed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub created: usize,
    pub members_added: usize,
    pub unresolved_members: Vec<String>,
    pub rejected: Vec<String>,
    pub failed: Vec<String>,
}

pub struct IdentityReconciler {
    store: Arc<dyn IdentityStore>,
    shell: String,
}

impl IdentityReconciler {
    pub fn new(store: Arc<dyn IdentityStore>, shell: impl Into<String>) -> Self {
        Self { store, shell: shell.into() }
    }

    /// Provision one accepted account
    pub async fn provision(&self, plan: &AccountPlan) -> Result<AccountOutcome, ProvisioningError> {
        let (group, group_change) = self.store.ensure_group(&self.group_spec(&plan.group).await?).await?;
        if group_change.is_mutation() {
            info!(owner = %plan.owner, group = %group.name, gid = group.gid, "group created");
        }

        let spec = UserSpec {
            name: plan.name.clone(),
            uid: plan.uid,
            primary_group: group.name.clone(),
            home: plan.home.clone(),
            shell: self.shell.clone(),
        };
        let (user, user_change) = self.store.ensure_user(&spec).await?;

        let credential_changed = user.credential_hash.as_deref() != Some(plan.credential_hash.as_str());
        if credential_changed {
            self.store.set_credential(&user.name, &plan.credential_hash).await?;
        }

        let directory_change = self.store.ensure_directory(&plan.home, user.uid, group.gid).await?;

        let outcome = AccountOutcome {
            account: ProvisionedAccount {
                owner: plan.owner.clone(),
                name: plan.name.clone(),
                credential_hash: plan.credential_hash.clone(),
                home: plan.home.clone(),
            },
            uid: user.uid,
            gid: group.gid,
            group_change,
            user_change,
            credential_changed,
            directory_change,
        };

        if outcome.mutations() > 0 {
            info!(
                owner = %plan.owner,
                account = %plan.name,
                uid = user.uid,
                gid = group.gid,
                user = ?user_change,
                credential_changed,
                directory = ?directory_change,
                "account provisioned"
            );
        } else {
            debug!(owner = %plan.owner, account = %plan.name, "account already in place");
        }
        Ok(outcome)
    }

    /// Plans are decided against the snapshot taken before the pass, so a
    /// gid claimed by a group created earlier in the same pass is reused here.
    async fn group_spec(&self, group: &GroupAssignment) -> Result<GroupSpec, ProvisioningError> {
        if let GroupAssignment::Create { name, gid } = group {
            if let Some(existing) = self.store.snapshot().await?.group_by_gid(*gid) {
                if &existing.name != name {
                    debug!(group = %existing.name, gid, "gid already provisioned this pass, reusing group");
                }
                return Ok(GroupSpec { name: existing.name.clone(), gid: Some(*gid) });
            }
        }
        Ok(group.to_spec())
    }

    /// Create declared groups and add their resolvable members.
    ///
    /// Members resolve only against accounts of the group's own owner that
    /// were provisioned in this pass. A group may not take the name of
    /// another owner's shared group, and the first owner to declare a group
    /// name claims it.
    pub async fn reconcile_groups(
        &self,
        groups: &[ScopedGroup],
        provisioned: &[ProvisionedAccount],
        owners: &BTreeSet<String>,
    ) -> GroupReport {
        let mut report = GroupReport::default();
        let mut claimed: HashMap<&str, &str> = HashMap::new();

        for scoped in groups {
            let owner = scoped.scope.owner.as_str();
            let record = &scoped.record;
            let name = record.group_name.as_str();

            if owners.contains(name) && name != owner {
                warn!(owner, group = name, "group name belongs to another owner, skipped");
                report.rejected.push(name.to_string());
                continue;
            }
            if let Some(first) = claimed.get(name).filter(|first| **first != owner) {
                warn!(owner, group = name, first_owner = *first, "group already declared by another owner, skipped");
                report.rejected.push(name.to_string());
                continue;
            }
            claimed.insert(name, owner);

            let spec = GroupSpec { name: name.to_string(), gid: record.gid };
            match self.store.ensure_group(&spec).await {
                Ok((group, change)) => {
                    if change.is_mutation() {
                        report.created += 1;
                        info!(owner, group = name, gid = group.gid, "group created");
                    }
                }
                Err(e) => {
                    warn!(owner, group = name, error = %e, "group provisioning failed");
                    report.failed.push(name.to_string());
                    continue;
                }
            }

            for member in &record.members {
                let resolvable = provisioned
                    .iter()
                    .any(|a| a.owner == owner && &a.name == member);
                if !resolvable {
                    warn!(owner, group = name, member = %member, "unresolved group member, skipped");
                    report.unresolved_members.push(format!("{}:{}", name, member));
                    continue;
                }
                match self.store.add_group_member(name, member).await {
                    Ok(change) if change.is_mutation() => {
                        report.members_added += 1;
                        info!(owner, group = name, member = %member, "member added");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(owner, group = name, member = %member, error = %e, "adding member failed");
                        report.failed.push(format!("{}:{}", name, member));
                    }
                }
            }
        }

        report
    }
}
