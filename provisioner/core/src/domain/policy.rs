// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Account Policy Domain Service
//!
//! Pure decision function over `(record, owner scope, identity snapshot)`:
//! either an [`AccountPlan`] describing exactly what the reconcilers should
//! provision, or the [`PolicyViolation`] that excludes the record from the
//! pass. No I/O happens here.
//!
//! ## Identity resolution
//! | uid | gid | Group assignment |
//! |-----|-----|------------------|
//! | set | unset | gid := uid, then as below |
//! | any | set, group with that gid exists | reuse that group (name may differ) |
//! | any | set, no such group | create group named after the account |
//! | unset | unset | owner's shared group, OS-allocated uid |
//!
//! The shared-group default means sub-accounts of one owner can see each
//! other's files through the group, but never another owner's.

use crate::domain::account::{OwnerScope, ScopedAccount};
use crate::domain::identity::{GroupSpec, IdentitySnapshot, QuotaLimits};
use crate::domain::path_sanitizer::{PathSanitizer, PathSanitizerError};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A rule a record broke. The record (or its quota) is excluded from the pass.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum PolicyViolation {
    #[error("home path {path} is invalid: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("home path {path} is outside the storage root {storage_root}")]
    OutsideStorageRoot { path: String, storage_root: String },

    #[error("home path {path} is outside the owner's base directory {base_dir}")]
    OutsideOwnerScope { path: String, base_dir: String },

    #[error("credential hash is empty")]
    MissingCredential,

    #[error("{field} {value} is reserved for privileged accounts")]
    PrivilegedIdentity { field: &'static str, value: u32 },

    #[error("hard quota {hard_mb}MB is below soft quota {soft_mb}MB")]
    QuotaInverted { soft_mb: u64, hard_mb: u64 },

    #[error("account '{name}' is already declared by owner '{first_owner}'")]
    DuplicateAccount { name: String, first_owner: String },
}

impl PolicyViolation {
    /// Short rule identifier for structured logs
    pub fn rule(&self) -> &'static str {
        match self {
            PolicyViolation::InvalidPath { .. } => "path-invalid",
            PolicyViolation::OutsideStorageRoot { .. } => "path-outside-storage-root",
            PolicyViolation::OutsideOwnerScope { .. } => "path-outside-owner-scope",
            PolicyViolation::MissingCredential => "credential-missing",
            PolicyViolation::PrivilegedIdentity { .. } => "identity-privileged",
            PolicyViolation::QuotaInverted { .. } => "quota-hard-below-soft",
            PolicyViolation::DuplicateAccount { .. } => "account-duplicate",
        }
    }
}

/// Which group an account's primary group resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GroupAssignment {
    /// A group with the requested gid already exists
    Existing { name: String, gid: u32 },
    /// Create a group named after the account with the requested gid
    Create { name: String, gid: u32 },
    /// The owner's shared group
    OwnerShared { name: String },
}

impl GroupAssignment {
    pub fn group_name(&self) -> &str {
        match self {
            GroupAssignment::Existing { name, .. }
            | GroupAssignment::Create { name, .. }
            | GroupAssignment::OwnerShared { name } => name,
        }
    }

    pub fn to_spec(&self) -> GroupSpec {
        match self {
            GroupAssignment::Existing { name, gid } | GroupAssignment::Create { name, gid } => {
                GroupSpec { name: name.clone(), gid: Some(*gid) }
            }
            GroupAssignment::OwnerShared { name } => GroupSpec { name: name.clone(), gid: None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum QuotaPlan {
    /// Neither or only one limit declared
    Unset,
    Apply(QuotaLimits),
    Rejected(PolicyViolation),
}

/// Everything the reconcilers need to provision one accepted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountPlan {
    pub owner: String,
    pub name: String,
    #[serde(skip)]
    pub credential_hash: String,
    pub home: PathBuf,
    pub uid: Option<u32>,
    pub group: GroupAssignment,
    pub quota: QuotaPlan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accepted(AccountPlan),
    Rejected(PolicyViolation),
}

impl Decision {
    #[cfg(test)]
    fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted(_))
    }
}

pub struct AccountPolicy {
    storage_root: PathBuf,
    sanitizer: PathSanitizer,
}

impl AccountPolicy {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            sanitizer: PathSanitizer::new(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Home used when a record leaves the path empty: `<base_dir>/<name>`.
    pub fn default_home(&self, scope: &OwnerScope, name: &str) -> PathBuf {
        scope.base_dir.join(name)
    }

    /// Resolve and contain a home path. Both boundaries are enforced.
    pub fn check_path(&self, path: &Path, scope: &OwnerScope) -> Result<PathBuf, PolicyViolation> {
        let normalized = self
            .sanitizer
            .normalize(path)
            .map_err(|e: PathSanitizerError| PolicyViolation::InvalidPath {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        self.sanitizer
            .contain(&normalized, &self.storage_root)
            .map_err(|_| PolicyViolation::OutsideStorageRoot {
                path: normalized.display().to_string(),
                storage_root: self.storage_root.display().to_string(),
            })?;

        self.sanitizer
            .contain(&normalized, &scope.base_dir)
            .map_err(|_| PolicyViolation::OutsideOwnerScope {
                path: normalized.display().to_string(),
                base_dir: scope.base_dir.display().to_string(),
            })
    }

    /// Decide one record in isolation.
    pub fn validate(&self, account: &ScopedAccount, snapshot: &IdentitySnapshot) -> Decision {
        let record = &account.record;
        let scope = &account.scope;

        let requested = record
            .home_path
            .clone()
            .unwrap_or_else(|| self.default_home(scope, &record.name));
        let home = match self.check_path(&requested, scope) {
            Ok(home) => home,
            Err(violation) => return Decision::Rejected(violation),
        };

        if record.credential_hash.is_empty() {
            return Decision::Rejected(PolicyViolation::MissingCredential);
        }

        if record.uid == Some(0) {
            return Decision::Rejected(PolicyViolation::PrivilegedIdentity { field: "uid", value: 0 });
        }

        let gid = record.gid.or(record.uid);
        if gid == Some(0) {
            return Decision::Rejected(PolicyViolation::PrivilegedIdentity { field: "gid", value: 0 });
        }

        let group = match gid {
            Some(gid) => match snapshot.group_by_gid(gid) {
                Some(existing) => GroupAssignment::Existing { name: existing.name.clone(), gid },
                None => GroupAssignment::Create { name: record.name.clone(), gid },
            },
            None => GroupAssignment::OwnerShared { name: scope.owner.clone() },
        };

        let quota = match (record.quota_soft_mb, record.quota_hard_mb) {
            (Some(soft_mb), Some(hard_mb)) if hard_mb < soft_mb => {
                QuotaPlan::Rejected(PolicyViolation::QuotaInverted { soft_mb, hard_mb })
            }
            (Some(soft_mb), Some(hard_mb)) => QuotaPlan::Apply(QuotaLimits { soft_mb, hard_mb }),
            _ => QuotaPlan::Unset,
        };

        Decision::Accepted(AccountPlan {
            owner: scope.owner.clone(),
            name: record.name.clone(),
            credential_hash: record.credential_hash.clone(),
            home,
            uid: record.uid,
            group,
            quota,
        })
    }

    /// Decide a whole pass. Account names are global (the authentication
    /// store is flat), so the first accepted record for a name claims it.
    pub fn validate_all(
        &self,
        accounts: &[ScopedAccount],
        snapshot: &IdentitySnapshot,
    ) -> Vec<Decision> {
        let mut claimed: HashMap<String, String> = HashMap::new();

        accounts
            .iter()
            .map(|account| {
                let decision = self.validate(account, snapshot);
                if let Decision::Accepted(plan) = &decision {
                    if let Some(first_owner) = claimed.get(&plan.name) {
                        return Decision::Rejected(PolicyViolation::DuplicateAccount {
                            name: plan.name.clone(),
                            first_owner: first_owner.clone(),
                        });
                    }
                    claimed.insert(plan.name.clone(), plan.owner.clone());
                }
                decision
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountRecord;
    use crate::domain::identity::SystemGroup;

    fn scoped(line: &str, owner: &str) -> ScopedAccount {
        ScopedAccount {
            scope: OwnerScope::under("/home", owner),
            record: AccountRecord::parse_line(line).unwrap().unwrap(),
            source: PathBuf::from(format!("/etc/openpanel/ftp/users/{}/users.list", owner)),
            line: 1,
        }
    }

    fn policy() -> AccountPolicy {
        AccountPolicy::new("/home")
    }

    fn accepted(decision: Decision) -> AccountPlan {
        match decision {
            Decision::Accepted(plan) => plan,
            Decision::Rejected(v) => panic!("expected acceptance, got {:?}", v),
        }
    }

    #[test]
    fn test_scenario_a_accepted_with_quota() {
        let account = scoped("alice|$HASH$|/home/siteA/alice|||1024|2048", "siteA");
        let plan = accepted(policy().validate(&account, &IdentitySnapshot::default()));
        assert_eq!(plan.home, PathBuf::from("/home/siteA/alice"));
        assert_eq!(plan.group, GroupAssignment::OwnerShared { name: "siteA".to_string() });
        assert_eq!(plan.quota, QuotaPlan::Apply(QuotaLimits { soft_mb: 1024, hard_mb: 2048 }));
        assert_eq!(plan.uid, None);
    }

    #[test]
    fn test_scenario_b_outside_storage_root() {
        let account = scoped("bob||/etc/bob|||", "siteA");
        match policy().validate(&account, &IdentitySnapshot::default()) {
            Decision::Rejected(v @ PolicyViolation::OutsideStorageRoot { .. }) => {
                assert!(v.to_string().contains("/etc/bob"));
                assert_eq!(v.rule(), "path-outside-storage-root");
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_other_owners_directory_is_rejected() {
        let account = scoped("mallory|h|/home/siteB/data", "siteA");
        let decision = policy().validate(&account, &IdentitySnapshot::default());
        assert!(matches!(
            decision,
            Decision::Rejected(PolicyViolation::OutsideOwnerScope { .. })
        ));
    }

    #[test]
    fn test_traversal_is_rejected() {
        let account = scoped("mallory|h|/home/siteA/../siteB", "siteA");
        let decision = policy().validate(&account, &IdentitySnapshot::default());
        assert!(matches!(decision, Decision::Rejected(PolicyViolation::InvalidPath { .. })));
    }

    #[test]
    fn test_default_home_is_owner_scoped() {
        let account = scoped("carol|h", "siteA");
        let plan = accepted(policy().validate(&account, &IdentitySnapshot::default()));
        assert_eq!(plan.home, PathBuf::from("/home/siteA/carol"));
    }

    #[test]
    fn test_empty_credential_is_rejected() {
        let account = scoped("carol||/home/siteA/carol", "siteA");
        assert_eq!(
            policy().validate(&account, &IdentitySnapshot::default()),
            Decision::Rejected(PolicyViolation::MissingCredential)
        );
    }

    #[test]
    fn test_uid_implies_gid_and_creates_group() {
        let account = scoped("dave|h|/home/siteA/dave|2001", "siteA");
        let plan = accepted(policy().validate(&account, &IdentitySnapshot::default()));
        assert_eq!(plan.uid, Some(2001));
        assert_eq!(plan.group, GroupAssignment::Create { name: "dave".to_string(), gid: 2001 });
    }

    #[test]
    fn test_existing_gid_is_reused_under_its_own_name() {
        let snapshot = IdentitySnapshot::new(
            vec![],
            vec![SystemGroup { name: "www-data".to_string(), gid: 33, members: vec![] }],
        );
        let account = scoped("erin|h|/home/siteA/erin|2002|33", "siteA");
        let plan = accepted(policy().validate(&account, &snapshot));
        assert_eq!(plan.group, GroupAssignment::Existing { name: "www-data".to_string(), gid: 33 });
    }

    #[test]
    fn test_root_identity_is_rejected() {
        let account = scoped("evil|h|/home/siteA/evil|0", "siteA");
        assert!(matches!(
            policy().validate(&account, &IdentitySnapshot::default()),
            Decision::Rejected(PolicyViolation::PrivilegedIdentity { field: "uid", .. })
        ));
    }

    #[test]
    fn test_inverted_quota_keeps_account() {
        let account = scoped("frank|h|/home/siteA/frank|||2048|1024", "siteA");
        let plan = accepted(policy().validate(&account, &IdentitySnapshot::default()));
        assert_eq!(
            plan.quota,
            QuotaPlan::Rejected(PolicyViolation::QuotaInverted { soft_mb: 2048, hard_mb: 1024 })
        );
    }

    #[test]
    fn test_partial_quota_is_unset() {
        let account = scoped("gina|h|/home/siteA/gina|||1024|", "siteA");
        let plan = accepted(policy().validate(&account, &IdentitySnapshot::default()));
        assert_eq!(plan.quota, QuotaPlan::Unset);
    }

    #[test]
    fn test_duplicate_names_first_accepted_wins() {
        let accounts = vec![
            scoped("alice|h|/etc/alice", "siteA"),
            scoped("alice|h|/home/siteB/alice", "siteB"),
            scoped("alice|h|/home/siteC/alice", "siteC"),
        ];
        let decisions = policy().validate_all(&accounts, &IdentitySnapshot::default());
        assert!(!decisions[0].is_accepted());
        assert!(decisions[1].is_accepted());
        assert_eq!(
            decisions[2],
            Decision::Rejected(PolicyViolation::DuplicateAccount {
                name: "alice".to_string(),
                first_owner: "siteB".to_string(),
            })
        );
    }
}
