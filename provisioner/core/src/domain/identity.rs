// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Identity Store Trait - Anti-Corruption Layer for the OS account database
//!
//! Abstracts `/etc/passwd`, `/etc/group`, `/etc/shadow`, account directories
//! and disk quotas behind one capability interface, so the reconcilers can
//! run against [`InMemoryIdentityStore`] in tests and dry runs and against
//! [`SystemIdentityStore`] in the container.
//!
//! Every `ensure_*` operation is idempotent and reports whether it changed
//! anything through [`Change`].
//!
//! [`InMemoryIdentityStore`]: crate::infrastructure::memory::InMemoryIdentityStore
//! [`SystemIdentityStore`]: crate::infrastructure::system_identity::SystemIdentityStore

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Outcome of an idempotent operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    Created,
    Updated,
    Removed,
    Unchanged,
}

impl Change {
    pub fn is_mutation(self) -> bool {
        !matches!(self, Change::Unchanged)
    }
}

/// A system account as seen in the passwd/shadow databases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
    /// Current hash from shadow, when readable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_hash: Option<String>,
}

/// A system group as seen in the group database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemGroup {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Point-in-time view of the account database.
///
/// The policy layer decides against a snapshot so that it stays a pure
/// function of (record, scope, snapshot).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    users: BTreeMap<String, SystemUser>,
    groups: BTreeMap<String, SystemGroup>,
}

impl IdentitySnapshot {
    pub fn new(users: Vec<SystemUser>, groups: Vec<SystemGroup>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.name.clone(), u)).collect(),
            groups: groups.into_iter().map(|g| (g.name.clone(), g)).collect(),
        }
    }

    pub fn user(&self, name: &str) -> Option<&SystemUser> {
        self.users.get(name)
    }

    pub fn user_by_uid(&self, uid: u32) -> Option<&SystemUser> {
        self.users.values().find(|u| u.uid == uid)
    }

    pub fn group(&self, name: &str) -> Option<&SystemGroup> {
        self.groups.get(name)
    }

    pub fn group_by_gid(&self, gid: u32) -> Option<&SystemGroup> {
        self.groups.values().find(|g| g.gid == gid)
    }

    pub fn users(&self) -> impl Iterator<Item = &SystemUser> {
        self.users.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &SystemGroup> {
        self.groups.values()
    }
}

/// Desired state of a system group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    /// `None` lets the OS allocate
    pub gid: Option<u32>,
}

/// Desired state of a system account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub name: String,
    /// `None` lets the OS allocate
    pub uid: Option<u32>,
    /// Primary group, by name; must already exist
    pub primary_group: String,
    pub home: PathBuf,
    pub shell: String,
}

/// Soft/hard disk limits in MiB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub soft_mb: u64,
    pub hard_mb: u64,
}

impl QuotaLimits {
    /// Limits in the 1 KiB blocks `setquota` expects.
    pub fn in_blocks(&self) -> (u64, u64) {
        (
            self.soft_mb.saturating_mul(1024),
            self.hard_mb.saturating_mul(1024),
        )
    }
}

/// Failures provisioning a single account or group
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("uid {uid} requested for '{name}' already belongs to '{holder}'")]
    UidCollision { name: String, uid: u32, holder: String },

    #[error("gid {gid} requested for group '{name}' already belongs to group '{holder}'")]
    GidCollision { name: String, gid: u32, holder: String },

    #[error("group '{name}' exists with gid {actual}, records request gid {requested}")]
    GidMismatch { name: String, requested: u32, actual: u32 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{program} failed (exit {code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("failed to read account database {path}: {source}")]
    Database {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Capability interface over the OS identity, directory and quota facilities
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Read the current user and group databases
    async fn snapshot(&self) -> Result<IdentitySnapshot, ProvisioningError>;

    /// Create the group if absent. An existing group with the same name is
    /// accepted as-is unless a different gid was requested.
    async fn ensure_group(&self, spec: &GroupSpec) -> Result<(SystemGroup, Change), ProvisioningError>;

    /// Create the account if absent, or bring uid/group/home/shell in line.
    async fn ensure_user(&self, spec: &UserSpec) -> Result<(SystemUser, Change), ProvisioningError>;

    /// Add `user` as a supplementary member of `group`
    async fn add_group_member(&self, group: &str, user: &str) -> Result<Change, ProvisioningError>;

    /// Install a pre-hashed credential verbatim (never re-hashed)
    async fn set_credential(&self, user: &str, credential_hash: &str) -> Result<(), ProvisioningError>;

    /// Make sure `path` exists and is owned by `uid:gid`
    async fn ensure_directory(&self, path: &Path, uid: u32, gid: u32) -> Result<Change, ProvisioningError>;

    /// Whether disk quotas can be applied in this environment
    async fn quota_available(&self) -> bool;

    async fn set_quota(&self, user: &str, limits: &QuotaLimits) -> Result<(), ProvisioningError>;

    /// Disable password login for an account without removing it
    async fn lock_user(&self, user: &str) -> Result<Change, ProvisioningError>;

    /// Remove the account, leaving its directory in place
    async fn remove_user(&self, user: &str) -> Result<Change, ProvisioningError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IdentitySnapshot {
        IdentitySnapshot::new(
            vec![SystemUser {
                name: "alice".to_string(),
                uid: 1001,
                gid: 1001,
                home: PathBuf::from("/home/siteA/alice"),
                shell: "/usr/sbin/nologin".to_string(),
                credential_hash: None,
            }],
            vec![
                SystemGroup { name: "alice".to_string(), gid: 1001, members: vec![] },
                SystemGroup { name: "www-data".to_string(), gid: 33, members: vec![] },
            ],
        )
    }

    #[test]
    fn test_snapshot_lookups() {
        let snapshot = sample();
        assert_eq!(snapshot.user("alice").map(|u| u.uid), Some(1001));
        assert_eq!(snapshot.user_by_uid(1001).map(|u| u.name.as_str()), Some("alice"));
        assert_eq!(snapshot.group_by_gid(33).map(|g| g.name.as_str()), Some("www-data"));
        assert!(snapshot.group("missing").is_none());
    }

    #[test]
    fn test_quota_block_conversion() {
        let limits = QuotaLimits { soft_mb: 1024, hard_mb: 2048 };
        assert_eq!(limits.in_blocks(), (1_048_576, 2_097_152));
    }

    #[test]
    fn test_change_mutation() {
        assert!(Change::Created.is_mutation());
        assert!(Change::Updated.is_mutation());
        assert!(Change::Removed.is_mutation());
        assert!(!Change::Unchanged.is_mutation());
    }
}
