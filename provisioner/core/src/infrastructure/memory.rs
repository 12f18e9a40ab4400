// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory Identity Store
//!
//! [`IdentityStore`] fake backed by maps. Used by the test suites and by
//! `reconcile --dry-run`, where it is seeded from the host's real snapshot
//! so the pass computes the same plan without touching the system.
//!
//! Every mutating call is appended to a [`Mutation`] log, which is what
//! idempotence tests assert on.

use crate::domain::identity::{
    Change, GroupSpec, IdentitySnapshot, IdentityStore, ProvisioningError, QuotaLimits, SystemGroup,
    SystemUser, UserSpec,
};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const FIRST_ALLOCATED_ID: u32 = 1000;

/// One mutating call against the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Mutation {
    CreateGroup { name: String, gid: u32 },
    CreateUser { name: String, uid: u32, gid: u32, home: PathBuf },
    ModifyUser { name: String },
    AddMember { group: String, user: String },
    SetCredential { user: String },
    EnsureDirectory { path: PathBuf, uid: u32, gid: u32 },
    SetQuota { user: String, soft_mb: u64, hard_mb: u64 },
    LockUser { user: String },
    RemoveUser { user: String },
}

#[derive(Default)]
struct State {
    users: BTreeMap<String, SystemUser>,
    groups: BTreeMap<String, SystemGroup>,
    directories: BTreeMap<PathBuf, (u32, u32)>,
    quotas: BTreeMap<String, QuotaLimits>,
    locked: BTreeSet<String>,
    failing_users: HashSet<String>,
    mutations: Vec<Mutation>,
}

impl State {
    fn next_free(&self, taken: impl Iterator<Item = u32>) -> u32 {
        let taken: BTreeSet<u32> = taken.collect();
        (FIRST_ALLOCATED_ID..).find(|id| !taken.contains(id)).unwrap_or(u32::MAX)
    }
}

#[derive(Clone)]
pub struct InMemoryIdentityStore {
    state: Arc<Mutex<State>>,
    quota_available: bool,
    observe_filesystem: bool,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            quota_available: true,
            observe_filesystem: false,
        }
    }

    /// Start from an existing view of the account database
    pub fn seeded(snapshot: &IdentitySnapshot) -> Self {
        let store = Self::new();
        {
            let mut state = store.state();
            state.users = snapshot.users().map(|u| (u.name.clone(), u.clone())).collect();
            state.groups = snapshot.groups().map(|g| (g.name.clone(), g.clone())).collect();
        }
        store
    }

    pub fn with_quota_available(mut self, available: bool) -> Self {
        self.quota_available = available;
        self
    }

    /// Treat directories that already exist on disk with the right owner as
    /// provisioned. Used for dry runs.
    pub fn observing_filesystem(mut self) -> Self {
        self.observe_filesystem = true;
        self
    }

    /// Make every `ensure_user` call for `name` fail
    pub fn fail_user(&self, name: &str) {
        self.state().failing_users.insert(name.to_string());
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    pub fn directory_owner(&self, path: &Path) -> Option<(u32, u32)> {
        self.state().directories.get(path).copied()
    }

    pub fn quota(&self, user: &str) -> Option<QuotaLimits> {
        self.state().quotas.get(user).copied()
    }

    pub fn is_locked(&self, user: &str) -> bool {
        self.state().locked.contains(user)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn snapshot(&self) -> Result<IdentitySnapshot, ProvisioningError> {
        let state = self.state();
        Ok(IdentitySnapshot::new(
            state.users.values().cloned().collect(),
            state.groups.values().cloned().collect(),
        ))
    }

    async fn ensure_group(&self, spec: &GroupSpec) -> Result<(SystemGroup, Change), ProvisioningError> {
        let mut state = self.state();

        if let Some(existing) = state.groups.get(&spec.name) {
            return match spec.gid {
                Some(requested) if requested != existing.gid => Err(ProvisioningError::GidMismatch {
                    name: spec.name.clone(),
                    requested,
                    actual: existing.gid,
                }),
                _ => Ok((existing.clone(), Change::Unchanged)),
            };
        }

        let gid = match spec.gid {
            Some(gid) => {
                if let Some(holder) = state.groups.values().find(|g| g.gid == gid) {
                    return Err(ProvisioningError::GidCollision {
                        name: spec.name.clone(),
                        gid,
                        holder: holder.name.clone(),
                    });
                }
                gid
            }
            None => state.next_free(state.groups.values().map(|g| g.gid)),
        };

        let group = SystemGroup { name: spec.name.clone(), gid, members: Vec::new() };
        state.groups.insert(group.name.clone(), group.clone());
        state.mutations.push(Mutation::CreateGroup { name: group.name.clone(), gid });
        Ok((group, Change::Created))
    }

    async fn ensure_user(&self, spec: &UserSpec) -> Result<(SystemUser, Change), ProvisioningError> {
        let mut state = self.state();

        if state.failing_users.contains(&spec.name) {
            return Err(ProvisioningError::CommandFailed {
                program: "useradd".to_string(),
                code: Some(1),
                stderr: format!("simulated failure for {}", spec.name),
            });
        }

        let gid = state
            .groups
            .get(&spec.primary_group)
            .map(|g| g.gid)
            .ok_or_else(|| ProvisioningError::NotFound(format!("group '{}'", spec.primary_group)))?;

        if let Some(uid) = spec.uid {
            if let Some(holder) = state.users.values().find(|u| u.uid == uid && u.name != spec.name) {
                return Err(ProvisioningError::UidCollision {
                    name: spec.name.clone(),
                    uid,
                    holder: holder.name.clone(),
                });
            }
        }

        if let Some(existing) = state.users.get(&spec.name).cloned() {
            let desired = SystemUser {
                name: spec.name.clone(),
                uid: spec.uid.unwrap_or(existing.uid),
                gid,
                home: spec.home.clone(),
                shell: spec.shell.clone(),
                credential_hash: existing.credential_hash.clone(),
            };
            if desired == existing {
                return Ok((existing, Change::Unchanged));
            }
            state.users.insert(desired.name.clone(), desired.clone());
            state.mutations.push(Mutation::ModifyUser { name: desired.name.clone() });
            return Ok((desired, Change::Updated));
        }

        let uid = match spec.uid {
            Some(uid) => uid,
            None => state.next_free(state.users.values().map(|u| u.uid)),
        };
        let user = SystemUser {
            name: spec.name.clone(),
            uid,
            gid,
            home: spec.home.clone(),
            shell: spec.shell.clone(),
            credential_hash: None,
        };
        state.users.insert(user.name.clone(), user.clone());
        state.mutations.push(Mutation::CreateUser {
            name: user.name.clone(),
            uid,
            gid,
            home: user.home.clone(),
        });
        Ok((user, Change::Created))
    }

    async fn add_group_member(&self, group: &str, user: &str) -> Result<Change, ProvisioningError> {
        let mut state = self.state();
        let entry = state
            .groups
            .get_mut(group)
            .ok_or_else(|| ProvisioningError::NotFound(format!("group '{}'", group)))?;
        if entry.members.iter().any(|m| m == user) {
            return Ok(Change::Unchanged);
        }
        entry.members.push(user.to_string());
        state.mutations.push(Mutation::AddMember { group: group.to_string(), user: user.to_string() });
        Ok(Change::Updated)
    }

    async fn set_credential(&self, user: &str, credential_hash: &str) -> Result<(), ProvisioningError> {
        let mut state = self.state();
        let entry = state
            .users
            .get_mut(user)
            .ok_or_else(|| ProvisioningError::NotFound(format!("user '{}'", user)))?;
        entry.credential_hash = Some(credential_hash.to_string());
        state.locked.remove(user);
        state.mutations.push(Mutation::SetCredential { user: user.to_string() });
        Ok(())
    }

    async fn ensure_directory(&self, path: &Path, uid: u32, gid: u32) -> Result<Change, ProvisioningError> {
        let mut state = self.state();

        let current = state.directories.get(path).copied().or_else(|| {
            if !self.observe_filesystem {
                return None;
            }
            std::fs::metadata(path).ok().map(|m| (m.uid(), m.gid()))
        });

        let change = match current {
            Some(owner) if owner == (uid, gid) => Change::Unchanged,
            Some(_) => Change::Updated,
            None => Change::Created,
        };
        state.directories.insert(path.to_path_buf(), (uid, gid));
        if change.is_mutation() {
            state.mutations.push(Mutation::EnsureDirectory { path: path.to_path_buf(), uid, gid });
        }
        Ok(change)
    }

    async fn quota_available(&self) -> bool {
        self.quota_available
    }

    async fn set_quota(&self, user: &str, limits: &QuotaLimits) -> Result<(), ProvisioningError> {
        let mut state = self.state();
        if state.quotas.get(user) == Some(limits) {
            return Ok(());
        }
        state.quotas.insert(user.to_string(), *limits);
        state.mutations.push(Mutation::SetQuota {
            user: user.to_string(),
            soft_mb: limits.soft_mb,
            hard_mb: limits.hard_mb,
        });
        Ok(())
    }

    async fn lock_user(&self, user: &str) -> Result<Change, ProvisioningError> {
        let mut state = self.state();
        if !state.users.contains_key(user) || !state.locked.insert(user.to_string()) {
            return Ok(Change::Unchanged);
        }
        if let Some(entry) = state.users.get_mut(user) {
            entry.credential_hash = entry.credential_hash.as_ref().map(|h| format!("!{}", h));
        }
        state.mutations.push(Mutation::LockUser { user: user.to_string() });
        Ok(Change::Updated)
    }

    async fn remove_user(&self, user: &str) -> Result<Change, ProvisioningError> {
        let mut state = self.state();
        if state.users.remove(user).is_none() {
            return Ok(Change::Unchanged);
        }
        for group in state.groups.values_mut() {
            group.members.retain(|m| m != user);
        }
        state.locked.remove(user);
        state.quotas.remove(user);
        state.mutations.push(Mutation::RemoveUser { user: user.to_string() });
        Ok(Change::Removed)
    }
}
