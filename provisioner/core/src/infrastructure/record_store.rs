// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Record Store
//!
//! File-backed source of truth for sub-accounts:
//!
//! ```text
//! <root>/
//!   siteA/
//!     users.list     name|credentialHash|homePath|uid|gid|quotaSoftMB|quotaHardMB
//!     groups.list    groupName|gid|member,member
//!   siteB/
//!     users.list
//! ```
//!
//! Reading is fault-isolated: an unreadable owner directory or file, or a
//! malformed line, is reported as a [`RecordError`] and skipped while the
//! rest of the tree is still read.
//!
//! The management operations (`add`, `update`, `remove`, `purge_owner`)
//! edit one owner's `users.list` under an exclusive lock and install the
//! result with temp file + rename. Lines they do not touch are copied
//! through verbatim.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Read and edit the declarative record tree

use crate::domain::account::{
    validate_name, AccountRecord, GroupRecord, OwnerScope, RecordError, ScopedAccount, ScopedGroup,
};
use crate::domain::identity::IdentitySnapshot;
use crate::domain::policy::{AccountPolicy, Decision, PolicyViolation, QuotaPlan};
use crate::infrastructure::atomic_file::write_atomic;
use crate::infrastructure::file_lock::{FileLock, LockError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const USERS_FILE: &str = "users.list";
pub const GROUPS_FILE: &str = "groups.list";
const LOCK_SUFFIX: &str = ".lock";

/// Everything read from the tree in one pass
#[derive(Debug, Default)]
pub struct RecordSet {
    pub owners: Vec<OwnerScope>,
    pub accounts: Vec<ScopedAccount>,
    pub groups: Vec<ScopedGroup>,
    pub errors: Vec<RecordError>,
}

/// Failures of the record-management operations
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid record: {0}")]
    InvalidField(String),

    #[error("account '{name}' already exists (owner '{owner}')")]
    Duplicate { name: String, owner: String },

    #[error("owner '{owner}' already has the maximum of {limit} accounts")]
    LimitReached { owner: String, limit: usize },

    #[error("account '{name}' not found for owner '{owner}'")]
    NotFound { owner: String, name: String },

    #[error("owner '{0}' has no records")]
    OwnerNotFound(String),

    #[error("record rejected: {0}")]
    Policy(PolicyViolation),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Changes requested by `update`
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub credential_hash: Option<String>,
    pub home_path: Option<PathBuf>,
}

pub struct RecordStore {
    root: PathBuf,
    storage_root: PathBuf,
    lock_timeout: Duration,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            storage_root: storage_root.into(),
            lock_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn users_file(&self, owner: &str) -> PathBuf {
        self.root.join(owner).join(USERS_FILE)
    }

    pub fn groups_file(&self, owner: &str) -> PathBuf {
        self.root.join(owner).join(GROUPS_FILE)
    }

    fn scope(&self, owner: &str) -> OwnerScope {
        OwnerScope::under(&self.storage_root, owner)
    }

    /// Owner directories, sorted. Entries that are not directories or not
    /// valid names are ignored.
    pub fn owners(&self) -> Result<Vec<String>, RecordError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(root = %self.root.display(), "record root does not exist, no accounts declared");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(RecordError::Unreadable { path: self.root.clone(), source });
            }
        };

        let mut owners = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                debug!(path = %path.display(), "skipping non-UTF-8 owner directory");
                continue;
            };
            if let Err(reason) = validate_name(name) {
                debug!(path = %path.display(), %reason, "skipping directory that is not an owner");
                continue;
            }
            owners.push(name.to_string());
        }
        owners.sort();
        Ok(owners)
    }

    /// Read every owner's accounts and groups
    pub fn load(&self) -> RecordSet {
        let mut set = RecordSet::default();

        let owners = match self.owners() {
            Ok(owners) => owners,
            Err(e) => {
                warn!(error = %e, "record root unreadable");
                set.errors.push(e);
                return set;
            }
        };

        for owner in owners {
            let scope = self.scope(&owner);

            let users_path = self.users_file(&owner);
            for (line, parsed) in read_lines(&users_path, &mut set.errors) {
                match AccountRecord::parse_line(&parsed) {
                    Ok(Some(record)) => set.accounts.push(ScopedAccount {
                        scope: scope.clone(),
                        record,
                        source: users_path.clone(),
                        line,
                    }),
                    Ok(None) => {}
                    Err(reason) => malformed(&mut set.errors, &users_path, line, reason),
                }
            }

            let groups_path = self.groups_file(&owner);
            for (line, parsed) in read_lines(&groups_path, &mut set.errors) {
                match GroupRecord::parse_line(&parsed) {
                    Ok(Some(record)) => set.groups.push(ScopedGroup {
                        scope: scope.clone(),
                        record,
                        source: groups_path.clone(),
                        line,
                    }),
                    Ok(None) => {}
                    Err(reason) => malformed(&mut set.errors, &groups_path, line, reason),
                }
            }

            set.owners.push(scope);
        }

        debug!(
            owners = set.owners.len(),
            accounts = set.accounts.len(),
            groups = set.groups.len(),
            errors = set.errors.len(),
            "record tree loaded"
        );
        set
    }

    /// All parseable accounts, optionally for one owner
    pub fn list(&self, owner: Option<&str>) -> Vec<ScopedAccount> {
        self.load()
            .accounts
            .into_iter()
            .filter(|a| owner.map_or(true, |o| a.scope.owner == o))
            .collect()
    }

    async fn lock_owner(&self, owner: &str) -> Result<FileLock, RecordStoreError> {
        let path = self.root.join(owner).join(format!("{}{}", USERS_FILE, LOCK_SUFFIX));
        Ok(FileLock::acquire(&path, self.lock_timeout).await?)
    }

    /// Append a new account to `owner`'s records
    pub async fn add(
        &self,
        owner: &str,
        record: AccountRecord,
        policy: &AccountPolicy,
        max_accounts: usize,
    ) -> Result<AccountRecord, RecordStoreError> {
        validate_name(owner).map_err(RecordStoreError::InvalidName)?;
        validate_name(&record.name).map_err(RecordStoreError::InvalidName)?;

        let scope = self.scope(owner);
        let record = vet(policy, &scope, record)?;

        let _lock = self.lock_owner(owner).await?;

        let existing = self.load().accounts;
        if let Some(holder) = existing.iter().find(|a| a.record.name == record.name) {
            return Err(RecordStoreError::Duplicate {
                name: record.name,
                owner: holder.scope.owner.clone(),
            });
        }
        let owned = existing.iter().filter(|a| a.scope.owner == owner).count();
        if owned >= max_accounts {
            return Err(RecordStoreError::LimitReached { owner: owner.to_string(), limit: max_accounts });
        }

        let path = self.users_file(owner);
        let mut lines = read_raw(&path)?;
        lines.push(record.to_line().into_bytes());
        install(&path, &lines)?;

        info!(owner, account = %record.name, "account record added");
        Ok(record)
    }

    /// Replace an account's credential hash and/or home path
    pub async fn update(
        &self,
        owner: &str,
        name: &str,
        changes: AccountUpdate,
        policy: &AccountPolicy,
    ) -> Result<AccountRecord, RecordStoreError> {
        validate_name(owner).map_err(RecordStoreError::InvalidName)?;
        let scope = self.scope(owner);

        let _lock = self.lock_owner(owner).await?;

        let path = self.users_file(owner);
        let mut lines = read_raw(&path)?;
        let mut updated = None;

        for line in lines.iter_mut() {
            let Some(Ok(Some(mut record))) = as_text(line).map(AccountRecord::parse_line) else {
                continue;
            };
            if record.name != name {
                continue;
            }
            if let Some(hash) = &changes.credential_hash {
                record.credential_hash = hash.clone();
            }
            if let Some(home) = &changes.home_path {
                record.home_path = Some(home.clone());
            }
            let record = vet(policy, &scope, record)?;
            *line = record.to_line().into_bytes();
            updated = Some(record);
            break;
        }

        let record = updated.ok_or_else(|| RecordStoreError::NotFound {
            owner: owner.to_string(),
            name: name.to_string(),
        })?;
        install(&path, &lines)?;

        info!(owner, account = name, "account record updated");
        Ok(record)
    }

    /// Drop an account from `owner`'s records
    pub async fn remove(&self, owner: &str, name: &str) -> Result<(), RecordStoreError> {
        validate_name(owner).map_err(RecordStoreError::InvalidName)?;

        let _lock = self.lock_owner(owner).await?;

        let path = self.users_file(owner);
        let lines = read_raw(&path)?;
        let before = lines.len();
        let kept: Vec<Vec<u8>> = lines
            .into_iter()
            .filter(|line| !matches!(as_text(line).map(AccountRecord::parse_line), Some(Ok(Some(r))) if r.name == name))
            .collect();

        if kept.len() == before {
            return Err(RecordStoreError::NotFound {
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }
        install(&path, &kept)?;

        info!(owner, account = name, "account record removed");
        Ok(())
    }

    /// Delete all of an owner's records. Returns the account names dropped.
    pub async fn purge_owner(&self, owner: &str) -> Result<Vec<String>, RecordStoreError> {
        validate_name(owner).map_err(RecordStoreError::InvalidName)?;

        let dir = self.root.join(owner);
        if !dir.is_dir() {
            return Err(RecordStoreError::OwnerNotFound(owner.to_string()));
        }

        let _lock = self.lock_owner(owner).await?;

        let names: Vec<String> = read_raw(&self.users_file(owner))?
            .iter()
            .filter_map(|line| as_text(line).and_then(|l| AccountRecord::parse_line(l).ok().flatten()))
            .map(|r| r.name)
            .collect();

        fs::remove_dir_all(&dir).map_err(|source| RecordStoreError::Io { path: dir.clone(), source })?;

        info!(owner, accounts = names.len(), "owner records purged");
        Ok(names)
    }
}

/// Run the full account policy on a record about to be written
fn vet(policy: &AccountPolicy, scope: &OwnerScope, mut record: AccountRecord) -> Result<AccountRecord, RecordStoreError> {
    record.validate_fields().map_err(RecordStoreError::InvalidField)?;
    let candidate = ScopedAccount {
        scope: scope.clone(),
        record: record.clone(),
        source: PathBuf::new(),
        line: 0,
    };
    match policy.validate(&candidate, &IdentitySnapshot::default()) {
        Decision::Rejected(violation) => Err(RecordStoreError::Policy(violation)),
        Decision::Accepted(plan) => {
            if let QuotaPlan::Rejected(violation) = plan.quota {
                return Err(RecordStoreError::Policy(violation));
            }
            record.home_path = Some(plan.home);
            Ok(record)
        }
    }
}

/// Lines of a record file with 1-based numbers. Missing files are empty.
/// A line that is not valid UTF-8 is reported on its own.
fn read_lines(path: &Path, errors: &mut Vec<RecordError>) -> Vec<(usize, String)> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(source) => {
            let err = RecordError::Unreadable { path: path.to_path_buf(), source };
            warn!(error = %err, "record file skipped");
            errors.push(err);
            return Vec::new();
        }
    };

    let mut lines = Vec::new();
    for (i, raw) in split_lines(&content).into_iter().enumerate() {
        match std::str::from_utf8(raw) {
            Ok(line) => lines.push((i + 1, line.to_string())),
            Err(e) => malformed(errors, path, i + 1, format!("line is not valid UTF-8: {}", e)),
        }
    }
    lines
}

/// `\n`-separated lines with any `\r` before the newline dropped, like
/// `str::lines` but over bytes.
fn split_lines(content: &[u8]) -> Vec<&[u8]> {
    if content.is_empty() {
        return Vec::new();
    }
    let body = content.strip_suffix(b"\n").unwrap_or(content);
    body.split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect()
}

fn as_text(line: &[u8]) -> Option<&str> {
    std::str::from_utf8(line).ok()
}

fn malformed(errors: &mut Vec<RecordError>, path: &Path, line: usize, reason: String) {
    let err = RecordError::Malformed { path: path.to_path_buf(), line, reason };
    warn!(error = %err, "record line skipped");
    errors.push(err);
}

/// Raw lines for the management operations. Lines they do not edit,
/// including undecodable ones, are written back byte for byte.
fn read_raw(path: &Path) -> Result<Vec<Vec<u8>>, RecordStoreError> {
    match fs::read(path) {
        Ok(content) => Ok(split_lines(&content).into_iter().map(<[u8]>::to_vec).collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(RecordStoreError::Io { path: path.to_path_buf(), source }),
    }
}

fn install(path: &Path, lines: &[Vec<u8>]) -> Result<(), RecordStoreError> {
    let mut content = lines.join(&b'\n');
    if !content.is_empty() {
        content.push(b'\n');
    }
    write_atomic(path, &content, 0o640)
        .map_err(|source| RecordStoreError::Io { path: path.to_path_buf(), source })
}
