// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server-State Reconciler
//!
//! Rebuilds the server's account artifacts from the accounts provisioned in
//! this pass:
//!
//! - authentication store text (and, when `db_load` is configured, the
//!   compiled database)
//! - `<user_config_dir>/.owners/<owner>/<name>` fragments with a
//!   `<user_config_dir>/<name>` link for the server's by-name lookup. Owner
//!   namespaces live apart from the links, since account names are free to
//!   match owner names.
//! - the state manifest used by the removal policy on the next pass
//!
//! Every artifact is installed by temp file + rename. Failing to install the
//! authentication store or a fragment is a [`StateConsistencyError`]: the
//! server must not start on artifacts that disagree with the records.
//! Pruning leftovers is best effort.

use crate::domain::artifacts::{
    content_digest, render_auth_store, render_fragment, ProvisionedAccount, StateManifest,
};
use crate::domain::config::ServerConfig;
use crate::domain::identity::ProvisioningError;
use crate::infrastructure::atomic_file::{read_optional, replace_symlink, write_atomic};
use crate::infrastructure::command::CommandRunner;
use crate::infrastructure::file_lock::LockError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const AUTH_STORE_MODE: u32 = 0o600;
const FRAGMENT_MODE: u32 = 0o644;

/// Subtree of the fragment directory holding the per-owner namespaces.
/// Account names cannot start with a dot.
pub const OWNERS_DIR: &str = ".owners";

/// The server's artifacts cannot be brought in line with the records
#[derive(Debug, Error)]
pub enum StateConsistencyError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to compile authentication database {path}: {source}")]
    Compile {
        path: PathBuf,
        #[source]
        source: ProvisioningError,
    },

    #[error("failed to serialize state manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("another reconciliation pass holds the lock: {0}")]
    PassLock(#[from] LockError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStateReport {
    pub entries: usize,
    pub digest: String,
    /// False when the rebuilt store is byte-identical to the previous one
    pub auth_store_changed: bool,
    pub fragments_written: usize,
    pub fragments_pruned: usize,
}

pub struct ServerStateReconciler {
    user_config_dir: PathBuf,
    auth_file: PathBuf,
    auth_db: PathBuf,
    db_load: Option<String>,
    state_file: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl ServerStateReconciler {
    pub fn new(server: &ServerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            user_config_dir: server.user_config_dir.clone(),
            auth_file: server.virtual_users_file.clone(),
            auth_db: server.virtual_users_db.clone(),
            db_load: server.db_load.clone(),
            state_file: server.state_file.clone(),
            runner,
        }
    }

    /// What a rebuild would produce, without writing anything
    pub fn preview(&self, accounts: &[ProvisionedAccount]) -> ServerStateReport {
        let text = render_auth_store(accounts);
        let digest = content_digest(&text);
        let previous = read_optional(&self.auth_file).ok().flatten();
        ServerStateReport {
            entries: accounts.len(),
            auth_store_changed: previous.map(|p| content_digest(&p)) != Some(digest.clone()),
            digest,
            fragments_written: 0,
            fragments_pruned: 0,
        }
    }

    pub async fn rebuild(&self, accounts: &[ProvisionedAccount]) -> Result<ServerStateReport, StateConsistencyError> {
        let mut report = self.preview(accounts);
        let text = render_auth_store(accounts);

        write_atomic(&self.auth_file, text.as_bytes(), AUTH_STORE_MODE).map_err(|source| {
            StateConsistencyError::Write { path: self.auth_file.clone(), source }
        })?;
        if let Some(program) = &self.db_load {
            self.compile_database(program).await?;
        }
        info!(
            path = %self.auth_file.display(),
            entries = report.entries,
            changed = report.auth_store_changed,
            "authentication store rebuilt"
        );

        // Prune first: a leftover entry may sit where a link must go
        report.fragments_pruned = self.prune(accounts);
        for account in accounts {
            self.install_fragment(account)?;
            report.fragments_written += 1;
        }

        let manifest = StateManifest::new(accounts, report.digest.clone());
        let json = serde_json::to_vec_pretty(&manifest)?;
        write_atomic(&self.state_file, &json, AUTH_STORE_MODE).map_err(|source| {
            StateConsistencyError::Write { path: self.state_file.clone(), source }
        })?;

        Ok(report)
    }

    /// Manifest of the previous pass. Missing or unreadable means none.
    pub fn load_manifest(&self) -> Option<StateManifest> {
        let content = match read_optional(&self.state_file) {
            Ok(content) => content?,
            Err(e) => {
                warn!(path = %self.state_file.display(), error = %e, "state manifest unreadable");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(path = %self.state_file.display(), error = %e, "state manifest corrupt, ignoring");
                None
            }
        }
    }

    async fn compile_database(&self, program: &str) -> Result<(), StateConsistencyError> {
        let staging = staging_path(&self.auth_db);
        // db_load merges into an existing file, so always start from nothing
        if let Err(e) = fs::remove_file(&staging) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(StateConsistencyError::Write { path: staging, source: e });
            }
        }

        let args = vec![
            "-T".to_string(),
            "-t".to_string(),
            "hash".to_string(),
            "-f".to_string(),
            self.auth_file.display().to_string(),
            staging.display().to_string(),
        ];
        if let Err(source) = self.runner.run(program, &args, None).await {
            let _ = fs::remove_file(&staging);
            return Err(StateConsistencyError::Compile { path: self.auth_db.clone(), source });
        }

        fs::set_permissions(&staging, fs::Permissions::from_mode(AUTH_STORE_MODE))
            .and_then(|_| fs::rename(&staging, &self.auth_db))
            .map_err(|source| StateConsistencyError::Write { path: self.auth_db.clone(), source })?;
        debug!(path = %self.auth_db.display(), "authentication database compiled");
        Ok(())
    }

    fn install_fragment(&self, account: &ProvisionedAccount) -> Result<(), StateConsistencyError> {
        let relative = Path::new(OWNERS_DIR).join(&account.owner).join(&account.name);
        let path = self.user_config_dir.join(&relative);
        write_atomic(&path, render_fragment(account).as_bytes(), FRAGMENT_MODE)
            .map_err(|source| StateConsistencyError::Write { path: path.clone(), source })?;

        let link = self.user_config_dir.join(&account.name);
        replace_symlink(&relative, &link)
            .map_err(|source| StateConsistencyError::Write { path: link, source })
    }

    /// Remove fragments, links and owner namespaces no account needs.
    fn prune(&self, accounts: &[ProvisionedAccount]) -> usize {
        let names: BTreeSet<&str> = accounts.iter().map(|a| a.name.as_str()).collect();
        let owned: BTreeSet<(&str, &str)> = accounts
            .iter()
            .map(|a| (a.owner.as_str(), a.name.as_str()))
            .collect();

        let mut pruned = 0;
        if let Ok(entries) = fs::read_dir(&self.user_config_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if name == OWNERS_DIR {
                    continue;
                }
                let Ok(meta) = fs::symlink_metadata(&path) else {
                    continue;
                };
                if meta.is_dir() {
                    // Owner namespace from the flat layout
                    pruned += prune_namespace(&path, |_| false);
                } else if !names.contains(name.as_str()) {
                    pruned += remove(&path);
                }
            }
        }

        let Ok(owners) = fs::read_dir(self.user_config_dir.join(OWNERS_DIR)) else {
            return pruned;
        };
        for owner in owners.flatten() {
            let owner_name = owner.file_name().to_string_lossy().to_string();
            if fs::symlink_metadata(owner.path()).map(|m| m.is_dir()).unwrap_or(false) {
                pruned += prune_namespace(&owner.path(), |account| {
                    owned.contains(&(owner_name.as_str(), account))
                });
            } else {
                pruned += remove(&owner.path());
            }
        }
        pruned
    }
}

/// Remove fragments `keep` rejects, then the namespace itself if empty.
fn prune_namespace(dir: &Path, keep: impl Fn(&str) -> bool) -> usize {
    let Ok(inner) = fs::read_dir(dir) else {
        return 0;
    };
    let mut pruned = 0;
    for fragment in inner.flatten() {
        let account = fragment.file_name().to_string_lossy().to_string();
        if !keep(&account) {
            pruned += remove(&fragment.path());
        }
    }
    if fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false) {
        if let Err(e) = fs::remove_dir(dir) {
            warn!(path = %dir.display(), error = %e, "failed to remove empty owner namespace");
        }
    }
    pruned
}

fn remove(path: &Path) -> usize {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "stale fragment pruned");
            1
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to prune stale fragment");
            0
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::command::CommandOutput;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FailingRunner;

    #[async_trait]
    impl CommandRunner for FailingRunner {
        async fn run(&self, program: &str, _: &[String], _: Option<&str>) -> Result<CommandOutput, ProvisioningError> {
            Err(ProvisioningError::CommandFailed {
                program: program.to_string(),
                code: Some(1),
                stderr: "db_load: unable to open".to_string(),
            })
        }
    }

    /// Copies the text store to the output path in place of db_load
    struct CopyRunner;

    #[async_trait]
    impl CommandRunner for CopyRunner {
        async fn run(&self, _: &str, args: &[String], _: Option<&str>) -> Result<CommandOutput, ProvisioningError> {
            fs::copy(&args[4], &args[5]).unwrap();
            Ok(CommandOutput { stdout: String::new(), stderr: String::new() })
        }
    }

    fn server_config(dir: &Path) -> ServerConfig {
        ServerConfig {
            user_config_dir: dir.join("user_conf"),
            virtual_users_file: dir.join("virtual_users.txt"),
            virtual_users_db: dir.join("virtual_users.db"),
            state_file: dir.join("state").join("state.json"),
            ..ServerConfig::default()
        }
    }

    fn account(owner: &str, name: &str) -> ProvisionedAccount {
        ProvisionedAccount {
            owner: owner.to_string(),
            name: name.to_string(),
            credential_hash: format!("${}$", name),
            home: PathBuf::from(format!("/home/{}/{}", owner, name)),
        }
    }

    #[tokio::test]
    async fn test_rebuild_writes_all_artifacts() {
        let dir = TempDir::new().unwrap();
        let config = server_config(dir.path());
        let reconciler = ServerStateReconciler::new(&config, Arc::new(FailingRunner));

        let report = reconciler
            .rebuild(&[account("siteA", "alice"), account("siteB", "zed")])
            .await
            .unwrap();
        assert_eq!(report.entries, 2);
        assert!(report.auth_store_changed);
        assert_eq!(report.fragments_written, 2);

        let store = fs::read_to_string(&config.virtual_users_file).unwrap();
        assert_eq!(store, "alice\n$alice$\nzed\n$zed$\n");

        let fragment =
            fs::read_to_string(config.user_config_dir.join(OWNERS_DIR).join("siteA").join("alice")).unwrap();
        assert!(fragment.contains("local_root=/home/siteA/alice"));
        let via_link = fs::read_to_string(config.user_config_dir.join("alice")).unwrap();
        assert_eq!(via_link, fragment);

        let manifest = reconciler.load_manifest().unwrap();
        assert!(manifest.accounts.iter().any(|e| e.name == "zed"));
        assert_eq!(manifest.auth_store_digest, report.digest);
    }

    #[tokio::test]
    async fn test_second_rebuild_is_unchanged_and_prunes() {
        let dir = TempDir::new().unwrap();
        let config = server_config(dir.path());
        let reconciler = ServerStateReconciler::new(&config, Arc::new(FailingRunner));

        reconciler
            .rebuild(&[account("siteA", "alice"), account("siteB", "zed")])
            .await
            .unwrap();
        let unchanged = reconciler.rebuild(&[account("siteA", "alice"), account("siteB", "zed")]).await.unwrap();
        assert!(!unchanged.auth_store_changed);
        assert_eq!(unchanged.fragments_pruned, 0);

        let after = reconciler.rebuild(&[account("siteA", "alice")]).await.unwrap();
        assert!(after.auth_store_changed);
        assert_eq!(after.fragments_pruned, 2);
        assert!(!config.user_config_dir.join("zed").exists());
        assert!(!config.user_config_dir.join(OWNERS_DIR).join("siteB").exists());
        assert_eq!(fs::read_to_string(&config.virtual_users_file).unwrap(), "alice\n$alice$\n");
    }

    #[tokio::test]
    async fn test_account_named_after_owner_has_its_own_link() {
        let dir = TempDir::new().unwrap();
        let config = server_config(dir.path());
        let reconciler = ServerStateReconciler::new(&config, Arc::new(FailingRunner));

        // siteA declares an account called siteA, and siteA declares bob
        // while siteB is also an owner
        let accounts = [account("siteA", "siteA"), account("siteA", "bob"), account("siteB", "zed")];
        let report = reconciler.rebuild(&accounts).await.unwrap();
        assert_eq!(report.fragments_written, 3);

        for (owner, name) in [("siteA", "siteA"), ("siteA", "bob"), ("siteB", "zed")] {
            let via_link = fs::read_to_string(config.user_config_dir.join(name)).unwrap();
            assert!(via_link.contains(&format!("local_root=/home/{}/{}", owner, name)));
        }

        let again = reconciler.rebuild(&accounts).await.unwrap();
        assert_eq!(again.fragments_pruned, 0);
    }

    #[tokio::test]
    async fn test_flat_layout_namespace_is_replaced_by_link() {
        let dir = TempDir::new().unwrap();
        let config = server_config(dir.path());
        let legacy = config.user_config_dir.join("siteB");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join("zed"), "local_root=/home/siteB/zed\n").unwrap();
        let reconciler = ServerStateReconciler::new(&config, Arc::new(FailingRunner));

        let report = reconciler.rebuild(&[account("siteA", "siteB")]).await.unwrap();
        assert_eq!(report.fragments_pruned, 1);
        let meta = fs::symlink_metadata(config.user_config_dir.join("siteB")).unwrap();
        assert!(meta.file_type().is_symlink());
    }

    #[tokio::test]
    async fn test_empty_set_rebuilds_empty_store() {
        let dir = TempDir::new().unwrap();
        let config = server_config(dir.path());
        let reconciler = ServerStateReconciler::new(&config, Arc::new(FailingRunner));

        let report = reconciler.rebuild(&[]).await.unwrap();
        assert_eq!(report.entries, 0);
        assert_eq!(fs::read_to_string(&config.virtual_users_file).unwrap(), "");
    }

    #[tokio::test]
    async fn test_database_compile_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut config = server_config(dir.path());
        config.db_load = Some("db_load".to_string());
        let reconciler = ServerStateReconciler::new(&config, Arc::new(FailingRunner));

        let err = reconciler.rebuild(&[account("siteA", "alice")]).await.unwrap_err();
        assert!(matches!(err, StateConsistencyError::Compile { .. }));
        assert!(!config.virtual_users_db.exists());
    }

    #[tokio::test]
    async fn test_database_compiled_via_staging() {
        let dir = TempDir::new().unwrap();
        let mut config = server_config(dir.path());
        config.db_load = Some("db_load".to_string());
        let reconciler = ServerStateReconciler::new(&config, Arc::new(CopyRunner));

        reconciler.rebuild(&[account("siteA", "alice")]).await.unwrap();
        assert_eq!(fs::read_to_string(&config.virtual_users_db).unwrap(), "alice\n$alice$\n");
        assert!(!staging_path(&config.virtual_users_db).exists());
    }
}
