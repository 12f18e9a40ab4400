// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! System Identity Store
//!
//! [`IdentityStore`] over the host's account databases. State is read
//! directly from `/etc/passwd`, `/etc/group` and `/etc/shadow`; every
//! mutation goes through the shadow-utils tools so that their locking and
//! nscd/sssd notifications stay in effect:
//!
//! | Operation | Tool |
//! |-----------|------|
//! | create group | `groupadd [-g GID] NAME` |
//! | create user | `useradd -M -d HOME -s SHELL -g GROUP [-u UID] NAME` |
//! | fix user | `usermod [-u UID] [-g GROUP] [-d HOME] [-s SHELL] NAME` |
//! | membership | `gpasswd -a USER GROUP` |
//! | credential | `chpasswd -e` (pre-hashed, fed on stdin) |
//! | quota | `setquota -u USER SOFT HARD 0 0 FS` |
//! | lock / remove | `usermod -L`, `userdel` |
//!
//! Directories are handled in-process with `std::fs`. Every component
//! below the storage root must be a real directory: a symbolic link planted
//! in a tenant's tree is refused rather than followed, and ownership and
//! mode are applied through a descriptor opened with `O_NOFOLLOW`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Production adapter for the identity capability interface

use crate::domain::config::{IdentityConfig, QuotaConfig};
use crate::domain::identity::{
    Change, GroupSpec, IdentitySnapshot, IdentityStore, ProvisioningError, QuotaLimits, SystemGroup,
    SystemUser, UserSpec,
};
use crate::infrastructure::command::{CommandRunner, ProcessRunner};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mode for account directories
pub const DIRECTORY_MODE: u32 = 0o750;

/// Parse `/etc/passwd` content. Malformed lines are skipped.
pub fn parse_passwd(content: &str) -> Vec<SystemUser> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let f: Vec<&str> = line.split(':').collect();
            if f.len() < 7 {
                return None;
            }
            Some(SystemUser {
                name: f[0].to_string(),
                uid: f[2].parse().ok()?,
                gid: f[3].parse().ok()?,
                home: PathBuf::from(f[5]),
                shell: f[6].to_string(),
                credential_hash: None,
            })
        })
        .collect()
}

/// Parse `/etc/group` content
pub fn parse_group(content: &str) -> Vec<SystemGroup> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let f: Vec<&str> = line.split(':').collect();
            if f.len() < 4 {
                return None;
            }
            Some(SystemGroup {
                name: f[0].to_string(),
                gid: f[2].parse().ok()?,
                members: f[3]
                    .split(',')
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
        })
        .collect()
}

/// Parse `/etc/shadow` content into name → hash
pub fn parse_shadow(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let mut f = line.splitn(3, ':');
            let name = f.next()?;
            let hash = f.next()?;
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), hash.to_string()))
        })
        .collect()
}

/// Create `path` one component at a time below `root`, refusing any
/// component that exists as a symbolic link or a non-directory. Returns
/// whether the leaf was created.
fn create_confined(path: &Path, root: &Path) -> io::Result<bool> {
    let tail = path.strip_prefix(root).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is outside {}", path.display(), root.display()),
        )
    })?;

    let mut current = root.to_path_buf();
    let mut created = false;
    for component in tail.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                warn!(path = %current.display(), "refusing symbolic link in account directory path");
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is a symbolic link", current.display()),
                ));
            }
            Ok(meta) if !meta.is_dir() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not a directory", current.display()),
                ));
            }
            Ok(_) => created = false,
            // mkdir(2) does not follow a link raced into place, it fails with EEXIST
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&current)?;
                created = true;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(created)
}

fn open_directory(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_DIRECTORY)
        .open(path)
}

pub struct SystemIdentityStore {
    passwd_file: PathBuf,
    group_file: PathBuf,
    shadow_file: PathBuf,
    runner: Arc<dyn CommandRunner>,
    quota: QuotaConfig,
    quota_probe: OnceCell<bool>,
    storage_root: PathBuf,
}

impl SystemIdentityStore {
    pub fn new(identity: &IdentityConfig, quota: &QuotaConfig) -> Self {
        let runner = ProcessRunner::new(
            identity.command_timeout(),
            identity.max_retries,
            identity.retry_delay(),
        );
        Self::with_runner(identity, quota, Arc::new(runner))
    }

    pub fn with_runner(identity: &IdentityConfig, quota: &QuotaConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            passwd_file: identity.passwd_file.clone(),
            group_file: identity.group_file.clone(),
            shadow_file: identity.shadow_file.clone(),
            runner,
            quota: quota.clone(),
            quota_probe: OnceCell::new(),
            storage_root: PathBuf::from("/"),
        }
    }

    /// Trust the tree only down to `storage_root`. Account directories must
    /// lie under it, and no component below it may be a symbolic link.
    /// Defaults to `/`, which checks every component.
    pub fn confined_to(mut self, storage_root: impl Into<PathBuf>) -> Self {
        self.storage_root = storage_root.into();
        self
    }

    fn read_database(&self, path: &Path) -> Result<String, ProvisioningError> {
        fs::read_to_string(path).map_err(|source| ProvisioningError::Database {
            path: path.to_path_buf(),
            source,
        })
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<(), ProvisioningError> {
        self.runner.run(program, &args, None).await.map(|_| ())
    }
}

#[async_trait]
impl IdentityStore for SystemIdentityStore {
    async fn snapshot(&self) -> Result<IdentitySnapshot, ProvisioningError> {
        let mut users = parse_passwd(&self.read_database(&self.passwd_file)?);
        let groups = parse_group(&self.read_database(&self.group_file)?);

        match fs::read_to_string(&self.shadow_file) {
            Ok(content) => {
                let hashes = parse_shadow(&content);
                for user in users.iter_mut() {
                    user.credential_hash = hashes.get(&user.name).cloned();
                }
            }
            Err(e) => {
                debug!(path = %self.shadow_file.display(), error = %e, "shadow database unreadable, credentials will be reinstalled");
            }
        }

        Ok(IdentitySnapshot::new(users, groups))
    }

    async fn ensure_group(&self, spec: &GroupSpec) -> Result<(SystemGroup, Change), ProvisioningError> {
        let snapshot = self.snapshot().await?;

        if let Some(existing) = snapshot.group(&spec.name) {
            return match spec.gid {
                Some(requested) if requested != existing.gid => Err(ProvisioningError::GidMismatch {
                    name: spec.name.clone(),
                    requested,
                    actual: existing.gid,
                }),
                _ => Ok((existing.clone(), Change::Unchanged)),
            };
        }

        let mut args = Vec::new();
        if let Some(gid) = spec.gid {
            if let Some(holder) = snapshot.group_by_gid(gid) {
                return Err(ProvisioningError::GidCollision {
                    name: spec.name.clone(),
                    gid,
                    holder: holder.name.clone(),
                });
            }
            args.extend(["-g".to_string(), gid.to_string()]);
        }
        args.push(spec.name.clone());
        self.run("groupadd", args).await?;

        let created = self
            .snapshot()
            .await?
            .group(&spec.name)
            .cloned()
            .ok_or_else(|| ProvisioningError::NotFound(format!("group '{}' after groupadd", spec.name)))?;
        info!(group = %created.name, gid = created.gid, "group created");
        Ok((created, Change::Created))
    }

    async fn ensure_user(&self, spec: &UserSpec) -> Result<(SystemUser, Change), ProvisioningError> {
        let snapshot = self.snapshot().await?;
        let group = snapshot
            .group(&spec.primary_group)
            .ok_or_else(|| ProvisioningError::NotFound(format!("group '{}'", spec.primary_group)))?;

        if let Some(uid) = spec.uid {
            if let Some(holder) = snapshot.user_by_uid(uid).filter(|u| u.name != spec.name) {
                return Err(ProvisioningError::UidCollision {
                    name: spec.name.clone(),
                    uid,
                    holder: holder.name.clone(),
                });
            }
        }

        let change = match snapshot.user(&spec.name) {
            Some(existing) => {
                let mut args = Vec::new();
                if let Some(uid) = spec.uid.filter(|uid| *uid != existing.uid) {
                    args.extend(["-u".to_string(), uid.to_string()]);
                }
                if existing.gid != group.gid {
                    args.extend(["-g".to_string(), spec.primary_group.clone()]);
                }
                if existing.home != spec.home {
                    args.extend(["-d".to_string(), spec.home.display().to_string()]);
                }
                if existing.shell != spec.shell {
                    args.extend(["-s".to_string(), spec.shell.clone()]);
                }
                if args.is_empty() {
                    return Ok((existing.clone(), Change::Unchanged));
                }
                args.push(spec.name.clone());
                self.run("usermod", args).await?;
                Change::Updated
            }
            None => {
                let mut args = vec![
                    "-M".to_string(),
                    "-d".to_string(),
                    spec.home.display().to_string(),
                    "-s".to_string(),
                    spec.shell.clone(),
                    "-g".to_string(),
                    spec.primary_group.clone(),
                ];
                if let Some(uid) = spec.uid {
                    args.extend(["-u".to_string(), uid.to_string()]);
                }
                args.push(spec.name.clone());
                self.run("useradd", args).await?;
                Change::Created
            }
        };

        let user = self
            .snapshot()
            .await?
            .user(&spec.name)
            .cloned()
            .ok_or_else(|| ProvisioningError::NotFound(format!("user '{}' after provisioning", spec.name)))?;
        Ok((user, change))
    }

    async fn add_group_member(&self, group: &str, user: &str) -> Result<Change, ProvisioningError> {
        let snapshot = self.snapshot().await?;
        let existing = snapshot
            .group(group)
            .ok_or_else(|| ProvisioningError::NotFound(format!("group '{}'", group)))?;
        if existing.members.iter().any(|m| m == user) {
            return Ok(Change::Unchanged);
        }
        self.run("gpasswd", vec!["-a".to_string(), user.to_string(), group.to_string()])
            .await?;
        Ok(Change::Updated)
    }

    async fn set_credential(&self, user: &str, credential_hash: &str) -> Result<(), ProvisioningError> {
        let line = format!("{}:{}\n", user, credential_hash);
        self.runner
            .run("chpasswd", &["-e".to_string()], Some(&line))
            .await
            .map(|_| ())
    }

    async fn ensure_directory(&self, path: &Path, uid: u32, gid: u32) -> Result<Change, ProvisioningError> {
        let io_err = |source: io::Error| ProvisioningError::Io { path: path.to_path_buf(), source };

        let mut change = Change::Unchanged;
        if create_confined(path, &self.storage_root).map_err(io_err)? {
            change = Change::Created;
        }

        let dir = open_directory(path).map_err(io_err)?;
        let meta = dir.metadata().map_err(io_err)?;
        if meta.uid() != uid || meta.gid() != gid {
            std::os::unix::fs::fchown(&dir, Some(uid), Some(gid)).map_err(io_err)?;
            if change == Change::Unchanged {
                change = Change::Updated;
            }
        }
        if meta.permissions().mode() & 0o777 != DIRECTORY_MODE {
            dir.set_permissions(fs::Permissions::from_mode(DIRECTORY_MODE)).map_err(io_err)?;
            if change == Change::Unchanged {
                change = Change::Updated;
            }
        }
        Ok(change)
    }

    async fn quota_available(&self) -> bool {
        *self.quota_probe.get_or_init(|| {
            if !self.quota.enabled {
                return false;
            }
            if which::which("setquota").is_err() {
                warn!("setquota not found on PATH");
                return false;
            }
            if !self.quota.filesystem.exists() {
                warn!(filesystem = %self.quota.filesystem.display(), "quota filesystem does not exist");
                return false;
            }
            true
        })
    }

    async fn set_quota(&self, user: &str, limits: &QuotaLimits) -> Result<(), ProvisioningError> {
        let (soft, hard) = limits.in_blocks();
        self.run(
            "setquota",
            vec![
                "-u".to_string(),
                user.to_string(),
                soft.to_string(),
                hard.to_string(),
                "0".to_string(),
                "0".to_string(),
                self.quota.filesystem.display().to_string(),
            ],
        )
        .await
    }

    async fn lock_user(&self, user: &str) -> Result<Change, ProvisioningError> {
        let snapshot = self.snapshot().await?;
        let Some(existing) = snapshot.user(user) else {
            return Ok(Change::Unchanged);
        };
        if existing.credential_hash.as_deref().is_some_and(|h| h.starts_with('!')) {
            return Ok(Change::Unchanged);
        }
        self.run("usermod", vec!["-L".to_string(), user.to_string()]).await?;
        Ok(Change::Updated)
    }

    async fn remove_user(&self, user: &str) -> Result<Change, ProvisioningError> {
        let snapshot = self.snapshot().await?;
        if snapshot.user(user).is_none() {
            return Ok(Change::Unchanged);
        }
        self.run("userdel", vec![user.to_string()]).await?;
        Ok(Change::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::command::CommandOutput;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records invocations and applies a scripted effect to the fixture files
    #[derive(Default)]
    struct ScriptedRunner {
        calls: Mutex<Vec<(String, Vec<String>, Option<String>)>>,
        on_run: Option<Box<dyn Fn(&str, &[String]) + Send + Sync>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            stdin: Option<&str>,
        ) -> Result<CommandOutput, ProvisioningError> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec(), stdin.map(str::to_string)));
            if let Some(effect) = &self.on_run {
                effect(program, args);
            }
            Ok(CommandOutput { stdout: String::new(), stderr: String::new() })
        }
    }

    const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\nalice:x:1001:1000:,,,:/home/siteA/alice:/usr/sbin/nologin\n";
    const GROUP: &str = "root:x:0:\nsiteA:x:1000:\nwww-data:x:33:alice\n";
    const SHADOW: &str = "root:*:19000:0:99999:7:::\nalice:$HASH$:19000:0:99999:7:::\n";

    fn fixture(runner: ScriptedRunner) -> (TempDir, SystemIdentityStore, Arc<ScriptedRunner>) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("passwd"), PASSWD).unwrap();
        fs::write(dir.path().join("group"), GROUP).unwrap();
        fs::write(dir.path().join("shadow"), SHADOW).unwrap();

        let identity = IdentityConfig {
            passwd_file: dir.path().join("passwd"),
            group_file: dir.path().join("group"),
            shadow_file: dir.path().join("shadow"),
            ..IdentityConfig::default()
        };
        let quota = QuotaConfig { enabled: false, ..QuotaConfig::default() };
        let runner = Arc::new(runner);
        let store = SystemIdentityStore::with_runner(&identity, &quota, runner.clone());
        (dir, store, runner)
    }

    fn calls(runner: &ScriptedRunner) -> Vec<(String, Vec<String>, Option<String>)> {
        runner.calls.lock().unwrap().clone()
    }

    #[test]
    fn test_parse_databases() {
        let users = parse_passwd(PASSWD);
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].home, PathBuf::from("/home/siteA/alice"));
        assert_eq!(users[1].shell, "/usr/sbin/nologin");

        let groups = parse_group(GROUP);
        assert_eq!(groups[2].members, vec!["alice".to_string()]);

        let shadow = parse_shadow(SHADOW);
        assert_eq!(shadow.get("alice").map(String::as_str), Some("$HASH$"));
    }

    #[test]
    fn test_parse_skips_malformed() {
        assert!(parse_passwd("broken:line\nbob:x:notanumber:1:::\n").is_empty());
        assert!(parse_group("g:x\n").is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_merges_shadow() {
        let (_dir, store, _) = fixture(ScriptedRunner::default());
        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(
            snapshot.user("alice").and_then(|u| u.credential_hash.clone()).as_deref(),
            Some("$HASH$")
        );
    }

    #[tokio::test]
    async fn test_existing_user_in_line_is_unchanged() {
        let (_dir, store, runner) = fixture(ScriptedRunner::default());
        let spec = UserSpec {
            name: "alice".to_string(),
            uid: None,
            primary_group: "siteA".to_string(),
            home: PathBuf::from("/home/siteA/alice"),
            shell: "/usr/sbin/nologin".to_string(),
        };
        let (user, change) = store.ensure_user(&spec).await.unwrap();
        assert_eq!(change, Change::Unchanged);
        assert_eq!(user.uid, 1001);
        assert!(calls(&runner).is_empty());
    }

    #[tokio::test]
    async fn test_drifted_user_is_modified() {
        let (_dir, store, runner) = fixture(ScriptedRunner::default());
        let spec = UserSpec {
            name: "alice".to_string(),
            uid: None,
            primary_group: "www-data".to_string(),
            home: PathBuf::from("/home/siteA/www"),
            shell: "/usr/sbin/nologin".to_string(),
        };
        let (_, change) = store.ensure_user(&spec).await.unwrap();
        assert_eq!(change, Change::Updated);
        let recorded = calls(&runner);
        assert_eq!(recorded[0].0, "usermod");
        assert_eq!(recorded[0].1, vec!["-g", "www-data", "-d", "/home/siteA/www", "alice"]);
    }

    #[tokio::test]
    async fn test_uid_collision() {
        let (_dir, store, runner) = fixture(ScriptedRunner::default());
        let spec = UserSpec {
            name: "mallory".to_string(),
            uid: Some(1001),
            primary_group: "siteA".to_string(),
            home: PathBuf::from("/home/siteA/mallory"),
            shell: "/usr/sbin/nologin".to_string(),
        };
        let err = store.ensure_user(&spec).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::UidCollision { ref holder, .. } if holder == "alice"));
        assert!(calls(&runner).is_empty());
    }

    #[tokio::test]
    async fn test_group_creation_runs_groupadd() {
        let dir_holder = TempDir::new().unwrap();
        let group_path = dir_holder.path().join("group-shadow-copy");
        let target = group_path.clone();
        let runner = ScriptedRunner {
            on_run: Some(Box::new(move |program, args| {
                if program == "groupadd" {
                    let mut content = fs::read_to_string(&target).unwrap();
                    content.push_str(&format!("{}:x:{}:\n", args[2], args[1]));
                    fs::write(&target, content).unwrap();
                }
            })),
            ..ScriptedRunner::default()
        };
        let (dir, _, _) = fixture(ScriptedRunner::default());
        fs::write(&group_path, GROUP).unwrap();
        let identity = IdentityConfig {
            passwd_file: dir.path().join("passwd"),
            group_file: group_path,
            shadow_file: dir.path().join("shadow"),
            ..IdentityConfig::default()
        };
        let runner = Arc::new(runner);
        let store = SystemIdentityStore::with_runner(&identity, &QuotaConfig::default(), runner.clone());

        let spec = GroupSpec { name: "editors".to_string(), gid: Some(5001) };
        let (group, change) = store.ensure_group(&spec).await.unwrap();
        assert_eq!(change, Change::Created);
        assert_eq!(group.gid, 5001);
        assert_eq!(calls(&runner)[0].1, vec!["-g", "5001", "editors"]);

        let (_, again) = store.ensure_group(&spec).await.unwrap();
        assert_eq!(again, Change::Unchanged);

        let clash = GroupSpec { name: "other".to_string(), gid: Some(33) };
        assert!(matches!(
            store.ensure_group(&clash).await.unwrap_err(),
            ProvisioningError::GidCollision { .. }
        ));
    }

    #[tokio::test]
    async fn test_credential_is_fed_on_stdin() {
        let (_dir, store, runner) = fixture(ScriptedRunner::default());
        store.set_credential("alice", "$6$new").await.unwrap();
        let recorded = calls(&runner);
        assert_eq!(recorded[0].0, "chpasswd");
        assert_eq!(recorded[0].1, vec!["-e"]);
        assert_eq!(recorded[0].2.as_deref(), Some("alice:$6$new\n"));
    }

    #[tokio::test]
    async fn test_membership_and_removal_are_idempotent() {
        let (_dir, store, runner) = fixture(ScriptedRunner::default());
        assert_eq!(store.add_group_member("www-data", "alice").await.unwrap(), Change::Unchanged);
        assert_eq!(store.remove_user("ghost").await.unwrap(), Change::Unchanged);
        assert_eq!(store.lock_user("ghost").await.unwrap(), Change::Unchanged);
        assert!(calls(&runner).is_empty());

        assert_eq!(store.remove_user("alice").await.unwrap(), Change::Removed);
        assert_eq!(calls(&runner)[0], ("userdel".to_string(), vec!["alice".to_string()], None));
    }

    #[tokio::test]
    async fn test_ensure_directory_creates_with_mode() {
        let (dir, store, _) = fixture(ScriptedRunner::default());
        let store = store.confined_to(dir.path());
        let path = dir.path().join("home").join("siteA").join("alice");
        let uid = fs::metadata(dir.path()).unwrap().uid();
        let gid = fs::metadata(dir.path()).unwrap().gid();

        assert_eq!(store.ensure_directory(&path, uid, gid).await.unwrap(), Change::Created);
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, DIRECTORY_MODE);
        assert_eq!(store.ensure_directory(&path, uid, gid).await.unwrap(), Change::Unchanged);
    }

    #[tokio::test]
    async fn test_ensure_directory_refuses_symlinked_home() {
        let (dir, store, _) = fixture(ScriptedRunner::default());
        let store = store.confined_to(dir.path().join("home"));
        let uid = fs::metadata(dir.path()).unwrap().uid();
        let gid = fs::metadata(dir.path()).unwrap().gid();

        let outside = dir.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::set_permissions(&outside, fs::Permissions::from_mode(0o755)).unwrap();
        let base = dir.path().join("home").join("siteA");
        fs::create_dir_all(&base).unwrap();
        std::os::unix::fs::symlink(&outside, base.join("alice")).unwrap();

        let err = store.ensure_directory(&base.join("alice"), uid, gid).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Io { .. }));
        assert_eq!(fs::metadata(&outside).unwrap().permissions().mode() & 0o777, 0o755);

        // A link higher up in the tenant's tree is refused as well
        let err = store
            .ensure_directory(&base.join("alice").join("www"), uid, gid)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::Io { .. }));
        assert!(!outside.join("www").exists());
    }

    #[tokio::test]
    async fn test_ensure_directory_outside_root_is_refused() {
        let (dir, store, _) = fixture(ScriptedRunner::default());
        let store = store.confined_to(dir.path().join("home"));
        let uid = fs::metadata(dir.path()).unwrap().uid();
        let gid = fs::metadata(dir.path()).unwrap().gid();

        assert!(store.ensure_directory(&dir.path().join("etc").join("x"), uid, gid).await.is_err());
        assert!(!dir.path().join("etc").exists());
    }

    #[tokio::test]
    async fn test_quota_disabled() {
        let (_dir, store, _) = fixture(ScriptedRunner::default());
        assert!(!store.quota_available().await);
    }
}
