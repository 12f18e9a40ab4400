// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Advisory file locks
//!
//! Exclusive advisory locks (`fs4`) with a bounded wait. Used to serialize
//! reconciliation passes and record-file edits. The lock is released when
//! the guard is dropped.

use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("cannot open lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {waited:?} waiting for lock {path}")]
    Timeout { path: PathBuf, waited: Duration },
}

#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Try once. `Ok(None)` when another holder has the lock.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, LockError> {
        let io_err = |source| LockError::Io { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file, path: path.to_path_buf() })),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(io_err(err)),
        }
    }

    /// Wait up to `timeout` for the lock.
    pub async fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let started = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if started.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: started.elapsed(),
                });
            }
            debug!(path = %path.display(), "lock held elsewhere, waiting");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lock_is_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".reconcile.lock");

        let first = FileLock::acquire(&path, Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.path(), path.as_path());
        assert!(FileLock::try_acquire(&path).unwrap().is_none());

        let err = FileLock::acquire(&path, Duration::from_millis(250)).await.unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));

        drop(first);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }
}
