// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Atomic file installation
//!
//! Every artifact the server reads is written to a temporary file in the
//! destination directory and renamed over the live path, so a reader sees
//! either the old content or the new content, never a partial write.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `content` to `path` via temp file + rename, with the given mode.
pub fn write_atomic(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let parent = parent_of(path)?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().set_permissions(fs::Permissions::from_mode(mode))?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Point `link` at `target`, replacing any existing link atomically.
pub fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let parent = parent_of(link)?;
    fs::create_dir_all(parent)?;

    if let Ok(current) = fs::read_link(link) {
        if current == target {
            return Ok(());
        }
    }

    let file_name = link
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "link has no file name"))?;
    let staging = parent.join(format!(".{}.{}.tmp", file_name.to_string_lossy(), std::process::id()));
    if fs::symlink_metadata(&staging).is_ok() {
        fs::remove_file(&staging)?;
    }

    std::os::unix::fs::symlink(target, &staging)?;
    if let Err(e) = fs::rename(&staging, link) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    Ok(())
}

/// Read a file, treating absence as `None`.
pub fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn parent_of(path: &Path) -> io::Result<&Path> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no parent directory", path.display()),
            )
        })
}
