// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Account and group records
//!
//! Declarative records as they appear in an owner's `users.list` and
//! `groups.list` files, plus the line codec for both formats:
//!
//! ```text
//! name|credentialHash|homePath|uid|gid|quotaSoftMB|quotaHardMB
//! groupName|gid|member,member,...
//! ```
//!
//! Parsing is per line: a bad line yields a [`RecordError`] for that line
//! only and never fails the rest of the file.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Source-of-truth record types and their wire format

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Account, group and owner names. Owner directories such as `siteA` are
/// mixed case, so upper case is accepted here and left to the OS tools.
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("name pattern is valid"));

/// Longest name `useradd` accepts.
pub const MAX_NAME_LEN: usize = 32;

/// Errors local to one record file or one line of it
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Check a user, group or owner name.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.len() > MAX_NAME_LEN {
        return Err(format!("name '{}' exceeds {} bytes", name, MAX_NAME_LEN));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(format!("name '{}' is not a valid account name", name));
    }
    Ok(())
}

/// Field separators of the record line and of the passwd/shadow databases
const RESERVED: [char; 2] = ['|', ':'];

fn reserved_char(value: &str) -> Option<char> {
    value.chars().find(|c| RESERVED.contains(c) || c.is_control())
}

/// Check a pre-hashed credential before it is stored or handed to `chpasswd`.
pub fn validate_credential_hash(hash: &str) -> Result<(), String> {
    if let Some(c) = reserved_char(hash).or_else(|| hash.chars().find(|c| c.is_whitespace())) {
        return Err(format!("credential hash contains forbidden character {:?}", c));
    }
    Ok(())
}

/// Check a home path before it is stored or written to passwd.
pub fn validate_home_path(path: &Path) -> Result<(), String> {
    if let Some(c) = reserved_char(&path.to_string_lossy()) {
        return Err(format!("home path {} contains forbidden character {:?}", path.display(), c));
    }
    Ok(())
}

/// The declaring tenant whose base directory bounds its sub-accounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerScope {
    pub owner: String,
    pub base_dir: PathBuf,
}

impl OwnerScope {
    /// Scope for `owner` under the global storage root (`<root>/<owner>`).
    pub fn under(storage_root: impl Into<PathBuf>, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        let base_dir = storage_root.into().join(&owner);
        Self { owner, base_dir }
    }
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.owner, self.base_dir.display())
    }
}

/// One line of an owner's `users.list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub name: String,
    /// Pre-hashed secret. Never plaintext.
    pub credential_hash: String,
    pub home_path: Option<PathBuf>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub quota_soft_mb: Option<u64>,
    pub quota_hard_mb: Option<u64>,
}

impl AccountRecord {
    pub fn new(name: impl Into<String>, credential_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credential_hash: credential_hash.into(),
            home_path: None,
            uid: None,
            gid: None,
            quota_soft_mb: None,
            quota_hard_mb: None,
        }
    }

    /// Parse one line.
    ///
    /// `Ok(None)` for blank lines and lines with an empty name (skipped
    /// silently), `Err` for lines that cannot be interpreted.
    pub fn parse_line(raw: &str) -> Result<Option<Self>, String> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or("");

        let name = field(0);
        if name.is_empty() {
            return Ok(None);
        }
        validate_name(name)?;

        let home_path = match field(2) {
            "" => None,
            p => Some(PathBuf::from(p)),
        };

        let record = Self {
            name: name.to_string(),
            credential_hash: field(1).to_string(),
            home_path,
            uid: parse_optional(field(3), "uid")?,
            gid: parse_optional(field(4), "gid")?,
            quota_soft_mb: parse_optional(field(5), "quotaSoft")?,
            quota_hard_mb: parse_optional(field(6), "quotaHard")?,
        };
        record.validate_fields()?;
        Ok(Some(record))
    }

    /// Name, credential and home checks. A record that passes serializes
    /// back to exactly the fields it holds.
    pub fn validate_fields(&self) -> Result<(), String> {
        validate_name(&self.name)?;
        validate_credential_hash(&self.credential_hash)?;
        if let Some(home) = &self.home_path {
            validate_home_path(home)?;
        }
        Ok(())
    }

    /// Serialize back to the seven-field line form (no trailing newline).
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.name,
            self.credential_hash,
            self.home_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            opt(self.uid),
            opt(self.gid),
            opt(self.quota_soft_mb),
            opt(self.quota_hard_mb),
        )
    }
}

/// One line of an owner's `groups.list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_name: String,
    pub gid: Option<u32>,
    /// Member account names, in file order. Duplicates are dropped.
    pub members: Vec<String>,
}

impl GroupRecord {
    pub fn parse_line(raw: &str) -> Result<Option<Self>, String> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or("");

        let group_name = field(0);
        if group_name.is_empty() {
            return Ok(None);
        }
        validate_name(group_name)?;

        let mut members: Vec<String> = Vec::new();
        for member in field(2).split(',').map(str::trim).filter(|m| !m.is_empty()) {
            if !members.iter().any(|m| m == member) {
                members.push(member.to_string());
            }
        }

        Ok(Some(Self {
            group_name: group_name.to_string(),
            gid: parse_optional(field(1), "gid")?,
            members,
        }))
    }
}

/// A record together with where it came from.
#[derive(Debug, Clone)]
pub struct ScopedAccount {
    pub scope: OwnerScope,
    pub record: AccountRecord,
    pub source: PathBuf,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct ScopedGroup {
    pub scope: OwnerScope,
    pub record: GroupRecord,
    pub source: PathBuf,
    pub line: usize,
}

fn parse_optional<T: std::str::FromStr>(value: &str, field: &str) -> Result<Option<T>, String> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<T>()
        .map(Some)
        .map_err(|_| format!("field {} is not a non-negative integer: '{}'", field, value))
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line() {
        let record = AccountRecord::parse_line("alice|$6$salt$hash|/home/siteA/alice|1001|1002|1024|2048")
            .unwrap()
            .unwrap();
        assert_eq!(record.name, "alice");
        assert_eq!(record.credential_hash, "$6$salt$hash");
        assert_eq!(record.home_path, Some(PathBuf::from("/home/siteA/alice")));
        assert_eq!(record.uid, Some(1001));
        assert_eq!(record.gid, Some(1002));
        assert_eq!(record.quota_soft_mb, Some(1024));
        assert_eq!(record.quota_hard_mb, Some(2048));
    }

    #[test]
    fn test_missing_trailing_fields_are_empty() {
        let record = AccountRecord::parse_line("carol|hash|/home/siteA/carol").unwrap().unwrap();
        assert_eq!(record.uid, None);
        assert_eq!(record.gid, None);
        assert_eq!(record.quota_soft_mb, None);
        assert_eq!(record.quota_hard_mb, None);

        let bare = AccountRecord::parse_line("dave").unwrap().unwrap();
        assert_eq!(bare.credential_hash, "");
        assert_eq!(bare.home_path, None);
    }

    #[test]
    fn test_blank_and_nameless_lines_are_skipped() {
        assert!(AccountRecord::parse_line("").unwrap().is_none());
        assert!(AccountRecord::parse_line("   ").unwrap().is_none());
        assert!(AccountRecord::parse_line("|hash|/home/x").unwrap().is_none());
    }

    #[test]
    fn test_bad_numeric_field_is_an_error() {
        let err = AccountRecord::parse_line("erin|hash|/home/a/erin|abc").unwrap_err();
        assert!(err.contains("uid"));
        assert!(AccountRecord::parse_line("erin|hash|/home/a/erin|||-5").is_err());
    }

    #[test]
    fn test_invalid_name_is_an_error() {
        assert!(AccountRecord::parse_line("Root!|hash").is_err());
        assert!(AccountRecord::parse_line("../x|hash").is_err());
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(AccountRecord::parse_line(&format!("{}|hash", long)).is_err());
    }

    #[test]
    fn test_separator_characters_are_refused() {
        assert!(AccountRecord::parse_line("erin|$E$:0:0|/home/a/erin").is_err());
        assert!(AccountRecord::parse_line("erin|$E$|/home/a/er:in").is_err());

        let mut record = AccountRecord::new("mallory", "$M$|/home/siteA/m||||");
        assert!(record.validate_fields().unwrap_err().contains("credential hash"));
        record.credential_hash = "$M$".to_string();
        record.home_path = Some(PathBuf::from("/home/siteA/m\nalice|$A$"));
        assert!(record.validate_fields().unwrap_err().contains("home path"));
        record.home_path = Some(PathBuf::from("/home/siteA/m"));
        assert!(record.validate_fields().is_ok());

        assert!(validate_credential_hash("$6$salt$abc def").is_err());
        assert!(validate_credential_hash("$6$rounds=5000$salt$hash./").is_ok());
    }

    #[test]
    fn test_line_roundtrip_keeps_empty_fields() {
        let line = "alice|$HASH$|/home/siteA/alice|||1024|2048";
        let record = AccountRecord::parse_line(line).unwrap().unwrap();
        assert_eq!(record.to_line(), line);
    }

    #[test]
    fn test_group_line() {
        let group = GroupRecord::parse_line("editors||alice, carol,alice,")
            .unwrap()
            .unwrap();
        assert_eq!(group.group_name, "editors");
        assert_eq!(group.gid, None);
        assert_eq!(group.members, vec!["alice".to_string(), "carol".to_string()]);

        let with_gid = GroupRecord::parse_line("ops|5001|").unwrap().unwrap();
        assert_eq!(with_gid.gid, Some(5001));
        assert!(with_gid.members.is_empty());
    }

    #[test]
    fn test_owner_scope_under_root() {
        let scope = OwnerScope::under("/home", "siteA");
        assert_eq!(scope.base_dir, PathBuf::from("/home/siteA"));
        assert_eq!(scope.owner, "siteA");
    }
}
