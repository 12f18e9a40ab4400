// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Server-State Artifacts
//!
//! The server's account artifacts as pure functions of the provisioned
//! account set:
//!
//! - the authentication store, in the `db_load -T -t hash` text form
//!   (key line, value line, per account, sorted by name)
//! - one configuration fragment per account
//! - the state manifest remembered between passes
//!
//! Nothing is patched in place. Each pass renders every artifact from
//! scratch, so an account that left the records cannot leave anything
//! behind.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** `f(accounts) -> artifact`, rendered without I/O

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// An account that made it through policy and identity provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedAccount {
    pub owner: String,
    pub name: String,
    pub credential_hash: String,
    pub home: PathBuf,
}

/// Authentication store text. An empty account set renders as an empty
/// string, which compiles to an empty database.
pub fn render_auth_store(accounts: &[ProvisionedAccount]) -> String {
    let mut sorted: Vec<&ProvisionedAccount> = accounts.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = String::new();
    for account in sorted {
        out.push_str(&account.name);
        out.push('\n');
        out.push_str(&account.credential_hash);
        out.push('\n');
    }
    out
}

/// Hex SHA-256 of rendered content
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Fragment confining the account to its home, with write access
pub fn render_fragment(account: &ProvisionedAccount) -> String {
    format!(
        "local_root={}\nwrite_enable=YES\nchroot_local_user=YES\nallow_writeable_chroot=YES\n",
        account.home.display()
    )
}

/// Accounts installed by a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateManifest {
    pub generated_at: DateTime<Utc>,
    /// Digest of the authentication store text written by the pass
    pub auth_store_digest: String,
    pub accounts: Vec<ManifestEntry>,
}

impl StateManifest {
    pub fn new(accounts: &[ProvisionedAccount], auth_store_digest: String) -> Self {
        let mut entries: Vec<ManifestEntry> = accounts
            .iter()
            .map(|a| ManifestEntry {
                owner: a.owner.clone(),
                name: a.name.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            generated_at: Utc::now(),
            auth_store_digest,
            accounts: entries,
        }
    }

    /// Entries whose names no record declares any more. Accounts that are
    /// still declared but failed this pass are not listed.
    pub fn removed_since<'a>(&'a self, declared: &BTreeSet<String>) -> Vec<&'a ManifestEntry> {
        self.accounts
            .iter()
            .filter(|e| !declared.contains(&e.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(owner: &str, name: &str, hash: &str) -> ProvisionedAccount {
        ProvisionedAccount {
            owner: owner.to_string(),
            name: name.to_string(),
            credential_hash: hash.to_string(),
            home: PathBuf::from(format!("/home/{}/{}", owner, name)),
        }
    }

    #[test]
    fn test_auth_store_is_sorted_and_flat() {
        let accounts = vec![
            account("siteB", "zed", "$Z$"),
            account("siteA", "alice", "$HASH$"),
        ];
        assert_eq!(render_auth_store(&accounts), "alice\n$HASH$\nzed\n$Z$\n");
    }

    #[test]
    fn test_empty_auth_store() {
        assert_eq!(render_auth_store(&[]), "");
    }

    #[test]
    fn test_auth_store_is_order_independent() {
        let a = vec![account("s", "a", "1"), account("s", "b", "2")];
        let b = vec![account("s", "b", "2"), account("s", "a", "1")];
        assert_eq!(
            content_digest(&render_auth_store(&a)),
            content_digest(&render_auth_store(&b))
        );
    }

    #[test]
    fn test_fragment_keys() {
        let fragment = render_fragment(&account("siteA", "alice", "$HASH$"));
        assert!(fragment.starts_with("local_root=/home/siteA/alice\n"));
        for key in ["local_root", "write_enable", "chroot_local_user", "allow_writeable_chroot"] {
            assert!(fragment.contains(&format!("{}=", key)), "missing {}", key);
        }
        assert!(fragment.contains("allow_writeable_chroot=YES"));
    }

    #[test]
    fn test_manifest_removed_since() {
        let before = StateManifest::new(
            &[account("siteA", "alice", "1"), account("siteA", "bob", "2")],
            String::new(),
        );
        let declared: BTreeSet<String> = ["alice".to_string()].into_iter().collect();
        let removed = before.removed_since(&declared);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "bob");
        assert!(before.accounts.iter().any(|e| e.name == "alice"));
    }
}
