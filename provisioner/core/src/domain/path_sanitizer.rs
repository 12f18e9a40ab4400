// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Path Sanitizer Domain Service
//!
//! Lexical normalization and containment checks for account home paths.
//! Nothing here touches the filesystem: symlinks are not resolved, and a
//! path is judged purely by its components. This is what lets the policy
//! layer reject `/home/siteA/../siteB/x` before any directory exists.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Keep every account directory inside its owner's scope

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Path sanitization errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathSanitizerError {
    #[error("path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("path is not absolute: {0}")]
    NotAbsolute(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("path {path} is outside {boundary}")]
    OutsideBoundary { path: String, boundary: String },

    #[error("path too long: {0}")]
    PathTooLong(String),
}

/// Validates and normalizes absolute paths against one or more boundaries.
///
/// # Security Guarantees
/// - Rejects paths containing `..` components
/// - Rejects relative paths and NUL bytes
/// - Boundary checks are component-wise: `/home/siteAB` is not inside `/home/siteA`
pub struct PathSanitizer {
    /// Maximum allowed path length (default: 4096, PATH_MAX on Linux)
    max_path_len: usize,
}

impl PathSanitizer {
    pub fn new() -> Self {
        Self { max_path_len: 4096 }
    }

    #[cfg(test)]
    fn with_max_length(max_path_len: usize) -> Self {
        Self { max_path_len }
    }

    /// Normalize an absolute path, dropping `.` components and duplicate separators.
    ///
    /// ```
    /// use ftp_provisioner_core::domain::path_sanitizer::PathSanitizer;
    /// use std::path::PathBuf;
    ///
    /// let sanitizer = PathSanitizer::new();
    /// assert_eq!(
    ///     sanitizer.normalize("/home/siteA/./alice/").unwrap(),
    ///     PathBuf::from("/home/siteA/alice")
    /// );
    /// assert!(sanitizer.normalize("/home/siteA/../etc").is_err());
    /// ```
    pub fn normalize(&self, path: impl AsRef<Path>) -> Result<PathBuf, PathSanitizerError> {
        let path = path.as_ref();
        let shown = path.display().to_string();

        if shown.len() > self.max_path_len {
            return Err(PathSanitizerError::PathTooLong(shown));
        }
        if shown.contains('\0') {
            return Err(PathSanitizerError::InvalidPath(
                "path contains null byte".to_string(),
            ));
        }
        if !path.is_absolute() {
            return Err(PathSanitizerError::NotAbsolute(shown));
        }

        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => normalized.push(component),
                Component::CurDir => {}
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    tracing::warn!(path = %shown, "path traversal attempt: contains '..' component");
                    return Err(PathSanitizerError::PathTraversal(shown));
                }
            }
        }

        Ok(normalized)
    }

    /// Normalize `path` and require it to lie at or under `boundary`.
    pub fn contain(
        &self,
        path: impl AsRef<Path>,
        boundary: impl AsRef<Path>,
    ) -> Result<PathBuf, PathSanitizerError> {
        let normalized = self.normalize(path)?;
        let boundary = self.normalize(boundary)?;

        if !normalized.starts_with(&boundary) {
            return Err(PathSanitizerError::OutsideBoundary {
                path: normalized.display().to_string(),
                boundary: boundary.display().to_string(),
            });
        }

        Ok(normalized)
    }

    /// Path of `absolute_path` relative to `boundary`.
    pub fn strip_boundary(
        &self,
        absolute_path: impl AsRef<Path>,
        boundary: impl AsRef<Path>,
    ) -> Result<PathBuf, PathSanitizerError> {
        let abs = absolute_path.as_ref();
        abs.strip_prefix(boundary.as_ref())
            .map(|p| p.to_path_buf())
            .map_err(|_| PathSanitizerError::OutsideBoundary {
                path: abs.display().to_string(),
                boundary: boundary.as_ref().display().to_string(),
            })
    }
}

impl Default for PathSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_path() {
        let sanitizer = PathSanitizer::new();
        let result = sanitizer.contain("/home/siteA/alice", "/home/siteA");
        assert_eq!(result.unwrap(), PathBuf::from("/home/siteA/alice"));
    }

    #[test]
    fn test_boundary_itself_is_contained() {
        let sanitizer = PathSanitizer::new();
        assert!(sanitizer.contain("/home/siteA", "/home/siteA").is_ok());
    }

    #[test]
    fn test_reject_parent_dir() {
        let sanitizer = PathSanitizer::new();
        let result = sanitizer.contain("/home/siteA/../siteB/x", "/home/siteA");
        assert!(matches!(result.unwrap_err(), PathSanitizerError::PathTraversal(_)));
    }

    #[test]
    fn test_reject_relative() {
        let sanitizer = PathSanitizer::new();
        let result = sanitizer.normalize("siteA/alice");
        assert!(matches!(result.unwrap_err(), PathSanitizerError::NotAbsolute(_)));
    }

    #[test]
    fn test_sibling_prefix_is_outside() {
        let sanitizer = PathSanitizer::new();
        let result = sanitizer.contain("/home/siteAB/alice", "/home/siteA");
        assert!(matches!(
            result.unwrap_err(),
            PathSanitizerError::OutsideBoundary { .. }
        ));
    }

    #[test]
    fn test_normalize_current_dir() {
        let sanitizer = PathSanitizer::new();
        let result = sanitizer.contain("/home/./siteA/./alice", "/home");
        assert_eq!(result.unwrap(), PathBuf::from("/home/siteA/alice"));
    }

    #[test]
    fn test_path_too_long() {
        let sanitizer = PathSanitizer::with_max_length(10);
        let result = sanitizer.normalize("/very/long/path/that/exceeds/limit");
        assert!(matches!(result.unwrap_err(), PathSanitizerError::PathTooLong(_)));
    }

    #[test]
    fn test_outside_boundary_reports_both_paths() {
        let sanitizer = PathSanitizer::new();
        let err = sanitizer.contain("/etc/bob", "/home").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("/etc/bob"));
        assert!(message.contains("/home"));
    }

    #[test]
    fn test_strip_boundary() {
        let sanitizer = PathSanitizer::new();
        let result = sanitizer.strip_boundary("/home/siteA/alice/www", "/home/siteA");
        assert_eq!(result.unwrap(), PathBuf::from("alice/www"));
        assert!(sanitizer.strip_boundary("/etc/passwd", "/home").is_err());
    }
}
