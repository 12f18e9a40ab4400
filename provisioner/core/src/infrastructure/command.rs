// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! External command execution
//!
//! Runs shadow-utils, quota and database tools with a per-call timeout and a
//! bounded retry budget. Only failures that look like database lock
//! contention (`cannot lock /etc/passwd; try again later`) or timeouts are
//! retried; anything else fails immediately.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Process boundary behind [`CommandRunner`], faked in tests

use crate::domain::identity::ProvisioningError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` to successful completion, optionally feeding `stdin`.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ProvisioningError>;
}

pub struct ProcessRunner {
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration, max_retries: u32, retry_delay: Duration) -> Self {
        Self { timeout, max_retries, retry_delay }
    }

    async fn run_once(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ProvisioningError> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let io_err = |source| ProvisioningError::Io { path: program.into(), source };
        let mut child = cmd.spawn().map_err(io_err)?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await.map_err(io_err)?;
            // Close stdin so the tool sees EOF
            drop(pipe);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(io_err)?,
            Err(_) => {
                return Err(ProvisioningError::Timeout {
                    program: program.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(ProvisioningError::CommandFailed {
                program: program.to_string(),
                code: output.status.code(),
                stderr,
            })
        }
    }
}

/// Whether a failure is worth another attempt
pub fn is_transient(err: &ProvisioningError) -> bool {
    match err {
        ProvisioningError::Timeout { .. } => true,
        ProvisioningError::CommandFailed { stderr, .. } => {
            let stderr = stderr.to_lowercase();
            stderr.contains("cannot lock") || stderr.contains("try again later")
        }
        _ => false,
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ProvisioningError> {
        let mut attempt = 0;
        loop {
            debug!(program, ?args, attempt, "running command");
            match self.run_once(program, args, stdin).await {
                Ok(output) => return Ok(output),
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    attempt += 1;
                    warn!(program, attempt, max_retries = self.max_retries, error = %e, "transient failure, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_secs(5), 2, Duration::from_millis(10))
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let output = runner().run("sh", &args(&["-c", "echo hello"]), None).await.unwrap();
        assert_eq!(output.stdout, "hello\n");
    }

    #[tokio::test]
    async fn test_feeds_stdin() {
        let output = runner().run("cat", &[], Some("alice:$HASH$\n")).await.unwrap();
        assert_eq!(output.stdout, "alice:$HASH$\n");
    }

    #[tokio::test]
    async fn test_failure_reports_exit_code_and_stderr() {
        let err = runner()
            .run("sh", &args(&["-c", "echo boom >&2; exit 3"]), None)
            .await
            .unwrap_err();
        match err {
            ProvisioningError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner = ProcessRunner::new(Duration::from_millis(100), 0, Duration::from_millis(1));
        let err = runner.run("sleep", &args(&["5"]), None).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::Timeout { .. }));
    }

    #[test]
    fn test_transient_classification() {
        let locked = ProvisioningError::CommandFailed {
            program: "useradd".to_string(),
            code: Some(1),
            stderr: "useradd: cannot lock /etc/passwd; try again later.".to_string(),
        };
        let collision = ProvisioningError::CommandFailed {
            program: "useradd".to_string(),
            code: Some(4),
            stderr: "useradd: UID 1001 is not unique".to_string(),
        };
        assert!(is_transient(&locked));
        assert!(!is_transient(&collision));
    }
}
