// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Server launcher
//!
//! Hands control to the FTP server once startup preparation succeeded:
//!
//! - **exec** - replace this process, so the container runtime tracks the
//!   server's PID directly and receives its exit code
//! - **supervise** - spawn the server as a child, record its PID, forward
//!   SIGTERM/SIGINT/SIGHUP and exit with the child's exit code

use anyhow::{Context, Result};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use ftp_provisioner_core::domain::config::{LaunchMode, ServerConfig};

/// Launch the server. Only returns in supervise mode, with the exit code
/// this process should exit with.
pub async fn launch(server: &ServerConfig) -> Result<i32> {
    match server.launch {
        LaunchMode::Exec => exec(server),
        LaunchMode::Supervise => supervise(server).await,
    }
}

fn exec(server: &ServerConfig) -> Result<i32> {
    use std::os::unix::process::CommandExt;

    info!(
        binary = %server.binary.display(),
        config = %server.config_path.display(),
        "handing over to server"
    );
    let err = std::process::Command::new(&server.binary)
        .arg(&server.config_path)
        .exec();
    Err(anyhow::Error::new(err).context(format!("Failed to exec {}", server.binary.display())))
}

pub async fn supervise(server: &ServerConfig) -> Result<i32> {
    let mut child = tokio::process::Command::new(&server.binary)
        .arg(&server.config_path)
        .spawn()
        .with_context(|| format!("Failed to start {}", server.binary.display()))?;
    let pid = child.id().context("Server exited before its PID could be read")?;

    write_pid_file(&server.pid_file, pid)?;
    let _guard = PidFileGuard(server.pid_file.clone());
    info!(pid, binary = %server.binary.display(), "server started under supervision");

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status.context("Failed to wait for server")?,
            _ = terminate.recv() => forward(pid, libc::SIGTERM),
            _ = interrupt.recv() => forward(pid, libc::SIGINT),
            _ = hangup.recv() => forward(pid, libc::SIGHUP),
        }
    };

    let code = exit_code(status);
    info!(pid, code, "server exited");
    Ok(code)
}

fn forward(pid: u32, sig: libc::c_int) {
    info!(pid, signal = sig, "forwarding signal to server");
    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(pid as libc::pid_t, sig) } != 0 {
        warn!(pid, signal = sig, error = %std::io::Error::last_os_error(), "failed to forward signal");
    }
}

/// Shell convention: 128 + signal number for a signalled child
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create PID directory: {:?}", parent))?;
    }
    std::fs::write(path, format!("{}\n", pid))
        .with_context(|| format!("Failed to write PID file: {:?}", path))?;
    info!("Wrote PID file: {:?}", path);
    Ok(())
}

/// Removes the PID file when supervision ends
struct PidFileGuard(PathBuf);

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            warn!("Failed to remove PID file {:?}: {}", self.0, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exit_code_from_signal() {
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGTERM)), 128 + libc::SIGTERM);
    }

    #[tokio::test]
    async fn test_supervise_propagates_exit_code_and_cleans_pid_file() {
        let dir = TempDir::new().unwrap();
        // The configured config path is passed as the only argument, so a
        // shell runs it as a script.
        let script = dir.path().join("server.sh");
        std::fs::write(&script, "exit 3\n").unwrap();

        let server = ServerConfig {
            binary: PathBuf::from("sh"),
            config_path: script,
            pid_file: dir.path().join("run").join("server.pid"),
            launch: LaunchMode::Supervise,
            ..ServerConfig::default()
        };

        let code = launch(&server).await.unwrap();
        assert_eq!(code, 3);
        assert!(!server.pid_file.exists());
    }
}
