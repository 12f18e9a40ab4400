// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # FTP Provisioner CLI
//!
//! The `ftp-provisioner` binary is the container entrypoint for a vsftpd
//! host serving virtual sub-accounts.
//!
//! ## Commands
//!
//! - `ftp-provisioner start` - reconcile, render the main config, launch vsftpd
//! - `ftp-provisioner reconcile [--dry-run]` - one reconciliation pass
//! - `ftp-provisioner accounts list|add|update|remove|purge-owner` - record management
//! - `ftp-provisioner config show|validate|generate|generate-template|render` - configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use ftp_provisioner::commands::{self, AccountsCommand, ConfigCommand};
use ftp_provisioner_core::domain::config::{LogFormat, ProvisionerConfig, CONFIG_PATH_ENV};

/// FTP Provisioner - reconcile declarative FTP sub-accounts and run vsftpd
#[derive(Parser)]
#[command(name = "ftp-provisioner")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = CONFIG_PATH_ENV, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "FTP_PROVISIONER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile accounts, render the main configuration and launch the server
    #[command(name = "start")]
    Start,

    /// Run one reconciliation pass without launching the server
    #[command(name = "reconcile")]
    Reconcile {
        /// Compute and log the plan without touching the system
        #[arg(long)]
        dry_run: bool,

        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage account records
    #[command(name = "accounts")]
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings may come from the config file; load errors are
    // reported properly by the command itself.
    let file_logging = ProvisionerConfig::load_or_default(cli.config.clone())
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(
        cli.log_level.as_deref().unwrap_or(&file_logging.level),
        cli.log_format.map(LogFormat::from).unwrap_or(file_logging.format),
    )?;

    match cli.command {
        Commands::Start => commands::start::handle_command(cli.config).await,
        Commands::Reconcile { dry_run, json } => {
            commands::reconcile::handle_command(cli.config, dry_run, json).await
        }
        Commands::Accounts { command } => commands::accounts::handle_command(command, cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }

    Ok(())
}
