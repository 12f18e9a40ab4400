// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate, generate-template, render

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use ftp_provisioner_core::application::render_main_config;
use ftp_provisioner_core::application::startup::{check_tls, read_template};
use ftp_provisioner_core::domain::config::{ProvisionerConfig, CONFIG_PATH_ENV};
use ftp_provisioner_core::domain::server_config::{MainConfigRenderer, DEFAULT_TEMPLATE};
use ftp_provisioner_core::infrastructure::network::SystemAddressProbe;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file, TLS material and main template
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./ftp-provisioner.yaml)
        #[arg(short, long, default_value = "./ftp-provisioner.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },

    /// Write the bundled main server configuration template
    #[command(name = "generate-template")]
    GenerateTemplate {
        /// Output path (default: ./vsftpd.conf.hbs)
        #[arg(short, long, default_value = "./vsftpd.conf.hbs")]
        output: PathBuf,
    },

    /// Render the main server configuration to stdout without installing it
    Render,
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
        ConfigCommand::GenerateTemplate { output } => generate_template(output).await,
        ConfigCommand::Render => render(config_override).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ProvisionerConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./ftp-provisioner.yaml");
        println!("  4. /etc/ftp-provisioner/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Records:".bold());
    println!("  Root: {}", config.records.root.display());
    println!("  Storage root: {}", config.storage.root.display());
    println!("  Accounts per owner: {}", config.policy.max_accounts_per_owner);
    println!("  Removed accounts: {:?}", config.policy.removed_accounts);
    println!();

    println!("{}", "Server:".bold());
    println!("  Binary: {} ({:?})", config.server.binary.display(), config.server.launch);
    println!("  Template: {}", config.server.template_path.display());
    println!("  Main config: {}", config.server.config_path.display());
    println!("  Fragments: {}", config.server.user_config_dir.display());
    println!("  Authentication store: {}", config.server.virtual_users_file.display());
    if let Some(db_load) = &config.server.db_load {
        println!("    compiled by {} → {}", db_load, config.server.virtual_users_db.display());
    }
    println!();

    println!("{}", "Network:".bold());
    println!(
        "  Passive ports: {}-{}",
        config.network.pasv_min_port, config.network.pasv_max_port
    );
    println!(
        "  Passive address: {}",
        config.network.pasv_address.as_deref().unwrap_or("(auto-detect)")
    );
    match (&config.tls.cert_path, &config.tls.key_path) {
        (Some(cert), Some(key)) => println!("  TLS: {} / {}", cert.display(), key.display()),
        (None, None) => println!("  TLS: {}", "disabled".dimmed()),
        _ => println!("  TLS: {}", "half-configured".red()),
    }
    println!();

    println!("{}", "Quotas:".bold());
    if config.quota.enabled {
        println!("  Filesystem: {}", config.quota.filesystem.display());
    } else {
        println!("  {}", "disabled".dimmed());
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ProvisionerConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;
    check_tls(&config.tls).context("TLS validation failed")?;

    let template = read_template(&config.server.template_path)?;
    MainConfigRenderer::new()
        .validate_template(&template)
        .context("Main configuration template is invalid")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

async fn generate_template(output: PathBuf) -> Result<()> {
    std::fs::write(&output, DEFAULT_TEMPLATE)
        .with_context(|| format!("Failed to write template to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Template generated: {}", output.display()).green()
    );

    Ok(())
}

async fn render(config_override: Option<PathBuf>) -> Result<()> {
    let config = ProvisionerConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let rendered = render_main_config(&config, &SystemAddressProbe)
        .await
        .context("Failed to render main configuration")?;
    print!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use ftp_provisioner_core::domain::config::{LogFormat, ProvisionerConfig};

    #[test]
    fn test_sample_configs_parse_and_validate() {
        for sample in [
            include_str!("../../templates/config-minimal.yaml"),
            include_str!("../../templates/config-with-examples.yaml"),
        ] {
            let config = ProvisionerConfig::from_yaml_str(sample).unwrap();
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_example_config_values() {
        let config =
            ProvisionerConfig::from_yaml_str(include_str!("../../templates/config-with-examples.yaml")).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.server.db_load.as_deref(), Some("db_load"));
    }
}
