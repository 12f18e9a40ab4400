// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Startup Orchestrator
//!
//! Everything that has to be true before the server process is launched:
//!
//! 1. Configuration, TLS material and the main template are checked first,
//!    so a fatal misconfiguration aborts before any account is touched
//! 2. A full reconciliation pass
//! 3. Passive address derivation and main configuration rendering
//! 4. Atomic install of the rendered configuration
//!
//! Launching the server is left to the caller.

use crate::application::reconciler::{ReconcileError, ReconcileReport, Reconciler};
use crate::domain::config::{ConfigurationError, ProvisionerConfig, TlsConfig};
use crate::domain::server_config::{MainConfigRenderer, RuntimeParameters, TlsMaterial};
use crate::infrastructure::atomic_file::write_atomic;
use crate::infrastructure::network::AddressProbe;
use std::fs::File;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

const MAIN_CONFIG_MODE: u32 = 0o644;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Passive-mode address: explicit override, else the FQDN when it
/// resolves, else the primary IPv4 address.
pub async fn resolve_passive_address(override_address: Option<&str>, probe: &dyn AddressProbe) -> Option<String> {
    if let Some(address) = override_address.map(str::trim).filter(|a| !a.is_empty()) {
        info!(address, "passive address from configuration");
        return Some(address.to_string());
    }

    if let Some(fqdn) = probe.fqdn() {
        if probe.resolves(&fqdn).await {
            info!(address = %fqdn, "passive address from host FQDN");
            return Some(fqdn);
        }
        warn!(fqdn = %fqdn, "host FQDN does not resolve, falling back to primary address");
    }

    match probe.primary_ipv4() {
        Some(ip) => {
            info!(address = %ip, "passive address from primary interface");
            Some(ip.to_string())
        }
        None => {
            warn!("no passive address could be derived, passive mode will advertise the control address");
            None
        }
    }
}

/// TLS material when both halves are declared and readable. Absence of
/// both disables TLS; anything in between is fatal.
pub fn check_tls(tls: &TlsConfig) -> Result<Option<TlsMaterial>, ConfigurationError> {
    match (&tls.cert_path, &tls.key_path) {
        (None, None) => {
            info!("TLS disabled");
            Ok(None)
        }
        (Some(cert_path), Some(key_path)) => {
            readable("certificate", cert_path)?;
            readable("key", key_path)?;
            info!(cert = %cert_path.display(), key = %key_path.display(), "TLS enabled");
            Ok(Some(TlsMaterial {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }))
        }
        _ => Err(ConfigurationError::TlsIncomplete),
    }
}

fn readable(kind: &'static str, path: &Path) -> Result<(), ConfigurationError> {
    File::open(path).map(|_| ()).map_err(|source| ConfigurationError::TlsUnreadable {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

pub fn runtime_parameters(
    config: &ProvisionerConfig,
    tls: Option<TlsMaterial>,
    pasv_address: Option<String>,
) -> RuntimeParameters {
    RuntimeParameters {
        listen_port: config.server.listen_port,
        pasv_min_port: config.network.pasv_min_port,
        pasv_max_port: config.network.pasv_max_port,
        pasv_address: None,
        pasv_addr_resolve: false,
        tls,
        user_config_dir: config.server.user_config_dir.clone(),
        virtual_users_db: config.server.virtual_users_db.clone(),
    }
    .with_pasv_address(pasv_address)
}

pub fn read_template(path: &Path) -> Result<String, ConfigurationError> {
    std::fs::read_to_string(path).map_err(|source| ConfigurationError::TemplateMissing {
        path: path.to_path_buf(),
        source,
    })
}

/// Render the main configuration without reconciling or writing anything
pub async fn render_main_config(config: &ProvisionerConfig, probe: &dyn AddressProbe) -> Result<String, ConfigurationError> {
    config.validate()?;
    let tls = check_tls(&config.tls)?;
    let template = read_template(&config.server.template_path)?;
    let address = resolve_passive_address(config.network.pasv_address.as_deref(), probe).await;
    MainConfigRenderer::new().render(&template, &runtime_parameters(config, tls, address))
}

/// Result of a successful startup preparation
#[derive(Debug)]
pub struct Prepared {
    pub report: ReconcileReport,
    pub parameters: RuntimeParameters,
}

pub struct StartupOrchestrator<'a> {
    config: &'a ProvisionerConfig,
    reconciler: Reconciler,
    probe: &'a dyn AddressProbe,
    renderer: MainConfigRenderer,
}

impl<'a> StartupOrchestrator<'a> {
    pub fn new(config: &'a ProvisionerConfig, reconciler: Reconciler, probe: &'a dyn AddressProbe) -> Self {
        Self {
            config,
            reconciler,
            probe,
            renderer: MainConfigRenderer::new(),
        }
    }

    pub async fn prepare(&self) -> Result<Prepared, StartupError> {
        self.config.validate()?;
        let tls = check_tls(&self.config.tls)?;
        let template = read_template(&self.config.server.template_path)?;
        self.renderer.validate_template(&template)?;

        let report = self.reconciler.run_pass().await?;

        let parameters = self.parameters(tls).await;
        let rendered = self.renderer.render(&template, &parameters)?;
        let path = &self.config.server.config_path;
        write_atomic(path, rendered.as_bytes(), MAIN_CONFIG_MODE).map_err(|source| {
            ConfigurationError::ConfigWrite { path: path.clone(), source }
        })?;
        info!(path = %path.display(), "main configuration installed");

        Ok(Prepared { report, parameters })
    }

    async fn parameters(&self, tls: Option<TlsMaterial>) -> RuntimeParameters {
        let address = resolve_passive_address(self.config.network.pasv_address.as_deref(), self.probe).await;
        runtime_parameters(self.config, tls, address)
    }
}
