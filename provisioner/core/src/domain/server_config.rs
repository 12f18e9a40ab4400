// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Main Server Configuration Renderer
//!
//! Renders the server's static configuration from a Handlebars template and
//! the runtime parameters derived at startup.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Template + [`RuntimeParameters`] → main configuration text
//!
//! # Template Variables
//!
//! - `{{listen_port}}`, `{{pasv_min_port}}`, `{{pasv_max_port}}`
//! - `{{pasv_address}}` - omitted when no address could be derived
//! - `{{pasv_addr_resolve}}` - true when `pasv_address` is a host name
//! - `{{tls.cert_path}}`, `{{tls.key_path}}` - only when TLS is enabled
//! - `{{user_config_dir}}`, `{{virtual_users_db}}`

use crate::domain::config::ConfigurationError;
use handlebars::Handlebars;
use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;

/// Template shipped with the binary, written by `config generate-template`
pub const DEFAULT_TEMPLATE: &str = include_str!("../../templates/vsftpd.conf.hbs");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeParameters {
    pub listen_port: u16,
    pub pasv_min_port: u16,
    pub pasv_max_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pasv_address: Option<String>,
    pub pasv_addr_resolve: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsMaterial>,
    pub user_config_dir: PathBuf,
    pub virtual_users_db: PathBuf,
}

impl RuntimeParameters {
    /// Set the passive address, flagging host names for resolution by the server
    pub fn with_pasv_address(mut self, address: Option<String>) -> Self {
        self.pasv_addr_resolve = address
            .as_deref()
            .map(|a| a.parse::<IpAddr>().is_err())
            .unwrap_or(false);
        self.pasv_address = address;
        self
    }
}

pub struct MainConfigRenderer {
    handlebars: Handlebars<'static>,
}

impl MainConfigRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        // Plain text output; paths must not be HTML-escaped
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(false);
        Self { handlebars }
    }

    pub fn render(&self, template: &str, params: &RuntimeParameters) -> Result<String, ConfigurationError> {
        self.handlebars
            .render_template(template, params)
            .map_err(|e| ConfigurationError::TemplateRender(e.to_string()))
    }

    /// Check template syntax without rendering
    pub fn validate_template(&self, template: &str) -> Result<(), ConfigurationError> {
        handlebars::template::Template::compile(template)
            .map(|_| ())
            .map_err(|e| ConfigurationError::TemplateRender(e.to_string()))
    }
}

impl Default for MainConfigRenderer {
    fn default() -> Self {
        Self::new()
    }
}
