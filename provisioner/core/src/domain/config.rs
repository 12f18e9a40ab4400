// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Provisioner Configuration Types
//
// Defines the configuration schema for the provisioner, including:
// - Where declarative records live and the global storage root
// - Server artifact locations (auth store, per-user fragments, main config)
// - OS account database paths and tool retry budgets
// - Passive-mode network parameters and TLS material
// - Quota, removal policy and logging settings
//
// Every field has a default so an empty file (or no file) is a valid,
// container-ready configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "FTP_PROVISIONER_CONFIG";

/// Fatal misconfiguration. Aborts startup before the server is launched.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("cannot read configuration {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("main configuration template {path} is missing or unreadable: {source}")]
    TemplateMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render main configuration: {0}")]
    TemplateRender(String),

    #[error("failed to write main configuration {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS {kind} {path} is declared but unreadable: {source}")]
    TlsUnreadable {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS is half-configured: both a certificate and a key are required")]
    TlsIncomplete,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    #[serde(default)]
    pub records: RecordsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    /// Directory holding one `<owner>/users.list` (and `groups.list`) per owner
    #[serde(default = "default_records_root")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Global storage root; owner scopes are `<root>/<owner>`
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Replace this process with the server
    #[default]
    Exec,
    /// Spawn the server as a child, forward signals, propagate its exit code
    Supervise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_binary")]
    pub binary: PathBuf,

    /// Handlebars template for the main server configuration
    #[serde(default = "default_template_path")]
    pub template_path: PathBuf,

    /// Where the rendered main configuration is installed
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Per-account fragments live under `<dir>/.owners/<owner>/<name>`, linked as `<dir>/<name>`
    #[serde(default = "default_user_config_dir")]
    pub user_config_dir: PathBuf,

    /// Text form of the authentication store
    #[serde(default = "default_virtual_users_file")]
    pub virtual_users_file: PathBuf,

    /// Compiled authentication store (only written when `db_load` is set)
    #[serde(default = "default_virtual_users_db")]
    pub virtual_users_db: PathBuf,

    /// `db_load` program used to compile the store, e.g. "db_load"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_load: Option<String>,

    /// Accounts provisioned by the previous pass
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_nologin_shell")]
    pub nologin_shell: String,

    #[serde(default)]
    pub launch: LaunchMode,

    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_passwd_file")]
    pub passwd_file: PathBuf,

    #[serde(default = "default_group_file")]
    pub group_file: PathBuf,

    #[serde(default = "default_shadow_file")]
    pub shadow_file: PathBuf,

    /// Per-call timeout for shadow-utils and quota tools
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Retries for calls that fail on database lock contention
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_pasv_min_port")]
    pub pasv_min_port: u16,

    #[serde(default = "default_pasv_max_port")]
    pub pasv_max_port: u16,

    /// Explicit passive address; auto-detected when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pasv_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Set to false to skip quota application entirely
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filesystem (mount point or device) quotas are applied on
    #[serde(default = "default_storage_root")]
    pub filesystem: PathBuf,
}

/// What happens to system accounts whose record disappeared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Leave the account dormant; it is only dropped from server artifacts.
    /// Its OS credential keeps working for anything that authenticates
    /// against shadow.
    Retain,
    /// Lock the account's password
    #[default]
    Lock,
    /// Remove the account, keep its directory
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub removed_accounts: RemovalPolicy,

    #[serde(default = "default_max_accounts")]
    pub max_accounts_per_owner: usize,

    /// Bounded wait for the pass and record-file locks
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_records_root() -> PathBuf {
    PathBuf::from("/etc/openpanel/ftp/users")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/home")
}

fn default_server_binary() -> PathBuf {
    PathBuf::from("/usr/sbin/vsftpd")
}

fn default_template_path() -> PathBuf {
    PathBuf::from("/etc/vsftpd/vsftpd.conf.hbs")
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/vsftpd/vsftpd.conf")
}

fn default_user_config_dir() -> PathBuf {
    PathBuf::from("/etc/vsftpd/user_conf")
}

fn default_virtual_users_file() -> PathBuf {
    PathBuf::from("/etc/vsftpd/virtual_users.txt")
}

fn default_virtual_users_db() -> PathBuf {
    PathBuf::from("/etc/vsftpd/virtual_users.db")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/lib/ftp-provisioner/state.json")
}

fn default_nologin_shell() -> String {
    "/usr/sbin/nologin".to_string()
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/vsftpd/vsftpd.pid")
}

fn default_listen_port() -> u16 {
    21
}

fn default_passwd_file() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_group_file() -> PathBuf {
    PathBuf::from("/etc/group")
}

fn default_shadow_file() -> PathBuf {
    PathBuf::from("/etc/shadow")
}

fn default_command_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    500
}

fn default_pasv_min_port() -> u16 {
    21000
}

fn default_pasv_max_port() -> u16 {
    21010
}

fn default_max_accounts() -> usize {
    5
}

fn default_lock_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self { root: default_records_root() }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: default_storage_root() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: default_server_binary(),
            template_path: default_template_path(),
            config_path: default_config_path(),
            user_config_dir: default_user_config_dir(),
            virtual_users_file: default_virtual_users_file(),
            virtual_users_db: default_virtual_users_db(),
            db_load: None,
            state_file: default_state_file(),
            nologin_shell: default_nologin_shell(),
            launch: LaunchMode::default(),
            pid_file: default_pid_file(),
            listen_port: default_listen_port(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            passwd_file: default_passwd_file(),
            group_file: default_group_file(),
            shadow_file: default_shadow_file(),
            command_timeout_secs: default_command_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl IdentityConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            pasv_min_port: default_pasv_min_port(),
            pasv_max_port: default_pasv_max_port(),
            pasv_address: None,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filesystem: default_storage_root(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            removed_accounts: RemovalPolicy::default(),
            max_accounts_per_owner: default_max_accounts(),
            lock_timeout_secs: default_lock_timeout(),
        }
    }
}

impl PolicyConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl ProvisionerConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Discover configuration file using precedence order
    /// 1. FTP_PROVISIONER_CONFIG environment variable
    /// 2. ./ftp-provisioner.yaml (working directory)
    /// 3. /etc/ftp-provisioner/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        Self::discovery_paths().into_iter().find(|p| p.exists())
    }

    /// Candidate locations, in the order they are tried
    pub fn discovery_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./ftp-provisioner.yaml"));
        paths.push(PathBuf::from("/etc/ftp-provisioner/config.yaml"));
        paths
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigurationError> {
        // Explicit path must exist
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else {
            tracing::debug!("No configuration file found in standard locations, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply container environment overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup
    ///
    /// Recognized keys: `PASV_MIN_PORT`, `PASV_MAX_PORT`, `PASV_ADDRESS`,
    /// `TLS_CERT`, `TLS_KEY`, `FTP_PROVISIONER_ENABLE_QUOTAS`. Empty values
    /// count as unset.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        for (key, slot) in [
            ("PASV_MIN_PORT", &mut self.network.pasv_min_port),
            ("PASV_MAX_PORT", &mut self.network.pasv_max_port),
        ] {
            if let Some(val) = get(key) {
                match val.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Environment override: {}={}", key, port);
                        *slot = port;
                    }
                    Err(_) => tracing::warn!(
                        "Invalid value for {}: '{}'. Expected a port number. Ignoring.",
                        key,
                        val
                    ),
                }
            }
        }

        if let Some(val) = get("PASV_ADDRESS") {
            tracing::info!("Environment override: PASV_ADDRESS={}", val);
            self.network.pasv_address = Some(val);
        }

        if let Some(val) = get("TLS_CERT") {
            self.tls.cert_path = Some(PathBuf::from(val));
        }
        if let Some(val) = get("TLS_KEY") {
            self.tls.key_path = Some(PathBuf::from(val));
        }

        if let Some(val) = get("FTP_PROVISIONER_ENABLE_QUOTAS") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: FTP_PROVISIONER_ENABLE_QUOTAS=true");
                    self.quota.enabled = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: FTP_PROVISIONER_ENABLE_QUOTAS=false");
                    self.quota.enabled = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for FTP_PROVISIONER_ENABLE_QUOTAS: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |msg: String| Err(ConfigurationError::Invalid(msg));

        if self.records.root.as_os_str().is_empty() {
            return invalid("records.root cannot be empty".to_string());
        }

        if !self.storage.root.is_absolute() {
            return invalid(format!(
                "storage.root must be absolute, got '{}'",
                self.storage.root.display()
            ));
        }

        if self.network.pasv_min_port == 0 || self.network.pasv_max_port == 0 {
            return invalid("passive ports must be non-zero".to_string());
        }

        if self.network.pasv_min_port > self.network.pasv_max_port {
            return invalid(format!(
                "pasv_min_port {} is greater than pasv_max_port {}",
                self.network.pasv_min_port, self.network.pasv_max_port
            ));
        }

        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            return Err(ConfigurationError::TlsIncomplete);
        }

        if self.policy.max_accounts_per_owner == 0 {
            return invalid("policy.max_accounts_per_owner must be at least 1".to_string());
        }

        if self.server.nologin_shell.is_empty() {
            return invalid("server.nologin_shell cannot be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ProvisionerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.root, PathBuf::from("/home"));
        assert_eq!(config.policy.removed_accounts, RemovalPolicy::Lock);
        assert_eq!(config.server.launch, LaunchMode::Exec);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
records:
  root: /srv/records
policy:
  removed_accounts: delete
logging:
  format: json
"#;
        let config = ProvisionerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.records.root, PathBuf::from("/srv/records"));
        assert_eq!(config.policy.removed_accounts, RemovalPolicy::Delete);
        assert_eq!(config.policy.max_accounts_per_owner, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.network.pasv_min_port, 21000);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = ProvisionerConfig::default();
        config.server.db_load = Some("db_load".to_string());
        let yaml = config.to_yaml_string().unwrap();
        let parsed = ProvisionerConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.server.db_load.as_deref(), Some("db_load"));
        assert_eq!(parsed.server.user_config_dir, config.server.user_config_dir);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ProvisionerConfig::default();
        config.apply_overrides_from(env(&[
            ("PASV_MIN_PORT", "30000"),
            ("PASV_MAX_PORT", "30009"),
            ("PASV_ADDRESS", "ftp.example.com"),
            ("TLS_CERT", "/certs/fullchain.pem"),
            ("TLS_KEY", "/certs/privkey.pem"),
            ("FTP_PROVISIONER_ENABLE_QUOTAS", "off"),
        ]));
        assert_eq!(config.network.pasv_min_port, 30000);
        assert_eq!(config.network.pasv_max_port, 30009);
        assert_eq!(config.network.pasv_address.as_deref(), Some("ftp.example.com"));
        assert_eq!(config.tls.cert_path, Some(PathBuf::from("/certs/fullchain.pem")));
        assert!(!config.quota.enabled);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut config = ProvisionerConfig::default();
        config.apply_overrides_from(env(&[
            ("PASV_MIN_PORT", "not-a-port"),
            ("PASV_ADDRESS", "   "),
            ("FTP_PROVISIONER_ENABLE_QUOTAS", "maybe"),
        ]));
        assert_eq!(config.network.pasv_min_port, 21000);
        assert!(config.network.pasv_address.is_none());
        assert!(config.quota.enabled);
    }

    #[test]
    fn test_validation() {
        let mut config = ProvisionerConfig::default();

        config.network.pasv_min_port = 31000;
        config.network.pasv_max_port = 30000;
        assert!(config.validate().is_err());
        config.network.pasv_max_port = 31010;
        assert!(config.validate().is_ok());

        config.tls.cert_path = Some(PathBuf::from("/certs/cert.pem"));
        assert!(matches!(config.validate(), Err(ConfigurationError::TlsIncomplete)));
        config.tls.key_path = Some(PathBuf::from("/certs/key.pem"));
        assert!(config.validate().is_ok());

        config.storage.root = PathBuf::from("relative/home");
        assert!(config.validate().is_err());
        config.storage.root = PathBuf::from("/home");

        config.policy.max_accounts_per_owner = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = ProvisionerConfig::load_or_default(Some(PathBuf::from(
            "/nonexistent/ftp-provisioner.yaml",
        )));
        assert!(matches!(result, Err(ConfigurationError::Unreadable { .. })));
    }
}
