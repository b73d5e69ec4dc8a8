use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TlsError;
use crate::security::{Role, TrustConfiguration};

/// NETCONF over TLS well-known port
pub const DEFAULT_PORT: u16 = 6513;
pub const DEFAULT_HOST: &str = "localhost";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trust material for outbound connections
    pub client: RoleTlsConfig,
    /// Trust material for call-home connections
    pub call_home: RoleTlsConfig,
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleTlsConfig {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub ca_dir: Option<PathBuf>,
    pub crl_file: Option<PathBuf>,
    pub crl_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 10_000, // 10 seconds
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl RoleTlsConfig {
    pub fn is_empty(&self) -> bool {
        self == &RoleTlsConfig::default()
    }

    /// Push the configured paths into a role's trust configuration
    pub fn apply(&self, trust: &mut TrustConfiguration) -> crate::Result<()> {
        if self.cert_path.is_some() {
            trust.set_cert_key_paths(self.cert_path.as_deref(), self.key_path.as_deref())?;
        }
        if self.ca_file.is_some() || self.ca_dir.is_some() {
            trust.set_trusted_ca_paths(self.ca_file.as_deref(), self.ca_dir.as_deref())?;
        }
        if self.crl_file.is_some() || self.crl_dir.is_some() {
            trust.set_crl_paths(self.crl_file.as_deref(), self.crl_dir.as_deref())?;
        }
        Ok(())
    }

    fn validate(&self, role: Role) -> crate::Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        if self.cert_path.is_none() {
            return Err(TlsError::Config(format!(
                "{}.cert_path is required when other paths are set",
                section(role)
            )));
        }

        if self.ca_file.is_none() && self.ca_dir.is_none() {
            return Err(TlsError::Config(format!(
                "{}: ca_file or ca_dir must be set",
                section(role)
            )));
        }

        for path in [&self.cert_path, &self.key_path, &self.ca_file, &self.ca_dir, &self.crl_file, &self.crl_dir]
            .into_iter()
            .flatten()
        {
            if path.as_os_str().is_empty() {
                return Err(TlsError::Config(format!(
                    "{}: paths cannot be empty",
                    section(role)
                )));
            }
        }
        Ok(())
    }
}

fn section(role: Role) -> &'static str {
    match role {
        Role::Client => "client",
        Role::CallHome => "call_home",
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn role(&self, role: Role) -> &RoleTlsConfig {
        match role {
            Role::Client => &self.client,
            Role::CallHome => &self.call_home,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.client.validate(Role::Client)?;
        self.call_home.validate(Role::CallHome)?;

        if self.connection.connect_timeout_ms == 0 {
            return Err(TlsError::Config(
                "connection.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
