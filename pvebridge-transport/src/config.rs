//! Settings consumed by the router.
//!
//! How these are assembled (files, environment, flags) is the caller's
//! business; this module only defines the shape and validates it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Cluster connection settings.
///
/// A backend is instantiated for each section that is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// SSH credentials for the shell backend
    pub ssh: Option<SshConfig>,
    /// API token for the REST backend
    pub api: Option<ApiConfig>,
    /// Bounds SSH session setup, each remote command and each HTTP request
    pub timeout_secs: u64,
    /// Block every destructive operation regardless of confirmation
    pub safe_mode: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            ssh: None,
            api: None,
            timeout_secs: 30,
            safe_mode: false,
        }
    }
}

impl ClusterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate every present section and require at least one of them.
    pub fn validate(&self) -> Result<()> {
        if self.ssh.is_none() && self.api.is_none() {
            return Err(TransportError::Configuration(
                "neither SSH credentials nor an API token are configured".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(TransportError::Configuration(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(ssh) = &self.ssh {
            ssh.validate()?;
        }
        if let Some(api) = &self.api {
            api.validate()?;
        }
        Ok(())
    }
}

/// SSH connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Private key file; `~/` expands to the home directory
    pub key_path: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            user: "root".to_string(),
            password: None,
            key_path: None,
        }
    }
}

/// How the shell backend authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuth {
    PublicKey(PathBuf),
    Password(String),
}

impl SshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(TransportError::Configuration("SSH host is not set".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(TransportError::Configuration("SSH user is not set".to_string()));
        }
        self.auth().map(|_| ())
    }

    /// Resolve the authentication method. A key path wins over a password.
    pub fn auth(&self) -> Result<SshAuth> {
        if let Some(key) = self.key_path.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(SshAuth::PublicKey(expand_home(key)));
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            return Ok(SshAuth::Password(password.to_string()));
        }
        Err(TransportError::Configuration(
            "SSH password or key path required".to_string(),
        ))
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Token identifier, `user@realm!tokenname`
    pub token_id: String,
    pub token_secret: String,
    /// Verify the server certificate (clusters usually run self-signed)
    pub verify_ssl: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8006,
            token_id: String::new(),
            token_secret: String::new(),
            verify_ssl: false,
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(TransportError::Configuration("API host is not set".to_string()));
        }
        if self.token_id.trim().is_empty() || self.token_secret.trim().is_empty() {
            return Err(TransportError::Configuration(
                "API token id and secret are required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.host, self.port)
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("PVEAPIToken={}={}", self.token_id, self.token_secret)
    }
}

/// Expand a leading `~/` (or a bare `~`) to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
