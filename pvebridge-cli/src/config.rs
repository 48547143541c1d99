//! Configuration loading: YAML file, `.env` discovery and command-line overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pvebridge_transport::{ApiConfig, ClusterConfig, SshConfig};
use tracing::{debug, info};

use crate::cli::Overrides;

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pvebridge/config.yaml";

const DOTENV_FILE: &str = ".env";

/// Load a configuration file.
pub fn load(path: &Path) -> Result<ClusterConfig> {
    if !path.exists() {
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ClusterConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Resolve the effective configuration.
///
/// An explicit path must exist. Without one, the default path is used when
/// present and an empty configuration otherwise; overrides apply on top.
pub fn resolve(explicit: Option<&Path>, overrides: &Overrides) -> Result<ClusterConfig> {
    let base = match explicit {
        Some(path) => {
            let config = load(path)?;
            info!(config_path = %path.display(), "Configuration loaded");
            config
        }
        None => match load(Path::new(DEFAULT_CONFIG_PATH)) {
            Ok(config) => {
                info!(config_path = DEFAULT_CONFIG_PATH, "Configuration loaded from default location");
                config
            }
            Err(_) => {
                debug!("No config file found, using environment and flags");
                ClusterConfig::default()
            }
        },
    };

    Ok(apply_overrides(base, overrides))
}

/// Apply overrides. A section is created when any of its fields is overridden.
pub fn apply_overrides(mut config: ClusterConfig, overrides: &Overrides) -> ClusterConfig {
    let touches_ssh = overrides.ssh_host.is_some()
        || overrides.ssh_port.is_some()
        || overrides.ssh_user.is_some()
        || overrides.ssh_password.is_some()
        || overrides.ssh_key_path.is_some();

    if touches_ssh {
        let ssh = config.ssh.get_or_insert_with(SshConfig::default);
        if let Some(ref host) = overrides.ssh_host {
            ssh.host = host.clone();
        }
        if let Some(port) = overrides.ssh_port {
            ssh.port = port;
        }
        if let Some(ref user) = overrides.ssh_user {
            ssh.user = user.clone();
        }
        if let Some(ref password) = overrides.ssh_password {
            ssh.password = Some(password.clone());
        }
        if let Some(ref key_path) = overrides.ssh_key_path {
            ssh.key_path = Some(key_path.clone());
        }
    }

    let touches_api = overrides.api_host.is_some()
        || overrides.api_port.is_some()
        || overrides.token_id.is_some()
        || overrides.token_secret.is_some()
        || overrides.verify_ssl.is_some();

    if touches_api {
        let api = config.api.get_or_insert_with(ApiConfig::default);
        if let Some(ref host) = overrides.api_host {
            api.host = host.clone();
        }
        if let Some(port) = overrides.api_port {
            api.port = port;
        }
        if let Some(ref token_id) = overrides.token_id {
            api.token_id = token_id.clone();
        }
        if let Some(ref token_secret) = overrides.token_secret {
            api.token_secret = token_secret.clone();
        }
        if let Some(verify_ssl) = overrides.verify_ssl {
            api.verify_ssl = verify_ssl;
        }
    }

    if let Some(safe_mode) = overrides.safe_mode {
        config.safe_mode = safe_mode;
    }
    if let Some(timeout) = overrides.timeout {
        config.timeout_secs = timeout;
    }

    config
}

/// Find a `.env` file in `start` or the nearest parent directory.
pub fn find_dotenv(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(DOTENV_FILE))
        .find(|candidate| candidate.is_file())
}

/// Load the nearest `.env` into the process environment.
///
/// Variables already set are left alone. Returns the file that was loaded.
pub fn load_dotenv() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let path = find_dotenv(&cwd)?;
    dotenvy::from_path(&path).ok()?;
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
ssh:
  host: pve1.lab
  key_path: ~/.ssh/id_ed25519
api:
  host: pve1.lab
  token_id: "root@pam!cli"
  token_secret: 0000-1111
timeout_secs: 10
"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        let ssh = config.ssh.unwrap();
        assert_eq!(ssh.host, "pve1.lab");
        assert_eq!(ssh.port, 22);
        assert_eq!(ssh.user, "root");
        let api = config.api.unwrap();
        assert_eq!(api.port, 8006);
        assert!(!api.verify_ssl);
        assert_eq!(config.timeout_secs, 10);
        assert!(!config.safe_mode);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(resolve(Some(&missing), &Overrides::default()).is_err());
    }

    #[test]
    fn test_overrides_create_sections() {
        let overrides = Overrides {
            ssh_host: Some("10.0.0.2".to_string()),
            ssh_password: Some("secret".to_string()),
            safe_mode: Some(true),
            ..Default::default()
        };

        let config = apply_overrides(ClusterConfig::default(), &overrides);
        let ssh = config.ssh.as_ref().unwrap();
        assert_eq!(ssh.host, "10.0.0.2");
        assert_eq!(ssh.password.as_deref(), Some("secret"));
        assert!(config.api.is_none());
        assert!(config.safe_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let base = ClusterConfig {
            api: Some(ApiConfig {
                host: "old".to_string(),
                token_id: "a@pam!t".to_string(),
                token_secret: "s".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overrides = Overrides {
            api_host: Some("new".to_string()),
            verify_ssl: Some(true),
            timeout: Some(5),
            ..Default::default()
        };

        let config = apply_overrides(base, &overrides);
        let api = config.api.unwrap();
        assert_eq!(api.host, "new");
        assert_eq!(api.token_id, "a@pam!t");
        assert!(api.verify_ssl);
        assert_eq!(config.timeout_secs, 5);
    }

    #[test]
    fn test_dotenv_found_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join(".env"), "SSH_HOST=pve1\n").unwrap();

        assert_eq!(find_dotenv(&nested), Some(dir.path().join(".env")));
    }

    #[test]
    fn test_nearest_dotenv_wins() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("project");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join(".env"), "A=1\n").unwrap();
        fs::write(nested.join(".env"), "A=2\n").unwrap();

        assert_eq!(find_dotenv(&nested), Some(nested.join(".env")));
    }
}
