//! Backend selection.
//!
//! The router owns up to two backends, decided once from which credentials
//! are configured, and hands out one of them per operation.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::config::ClusterConfig;
use crate::error::{Result, TransportError};
use crate::rest::RestBackend;
use crate::shell::ShellBackend;
use crate::traits::{BackendKind, Transport};

/// Coarse operation category used to pick a default backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Listings and status queries
    Read,
    /// Lifecycle, create, clone and delete
    Write,
    /// Snapshot create, delete and rollback
    Snapshot,
    /// Configuration changes and raw node commands
    Config,
}

impl OperationClass {
    /// Backend preferred for this class when the caller expresses none.
    ///
    /// The node's own snapshot and configuration tooling is treated as more
    /// authoritative than the REST surface for those two classes.
    pub fn preferred_backend(self) -> BackendKind {
        match self {
            OperationClass::Read | OperationClass::Write => BackendKind::Api,
            OperationClass::Snapshot | OperationClass::Config => BackendKind::Ssh,
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationClass::Read => "read",
            OperationClass::Write => "write",
            OperationClass::Snapshot => "snapshot",
            OperationClass::Config => "config",
        };
        f.write_str(name)
    }
}

/// Routes operations to the shell or REST backend.
pub struct Router {
    ssh: Option<Arc<dyn Transport>>,
    api: Option<Arc<dyn Transport>>,
}

impl Router {
    /// Build the backends for every configured credential set.
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;

        let ssh = config.ssh.as_ref().map(|ssh| {
            Arc::new(ShellBackend::new(ssh.clone(), config.timeout())) as Arc<dyn Transport>
        });
        let api = match &config.api {
            Some(api) => Some(Arc::new(RestBackend::new(api, config.timeout())?) as Arc<dyn Transport>),
            None => None,
        };

        Self::from_backends(ssh, api)
    }

    /// Build a router from already-constructed backends.
    pub fn from_backends(
        ssh: Option<Arc<dyn Transport>>,
        api: Option<Arc<dyn Transport>>,
    ) -> Result<Self> {
        if ssh.is_none() && api.is_none() {
            return Err(TransportError::Configuration(
                "no backend configured: provide SSH credentials or an API token".to_string(),
            ));
        }

        info!(
            ssh = ssh.is_some(),
            api = api.is_some(),
            "Transport router initialized"
        );
        Ok(Self { ssh, api })
    }

    fn backend(&self, kind: BackendKind) -> Option<&Arc<dyn Transport>> {
        match kind {
            BackendKind::Ssh => self.ssh.as_ref(),
            BackendKind::Api => self.api.as_ref(),
        }
    }

    /// Kinds of the configured backends.
    pub fn configured(&self) -> Vec<BackendKind> {
        [BackendKind::Ssh, BackendKind::Api]
            .into_iter()
            .filter(|kind| self.backend(*kind).is_some())
            .collect()
    }

    /// Pick the backend for an operation.
    ///
    /// An explicit preference must name a configured backend. Without one,
    /// the class default is used when configured, otherwise whichever
    /// backend exists.
    pub fn get_transport(
        &self,
        preference: Option<BackendKind>,
        class: OperationClass,
    ) -> Result<Arc<dyn Transport>> {
        if let Some(kind) = preference {
            return self.backend(kind).cloned().ok_or_else(|| {
                TransportError::Configuration(format!("{} backend is not configured", kind))
            });
        }

        let preferred = class.preferred_backend();
        let chosen = self
            .backend(preferred)
            .or_else(|| self.ssh.as_ref())
            .or_else(|| self.api.as_ref())
            .cloned()
            .ok_or_else(|| TransportError::Internal("router has no backends".to_string()))?;

        debug!(class = %class, preferred = %preferred, chosen = %chosen.kind(), "Selected backend");
        Ok(chosen)
    }

    /// Connect every configured backend concurrently.
    ///
    /// Waits for all of them; fails if any failed.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<()> {
        let backends: Vec<_> = self.ssh.iter().chain(self.api.iter()).collect();
        let results = join_all(backends.iter().map(|b| b.connect())).await;
        aggregate("connect", backends.iter().map(|b| b.kind()).zip(results))
    }

    /// Disconnect every configured backend concurrently.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let backends: Vec<_> = self.ssh.iter().chain(self.api.iter()).collect();
        let results = join_all(backends.iter().map(|b| b.disconnect())).await;
        aggregate("disconnect", backends.iter().map(|b| b.kind()).zip(results))
    }
}

fn aggregate(
    action: &str,
    results: impl Iterator<Item = (BackendKind, Result<()>)>,
) -> Result<()> {
    let mut failures = Vec::new();
    let mut first = None;

    for (kind, result) in results {
        if let Err(e) = result {
            error!(backend = %kind, error = %e, "Backend failed to {}", action);
            failures.push(format!("{}: {}", kind, e));
            first.get_or_insert(e);
        }
    }

    match (failures.len(), first) {
        (0, _) | (_, None) => Ok(()),
        // A single failure is passed through so callers can match its variant.
        (1, Some(e)) => Err(e),
        _ => Err(TransportError::Connection(failures.join("; "))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, SshConfig};
    use crate::mock::MockTransport;

    fn mock(kind: BackendKind) -> Option<Arc<dyn Transport>> {
        Some(Arc::new(MockTransport::new(kind)))
    }

    #[test]
    fn test_class_defaults() {
        assert_eq!(OperationClass::Read.preferred_backend(), BackendKind::Api);
        assert_eq!(OperationClass::Write.preferred_backend(), BackendKind::Api);
        assert_eq!(OperationClass::Snapshot.preferred_backend(), BackendKind::Ssh);
        assert_eq!(OperationClass::Config.preferred_backend(), BackendKind::Ssh);
    }

    #[test]
    fn test_no_backends_is_a_configuration_error() {
        assert!(matches!(
            Router::from_backends(None, None),
            Err(TransportError::Configuration(_))
        ));
        assert!(matches!(
            Router::new(&ClusterConfig::default()),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn test_new_builds_configured_backends_only() {
        let config = ClusterConfig {
            ssh: Some(SshConfig {
                host: "pve1".to_string(),
                password: Some("secret".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let router = Router::new(&config).unwrap();
        assert_eq!(router.configured(), vec![BackendKind::Ssh]);

        let config = ClusterConfig {
            api: Some(ApiConfig {
                host: "pve1".to_string(),
                token_id: "root@pam!cli".to_string(),
                token_secret: "uuid".to_string(),
                ..Default::default()
            }),
            ..config
        };
        let router = Router::new(&config).unwrap();
        assert_eq!(router.configured(), vec![BackendKind::Ssh, BackendKind::Api]);
    }

    #[test]
    fn test_fallback_to_only_backend() {
        let router = Router::from_backends(mock(BackendKind::Ssh), None).unwrap();
        let t = router.get_transport(None, OperationClass::Read).unwrap();
        assert_eq!(t.kind(), BackendKind::Ssh);

        let err = router
            .get_transport(Some(BackendKind::Api), OperationClass::Snapshot)
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Configuration(_)));
    }
}
