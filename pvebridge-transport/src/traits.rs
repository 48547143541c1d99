//! The operation contract every backend implements.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TransportError};
use crate::types::*;

/// Which backend a transport is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Persistent SSH session running `qm` / `pct` / `pvesh`
    Ssh,
    /// Token-authenticated REST API
    Api,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ssh => "ssh",
            BackendKind::Api => "api",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" | "shell" => Ok(BackendKind::Ssh),
            "api" | "rest" => Ok(BackendKind::Api),
            other => Err(TransportError::Configuration(format!(
                "unknown backend '{}', expected 'ssh' or 'api'",
                other
            ))),
        }
    }
}

/// HTTP method for the raw API primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl ApiMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::Get => "GET",
            ApiMethod::Post => "POST",
            ApiMethod::Put => "PUT",
            ApiMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiMethod {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(ApiMethod::Get),
            "POST" => Ok(ApiMethod::Post),
            "PUT" => Ok(ApiMethod::Put),
            "DELETE" => Ok(ApiMethod::Delete),
            other => Err(TransportError::InvalidArgument(format!(
                "unsupported HTTP method '{}'",
                other
            ))),
        }
    }
}

/// Captured result of one remote command.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// `exit_code == 0`
    pub success: bool,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            success: exit_code == 0,
        }
    }

    /// Failure detail: stderr when present, otherwise stdout, otherwise the exit code.
    pub fn error_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("exit code {}", self.exit_code)
    }
}

/// Operation contract shared by the shell and REST backends.
///
/// Error discipline:
/// - mutation-class methods (start/stop/create/delete/clone/snapshot changes)
///   return an [`OperationOutcome`] with `success: false` when the cluster
///   rejects the request, and only return `Err` for local or transport-level
///   failures (not connected, bad arguments, timeout, broken session);
/// - query-class methods (list/get) return `Err` on every failure.
///
/// Every `node: Option<&str>` argument falls back to the first node of a
/// freshly fetched node list when `None`.
///
/// Destructive calls (`delete_*`) carry no confirmation check of their own;
/// callers must run [`crate::guard::DestructivePolicy::ensure_allowed`] first.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    // =========================================================================
    // Connection Lifecycle
    // =========================================================================

    /// Open the session / verify the API is reachable.
    async fn connect(&self) -> Result<()>;

    /// Close the session. Calling it on a disconnected backend is a no-op.
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    // =========================================================================
    // Raw Primitives
    // =========================================================================

    /// Run a raw command line on the node (shell backend only).
    async fn execute_command(&self, command: &str) -> Result<CommandOutput>;

    /// Issue a raw API request and return the unwrapped `data` payload (REST backend only).
    async fn api_request(
        &self,
        method: ApiMethod,
        path: &str,
        payload: Option<Value>,
    ) -> Result<Value>;

    // =========================================================================
    // Virtual Machines
    // =========================================================================

    async fn list_vms(&self, node: Option<&str>) -> Result<Vec<VmRecord>>;

    async fn get_vm(&self, node: Option<&str>, vmid: u32) -> Result<VmRecord>;

    async fn start_vm(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome>;

    /// Hard stop (power off).
    async fn stop_vm(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome>;

    /// ACPI shutdown.
    async fn shutdown_vm(
        &self,
        node: Option<&str>,
        vmid: u32,
        options: &ShutdownOptions,
    ) -> Result<OperationOutcome>;

    async fn reboot_vm(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome>;

    async fn create_vm(&self, options: &VmCreateOptions) -> Result<OperationOutcome>;

    async fn delete_vm(&self, options: &VmDeleteOptions) -> Result<OperationOutcome>;

    async fn clone_vm(&self, options: &VmCloneOptions) -> Result<OperationOutcome>;

    // =========================================================================
    // Containers
    // =========================================================================

    async fn list_containers(&self, node: Option<&str>) -> Result<Vec<ContainerRecord>>;

    async fn get_container(&self, node: Option<&str>, vmid: u32) -> Result<ContainerRecord>;

    async fn start_container(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome>;

    async fn stop_container(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome>;

    async fn shutdown_container(
        &self,
        node: Option<&str>,
        vmid: u32,
        options: &ShutdownOptions,
    ) -> Result<OperationOutcome>;

    async fn reboot_container(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome>;

    async fn create_container(&self, options: &ContainerCreateOptions) -> Result<OperationOutcome>;

    async fn delete_container(&self, options: &ContainerDeleteOptions) -> Result<OperationOutcome>;

    async fn clone_container(&self, options: &ContainerCloneOptions) -> Result<OperationOutcome>;

    // =========================================================================
    // Nodes & Storage
    // =========================================================================

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>>;

    async fn get_node_status(&self, node: &str) -> Result<NodeRecord>;

    async fn list_storage(&self, node: Option<&str>) -> Result<Vec<StorageRecord>>;

    // =========================================================================
    // Snapshots
    // =========================================================================

    async fn list_snapshots(
        &self,
        kind: GuestKind,
        node: Option<&str>,
        vmid: u32,
    ) -> Result<Vec<SnapshotRecord>>;

    async fn create_snapshot(
        &self,
        kind: GuestKind,
        node: Option<&str>,
        vmid: u32,
        options: &SnapshotCreateOptions,
    ) -> Result<OperationOutcome>;

    async fn delete_snapshot(
        &self,
        kind: GuestKind,
        node: Option<&str>,
        vmid: u32,
        name: &str,
    ) -> Result<OperationOutcome>;

    /// Roll the guest back to the named snapshot.
    async fn rollback_snapshot(
        &self,
        kind: GuestKind,
        node: Option<&str>,
        vmid: u32,
        name: &str,
    ) -> Result<OperationOutcome>;
}

/// Pick the node to run an unscoped query against.
///
/// The first entry of the node list is used. The cluster does not promise a
/// stable order for that list, so the choice can change between calls if the
/// listing order does.
pub(crate) fn first_node(nodes: &[NodeRecord]) -> Result<String> {
    nodes
        .first()
        .map(|n| n.node.clone())
        .ok_or_else(|| TransportError::Command("cluster reported no nodes".to_string()))
}

/// Map a remote failure on a mutating call into a failed outcome, prefixing
/// the target entity. Local and transport failures pass through as errors.
pub(crate) fn outcome_from(
    result: Result<OperationOutcome>,
    target: impl FnOnce() -> String,
) -> Result<OperationOutcome> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(TransportError::Command(message)) => {
            Ok(OperationOutcome::failed(format!("{}: {}", target(), message)))
        }
        Err(e) => Err(e),
    }
}
