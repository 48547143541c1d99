//! Shell backend: vendor tools over a persistent SSH session.
//!
//! Commands are synthesized by [`command`], executed through a
//! [`ShellSession`], and their output parsed by [`parse`]. The session sits
//! behind a mutex, so calls on one backend run strictly one after another.
//!
//! `qm` and `pct` only see guests on the host they run on. Calls built on
//! them are bound to the SSH host's own node; naming a different node is an
//! `InvalidArgument` error. `pvesh` reads reach any cluster node.

pub mod command;
pub mod parse;
mod session;

pub use command::CommandLine;
pub use session::{RusshSession, ShellSession};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SshConfig;
use crate::error::{Result, TransportError};
use crate::traits::{first_node, outcome_from, ApiMethod, BackendKind, CommandOutput, Transport};
use crate::types::*;

/// Shell backend.
pub struct ShellBackend {
    config: SshConfig,
    timeout: Duration,
    session: Mutex<Option<Box<dyn ShellSession>>>,
    connected: AtomicBool,
    /// Node name of the SSH host, resolved on first use per session.
    host_node: RwLock<Option<String>>,
}

impl ShellBackend {
    /// Create a disconnected backend for the given host.
    pub fn new(config: SshConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            session: Mutex::new(None),
            connected: AtomicBool::new(false),
            host_node: RwLock::new(None),
        }
    }

    /// Create a backend around an already-open session.
    pub fn with_session(config: SshConfig, timeout: Duration, session: Box<dyn ShellSession>) -> Self {
        Self {
            config,
            timeout,
            session: Mutex::new(Some(session)),
            connected: AtomicBool::new(true),
            host_node: RwLock::new(None),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected("ssh"))
        }
    }

    /// Run a command line on the session.
    ///
    /// A timeout drops the session: the remote side may still be writing to
    /// the abandoned channel, so the backend must be reconnected.
    async fn run(&self, line: &str) -> Result<CommandOutput> {
        self.ensure_connected()?;

        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or(TransportError::NotConnected("ssh"))?;

        debug!(command = %line, "Executing remote command");

        let result = tokio::time::timeout(self.timeout, session.exec(line)).await;
        match result {
            Ok(Ok(output)) => {
                debug!(exit_code = output.exit_code, "Remote command finished");
                Ok(output)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Remote command failed to run");
                Err(e)
            }
            Err(_) => {
                warn!(
                    command = %line,
                    timeout_secs = self.timeout.as_secs(),
                    "Remote command timed out, dropping session"
                );
                guard.take();
                self.connected.store(false, Ordering::SeqCst);
                self.forget_host_node();
                Err(TransportError::Timeout(self.timeout.as_secs()))
            }
        }
    }

    /// Run a query command; a non-zero exit is an error.
    async fn query(&self, cmd: &CommandLine) -> Result<String> {
        let output = self.run(&cmd.render()).await?;
        if !output.success {
            return Err(TransportError::Command(output.error_message()));
        }
        Ok(output.stdout)
    }

    /// Run a mutating command on the SSH host's node; a non-zero exit
    /// becomes a failed outcome.
    async fn mutate(
        &self,
        node: Option<&str>,
        cmd: &CommandLine,
        target: impl FnOnce() -> String,
    ) -> Result<OperationOutcome> {
        let result: Result<OperationOutcome> = async {
            self.check_local(node).await?;
            let output = self.run(&cmd.render()).await?;
            if !output.success {
                return Err(TransportError::Command(output.error_message()));
            }

            let mut outcome = match parse::task_id(&output.stdout) {
                Some(upid) => OperationOutcome::with_task(upid),
                None => OperationOutcome::ok(),
            };
            let stdout = output.stdout.trim();
            if outcome.task_id.is_none() && !stdout.is_empty() {
                outcome = outcome.with_message(stdout);
            }
            Ok(outcome)
        }
        .await;

        outcome_from(result, target)
    }

    fn forget_host_node(&self) {
        if let Ok(mut cached) = self.host_node.write() {
            cached.take();
        }
    }

    async fn host_node(&self) -> Result<String> {
        let cached = self
            .host_node
            .read()
            .map_err(|_| TransportError::Internal("Lock poisoned".to_string()))?
            .clone();
        if let Some(node) = cached {
            return Ok(node);
        }

        let stdout = self.query(&command::pvesh_get("/cluster/status")).await?;
        let node = parse::parse_local_node(&stdout)?;
        debug!(node = %node, "Resolved node of the SSH host");

        *self
            .host_node
            .write()
            .map_err(|_| TransportError::Internal("Lock poisoned".to_string()))? = Some(node.clone());
        Ok(node)
    }

    /// Node a `qm`/`pct` call runs against: always the SSH host's node.
    async fn local_target(&self, node: Option<&str>) -> Result<String> {
        let host = self.host_node().await?;
        match node {
            Some(requested) if requested != host => Err(TransportError::InvalidArgument(format!(
                "node {} is not reachable over this session, the SSH host is node {}",
                requested, host
            ))),
            _ => Ok(host),
        }
    }

    /// Refuse a `qm`/`pct` mutation aimed at another node. Without an
    /// explicit node the host is implied and no lookup is made.
    async fn check_local(&self, node: Option<&str>) -> Result<()> {
        if node.is_some() {
            self.local_target(node).await?;
        }
        Ok(())
    }

    async fn resolve_node(&self, node: Option<&str>) -> Result<String> {
        match node {
            Some(n) => Ok(n.to_string()),
            None => {
                let nodes = self.list_nodes().await?;
                let node = first_node(&nodes)?;
                debug!(node = %node, "Using first listed node as default");
                Ok(node)
            }
        }
    }

    async fn get_guest_status(&self, kind: GuestKind, node: &str, vmid: u32) -> Result<Value> {
        let path = format!("/nodes/{}/{}/{}/status/current", node, kind.api_segment(), vmid);
        let stdout = self.query(&command::pvesh_get(&path)).await?;
        parse::parse_json(&stdout)
    }

    async fn lifecycle(
        &self,
        kind: GuestKind,
        action: &str,
        node: Option<&str>,
        vmid: u32,
    ) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let cmd = command::lifecycle(kind, action, vmid);
        self.mutate(node, &cmd, guest_target(kind, action, vmid)).await
    }
}

fn guest_target(kind: GuestKind, action: &str, vmid: u32) -> impl FnOnce() -> String + '_ {
    move || format!("{} {} {}", action, kind, vmid)
}

#[async_trait]
impl Transport for ShellBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ssh
    }

    #[instrument(skip(self), fields(host = %self.config.host, port = self.config.port))]
    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let session = RusshSession::open(&self.config, self.timeout).await?;
        *self.session.lock().await = Some(Box::new(session));
        self.connected.store(true, Ordering::SeqCst);

        info!("Shell backend connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
        self.forget_host_node();

        if let Some(mut session) = session {
            session.close().await?;
            info!(host = %self.config.host, "Shell backend disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute_command(&self, command: &str) -> Result<CommandOutput> {
        self.run(command).await
    }

    async fn api_request(
        &self,
        method: ApiMethod,
        path: &str,
        _payload: Option<Value>,
    ) -> Result<Value> {
        Err(TransportError::Unsupported(format!(
            "raw API request {} {} on the ssh backend",
            method, path
        )))
    }

    // =========================================================================
    // Virtual Machines
    // =========================================================================

    #[instrument(skip(self))]
    async fn list_vms(&self, node: Option<&str>) -> Result<Vec<VmRecord>> {
        self.ensure_connected()?;
        let node = self.local_target(node).await?;
        let stdout = self.query(&command::list_guests(GuestKind::Vm)).await?;
        Ok(parse::parse_vm_list(&stdout, &node))
    }

    #[instrument(skip(self))]
    async fn get_vm(&self, node: Option<&str>, vmid: u32) -> Result<VmRecord> {
        self.ensure_connected()?;
        let node = self.resolve_node(node).await?;
        let status = self.get_guest_status(GuestKind::Vm, &node, vmid).await?;
        VmRecord::from_json(&status, &node, Some(vmid))
            .ok_or_else(|| TransportError::Parse(format!("no status for VM {}", vmid)))
    }

    #[instrument(skip(self))]
    async fn start_vm(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.lifecycle(GuestKind::Vm, "start", node, vmid).await
    }

    #[instrument(skip(self))]
    async fn stop_vm(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.lifecycle(GuestKind::Vm, "stop", node, vmid).await
    }

    #[instrument(skip(self, options))]
    async fn shutdown_vm(
        &self,
        node: Option<&str>,
        vmid: u32,
        options: &ShutdownOptions,
    ) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let cmd = command::shutdown(GuestKind::Vm, vmid, options);
        self.mutate(node, &cmd, guest_target(GuestKind::Vm, "shutdown", vmid)).await
    }

    #[instrument(skip(self))]
    async fn reboot_vm(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.lifecycle(GuestKind::Vm, "reboot", node, vmid).await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid))]
    async fn create_vm(&self, options: &VmCreateOptions) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let cmd = command::vm_create(options);
        self.mutate(
            options.node.as_deref(),
            &cmd,
            guest_target(GuestKind::Vm, "create", options.vmid),
        )
        .await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid))]
    async fn delete_vm(&self, options: &VmDeleteOptions) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let cmd = command::vm_delete(options);
        self.mutate(
            options.node.as_deref(),
            &cmd,
            guest_target(GuestKind::Vm, "delete", options.vmid),
        )
        .await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid, newid = options.newid))]
    async fn clone_vm(&self, options: &VmCloneOptions) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let cmd = command::vm_clone(options);
        self.mutate(
            options.node.as_deref(),
            &cmd,
            guest_target(GuestKind::Vm, "clone", options.vmid),
        )
        .await
    }

    // =========================================================================
    // Containers
    // =========================================================================

    #[instrument(skip(self))]
    async fn list_containers(&self, node: Option<&str>) -> Result<Vec<ContainerRecord>> {
        self.ensure_connected()?;
        let node = self.local_target(node).await?;
        let stdout = self.query(&command::list_guests(GuestKind::Container)).await?;
        Ok(parse::parse_container_list(&stdout, &node))
    }

    #[instrument(skip(self))]
    async fn get_container(&self, node: Option<&str>, vmid: u32) -> Result<ContainerRecord> {
        self.ensure_connected()?;
        let node = self.resolve_node(node).await?;
        let status = self.get_guest_status(GuestKind::Container, &node, vmid).await?;
        ContainerRecord::from_json(&status, &node, Some(vmid))
            .ok_or_else(|| TransportError::Parse(format!("no status for container {}", vmid)))
    }

    #[instrument(skip(self))]
    async fn start_container(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.lifecycle(GuestKind::Container, "start", node, vmid).await
    }

    #[instrument(skip(self))]
    async fn stop_container(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.lifecycle(GuestKind::Container, "stop", node, vmid).await
    }

    #[instrument(skip(self, options))]
    async fn shutdown_container(
        &self,
        node: Option<&str>,
        vmid: u32,
        options: &ShutdownOptions,
    ) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let cmd = command::shutdown(GuestKind::Container, vmid, options);
        self.mutate(node, &cmd, guest_target(GuestKind::Container, "shutdown", vmid)).await
    }

    #[instrument(skip(self))]
    async fn reboot_container(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.lifecycle(GuestKind::Container, "reboot", node, vmid).await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid))]
    async fn create_container(&self, options: &ContainerCreateOptions) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        if options.ostemplate.trim().is_empty() {
            return Err(TransportError::InvalidArgument(
                "container create requires an ostemplate".to_string(),
            ));
        }
        let cmd = command::container_create(options);
        self.mutate(
            options.node.as_deref(),
            &cmd,
            guest_target(GuestKind::Container, "create", options.vmid),
        )
        .await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid))]
    async fn delete_container(&self, options: &ContainerDeleteOptions) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let cmd = command::container_delete(options);
        self.mutate(
            options.node.as_deref(),
            &cmd,
            guest_target(GuestKind::Container, "delete", options.vmid),
        )
        .await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid, newid = options.newid))]
    async fn clone_container(&self, options: &ContainerCloneOptions) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let cmd = command::container_clone(options);
        self.mutate(
            options.node.as_deref(),
            &cmd,
            guest_target(GuestKind::Container, "clone", options.vmid),
        )
        .await
    }

    // =========================================================================
    // Nodes & Storage
    // =========================================================================

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        self.ensure_connected()?;
        let stdout = self.query(&command::pvesh_get("/nodes")).await?;
        parse::parse_node_list(&stdout)
    }

    #[instrument(skip(self))]
    async fn get_node_status(&self, node: &str) -> Result<NodeRecord> {
        self.ensure_connected()?;
        let path = format!("/nodes/{}/status", node);
        let stdout = self.query(&command::pvesh_get(&path)).await?;
        let status = parse::parse_json(&stdout)?;
        Ok(NodeRecord::from_status_json(node, &status))
    }

    #[instrument(skip(self))]
    async fn list_storage(&self, node: Option<&str>) -> Result<Vec<StorageRecord>> {
        self.ensure_connected()?;
        let node = self.resolve_node(node).await?;
        let path = format!("/nodes/{}/storage", node);
        let stdout = self.query(&command::pvesh_get(&path)).await?;
        parse::parse_storage_list(&stdout)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    #[instrument(skip(self))]
    async fn list_snapshots(
        &self,
        kind: GuestKind,
        node: Option<&str>,
        vmid: u32,
    ) -> Result<Vec<SnapshotRecord>> {
        self.ensure_connected()?;
        let node = self.resolve_node(node).await?;
        let path = format!("/nodes/{}/{}/{}/snapshot", node, kind.api_segment(), vmid);
        let stdout = self.query(&command::pvesh_get(&path)).await?;
        Ok(parse::parse_snapshot_list(&stdout))
    }

    #[instrument(skip(self, options), fields(snapshot = %options.name))]
    async fn create_snapshot(
        &self,
        kind: GuestKind,
        node: Option<&str>,
        vmid: u32,
        options: &SnapshotCreateOptions,
    ) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        if options.name.trim().is_empty() {
            return Err(TransportError::InvalidArgument("snapshot name is empty".to_string()));
        }
        let cmd = command::snapshot_create(kind, vmid, options);
        self.mutate(node, &cmd, guest_target(kind, "snapshot", vmid)).await
    }

    #[instrument(skip(self))]
    async fn delete_snapshot(
        &self,
        kind: GuestKind,
        node: Option<&str>,
        vmid: u32,
        name: &str,
    ) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let cmd = command::snapshot_delete(kind, vmid, name);
        self.mutate(node, &cmd, guest_target(kind, "delete snapshot of", vmid)).await
    }

    #[instrument(skip(self))]
    async fn rollback_snapshot(
        &self,
        kind: GuestKind,
        node: Option<&str>,
        vmid: u32,
        name: &str,
    ) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let cmd = command::snapshot_rollback(kind, vmid, name);
        self.mutate(node, &cmd, guest_target(kind, "rollback", vmid)).await
    }
}
