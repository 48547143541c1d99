//! In-memory transport for testing and development.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::error::{Result, TransportError};
use crate::traits::{first_node, outcome_from, ApiMethod, BackendKind, CommandOutput, Transport};
use crate::types::*;

/// Mock transport for testing.
///
/// Simulates a small cluster in memory without any network access and records
/// every contract call, so tests can assert which operations reached the
/// backend. The raw primitive matching `kind` echoes its input; the other one
/// is unsupported, as on the real backends.
pub struct MockTransport {
    kind: BackendKind,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    nodes: RwLock<Vec<NodeRecord>>,
    vms: RwLock<BTreeMap<u32, VmRecord>>,
    containers: RwLock<BTreeMap<u32, ContainerRecord>>,
    storage: RwLock<Vec<StorageRecord>>,
    snapshots: RwLock<HashMap<(GuestKind, u32), Vec<SnapshotRecord>>>,
    calls: RwLock<Vec<String>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| TransportError::Internal("Lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| TransportError::Internal("Lock poisoned".to_string()))
}

fn missing(kind: GuestKind, vmid: u32) -> TransportError {
    TransportError::Command(format!("{} {} does not exist", kind, vmid))
}

impl MockTransport {
    /// Create an empty mock with a single online node `pve1`.
    pub fn new(kind: BackendKind) -> Self {
        info!(kind = %kind, "Creating mock transport");
        Self {
            kind,
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            nodes: RwLock::new(vec![NodeRecord {
                node: "pve1".to_string(),
                status: NodeStatus::Online,
                ..Default::default()
            }]),
            vms: RwLock::new(BTreeMap::new()),
            containers: RwLock::new(BTreeMap::new()),
            storage: RwLock::new(Vec::new()),
            snapshots: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Replace the node list.
    pub fn with_nodes(self, nodes: Vec<NodeRecord>) -> Self {
        if let Ok(mut guard) = self.nodes.write() {
            *guard = nodes;
        }
        self
    }

    pub fn with_vm(self, vm: VmRecord) -> Self {
        if let Ok(mut guard) = self.vms.write() {
            guard.insert(vm.vmid, vm);
        }
        self
    }

    pub fn with_container(self, container: ContainerRecord) -> Self {
        if let Ok(mut guard) = self.containers.write() {
            guard.insert(container.vmid, container);
        }
        self
    }

    pub fn with_storage(self, storage: StorageRecord) -> Self {
        if let Ok(mut guard) = self.storage.write() {
            guard.push(storage);
        }
        self
    }

    /// Make `connect()` fail with a connection error.
    pub fn failing_connect(self) -> Self {
        self.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    /// Contract calls received so far, as `"<method> <args>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// True when any recorded call starts with `prefix`.
    pub fn was_called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    fn record(&self, call: String) -> Result<()> {
        debug!(call = %call, "Mock transport call");
        write(&self.calls)?.push(call);
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected(self.kind.as_str()))
        }
    }

    fn resolve_node(&self, node: Option<&str>) -> Result<String> {
        match node {
            Some(n) => Ok(n.to_string()),
            None => first_node(&read(&self.nodes)?),
        }
    }

    fn vm_exists(&self, vmid: u32) -> Result<bool> {
        Ok(read(&self.vms)?.contains_key(&vmid))
    }

    fn container_exists(&self, vmid: u32) -> Result<bool> {
        Ok(read(&self.containers)?.contains_key(&vmid))
    }

    fn guest_exists(&self, kind: GuestKind, vmid: u32) -> Result<bool> {
        match kind {
            GuestKind::Vm => self.vm_exists(vmid),
            GuestKind::Container => self.container_exists(vmid),
        }
    }

    fn set_vm_status(&self, vmid: u32, status: VmStatus) -> Result<()> {
        let mut vms = write(&self.vms)?;
        let vm = vms.get_mut(&vmid).ok_or_else(|| missing(GuestKind::Vm, vmid))?;
        if vm.status == status {
            return Err(TransportError::Command(format!("VM {} is already {:?}", vmid, status)));
        }
        vm.status = status;
        Ok(())
    }

    fn set_container_status(&self, vmid: u32, status: ContainerStatus) -> Result<()> {
        let mut cts = write(&self.containers)?;
        let ct = cts
            .get_mut(&vmid)
            .ok_or_else(|| missing(GuestKind::Container, vmid))?;
        if ct.status == status {
            return Err(TransportError::Command(format!(
                "Container {} is already {:?}",
                vmid, status
            )));
        }
        ct.status = status;
        Ok(())
    }

    fn task(&self, action: &str, vmid: u32) -> OperationOutcome {
        OperationOutcome::with_task(format!("UPID:mock:{}:{}:", action, vmid))
    }

    fn vm_transition(&self, action: &str, vmid: u32, status: VmStatus) -> Result<OperationOutcome> {
        let result = self.set_vm_status(vmid, status).map(|_| self.task(action, vmid));
        outcome_from(result, || format!("{} VM {}", action, vmid))
    }

    fn container_transition(
        &self,
        action: &str,
        vmid: u32,
        status: ContainerStatus,
    ) -> Result<OperationOutcome> {
        let result = self
            .set_container_status(vmid, status)
            .map(|_| self.task(action, vmid));
        outcome_from(result, || format!("{} Container {}", action, vmid))
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Connection(format!(
                "mock {} backend refused the connection",
                self.kind
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute_command(&self, command: &str) -> Result<CommandOutput> {
        self.record(format!("execute_command {}", command))?;
        match self.kind {
            BackendKind::Ssh => Ok(CommandOutput::new(format!("{}\n", command), "", 0)),
            BackendKind::Api => Err(TransportError::Unsupported(format!(
                "raw command '{}' on the api backend",
                command
            ))),
        }
    }

    async fn api_request(
        &self,
        method: ApiMethod,
        path: &str,
        payload: Option<Value>,
    ) -> Result<Value> {
        self.record(format!("api_request {} {}", method, path))?;
        match self.kind {
            BackendKind::Api => Ok(json!({
                "method": method.as_str(),
                "path": path,
                "payload": payload,
            })),
            BackendKind::Ssh => Err(TransportError::Unsupported(format!(
                "raw API request {} {} on the ssh backend",
                method, path
            ))),
        }
    }

    // =========================================================================
    // Virtual Machines
    // =========================================================================

    async fn list_vms(&self, node: Option<&str>) -> Result<Vec<VmRecord>> {
        self.record(format!("list_vms {:?}", node))?;
        let node = self.resolve_node(node)?;
        Ok(read(&self.vms)?
            .values()
            .filter(|vm| vm.node == node)
            .cloned()
            .collect())
    }

    async fn get_vm(&self, node: Option<&str>, vmid: u32) -> Result<VmRecord> {
        self.record(format!("get_vm {}", vmid))?;
        let node = self.resolve_node(node)?;
        read(&self.vms)?
            .get(&vmid)
            .filter(|vm| vm.node == node)
            .cloned()
            .ok_or_else(|| missing(GuestKind::Vm, vmid))
    }

    async fn start_vm(&self, _node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.record(format!("start_vm {}", vmid))?;
        self.vm_transition("start", vmid, VmStatus::Running)
    }

    async fn stop_vm(&self, _node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.record(format!("stop_vm {}", vmid))?;
        self.vm_transition("stop", vmid, VmStatus::Stopped)
    }

    async fn shutdown_vm(
        &self,
        _node: Option<&str>,
        vmid: u32,
        _options: &ShutdownOptions,
    ) -> Result<OperationOutcome> {
        self.record(format!("shutdown_vm {}", vmid))?;
        self.vm_transition("shutdown", vmid, VmStatus::Stopped)
    }

    async fn reboot_vm(&self, _node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.record(format!("reboot_vm {}", vmid))?;
        let result = if self.vm_exists(vmid)? {
            Ok(self.task("reboot", vmid))
        } else {
            Err(missing(GuestKind::Vm, vmid))
        };
        outcome_from(result, || format!("reboot VM {}", vmid))
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid))]
    async fn create_vm(&self, options: &VmCreateOptions) -> Result<OperationOutcome> {
        self.record(format!("create_vm {}", options.vmid))?;
        let node = self.resolve_node(options.node.as_deref())?;

        let result = {
            let mut vms = write(&self.vms)?;
            if vms.contains_key(&options.vmid) {
                Err(TransportError::Command(format!("VM {} already exists", options.vmid)))
            } else {
                vms.insert(
                    options.vmid,
                    VmRecord {
                        vmid: options.vmid,
                        name: options.name.clone().unwrap_or_default(),
                        status: VmStatus::Stopped,
                        node,
                        cpus: options.cores.unwrap_or(1),
                        maxmem: options.memory.unwrap_or(512) * 1024 * 1024,
                        ..Default::default()
                    },
                );
                Ok(self.task("qmcreate", options.vmid))
            }
        };
        outcome_from(result, || format!("create VM {}", options.vmid))
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid))]
    async fn delete_vm(&self, options: &VmDeleteOptions) -> Result<OperationOutcome> {
        self.record(format!("delete_vm {}", options.vmid))?;
        let result = match write(&self.vms)?.remove(&options.vmid) {
            Some(_) => {
                write(&self.snapshots)?.remove(&(GuestKind::Vm, options.vmid));
                Ok(self.task("qmdestroy", options.vmid))
            }
            None => Err(missing(GuestKind::Vm, options.vmid)),
        };
        outcome_from(result, || format!("delete VM {}", options.vmid))
    }

    async fn clone_vm(&self, options: &VmCloneOptions) -> Result<OperationOutcome> {
        self.record(format!("clone_vm {} {}", options.vmid, options.newid))?;
        let result = {
            let mut vms = write(&self.vms)?;
            match (vms.get(&options.vmid).cloned(), vms.contains_key(&options.newid)) {
                (None, _) => Err(missing(GuestKind::Vm, options.vmid)),
                (Some(_), true) => {
                    Err(TransportError::Command(format!("VM {} already exists", options.newid)))
                }
                (Some(source), false) => {
                    let clone = VmRecord {
                        vmid: options.newid,
                        name: options.name.clone().unwrap_or_else(|| source.name.clone()),
                        status: VmStatus::Stopped,
                        node: options.target.clone().unwrap_or_else(|| source.node.clone()),
                        ..source
                    };
                    vms.insert(options.newid, clone);
                    Ok(self.task("qmclone", options.vmid))
                }
            }
        };
        outcome_from(result, || format!("clone VM {}", options.vmid))
    }

    // =========================================================================
    // Containers
    // =========================================================================

    async fn list_containers(&self, node: Option<&str>) -> Result<Vec<ContainerRecord>> {
        self.record(format!("list_containers {:?}", node))?;
        let node = self.resolve_node(node)?;
        Ok(read(&self.containers)?
            .values()
            .filter(|ct| ct.node == node)
            .cloned()
            .collect())
    }

    async fn get_container(&self, node: Option<&str>, vmid: u32) -> Result<ContainerRecord> {
        self.record(format!("get_container {}", vmid))?;
        let node = self.resolve_node(node)?;
        read(&self.containers)?
            .get(&vmid)
            .filter(|ct| ct.node == node)
            .cloned()
            .ok_or_else(|| missing(GuestKind::Container, vmid))
    }

    async fn start_container(&self, _node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.record(format!("start_container {}", vmid))?;
        self.container_transition("start", vmid, ContainerStatus::Running)
    }

    async fn stop_container(&self, _node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.record(format!("stop_container {}", vmid))?;
        self.container_transition("stop", vmid, ContainerStatus::Stopped)
    }

    async fn shutdown_container(
        &self,
        _node: Option<&str>,
        vmid: u32,
        _options: &ShutdownOptions,
    ) -> Result<OperationOutcome> {
        self.record(format!("shutdown_container {}", vmid))?;
        self.container_transition("shutdown", vmid, ContainerStatus::Stopped)
    }

    async fn reboot_container(&self, _node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.record(format!("reboot_container {}", vmid))?;
        let result = if self.container_exists(vmid)? {
            Ok(self.task("vzreboot", vmid))
        } else {
            Err(missing(GuestKind::Container, vmid))
        };
        outcome_from(result, || format!("reboot Container {}", vmid))
    }

    async fn create_container(&self, options: &ContainerCreateOptions) -> Result<OperationOutcome> {
        self.record(format!("create_container {}", options.vmid))?;
        let node = self.resolve_node(options.node.as_deref())?;

        let result = {
            let mut cts = write(&self.containers)?;
            if cts.contains_key(&options.vmid) {
                Err(TransportError::Command(format!(
                    "Container {} already exists",
                    options.vmid
                )))
            } else {
                cts.insert(
                    options.vmid,
                    ContainerRecord {
                        vmid: options.vmid,
                        name: options.hostname.clone().unwrap_or_default(),
                        status: ContainerStatus::Stopped,
                        node,
                        cpus: options.cores.unwrap_or(1),
                        maxmem: options.memory.unwrap_or(512) * 1024 * 1024,
                        ..Default::default()
                    },
                );
                Ok(self.task("vzcreate", options.vmid))
            }
        };
        outcome_from(result, || format!("create Container {}", options.vmid))
    }

    async fn delete_container(&self, options: &ContainerDeleteOptions) -> Result<OperationOutcome> {
        self.record(format!("delete_container {}", options.vmid))?;
        let result = match write(&self.containers)?.remove(&options.vmid) {
            Some(_) => {
                write(&self.snapshots)?.remove(&(GuestKind::Container, options.vmid));
                Ok(self.task("vzdestroy", options.vmid))
            }
            None => Err(missing(GuestKind::Container, options.vmid)),
        };
        outcome_from(result, || format!("delete Container {}", options.vmid))
    }

    async fn clone_container(&self, options: &ContainerCloneOptions) -> Result<OperationOutcome> {
        self.record(format!("clone_container {} {}", options.vmid, options.newid))?;
        let result = {
            let mut cts = write(&self.containers)?;
            match (cts.get(&options.vmid).cloned(), cts.contains_key(&options.newid)) {
                (None, _) => Err(missing(GuestKind::Container, options.vmid)),
                (Some(_), true) => Err(TransportError::Command(format!(
                    "Container {} already exists",
                    options.newid
                ))),
                (Some(source), false) => {
                    let clone = ContainerRecord {
                        vmid: options.newid,
                        name: options.hostname.clone().unwrap_or_else(|| source.name.clone()),
                        status: ContainerStatus::Stopped,
                        node: options.target.clone().unwrap_or_else(|| source.node.clone()),
                        ..source
                    };
                    cts.insert(options.newid, clone);
                    Ok(self.task("vzclone", options.vmid))
                }
            }
        };
        outcome_from(result, || format!("clone Container {}", options.vmid))
    }

    // =========================================================================
    // Nodes & Storage
    // =========================================================================

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        self.record("list_nodes".to_string())?;
        Ok(read(&self.nodes)?.clone())
    }

    async fn get_node_status(&self, node: &str) -> Result<NodeRecord> {
        self.record(format!("get_node_status {}", node))?;
        read(&self.nodes)?
            .iter()
            .find(|n| n.node == node)
            .cloned()
            .ok_or_else(|| TransportError::Command(format!("no such node '{}'", node)))
    }

    async fn list_storage(&self, node: Option<&str>) -> Result<Vec<StorageRecord>> {
        self.record(format!("list_storage {:?}", node))?;
        self.resolve_node(node)?;
        Ok(read(&self.storage)?.clone())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    async fn list_snapshots(
        &self,
        kind: GuestKind,
        _node: Option<&str>,
        vmid: u32,
    ) -> Result<Vec<SnapshotRecord>> {
        self.record(format!("list_snapshots {} {}", kind, vmid))?;
        if !self.guest_exists(kind, vmid)? {
            return Err(missing(kind, vmid));
        }
        Ok(read(&self.snapshots)?
            .get(&(kind, vmid))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_snapshot(
        &self,
        kind: GuestKind,
        _node: Option<&str>,
        vmid: u32,
        options: &SnapshotCreateOptions,
    ) -> Result<OperationOutcome> {
        self.record(format!("create_snapshot {} {} {}", kind, vmid, options.name))?;
        if options.name.trim().is_empty() {
            return Err(TransportError::InvalidArgument("snapshot name is empty".to_string()));
        }

        let result = if !self.guest_exists(kind, vmid)? {
            Err(missing(kind, vmid))
        } else {
            let mut snapshots = write(&self.snapshots)?;
            let list = snapshots.entry((kind, vmid)).or_default();
            if list.iter().any(|s| s.name == options.name) {
                Err(TransportError::Command(format!(
                    "snapshot '{}' already exists",
                    options.name
                )))
            } else {
                let parent = list.last().map(|s| s.name.clone());
                list.push(SnapshotRecord {
                    name: options.name.clone(),
                    description: options.description.clone().unwrap_or_default(),
                    snaptime: Some(chrono::Utc::now().timestamp()),
                    parent,
                    vmstate: kind == GuestKind::Vm && options.vmstate == Some(true),
                });
                Ok(self.task("snapshot", vmid))
            }
        };
        outcome_from(result, || format!("snapshot {} {}", kind, vmid))
    }

    async fn delete_snapshot(
        &self,
        kind: GuestKind,
        _node: Option<&str>,
        vmid: u32,
        name: &str,
    ) -> Result<OperationOutcome> {
        self.record(format!("delete_snapshot {} {} {}", kind, vmid, name))?;
        let result = {
            let mut snapshots = write(&self.snapshots)?;
            let list = snapshots.entry((kind, vmid)).or_default();
            match list.iter().position(|s| s.name == name) {
                Some(idx) => {
                    list.remove(idx);
                    Ok(self.task("delsnapshot", vmid))
                }
                None => Err(TransportError::Command(format!("snapshot '{}' does not exist", name))),
            }
        };
        outcome_from(result, || format!("delete snapshot of {} {}", kind, vmid))
    }

    async fn rollback_snapshot(
        &self,
        kind: GuestKind,
        _node: Option<&str>,
        vmid: u32,
        name: &str,
    ) -> Result<OperationOutcome> {
        self.record(format!("rollback_snapshot {} {} {}", kind, vmid, name))?;
        let exists = read(&self.snapshots)?
            .get(&(kind, vmid))
            .map(|list| list.iter().any(|s| s.name == name))
            .unwrap_or(false);

        let result = if exists {
            Ok(self.task("rollback", vmid))
        } else {
            Err(TransportError::Command(format!("snapshot '{}' does not exist", name)))
        };
        outcome_from(result, || format!("rollback {} {}", kind, vmid))
    }
}
