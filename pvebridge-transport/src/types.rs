//! Domain records and per-operation option structures.
//!
//! Records are point-in-time projections of remote state. Both backends build
//! them from loosely-typed JSON through the tolerant accessors at the bottom of
//! this file, so a missing or oddly-typed field degrades to a documented
//! default instead of corrupting the record.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Additional key/value pairs forwarded to the backend unmodified.
///
/// Keys the backend already emits from typed fields win over same-named
/// entries here.
pub type ExtraParams = BTreeMap<String, Value>;

// =============================================================================
// GUEST KIND
// =============================================================================

/// The two guest flavours the cluster runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Vm,
    Container,
}

impl GuestKind {
    /// Path segment used by the REST API and `pvesh`.
    pub fn api_segment(&self) -> &'static str {
        match self {
            GuestKind::Vm => "qemu",
            GuestKind::Container => "lxc",
        }
    }

    /// Vendor command-line tool managing this guest kind.
    pub fn cli_tool(&self) -> &'static str {
        match self {
            GuestKind::Vm => "qm",
            GuestKind::Container => "pct",
        }
    }

    /// Label used when prefixing failure messages.
    pub fn label(&self) -> &'static str {
        match self {
            GuestKind::Vm => "VM",
            GuestKind::Container => "Container",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// STATUS ENUMS
// =============================================================================

/// VM power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Stopped,
    Paused,
    Unknown,
}

impl Default for VmStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl VmStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => VmStatus::Running,
            "stopped" => VmStatus::Stopped,
            "paused" => VmStatus::Paused,
            _ => VmStatus::Unknown,
        }
    }
}

/// Container power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Unknown,
}

impl Default for ContainerStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl ContainerStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => ContainerStatus::Running,
            "stopped" => ContainerStatus::Stopped,
            _ => ContainerStatus::Unknown,
        }
    }
}

/// Cluster membership state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Unknown,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl NodeStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => NodeStatus::Online,
            "offline" => NodeStatus::Offline,
            _ => NodeStatus::Unknown,
        }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// A virtual machine as seen at the time of the call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VmRecord {
    /// Cluster-wide identifier
    pub vmid: u32,
    pub name: String,
    pub status: VmStatus,
    /// Node the VM lives on
    pub node: String,
    /// CPU usage as a fraction of allotted cores (0.0 - 1.0 per core)
    pub cpu: f64,
    pub cpus: u32,
    /// Memory used (bytes)
    pub mem: u64,
    /// Memory configured (bytes)
    pub maxmem: u64,
    /// Disk used (bytes)
    pub disk: u64,
    /// Disk configured (bytes)
    pub maxdisk: u64,
    /// Seconds since start, 0 when stopped
    pub uptime: u64,
    pub template: bool,
    /// Config lock held by a running task (backup, migrate, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,
}

impl VmRecord {
    /// Build a record from a JSON object (`/qemu` list entry or `status/current`).
    ///
    /// `vmid_hint` is used when the document does not carry its own `vmid`
    /// (single-VM status documents). Returns `None` when no identifier can be
    /// determined.
    pub fn from_json(value: &Value, node: &str, vmid_hint: Option<u32>) -> Option<Self> {
        let vmid = field_u32(value, "vmid").or(vmid_hint)?;

        // A paused guest reports status=running with qmpstatus=paused.
        let mut status = VmStatus::parse(&field_str(value, "status"));
        if field_str(value, "qmpstatus") == "paused" {
            status = VmStatus::Paused;
        }

        Some(Self {
            vmid,
            name: field_str(value, "name"),
            status,
            node: field_opt_str(value, "node").unwrap_or_else(|| node.to_string()),
            cpu: field_f64(value, "cpu"),
            cpus: field_u32(value, "cpus").or_else(|| field_u32(value, "maxcpu")).unwrap_or(0),
            mem: field_u64(value, "mem"),
            maxmem: field_u64(value, "maxmem"),
            disk: field_u64(value, "disk"),
            maxdisk: field_u64(value, "maxdisk"),
            uptime: field_u64(value, "uptime"),
            template: field_bool(value, "template"),
            lock: field_opt_str(value, "lock"),
        })
    }
}

/// An LXC container as seen at the time of the call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub vmid: u32,
    pub name: String,
    pub status: ContainerStatus,
    pub node: String,
    pub cpu: f64,
    pub cpus: u32,
    pub mem: u64,
    pub maxmem: u64,
    pub disk: u64,
    pub maxdisk: u64,
    pub uptime: u64,
    pub template: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,
}

impl ContainerRecord {
    /// Build a record from a JSON object (`/lxc` list entry or `status/current`).
    pub fn from_json(value: &Value, node: &str, vmid_hint: Option<u32>) -> Option<Self> {
        let vmid = field_u32(value, "vmid").or(vmid_hint)?;

        Some(Self {
            vmid,
            name: field_str(value, "name"),
            status: ContainerStatus::parse(&field_str(value, "status")),
            node: field_opt_str(value, "node").unwrap_or_else(|| node.to_string()),
            cpu: field_f64(value, "cpu"),
            cpus: field_u32(value, "cpus").or_else(|| field_u32(value, "maxcpu")).unwrap_or(0),
            mem: field_u64(value, "mem"),
            maxmem: field_u64(value, "maxmem"),
            disk: field_u64(value, "disk"),
            maxdisk: field_u64(value, "maxdisk"),
            uptime: field_u64(value, "uptime"),
            template: field_bool(value, "template"),
            lock: field_opt_str(value, "lock"),
        })
    }
}

/// A cluster node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: String,
    pub status: NodeStatus,
    pub cpu: f64,
    pub maxcpu: u32,
    pub mem: u64,
    pub maxmem: u64,
    pub disk: u64,
    pub maxdisk: u64,
    pub uptime: u64,
}

impl NodeRecord {
    /// Build a record from a `/nodes` list entry. Entries without a name are rejected.
    pub fn from_json(value: &Value) -> Option<Self> {
        let node = field_opt_str(value, "node")?;

        Some(Self {
            node,
            status: NodeStatus::parse(&field_str(value, "status")),
            cpu: field_f64(value, "cpu"),
            maxcpu: field_u32(value, "maxcpu").unwrap_or(0),
            mem: field_u64(value, "mem"),
            maxmem: field_u64(value, "maxmem"),
            disk: field_u64(value, "disk"),
            maxdisk: field_u64(value, "maxdisk"),
            uptime: field_u64(value, "uptime"),
        })
    }

    /// Build a record from a `/nodes/{node}/status` document.
    ///
    /// That document nests its gauges (`memory.used`, `rootfs.total`, ...)
    /// and carries no name or status; a node answering it is online.
    pub fn from_status_json(node: &str, value: &Value) -> Self {
        let memory = value.get("memory").unwrap_or(&Value::Null);
        let rootfs = value.get("rootfs").unwrap_or(&Value::Null);
        let cpuinfo = value.get("cpuinfo").unwrap_or(&Value::Null);

        Self {
            node: node.to_string(),
            status: NodeStatus::Online,
            cpu: field_f64(value, "cpu"),
            maxcpu: field_u32(cpuinfo, "cpus").unwrap_or(0),
            mem: field_u64(memory, "used"),
            maxmem: field_u64(memory, "total"),
            disk: field_u64(rootfs, "used"),
            maxdisk: field_u64(rootfs, "total"),
            uptime: field_u64(value, "uptime"),
        }
    }
}

/// A storage pool as visible from one node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageRecord {
    pub storage: String,
    /// Backend type (dir, lvmthin, zfspool, nfs, rbd, ...)
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Content classes (images, rootdir, iso, vztmpl, backup, ...)
    pub content: Vec<String>,
    pub active: bool,
    pub enabled: bool,
    pub shared: bool,
    pub total: u64,
    pub used: u64,
    pub avail: u64,
}

impl StorageRecord {
    /// Build a record from a `/nodes/{node}/storage` entry.
    pub fn from_json(value: &Value) -> Option<Self> {
        let storage = field_opt_str(value, "storage")?;

        let content = field_str(value, "content")
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        Some(Self {
            storage,
            storage_type: field_str(value, "type"),
            content,
            active: field_bool(value, "active"),
            // Absent `enabled` means the pool is not disabled.
            enabled: value.get("enabled").map(as_bool).unwrap_or(true),
            shared: field_bool(value, "shared"),
            total: field_u64(value, "total"),
            used: field_u64(value, "used"),
            avail: field_u64(value, "avail"),
        })
    }
}

/// A saved point-in-time state of a VM or container.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    pub description: String,
    /// Creation time as a Unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snaptime: Option<i64>,
    /// Parent snapshot name; the history may branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// RAM state included (VMs only)
    pub vmstate: bool,
}

/// Name of the pseudo-snapshot marking the live state.
pub const CURRENT_SNAPSHOT_MARKER: &str = "current";

impl SnapshotRecord {
    pub fn from_json(value: &Value) -> Option<Self> {
        let name = field_opt_str(value, "name")?;

        Some(Self {
            name,
            description: field_str(value, "description"),
            snaptime: value.get("snaptime").and_then(as_i64),
            parent: field_opt_str(value, "parent"),
            vmstate: field_bool(value, "vmstate"),
        })
    }

    /// Creation time, when the snapshot carries one.
    pub fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.snaptime.and_then(|t| chrono::DateTime::from_timestamp(t, 0))
    }

    /// Map a snapshot listing, dropping the live-state marker.
    pub fn list_from_json(items: &[Value]) -> Vec<Self> {
        items
            .iter()
            .filter_map(Self::from_json)
            .filter(|s| s.name != CURRENT_SNAPSHOT_MARKER)
            .collect()
    }
}

/// Result of a mutating call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    /// Task identifier (UPID) when the cluster runs the request in the background
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Human-readable detail; carries the failure reason when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationOutcome {
    pub fn ok() -> Self {
        Self { success: true, task_id: None, message: None }
    }

    pub fn with_task(task_id: impl Into<String>) -> Self {
        Self { success: true, task_id: Some(task_id.into()), message: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, task_id: None, message: Some(message.into()) }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// =============================================================================
// OPTION STRUCTURES
// =============================================================================

/// Options for creating a VM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmCreateOptions {
    /// Identifier for the new VM (required)
    pub vmid: u32,
    /// Node to create on (first listed node when unset)
    pub node: Option<String>,
    pub name: Option<String>,
    /// Memory in MiB
    pub memory: Option<u64>,
    pub cores: Option<u32>,
    pub sockets: Option<u32>,
    /// CPU model (e.g. "host")
    pub cpu: Option<String>,
    pub ostype: Option<String>,
    /// Storage pool for the primary disk
    pub storage: Option<String>,
    /// Primary disk size (GiB, passed through as given)
    pub disk_size: Option<String>,
    /// Install media volume, attached as a CD-ROM
    pub iso: Option<String>,
    /// First network device spec (e.g. "virtio,bridge=vmbr0")
    pub net: Option<String>,
    pub description: Option<String>,
    /// Start after creation
    pub start: Option<bool>,
    /// Start at node boot
    pub onboot: Option<bool>,
    /// Enable the QEMU guest agent
    pub agent: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraParams,
}

impl VmCreateOptions {
    pub fn new(vmid: u32) -> Self {
        Self { vmid, ..Default::default() }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_disk(mut self, storage: Option<&str>, size: Option<&str>) -> Self {
        self.storage = storage.map(str::to_string);
        self.disk_size = size.map(str::to_string);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Options for creating a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerCreateOptions {
    /// Identifier for the new container (required)
    pub vmid: u32,
    /// Template volume, e.g. "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst" (required)
    pub ostemplate: String,
    pub node: Option<String>,
    pub hostname: Option<String>,
    /// Memory in MiB
    pub memory: Option<u64>,
    /// Swap in MiB
    pub swap: Option<u64>,
    pub cores: Option<u32>,
    /// Storage pool for the root filesystem
    pub storage: Option<String>,
    /// Root filesystem size (GiB, passed through as given)
    pub disk_size: Option<String>,
    pub net: Option<String>,
    pub password: Option<String>,
    pub ssh_public_keys: Option<String>,
    pub description: Option<String>,
    pub unprivileged: Option<bool>,
    pub start: Option<bool>,
    pub onboot: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraParams,
}

impl ContainerCreateOptions {
    pub fn new(vmid: u32, ostemplate: impl Into<String>) -> Self {
        Self { vmid, ostemplate: ostemplate.into(), ..Default::default() }
    }

    pub fn with_disk(mut self, storage: Option<&str>, size: Option<&str>) -> Self {
        self.storage = storage.map(str::to_string);
        self.disk_size = size.map(str::to_string);
        self
    }
}

/// Options for cloning a VM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmCloneOptions {
    /// Source VM
    pub vmid: u32,
    /// Identifier for the clone (required)
    pub newid: u32,
    pub node: Option<String>,
    pub name: Option<String>,
    /// Target node for the clone
    pub target: Option<String>,
    /// Target storage for full clones
    pub storage: Option<String>,
    pub description: Option<String>,
    /// Clone from this snapshot instead of the current state
    pub snapname: Option<String>,
    /// Full copy instead of a linked clone
    pub full: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraParams,
}

/// Options for cloning a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerCloneOptions {
    pub vmid: u32,
    pub newid: u32,
    pub node: Option<String>,
    pub hostname: Option<String>,
    pub target: Option<String>,
    pub storage: Option<String>,
    pub description: Option<String>,
    pub snapname: Option<String>,
    pub full: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraParams,
}

/// Options for destroying a VM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmDeleteOptions {
    pub vmid: u32,
    pub node: Option<String>,
    /// Also remove the VM from backup jobs, HA and replication
    pub purge: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraParams,
}

/// Options for destroying a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerDeleteOptions {
    pub vmid: u32,
    pub node: Option<String>,
    pub purge: Option<bool>,
    /// Destroy even if running
    pub force: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraParams,
}

/// Options for a graceful shutdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownOptions {
    /// Seconds to wait for the guest
    pub timeout: Option<u32>,
    /// Hard stop once the timeout expires
    pub force_stop: Option<bool>,
}

/// Options for taking a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotCreateOptions {
    pub name: String,
    pub description: Option<String>,
    /// Include RAM state (VMs only, ignored for containers)
    pub vmstate: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraParams,
}

impl SnapshotCreateOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }
}

// =============================================================================
// TOLERANT FIELD ACCESS
// =============================================================================

pub(crate) fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
        }
        Value::Bool(b) => Some(u64::from(*b)),
        _ => None,
    }
}

pub(crate) fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn as_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.trim(), "1" | "true" | "yes" | "on"),
        _ => false,
    }
}

fn field_u64(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(as_u64).unwrap_or(0)
}

fn field_u32(value: &Value, key: &str) -> Option<u32> {
    value.get(key).and_then(as_u64).and_then(|n| u32::try_from(n).ok())
}

fn field_f64(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(as_f64).unwrap_or(0.0)
}

fn field_bool(value: &Value, key: &str) -> bool {
    value.get(key).map(as_bool).unwrap_or(false)
}

fn field_opt_str(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field_str(value: &Value, key: &str) -> String {
    field_opt_str(value, key).unwrap_or_default()
}

/// Map an array of list entries, skipping the ones the mapper rejects.
pub(crate) fn map_list<T>(
    items: &[Value],
    what: &str,
    mapper: impl Fn(&Value) -> Option<T>,
) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| {
            let mapped = mapper(item);
            if mapped.is_none() {
                warn!(entry = %item, "Skipping {} entry without an identifier", what);
            }
            mapped
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vm_record_coerces_loose_fields() {
        let value = json!({
            "vmid": "100",
            "name": "web",
            "status": "running",
            "cpu": "0.25",
            "maxmem": 4294967296u64,
            "template": "1",
            "uptime": 12.7
        });

        let vm = VmRecord::from_json(&value, "pve1", None).unwrap();
        assert_eq!(vm.vmid, 100);
        assert_eq!(vm.node, "pve1");
        assert_eq!(vm.status, VmStatus::Running);
        assert_eq!(vm.cpu, 0.25);
        assert_eq!(vm.maxmem, 4294967296);
        assert_eq!(vm.uptime, 12);
        assert!(vm.template);
        assert_eq!(vm.mem, 0);
    }

    #[test]
    fn test_vm_record_paused_from_qmpstatus() {
        let value = json!({"status": "running", "qmpstatus": "paused"});
        let vm = VmRecord::from_json(&value, "pve1", Some(101)).unwrap();
        assert_eq!(vm.vmid, 101);
        assert_eq!(vm.status, VmStatus::Paused);
    }

    #[test]
    fn test_record_without_vmid_is_rejected() {
        let value = json!({"name": "orphan"});
        assert!(VmRecord::from_json(&value, "pve1", None).is_none());
        assert!(ContainerRecord::from_json(&value, "pve1", None).is_none());
    }

    #[test]
    fn test_unknown_status_strings() {
        assert_eq!(VmStatus::parse("suspended"), VmStatus::Unknown);
        assert_eq!(ContainerStatus::parse("paused"), ContainerStatus::Unknown);
        assert_eq!(NodeStatus::parse("ONLINE"), NodeStatus::Online);
    }

    #[test]
    fn test_node_status_document() {
        let value = json!({
            "cpu": 0.05,
            "uptime": 3600,
            "memory": {"used": 1024, "total": 4096},
            "rootfs": {"used": 10, "total": 100},
            "cpuinfo": {"cpus": 8}
        });

        let node = NodeRecord::from_status_json("pve2", &value);
        assert_eq!(node.node, "pve2");
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.maxcpu, 8);
        assert_eq!(node.mem, 1024);
        assert_eq!(node.maxmem, 4096);
        assert_eq!(node.maxdisk, 100);
    }

    #[test]
    fn test_storage_content_split_and_enabled_default() {
        let value = json!({
            "storage": "local",
            "type": "dir",
            "content": "iso,vztmpl, backup",
            "active": 1,
            "shared": 0
        });

        let storage = StorageRecord::from_json(&value).unwrap();
        assert_eq!(storage.content, vec!["iso", "vztmpl", "backup"]);
        assert!(storage.active);
        assert!(storage.enabled);
        assert!(!storage.shared);
    }

    #[test]
    fn test_snapshot_list_drops_current_marker() {
        let items = vec![
            json!({"name": "base", "snaptime": 1700000000, "description": ""}),
            json!({"name": "current", "parent": "base", "running": 1}),
        ];

        let snapshots = SnapshotRecord::list_from_json(&items);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "base");
        assert!(snapshots[0].created_at().is_some());
    }

    #[test]
    fn test_extra_params_flatten_from_json() {
        let opts: VmCreateOptions = serde_json::from_value(json!({
            "vmid": 200,
            "name": "db",
            "balloon": 512,
            "tags": "prod"
        }))
        .unwrap();

        assert_eq!(opts.vmid, 200);
        assert_eq!(opts.name.as_deref(), Some("db"));
        assert_eq!(opts.extra.get("balloon"), Some(&json!(512)));
        assert_eq!(opts.extra.get("tags"), Some(&json!("prod")));
    }
}
