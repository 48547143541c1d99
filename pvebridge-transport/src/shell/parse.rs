//! Parsers for `qm`/`pct` tabular listings and `pvesh` JSON output.

use serde_json::Value;
use tracing::warn;

use crate::error::{Result, TransportError};
use crate::types::*;

const MIB: u64 = 1024 * 1024;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Data rows of a tabular listing: header skipped, blank lines dropped,
/// each row split on runs of whitespace.
fn table_rows(output: &str) -> impl Iterator<Item = Vec<&str>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .skip(1)
        .map(|line| line.split_whitespace().collect())
}

/// Parse `qm list`.
///
/// Columns: `VMID NAME STATUS MEM(MB) BOOTDISK(GB) PID`. Only the first three
/// are required; further columns are read when present and anything past PID
/// is ignored. `node` is the node the listing ran on.
pub fn parse_vm_list(output: &str, node: &str) -> Vec<VmRecord> {
    let mut vms = Vec::new();

    for fields in table_rows(output) {
        if fields.len() < 3 {
            warn!(row = ?fields, "Skipping short qm list row");
            continue;
        }
        let Ok(vmid) = fields[0].parse::<u32>() else {
            warn!(row = ?fields, "Skipping qm list row with non-numeric VMID");
            continue;
        };

        let maxmem = fields
            .get(3)
            .and_then(|m| m.parse::<u64>().ok())
            .map(|mib| mib * MIB)
            .unwrap_or(0);
        let maxdisk = fields
            .get(4)
            .and_then(|d| d.parse::<f64>().ok())
            .map(|gib| (gib * GIB) as u64)
            .unwrap_or(0);

        vms.push(VmRecord {
            vmid,
            name: fields[1].to_string(),
            status: VmStatus::parse(fields[2]),
            node: node.to_string(),
            maxmem,
            maxdisk,
            ..Default::default()
        });
    }

    vms
}

/// Parse `pct list`.
///
/// Columns: `VMID Status Lock Name`. The Lock column is blank for most rows,
/// which collapses it under whitespace splitting: a three-field row has no
/// lock and the name third, a row with four or more fields has the lock third
/// and the name fourth.
pub fn parse_container_list(output: &str, node: &str) -> Vec<ContainerRecord> {
    let mut containers = Vec::new();

    for fields in table_rows(output) {
        if fields.len() < 2 {
            warn!(row = ?fields, "Skipping short pct list row");
            continue;
        }
        let Ok(vmid) = fields[0].parse::<u32>() else {
            warn!(row = ?fields, "Skipping pct list row with non-numeric VMID");
            continue;
        };

        let (lock, name) = match fields.len() {
            2 => (None, String::new()),
            3 => (None, fields[2].to_string()),
            _ => (Some(fields[2].to_string()), fields[3].to_string()),
        };

        containers.push(ContainerRecord {
            vmid,
            name,
            status: ContainerStatus::parse(fields[1]),
            node: node.to_string(),
            lock,
            ..Default::default()
        });
    }

    containers
}

/// Parse `pvesh ... --output-format json` output. Malformed output is an error.
pub fn parse_json(output: &str) -> Result<Value> {
    serde_json::from_str(output.trim())
        .map_err(|e| TransportError::Parse(format!("invalid JSON from pvesh: {}", e)))
}

fn parse_json_array(output: &str, what: &str) -> Result<Vec<Value>> {
    match parse_json(output)? {
        Value::Array(items) => Ok(items),
        other => Err(TransportError::Parse(format!(
            "expected a JSON array for {}, got {}",
            what,
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse `pvesh get /nodes`.
pub fn parse_node_list(output: &str) -> Result<Vec<NodeRecord>> {
    let items = parse_json_array(output, "node list")?;
    Ok(map_list(&items, "node", NodeRecord::from_json))
}

/// Parse `pvesh get /nodes/{node}/storage`.
pub fn parse_storage_list(output: &str) -> Result<Vec<StorageRecord>> {
    let items = parse_json_array(output, "storage list")?;
    Ok(map_list(&items, "storage", StorageRecord::from_json))
}

/// Parse `pvesh get /nodes/{node}/{qemu|lxc}/{vmid}/snapshot`.
///
/// Some releases print output for guests without snapshots that does not
/// parse as JSON; having no snapshots is a valid state, so malformed output
/// yields an empty list instead of an error.
pub fn parse_snapshot_list(output: &str) -> Vec<SnapshotRecord> {
    match serde_json::from_str::<Value>(output.trim()) {
        Ok(Value::Array(items)) => SnapshotRecord::list_from_json(&items),
        Ok(other) => {
            warn!(kind = type_name(&other), "Unexpected snapshot listing, treating as empty");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "Unparseable snapshot listing, treating as empty");
            Vec::new()
        }
    }
}

/// Parse `pvesh get /cluster/status` for the name of the node the command
/// ran on. A standalone host lists itself the same way a cluster member does.
pub fn parse_local_node(output: &str) -> Result<String> {
    let items = parse_json_array(output, "cluster status")?;

    items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("node"))
        .find(|item| item.get("local").and_then(as_u64) == Some(1))
        .and_then(|item| item.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| TransportError::Parse("cluster status has no local node entry".to_string()))
}

/// Task identifier printed by a mutating command, if any.
pub fn task_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("UPID:"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QM_LIST: &str = "\
      VMID NAME                 STATUS     MEM(MB)    BOOTDISK(GB) PID
       100 ubuntu-server        running    4096              32.00 12345
       101 windows-desktop      stopped    8192              64.00 0
";

    #[test]
    fn test_parse_vm_list() {
        let vms = parse_vm_list(QM_LIST, "pve1");
        assert_eq!(vms.len(), 2);

        assert_eq!(vms[0].vmid, 100);
        assert_eq!(vms[0].name, "ubuntu-server");
        assert_eq!(vms[0].status, VmStatus::Running);
        assert_eq!(vms[0].node, "pve1");
        assert_eq!(vms[0].maxmem, 4096 * 1024 * 1024);
        assert_eq!(vms[0].maxdisk, 32 * 1024 * 1024 * 1024);

        assert_eq!(vms[1].vmid, 101);
        assert_eq!(vms[1].name, "windows-desktop");
        assert_eq!(vms[1].status, VmStatus::Stopped);
        assert_eq!(vms[1].node, "pve1");
    }

    #[test]
    fn test_header_only_listing_is_empty() {
        let header = "      VMID NAME                 STATUS     MEM(MB)    BOOTDISK(GB) PID\n";
        assert!(parse_vm_list(header, "pve1").is_empty());
        assert!(parse_vm_list("", "pve1").is_empty());
        assert!(parse_container_list("VMID       Status     Lock         Name\n", "pve1").is_empty());
    }

    #[test]
    fn test_row_count_matches_non_blank_data_lines() {
        let output = "VMID NAME STATUS\n100 a running\n\n   \n101 b stopped extra cols here\n102 c paused\n";
        let vms = parse_vm_list(output, "n");
        assert_eq!(vms.len(), 3);
        assert_eq!(vms[1].name, "b");
        assert_eq!(vms[2].status, VmStatus::Paused);
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let output = "VMID NAME STATUS\nabc broken running\n100 ok\n101 fine stopped\n";
        let vms = parse_vm_list(output, "n");
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].vmid, 101);
    }

    #[test]
    fn test_parse_container_list_lock_column() {
        let output = "\
VMID       Status     Lock         Name
200        running                 web-ct
201        stopped    backup       db-ct
";
        let cts = parse_container_list(output, "pve2");
        assert_eq!(cts.len(), 2);

        assert_eq!(cts[0].vmid, 200);
        assert_eq!(cts[0].name, "web-ct");
        assert_eq!(cts[0].lock, None);
        assert_eq!(cts[0].status, ContainerStatus::Running);

        assert_eq!(cts[1].name, "db-ct");
        assert_eq!(cts[1].lock.as_deref(), Some("backup"));
        assert_eq!(cts[1].node, "pve2");
    }

    #[test]
    fn test_parse_snapshot_list() {
        let output = r#"[{"name":"snap1","description":"First snapshot","snaptime":1700000000},{"name":"snap2","description":"Second snapshot","snaptime":1700003600,"parent":"snap1"},{"name":"current","parent":"snap2","running":1}]"#;

        let snapshots = parse_snapshot_list(output);
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].name, "snap1");
        assert_eq!(snapshots[0].description, "First snapshot");
        assert_eq!(snapshots[0].snaptime, Some(1700000000));
        assert_eq!(snapshots[1].name, "snap2");
        assert_eq!(snapshots[1].parent.as_deref(), Some("snap1"));
    }

    #[test]
    fn test_malformed_snapshot_list_is_empty() {
        assert!(parse_snapshot_list("not json at all").is_empty());
        assert!(parse_snapshot_list("").is_empty());
        assert!(parse_snapshot_list(r#"{"unexpected": true}"#).is_empty());
    }

    #[test]
    fn test_malformed_node_and_storage_lists_are_errors() {
        assert!(matches!(parse_node_list("garbage"), Err(TransportError::Parse(_))));
        assert!(matches!(parse_storage_list("{}"), Err(TransportError::Parse(_))));
    }

    #[test]
    fn test_parse_node_list() {
        let output = r#"[{"node":"pve1","status":"online","cpu":0.1,"maxcpu":16,"mem":100,"maxmem":200,"uptime":50},{"status":"offline"}]"#;
        let nodes = parse_node_list(output).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node, "pve1");
        assert_eq!(nodes[0].maxcpu, 16);
    }

    #[test]
    fn test_parse_local_node() {
        let output = r#"[
            {"type":"cluster","name":"lab","nodes":2,"quorate":1},
            {"type":"node","name":"pve1","local":0,"online":1},
            {"type":"node","name":"pve2","local":1,"online":1}
        ]"#;
        assert_eq!(parse_local_node(output).unwrap(), "pve2");

        let standalone = r#"[{"type":"node","name":"solo","local":1}]"#;
        assert_eq!(parse_local_node(standalone).unwrap(), "solo");

        let no_local = r#"[{"type":"node","name":"pve1","local":0}]"#;
        assert!(matches!(parse_local_node(no_local), Err(TransportError::Parse(_))));
    }

    #[test]
    fn test_task_id_extraction() {
        let stdout = "some preamble\nUPID:pve1:000A1B2C:0123ABCD:65000000:qmstart:100:root@pam:\n";
        assert_eq!(
            task_id(stdout).as_deref(),
            Some("UPID:pve1:000A1B2C:0123ABCD:65000000:qmstart:100:root@pam:")
        );
        assert_eq!(task_id("done"), None);
    }
}
