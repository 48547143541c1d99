//! Command-line argument parsing.

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{Args as ClapArgs, Parser, Subcommand};
use pvebridge_transport::{BackendKind, TransportError};

/// pvebridge - Proxmox VE cluster control over SSH or the REST API
#[derive(Parser, Debug)]
#[command(name = "pvebridge")]
#[command(about = "pvebridge - Proxmox VE cluster control over SSH or the REST API")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (defaults to /etc/pvebridge/config.yaml when present)
    #[arg(short, long, env = "PVEBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Force a backend instead of the per-operation default (ssh, api)
    #[arg(long, value_parser = parse_backend, global = true)]
    pub backend: Option<BackendKind>,

    /// Confirm a destructive operation
    #[arg(long, global = true)]
    pub confirm: bool,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings that override the configuration file.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct Overrides {
    /// SSH host
    #[arg(long, env = "SSH_HOST", global = true)]
    pub ssh_host: Option<String>,

    /// SSH port
    #[arg(long, env = "SSH_PORT", global = true)]
    pub ssh_port: Option<u16>,

    /// SSH user
    #[arg(long, env = "SSH_USER", global = true)]
    pub ssh_user: Option<String>,

    /// SSH password
    #[arg(long, env = "SSH_PASSWORD", hide_env_values = true, global = true)]
    pub ssh_password: Option<String>,

    /// SSH private key path
    #[arg(long, env = "SSH_KEY_PATH", global = true)]
    pub ssh_key_path: Option<String>,

    /// REST API host
    #[arg(long, env = "PROXMOX_HOST", global = true)]
    pub api_host: Option<String>,

    /// REST API port
    #[arg(long, env = "PROXMOX_PORT", global = true)]
    pub api_port: Option<u16>,

    /// API token id (user@realm!name)
    #[arg(long, env = "PROXMOX_TOKEN_ID", global = true)]
    pub token_id: Option<String>,

    /// API token secret
    #[arg(long, env = "PROXMOX_TOKEN_SECRET", hide_env_values = true, global = true)]
    pub token_secret: Option<String>,

    /// Verify the API server certificate
    #[arg(long, env = "PROXMOX_VERIFY_SSL", value_parser = BoolishValueParser::new(), global = true)]
    pub verify_ssl: Option<bool>,

    /// Refuse every destructive operation
    #[arg(long, env = "PROXMOX_SAFE_MODE", value_parser = BoolishValueParser::new(), global = true)]
    pub safe_mode: Option<bool>,

    /// Timeout in seconds for connections, commands and requests
    #[arg(long, env = "PROXMOX_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

fn parse_backend(s: &str) -> Result<BackendKind, TransportError> {
    s.parse()
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage virtual machines
    Vm {
        #[command(subcommand)]
        action: GuestAction,
    },

    /// Manage LXC containers
    Ct {
        #[command(subcommand)]
        action: GuestAction,
    },

    /// Inspect cluster nodes
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },

    /// Inspect storage pools
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },

    /// Manage snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Run a raw command on the node over SSH
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Issue a raw REST API request
    Api {
        /// HTTP method (GET, POST, PUT, DELETE)
        method: String,

        /// Path below /api2/json, e.g. /cluster/resources
        path: String,

        /// JSON parameters
        #[arg(long)]
        data: Option<String>,
    },
}

/// Actions shared by VMs and containers.
#[derive(Subcommand, Debug)]
pub enum GuestAction {
    /// List guests on a node
    List {
        #[arg(long)]
        node: Option<String>,
    },

    /// Show current status
    Get {
        vmid: u32,
        #[arg(long)]
        node: Option<String>,
    },

    Start {
        vmid: u32,
        #[arg(long)]
        node: Option<String>,
    },

    /// Hard stop
    Stop {
        vmid: u32,
        #[arg(long)]
        node: Option<String>,
    },

    /// Graceful shutdown
    Shutdown {
        vmid: u32,
        #[arg(long)]
        node: Option<String>,
        /// Seconds to wait
        #[arg(long)]
        timeout: Option<u32>,
        /// Hard stop once the timeout expires
        #[arg(long)]
        force_stop: bool,
    },

    Reboot {
        vmid: u32,
        #[arg(long)]
        node: Option<String>,
    },

    Create(CreateArgs),

    /// Destroy a guest (requires --confirm)
    Delete {
        vmid: u32,
        #[arg(long)]
        node: Option<String>,
        /// Also remove from backup jobs, HA and replication
        #[arg(long)]
        purge: bool,
        /// Destroy even if running (containers)
        #[arg(long)]
        force: bool,
    },

    Clone {
        vmid: u32,
        newid: u32,
        #[arg(long)]
        node: Option<String>,
        /// Name (VM) or hostname (container) of the clone
        #[arg(long)]
        name: Option<String>,
        /// Target node
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        storage: Option<String>,
        #[arg(long)]
        snapname: Option<String>,
        /// Full copy instead of a linked clone
        #[arg(long)]
        full: bool,
    },
}

/// Arguments for creating a VM or container.
#[derive(ClapArgs, Debug, Default)]
pub struct CreateArgs {
    pub vmid: u32,

    #[arg(long)]
    pub node: Option<String>,

    /// Name (VM) or hostname (container)
    #[arg(long)]
    pub name: Option<String>,

    /// Template volume (containers only)
    #[arg(long)]
    pub ostemplate: Option<String>,

    /// Memory in MiB
    #[arg(long)]
    pub memory: Option<u64>,

    #[arg(long)]
    pub cores: Option<u32>,

    #[arg(long)]
    pub storage: Option<String>,

    /// Disk (VM) or rootfs (container) size in GiB
    #[arg(long)]
    pub disk_size: Option<String>,

    /// Install media (VMs only)
    #[arg(long)]
    pub iso: Option<String>,

    /// First network device
    #[arg(long)]
    pub net: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    #[arg(long, value_parser = BoolishValueParser::new())]
    pub start: Option<bool>,

    #[arg(long, value_parser = BoolishValueParser::new())]
    pub onboot: Option<bool>,

    /// Unprivileged container
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub unprivileged: Option<bool>,

    /// Extra parameter passed through unchanged (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum NodeAction {
    List,
    Status { node: String },
}

#[derive(Subcommand, Debug)]
pub enum StorageAction {
    List {
        #[arg(long)]
        node: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SnapshotAction {
    List {
        vmid: u32,
        #[arg(long)]
        node: Option<String>,
        /// Target a container instead of a VM
        #[arg(long)]
        container: bool,
    },

    Create {
        vmid: u32,
        name: String,
        #[arg(long)]
        node: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Include RAM state (VMs only)
        #[arg(long)]
        vmstate: bool,
        #[arg(long)]
        container: bool,
    },

    /// Delete a snapshot (requires --confirm)
    Delete {
        vmid: u32,
        name: String,
        #[arg(long)]
        node: Option<String>,
        #[arg(long)]
        container: bool,
    },

    Rollback {
        vmid: u32,
        name: String,
        #[arg(long)]
        node: Option<String>,
        #[arg(long)]
        container: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_delete() {
        let args = Args::try_parse_from(["pvebridge", "--confirm", "vm", "delete", "100", "--purge"]).unwrap();
        assert!(args.confirm);
        match args.command {
            Command::Vm { action: GuestAction::Delete { vmid, purge, .. } } => {
                assert_eq!(vmid, 100);
                assert!(purge);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_backend_preference() {
        let args = Args::try_parse_from(["pvebridge", "--backend", "ssh", "node", "list"]).unwrap();
        assert_eq!(args.backend, Some(BackendKind::Ssh));

        assert!(Args::try_parse_from(["pvebridge", "--backend", "telnet", "node", "list"]).is_err());
    }

    #[test]
    fn test_exec_takes_trailing_words() {
        let args = Args::try_parse_from(["pvebridge", "exec", "qm", "config", "100", "--current"]).unwrap();
        match args.command {
            Command::Exec { command } => assert_eq!(command, ["qm", "config", "100", "--current"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
