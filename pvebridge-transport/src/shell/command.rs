//! Command-line synthesis for `qm`, `pct` and `pvesh`.
//!
//! Flag table (shell vocabulary). Boolean flags follow their tool's own
//! convention, listed per flag:
//!
//! | Option             | Flag                         | Boolean convention |
//! |--------------------|------------------------------|--------------------|
//! | VM disk            | `--scsi0 <pool>:<size>`      |                    |
//! | Container rootfs   | `--rootfs <pool>:<size>`     |                    |
//! | Install media      | `--ide2 <iso>,media=cdrom`   |                    |
//! | start / onboot     | `--start`, `--onboot`        | `1` / `0`          |
//! | agent              | `--agent`                    | `1` / `0`          |
//! | unprivileged       | `--unprivileged`             | `1` / `0`          |
//! | clone full         | `--full`                     | bare flag when true, omitted when false |
//! | destroy purge      | `--purge`                    | bare flag when true, omitted when false |
//! | container force    | `--force`                    | `1` / `0`          |
//! | shutdown forceStop | `--forceStop`                | `1` / `0`          |
//! | snapshot vmstate   | `--vmstate`                  | `1` / `0`          |
//!
//! Extra parameters are appended last as `--key value`, skipping any key a
//! typed option already produced, positional ones (`vmid`, `newid`,
//! `ostemplate`, `snapname`) included.

use std::fmt::Display;

use serde_json::Value;

use crate::types::*;

/// Default VM disk size (GiB) when only a storage pool is given.
pub const DEFAULT_VM_DISK_GIB: &str = "32";

/// Default container rootfs size (GiB) when only a storage pool is given.
pub const DEFAULT_CT_ROOTFS_GIB: &str = "8";

/// A vendor invocation: program, ordered positional arguments, then flags.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    flags: Vec<(String, Option<String>)>,
    positional_keys: Vec<&'static str>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            flags: Vec::new(),
            positional_keys: Vec::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Display) -> Self {
        self.args.push(value.to_string());
        self
    }

    /// Append a positional argument that fills the option `key`.
    pub fn keyed_arg(mut self, key: &'static str, value: impl Display) -> Self {
        self.positional_keys.push(key);
        self.arg(value)
    }

    /// Append `--name value`.
    pub fn flag(mut self, name: &str, value: impl Display) -> Self {
        self.flags.push((name.to_string(), Some(value.to_string())));
        self
    }

    /// Append `--name value` when the value is present.
    pub fn opt<T: Display>(self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.flag(name, v),
            None => self,
        }
    }

    /// Boolean rendered as `--name 1` / `--name 0`; omitted when unset.
    pub fn numeric_bool(self, name: &str, value: Option<bool>) -> Self {
        self.opt(name, value.map(|b| if b { 1 } else { 0 }))
    }

    /// Boolean rendered as a bare `--name`; omitted when unset or false.
    pub fn bare_bool(mut self, name: &str, value: Option<bool>) -> Self {
        if value == Some(true) {
            self.flags.push((name.to_string(), None));
        }
        self
    }

    /// Append pass-through parameters. Keys already present, as a flag or
    /// as a positional argument, are skipped.
    pub fn extras(mut self, extra: &ExtraParams) -> Self {
        for (key, value) in extra {
            if self.has_flag(key) || self.positional_keys.contains(&key.as_str()) {
                continue;
            }
            let rendered = render_value(value);
            self.flags.push((key.clone(), rendered));
        }
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn flags(&self) -> &[(String, Option<String>)] {
        &self.flags
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.iter().any(|(n, _)| n == name)
    }

    /// Value of a flag; `None` for absent or bare flags.
    pub fn flag_value(&self, name: &str) -> Option<&str> {
        self.flags
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Render to a single shell line, quoting values where needed.
    pub fn render(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| quote(a)));
        for (name, value) in &self.flags {
            parts.push(format!("--{}", name));
            if let Some(v) = value {
                parts.push(quote(v));
            }
        }
        parts.join(" ")
    }
}

/// Render a pass-through value. `null` becomes a bare flag.
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Single-quote a value for a POSIX shell when it contains whitespace or
/// shell metacharacters.
pub fn quote(value: &str) -> String {
    const SPECIAL: &[char] = &[
        '\'', '"', '\\', '$', '`', ';', '&', '|', '<', '>', '(', ')', '{', '}', '*', '?', '!',
        '#', '~', '[', ']',
    ];

    if value.is_empty() {
        return "''".to_string();
    }
    if !value.chars().any(|c| c.is_whitespace() || SPECIAL.contains(&c)) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Combine a storage pool and a size into a disk spec.
///
/// Both present gives `pool:size`; size alone passes through unchanged; pool
/// alone gets `default_size`.
pub fn disk_spec(storage: Option<&str>, size: Option<&str>, default_size: &str) -> Option<String> {
    match (storage, size) {
        (Some(pool), Some(size)) => Some(format!("{}:{}", pool, size)),
        (None, Some(size)) => Some(size.to_string()),
        (Some(pool), None) => Some(format!("{}:{}", pool, default_size)),
        (None, None) => None,
    }
}

/// Install media attached as a CD-ROM drive.
pub fn cdrom_spec(iso: &str) -> String {
    format!("{},media=cdrom", iso)
}

// =============================================================================
// QUERIES
// =============================================================================

/// `pvesh get <path> --output-format json`
pub fn pvesh_get(path: &str) -> CommandLine {
    CommandLine::new("pvesh")
        .arg("get")
        .arg(path)
        .flag("output-format", "json")
}

/// `qm list` / `pct list`
pub fn list_guests(kind: GuestKind) -> CommandLine {
    CommandLine::new(kind.cli_tool()).arg("list")
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// `qm|pct start|stop|reboot <vmid>`
pub fn lifecycle(kind: GuestKind, action: &str, vmid: u32) -> CommandLine {
    CommandLine::new(kind.cli_tool()).arg(action).arg(vmid)
}

/// `qm|pct shutdown <vmid> [--timeout N] [--forceStop 1|0]`
pub fn shutdown(kind: GuestKind, vmid: u32, options: &ShutdownOptions) -> CommandLine {
    lifecycle(kind, "shutdown", vmid)
        .opt("timeout", options.timeout)
        .numeric_bool("forceStop", options.force_stop)
}

// =============================================================================
// CREATE / CLONE / DELETE
// =============================================================================

/// `qm create <vmid> ...`
pub fn vm_create(options: &VmCreateOptions) -> CommandLine {
    let disk = disk_spec(
        options.storage.as_deref(),
        options.disk_size.as_deref(),
        DEFAULT_VM_DISK_GIB,
    );

    CommandLine::new("qm")
        .arg("create")
        .keyed_arg("vmid", options.vmid)
        .opt("name", options.name.as_deref())
        .opt("memory", options.memory)
        .opt("cores", options.cores)
        .opt("sockets", options.sockets)
        .opt("cpu", options.cpu.as_deref())
        .opt("ostype", options.ostype.as_deref())
        .opt("scsi0", disk)
        .opt("ide2", options.iso.as_deref().map(cdrom_spec))
        .opt("net0", options.net.as_deref())
        .opt("description", options.description.as_deref())
        .numeric_bool("start", options.start)
        .numeric_bool("onboot", options.onboot)
        .numeric_bool("agent", options.agent)
        .extras(&options.extra)
}

/// `pct create <vmid> <ostemplate> ...`
pub fn container_create(options: &ContainerCreateOptions) -> CommandLine {
    let rootfs = disk_spec(
        options.storage.as_deref(),
        options.disk_size.as_deref(),
        DEFAULT_CT_ROOTFS_GIB,
    );

    CommandLine::new("pct")
        .arg("create")
        .keyed_arg("vmid", options.vmid)
        .keyed_arg("ostemplate", &options.ostemplate)
        .opt("hostname", options.hostname.as_deref())
        .opt("memory", options.memory)
        .opt("swap", options.swap)
        .opt("cores", options.cores)
        .opt("rootfs", rootfs)
        .opt("net0", options.net.as_deref())
        .opt("password", options.password.as_deref())
        .opt("ssh-public-keys", options.ssh_public_keys.as_deref())
        .opt("description", options.description.as_deref())
        .numeric_bool("unprivileged", options.unprivileged)
        .numeric_bool("start", options.start)
        .numeric_bool("onboot", options.onboot)
        .extras(&options.extra)
}

/// `qm clone <vmid> <newid> ...`
pub fn vm_clone(options: &VmCloneOptions) -> CommandLine {
    CommandLine::new("qm")
        .arg("clone")
        .keyed_arg("vmid", options.vmid)
        .keyed_arg("newid", options.newid)
        .opt("name", options.name.as_deref())
        .opt("target", options.target.as_deref())
        .opt("storage", options.storage.as_deref())
        .opt("description", options.description.as_deref())
        .opt("snapname", options.snapname.as_deref())
        .bare_bool("full", options.full)
        .extras(&options.extra)
}

/// `pct clone <vmid> <newid> ...`
pub fn container_clone(options: &ContainerCloneOptions) -> CommandLine {
    CommandLine::new("pct")
        .arg("clone")
        .keyed_arg("vmid", options.vmid)
        .keyed_arg("newid", options.newid)
        .opt("hostname", options.hostname.as_deref())
        .opt("target", options.target.as_deref())
        .opt("storage", options.storage.as_deref())
        .opt("description", options.description.as_deref())
        .opt("snapname", options.snapname.as_deref())
        .bare_bool("full", options.full)
        .extras(&options.extra)
}

/// `qm destroy <vmid> [--purge]`
pub fn vm_delete(options: &VmDeleteOptions) -> CommandLine {
    CommandLine::new("qm")
        .arg("destroy")
        .keyed_arg("vmid", options.vmid)
        .bare_bool("purge", options.purge)
        .extras(&options.extra)
}

/// `pct destroy <vmid> [--purge] [--force 1|0]`
pub fn container_delete(options: &ContainerDeleteOptions) -> CommandLine {
    CommandLine::new("pct")
        .arg("destroy")
        .keyed_arg("vmid", options.vmid)
        .bare_bool("purge", options.purge)
        .numeric_bool("force", options.force)
        .extras(&options.extra)
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// `qm|pct snapshot <vmid> <name> ...`
pub fn snapshot_create(kind: GuestKind, vmid: u32, options: &SnapshotCreateOptions) -> CommandLine {
    let vmstate = match kind {
        GuestKind::Vm => options.vmstate,
        GuestKind::Container => None,
    };

    CommandLine::new(kind.cli_tool())
        .arg("snapshot")
        .keyed_arg("vmid", vmid)
        .keyed_arg("snapname", &options.name)
        .opt("description", options.description.as_deref())
        .numeric_bool("vmstate", vmstate)
        .extras(&options.extra)
}

/// `qm|pct delsnapshot <vmid> <name>`
pub fn snapshot_delete(kind: GuestKind, vmid: u32, name: &str) -> CommandLine {
    CommandLine::new(kind.cli_tool())
        .arg("delsnapshot")
        .arg(vmid)
        .arg(name)
}

/// `qm|pct rollback <vmid> <name>`
pub fn snapshot_rollback(kind: GuestKind, vmid: u32, name: &str) -> CommandLine {
    CommandLine::new(kind.cli_tool())
        .arg("rollback")
        .arg(vmid)
        .arg(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vm_create_full_line() {
        let mut opts = VmCreateOptions::new(100)
            .with_name("web-01")
            .with_disk(Some("local-lvm"), Some("64"));
        opts.memory = Some(4096);
        opts.cores = Some(2);
        opts.iso = Some("local:iso/debian-12.iso".to_string());
        opts.start = Some(true);
        opts.agent = Some(false);

        assert_eq!(
            vm_create(&opts).render(),
            "qm create 100 --name web-01 --memory 4096 --cores 2 \
             --scsi0 local-lvm:64 --ide2 local:iso/debian-12.iso,media=cdrom \
             --start 1 --agent 0"
        );
    }

    #[test]
    fn test_disk_composite_only_with_both_parts() {
        let both = vm_create(&VmCreateOptions::new(1).with_disk(Some("tank"), Some("20")));
        assert_eq!(both.flag_value("scsi0"), Some("tank:20"));

        let size_only = vm_create(&VmCreateOptions::new(1).with_disk(None, Some("20")));
        assert_eq!(size_only.flag_value("scsi0"), Some("20"));

        let pool_only = vm_create(&VmCreateOptions::new(1).with_disk(Some("tank"), None));
        assert_eq!(pool_only.flag_value("scsi0"), Some("tank:32"));

        let neither = vm_create(&VmCreateOptions::new(1));
        assert!(!neither.has_flag("scsi0"));
    }

    #[test]
    fn test_container_rootfs_default_size() {
        let opts = ContainerCreateOptions::new(200, "local:vztmpl/alpine.tar.xz")
            .with_disk(Some("local-lvm"), None);
        let cmd = container_create(&opts);
        assert_eq!(cmd.args(), ["create", "200", "local:vztmpl/alpine.tar.xz"]);
        assert_eq!(cmd.flag_value("rootfs"), Some("local-lvm:8"));
    }

    #[test]
    fn test_whitespace_values_are_quoted() {
        let mut opts = VmCreateOptions::new(100);
        opts.description = Some("primary web server".to_string());
        assert!(vm_create(&opts)
            .render()
            .ends_with("--description 'primary web server'"));

        assert_eq!(quote("it's here"), r"'it'\''s here'");
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_purge_flag_presence() {
        let mut opts = VmDeleteOptions { vmid: 100, ..Default::default() };
        assert_eq!(vm_delete(&opts).render(), "qm destroy 100");

        opts.purge = Some(false);
        assert!(!vm_delete(&opts).has_flag("purge"));

        opts.purge = Some(true);
        assert_eq!(vm_delete(&opts).render(), "qm destroy 100 --purge");
    }

    #[test]
    fn test_boolean_mapping_is_stable() {
        let mut opts = ContainerCreateOptions::new(300, "tmpl");
        opts.unprivileged = Some(true);
        opts.onboot = Some(false);

        let first = container_create(&opts).render();
        let second = container_create(&opts).render();
        assert_eq!(first, second);
        assert!(first.contains("--unprivileged 1"));
        assert!(first.contains("--onboot 0"));
    }

    #[test]
    fn test_clone_full_is_bare() {
        let opts = VmCloneOptions {
            vmid: 9000,
            newid: 123,
            name: Some("from-template".to_string()),
            full: Some(true),
            ..Default::default()
        };
        assert_eq!(
            vm_clone(&opts).render(),
            "qm clone 9000 123 --name from-template --full"
        );
    }

    #[test]
    fn test_extras_appended_and_known_keys_win() {
        let opts = VmCreateOptions::new(100)
            .with_name("known")
            .with_extra("name", "ignored")
            .with_extra("balloon", 512)
            .with_extra("numa", true)
            .with_extra("tags", "a b");

        let cmd = vm_create(&opts);
        assert_eq!(cmd.flag_value("name"), Some("known"));
        assert_eq!(
            cmd.render(),
            "qm create 100 --name known --balloon 512 --numa 1 --tags 'a b'"
        );
    }

    #[test]
    fn test_extras_cannot_replace_positional_keys() {
        let opts = VmCreateOptions::new(100)
            .with_extra("vmid", 999)
            .with_extra("balloon", 512);
        assert_eq!(vm_create(&opts).render(), "qm create 100 --balloon 512");

        let clone = VmCloneOptions {
            vmid: 9000,
            newid: 123,
            extra: [("newid".to_string(), json!(5)), ("vmid".to_string(), json!(6))]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        assert_eq!(vm_clone(&clone).render(), "qm clone 9000 123");

        let mut ct = ContainerCreateOptions::new(200, "local:vztmpl/alpine.tar.xz");
        ct.extra.insert("ostemplate".to_string(), json!("other.tar.xz"));
        assert_eq!(
            container_create(&ct).render(),
            "pct create 200 local:vztmpl/alpine.tar.xz"
        );

        let mut snap = SnapshotCreateOptions::new("pre-upgrade");
        snap.extra.insert("snapname".to_string(), json!("other"));
        assert_eq!(
            snapshot_create(GuestKind::Vm, 100, &snap).render(),
            "qm snapshot 100 pre-upgrade"
        );
    }

    #[test]
    fn test_extra_null_is_bare_flag() {
        let mut extra = ExtraParams::new();
        extra.insert("skiplock".to_string(), json!(null));
        let opts = VmDeleteOptions { vmid: 5, extra, ..Default::default() };
        assert_eq!(vm_delete(&opts).render(), "qm destroy 5 --skiplock");
    }

    #[test]
    fn test_container_snapshot_ignores_vmstate() {
        let mut opts = SnapshotCreateOptions::new("pre-upgrade");
        opts.vmstate = Some(true);
        opts.description = Some("before apt upgrade".to_string());

        let vm = snapshot_create(GuestKind::Vm, 100, &opts).render();
        assert_eq!(
            vm,
            "qm snapshot 100 pre-upgrade --description 'before apt upgrade' --vmstate 1"
        );

        let ct = snapshot_create(GuestKind::Container, 200, &opts);
        assert!(!ct.has_flag("vmstate"));
    }

    #[test]
    fn test_shutdown_flags() {
        let opts = ShutdownOptions { timeout: Some(60), force_stop: Some(true) };
        assert_eq!(
            shutdown(GuestKind::Container, 200, &opts).render(),
            "pct shutdown 200 --timeout 60 --forceStop 1"
        );
    }

    #[test]
    fn test_pvesh_get() {
        assert_eq!(
            pvesh_get("/nodes/pve1/storage").render(),
            "pvesh get /nodes/pve1/storage --output-format json"
        );
    }
}
