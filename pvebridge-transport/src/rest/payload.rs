//! Request bodies for the REST endpoints.
//!
//! This key table is maintained separately from the shell flag table in
//! `shell::command`; the two vocabularies happen to agree today and the
//! mapping contract tests keep them that way.
//!
//! | Option             | Key             | Encoding                          |
//! |--------------------|-----------------|-----------------------------------|
//! | VM disk            | `scsi0`         | `<pool>:<size>`                   |
//! | Container rootfs   | `rootfs`        | `<pool>:<size>`                   |
//! | Install media      | `ide2`          | `<iso>,media=cdrom`               |
//! | destroy purge      | `purge`         | `1` when true, omitted otherwise  |
//! | other booleans     |                 | `1` / `0`                         |
//! | clone target id    | `newid`         | integer                           |
//! | snapshot name      | `snapname`      | string                            |
//!
//! Pass-through parameters are merged last; keys already set win, and so do
//! keys the request path carries (`vmid` on clone, delete and snapshot).

use serde_json::{Map, Value};

use crate::types::*;

const VM_DISK_DEFAULT_GIB: &str = "32";
const CT_ROOTFS_DEFAULT_GIB: &str = "8";

/// JSON object under construction.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Payload {
    body: Map<String, Value>,
    reserved: Vec<&'static str>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key as supplied by the request path so extras cannot set it.
    pub fn path_key(mut self, key: &'static str) -> Self {
        self.reserved.push(key);
        self
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }

    pub fn opt<T: Into<Value>>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    /// `1` / `0`; omitted when unset.
    pub fn flag(self, key: &str, value: Option<bool>) -> Self {
        self.opt(key, value.map(u8::from))
    }

    /// `1` when true; omitted when unset or false.
    pub fn presence(self, key: &str, value: Option<bool>) -> Self {
        if value == Some(true) {
            self.set(key, 1)
        } else {
            self
        }
    }

    pub fn extras(mut self, extra: &ExtraParams) -> Self {
        for (key, value) in extra {
            if self.body.contains_key(key) || self.reserved.contains(&key.as_str()) {
                continue;
            }
            let value = match value {
                Value::Bool(b) => Value::from(u8::from(*b)),
                // A bare flag on the command line means "enabled".
                Value::Null => Value::from(1),
                other => other.clone(),
            };
            self.body.insert(key.clone(), value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.body.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.body.keys()
    }

    /// The request body, or `None` when nothing was set.
    pub fn into_body(self) -> Option<Value> {
        if self.body.is_empty() {
            None
        } else {
            Some(Value::Object(self.body))
        }
    }
}

fn storage_value(storage: Option<&str>, size: Option<&str>, default_size: &str) -> Option<String> {
    match (storage, size) {
        (Some(pool), Some(size)) => Some(format!("{}:{}", pool, size)),
        (Some(pool), None) => Some(format!("{}:{}", pool, default_size)),
        (None, size) => size.map(str::to_string),
    }
}

/// `POST /nodes/{node}/qemu`
pub fn vm_create(options: &VmCreateOptions) -> Payload {
    let disk = storage_value(
        options.storage.as_deref(),
        options.disk_size.as_deref(),
        VM_DISK_DEFAULT_GIB,
    );

    Payload::new()
        .set("vmid", options.vmid)
        .opt("name", options.name.clone())
        .opt("memory", options.memory)
        .opt("cores", options.cores)
        .opt("sockets", options.sockets)
        .opt("cpu", options.cpu.clone())
        .opt("ostype", options.ostype.clone())
        .opt("scsi0", disk)
        .opt("ide2", options.iso.as_ref().map(|iso| format!("{},media=cdrom", iso)))
        .opt("net0", options.net.clone())
        .opt("description", options.description.clone())
        .flag("start", options.start)
        .flag("onboot", options.onboot)
        .flag("agent", options.agent)
        .extras(&options.extra)
}

/// `POST /nodes/{node}/lxc`
pub fn container_create(options: &ContainerCreateOptions) -> Payload {
    let rootfs = storage_value(
        options.storage.as_deref(),
        options.disk_size.as_deref(),
        CT_ROOTFS_DEFAULT_GIB,
    );

    Payload::new()
        .set("vmid", options.vmid)
        .set("ostemplate", options.ostemplate.clone())
        .opt("hostname", options.hostname.clone())
        .opt("memory", options.memory)
        .opt("swap", options.swap)
        .opt("cores", options.cores)
        .opt("rootfs", rootfs)
        .opt("net0", options.net.clone())
        .opt("password", options.password.clone())
        .opt("ssh-public-keys", options.ssh_public_keys.clone())
        .opt("description", options.description.clone())
        .flag("unprivileged", options.unprivileged)
        .flag("start", options.start)
        .flag("onboot", options.onboot)
        .extras(&options.extra)
}

/// `POST /nodes/{node}/qemu/{vmid}/clone`
pub fn vm_clone(options: &VmCloneOptions) -> Payload {
    Payload::new()
        .path_key("vmid")
        .set("newid", options.newid)
        .opt("name", options.name.clone())
        .opt("target", options.target.clone())
        .opt("storage", options.storage.clone())
        .opt("description", options.description.clone())
        .opt("snapname", options.snapname.clone())
        .flag("full", options.full)
        .extras(&options.extra)
}

/// `POST /nodes/{node}/lxc/{vmid}/clone`
pub fn container_clone(options: &ContainerCloneOptions) -> Payload {
    Payload::new()
        .path_key("vmid")
        .set("newid", options.newid)
        .opt("hostname", options.hostname.clone())
        .opt("target", options.target.clone())
        .opt("storage", options.storage.clone())
        .opt("description", options.description.clone())
        .opt("snapname", options.snapname.clone())
        .flag("full", options.full)
        .extras(&options.extra)
}

/// `DELETE /nodes/{node}/qemu/{vmid}`
pub fn vm_delete(options: &VmDeleteOptions) -> Payload {
    Payload::new()
        .path_key("vmid")
        .presence("purge", options.purge)
        .extras(&options.extra)
}

/// `DELETE /nodes/{node}/lxc/{vmid}`
pub fn container_delete(options: &ContainerDeleteOptions) -> Payload {
    Payload::new()
        .path_key("vmid")
        .presence("purge", options.purge)
        .flag("force", options.force)
        .extras(&options.extra)
}

/// `POST /nodes/{node}/{qemu|lxc}/{vmid}/status/shutdown`
pub fn shutdown(options: &ShutdownOptions) -> Payload {
    Payload::new()
        .opt("timeout", options.timeout)
        .flag("forceStop", options.force_stop)
}

/// `POST /nodes/{node}/{qemu|lxc}/{vmid}/snapshot`
pub fn snapshot_create(kind: GuestKind, options: &SnapshotCreateOptions) -> Payload {
    let vmstate = match kind {
        GuestKind::Vm => options.vmstate,
        GuestKind::Container => None,
    };

    Payload::new()
        .path_key("vmid")
        .set("snapname", options.name.clone())
        .opt("description", options.description.clone())
        .flag("vmstate", vmstate)
        .extras(&options.extra)
}
