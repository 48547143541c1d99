//! The shell flag table and the REST key table are written separately; these
//! tests hold them to the same meaning for the same options.

use std::collections::BTreeSet;

use pvebridge_transport::rest::payload::{self, Payload};
use pvebridge_transport::shell::command::{self, CommandLine};
use pvebridge_transport::*;
use serde_json::{json, Value};

/// Keys the REST side sends that the shell side passes positionally.
const POSITIONAL: &[&str] = &["vmid", "ostemplate", "newid", "snapname"];

fn shell_keys(cmd: &CommandLine) -> BTreeSet<String> {
    cmd.flags().iter().map(|(name, _)| name.clone()).collect()
}

fn rest_keys(payload: &Payload) -> BTreeSet<String> {
    payload
        .keys()
        .filter(|k| !POSITIONAL.contains(&k.as_str()))
        .cloned()
        .collect()
}

/// REST value rendered the way the shell side renders it.
fn as_flag_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn assert_same_values(cmd: &CommandLine, payload: &Payload) {
    for (name, value) in cmd.flags() {
        let rest = payload
            .get(name)
            .unwrap_or_else(|| panic!("REST payload lacks '{name}'"));
        if let Some(value) = value {
            assert_eq!(value, &as_flag_value(rest), "value mismatch for '{name}'");
        }
    }
}

fn full_vm_create() -> VmCreateOptions {
    let mut opts = VmCreateOptions::new(100)
        .with_name("web-01")
        .with_disk(Some("local-lvm"), Some("64"))
        .with_extra("balloon", 1024)
        .with_extra("numa", true);
    opts.memory = Some(4096);
    opts.cores = Some(4);
    opts.sockets = Some(1);
    opts.cpu = Some("host".to_string());
    opts.ostype = Some("l26".to_string());
    opts.iso = Some("local:iso/debian-12.iso".to_string());
    opts.net = Some("virtio,bridge=vmbr0".to_string());
    opts.description = Some("front end".to_string());
    opts.start = Some(true);
    opts.onboot = Some(false);
    opts.agent = Some(true);
    opts
}

fn full_container_create() -> ContainerCreateOptions {
    let mut opts = ContainerCreateOptions::new(200, "local:vztmpl/debian-12.tar.zst")
        .with_disk(Some("local-lvm"), Some("16"));
    opts.hostname = Some("ct-01".to_string());
    opts.memory = Some(1024);
    opts.swap = Some(512);
    opts.cores = Some(2);
    opts.net = Some("name=eth0,bridge=vmbr0,ip=dhcp".to_string());
    opts.password = Some("changeme".to_string());
    opts.ssh_public_keys = Some("ssh-ed25519 AAAA".to_string());
    opts.description = Some("cache".to_string());
    opts.unprivileged = Some(true);
    opts.start = Some(false);
    opts.onboot = Some(true);
    opts
}

#[test]
fn test_vm_create_tables_agree() {
    let opts = full_vm_create();
    let cmd = command::vm_create(&opts);
    let body = payload::vm_create(&opts);

    assert_eq!(shell_keys(&cmd), rest_keys(&body));
    assert_same_values(&cmd, &body);
    assert_eq!(body.get("vmid"), Some(&json!(100)));
    assert_eq!(cmd.args(), ["create", "100"]);
}

#[test]
fn test_container_create_tables_agree() {
    let opts = full_container_create();
    let cmd = command::container_create(&opts);
    let body = payload::container_create(&opts);

    assert_eq!(shell_keys(&cmd), rest_keys(&body));
    assert_same_values(&cmd, &body);
    assert_eq!(cmd.args()[2], "local:vztmpl/debian-12.tar.zst");
}

#[test]
fn test_composite_only_with_pool_and_size() {
    let cases = [
        (Some("tank"), Some("20"), Some("tank:20")),
        (Some("tank"), None, Some("tank:32")),
        (None, Some("20"), Some("20")),
        (None, None, None),
    ];

    for (pool, size, expected) in cases {
        let opts = VmCreateOptions::new(1).with_disk(pool, size);
        let shell = command::vm_create(&opts);
        let rest = payload::vm_create(&opts);

        assert_eq!(shell.flag_value("scsi0"), expected);
        assert_eq!(rest.get("scsi0").and_then(Value::as_str), expected);

        // The caller's own pool:size pair shows up only when both were given.
        let supplied = format!("{}:{}", pool.unwrap_or(""), size.unwrap_or(""));
        let both = pool.is_some() && size.is_some();
        assert_eq!(shell.flag_value("scsi0") == Some(supplied.as_str()), both);
        assert_eq!(rest.get("scsi0").and_then(Value::as_str) == Some(supplied.as_str()), both);
    }
}

#[test]
fn test_purge_presence_agrees() {
    let without = VmDeleteOptions { vmid: 100, ..Default::default() };
    assert!(!command::vm_delete(&without).has_flag("purge"));
    assert!(!payload::vm_delete(&without).contains("purge"));

    let declined = VmDeleteOptions { vmid: 100, purge: Some(false), ..Default::default() };
    assert!(!command::vm_delete(&declined).has_flag("purge"));
    assert!(!payload::vm_delete(&declined).contains("purge"));

    let ct_declined = ContainerDeleteOptions { vmid: 200, purge: Some(false), ..Default::default() };
    assert!(!command::container_delete(&ct_declined).has_flag("purge"));
    assert!(!payload::container_delete(&ct_declined).contains("purge"));

    let with = VmDeleteOptions { vmid: 100, purge: Some(true), ..Default::default() };
    assert!(command::vm_delete(&with).has_flag("purge"));
    assert_eq!(payload::vm_delete(&with).get("purge"), Some(&json!(1)));

    let ct = ContainerDeleteOptions { vmid: 200, purge: Some(true), force: Some(true), ..Default::default() };
    assert!(command::container_delete(&ct).has_flag("purge"));
    assert_eq!(command::container_delete(&ct).flag_value("force"), Some("1"));
    assert_eq!(payload::container_delete(&ct).get("force"), Some(&json!(1)));
}

#[test]
fn test_boolean_mapping_is_stable() {
    for flag in [true, false] {
        let mut opts = full_vm_create();
        opts.start = Some(flag);
        opts.onboot = Some(flag);
        opts.agent = Some(flag);

        let expected = if flag { "1" } else { "0" };
        for _ in 0..2 {
            let cmd = command::vm_create(&opts);
            let body = payload::vm_create(&opts);
            for key in ["start", "onboot", "agent"] {
                assert_eq!(cmd.flag_value(key), Some(expected));
                assert_eq!(body.get(key), Some(&json!(u8::from(flag))));
            }
        }
    }
}

#[test]
fn test_clone_full_flag() {
    let mut opts = VmCloneOptions {
        vmid: 9000,
        newid: 150,
        name: Some("clone".to_string()),
        target: Some("pve2".to_string()),
        full: Some(true),
        ..Default::default()
    };

    let cmd = command::vm_clone(&opts);
    let body = payload::vm_clone(&opts);
    assert_eq!(shell_keys(&cmd), rest_keys(&body));
    assert!(cmd.has_flag("full"));
    assert_eq!(cmd.flag_value("full"), None);
    assert_eq!(body.get("full"), Some(&json!(1)));
    assert_eq!(body.get("newid"), Some(&json!(150)));

    opts.full = Some(false);
    assert!(!command::vm_clone(&opts).has_flag("full"));
    assert_eq!(payload::vm_clone(&opts).get("full"), Some(&json!(0)));
}

#[test]
fn test_shutdown_tables_agree() {
    let opts = ShutdownOptions { timeout: Some(120), force_stop: Some(true) };
    let cmd = command::shutdown(GuestKind::Vm, 100, &opts);
    let body = payload::shutdown(&opts);

    assert_eq!(shell_keys(&cmd), rest_keys(&body));
    assert_same_values(&cmd, &body);
}

#[test]
fn test_snapshot_tables_agree() {
    let mut opts = SnapshotCreateOptions::new("nightly");
    opts.description = Some("scheduled".to_string());
    opts.vmstate = Some(true);

    for kind in [GuestKind::Vm, GuestKind::Container] {
        let cmd = command::snapshot_create(kind, 100, &opts);
        let body = payload::snapshot_create(kind, &opts);
        assert_eq!(shell_keys(&cmd), rest_keys(&body), "{kind}");
        assert_same_values(&cmd, &body);
        assert_eq!(body.get("snapname"), Some(&json!("nightly")));
    }
}

#[test]
fn test_known_keys_win_on_both_sides() {
    let opts = VmCreateOptions::new(100)
        .with_name("typed")
        .with_extra("name", "extra");

    assert_eq!(command::vm_create(&opts).flag_value("name"), Some("typed"));
    assert_eq!(payload::vm_create(&opts).get("name"), Some(&json!("typed")));
}

#[test]
fn test_positional_keys_win_on_both_sides() {
    let opts = VmCreateOptions::new(100).with_extra("vmid", 999);
    let cmd = command::vm_create(&opts);
    assert!(!cmd.has_flag("vmid"));
    assert_eq!(cmd.args(), ["create", "100"]);
    assert_eq!(payload::vm_create(&opts).get("vmid"), Some(&json!(100)));

    let clone = VmCloneOptions {
        vmid: 9000,
        newid: 150,
        extra: [("vmid".to_string(), json!(1)), ("newid".to_string(), json!(2))]
            .into_iter()
            .collect(),
        ..Default::default()
    };
    let cmd = command::vm_clone(&clone);
    let body = payload::vm_clone(&clone);
    assert_eq!(cmd.args(), ["clone", "9000", "150"]);
    assert!(cmd.flags().is_empty());
    assert!(!body.contains("vmid"));
    assert_eq!(body.get("newid"), Some(&json!(150)));
    assert_eq!(shell_keys(&cmd), rest_keys(&body));
}
