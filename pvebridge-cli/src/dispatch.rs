//! Maps subcommands onto router selections and transport calls.

use std::sync::Arc;

use anyhow::{Context, Result};
use pvebridge_transport::*;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::cli::{Command, CreateArgs, GuestAction, NodeAction, SnapshotAction, StorageAction};

/// What a subcommand produced.
#[derive(Debug)]
pub struct Report {
    pub value: Value,
    /// False when the cluster rejected a mutation.
    pub success: bool,
}

impl Report {
    fn data<T: Serialize>(data: T) -> Result<Self> {
        Ok(Self { value: serde_json::to_value(data)?, success: true })
    }

    fn outcome(outcome: OperationOutcome) -> Result<Self> {
        let success = outcome.success;
        Ok(Self { value: serde_json::to_value(outcome)?, success })
    }
}

/// Operation class of a subcommand.
pub fn operation_class(command: &Command) -> OperationClass {
    match command {
        Command::Vm { action } | Command::Ct { action } => match action {
            GuestAction::List { .. } | GuestAction::Get { .. } => OperationClass::Read,
            _ => OperationClass::Write,
        },
        Command::Node { .. } | Command::Storage { .. } => OperationClass::Read,
        Command::Snapshot { action } => match action {
            SnapshotAction::List { .. } => OperationClass::Read,
            _ => OperationClass::Snapshot,
        },
        Command::Exec { .. } => OperationClass::Config,
        Command::Api { method, .. } => match method.parse::<ApiMethod>() {
            Ok(ApiMethod::Get) => OperationClass::Read,
            _ => OperationClass::Write,
        },
    }
}

/// Runs subcommands against the routed backends.
pub struct Dispatcher {
    router: Router,
    preference: Option<BackendKind>,
    policy: DestructivePolicy,
    confirm: bool,
}

impl Dispatcher {
    pub fn new(
        router: Router,
        preference: Option<BackendKind>,
        policy: DestructivePolicy,
        confirm: bool,
    ) -> Self {
        Self { router, preference, policy, confirm }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn run(&self, command: &Command) -> Result<Report> {
        let class = operation_class(command);
        let transport = self.router.get_transport(self.preference, class)?;
        debug!(class = %class, backend = %transport.kind(), "Dispatching command");

        match command {
            Command::Vm { action } => self.guest(transport, GuestKind::Vm, action).await,
            Command::Ct { action } => self.guest(transport, GuestKind::Container, action).await,
            Command::Node { action } => match action {
                NodeAction::List => Report::data(transport.list_nodes().await?),
                NodeAction::Status { node } => Report::data(transport.get_node_status(node).await?),
            },
            Command::Storage { action } => match action {
                StorageAction::List { node } => {
                    Report::data(transport.list_storage(node.as_deref()).await?)
                }
            },
            Command::Snapshot { action } => self.snapshot(transport, action).await,
            Command::Exec { command } => {
                let output = transport.execute_command(&command.join(" ")).await?;
                let success = output.success;
                Ok(Report { value: serde_json::to_value(output)?, success })
            }
            Command::Api { method, path, data } => {
                let method: ApiMethod = method.parse()?;
                let payload = data
                    .as_deref()
                    .map(|d| serde_json::from_str::<Value>(d))
                    .transpose()
                    .context("--data is not valid JSON")?;
                Report::data(transport.api_request(method, path, payload).await?)
            }
        }
    }

    async fn guest(
        &self,
        transport: Arc<dyn Transport>,
        kind: GuestKind,
        action: &GuestAction,
    ) -> Result<Report> {
        let vm = kind == GuestKind::Vm;

        match action {
            GuestAction::List { node } => {
                if vm {
                    Report::data(transport.list_vms(node.as_deref()).await?)
                } else {
                    Report::data(transport.list_containers(node.as_deref()).await?)
                }
            }
            GuestAction::Get { vmid, node } => {
                if vm {
                    Report::data(transport.get_vm(node.as_deref(), *vmid).await?)
                } else {
                    Report::data(transport.get_container(node.as_deref(), *vmid).await?)
                }
            }
            GuestAction::Start { vmid, node } => Report::outcome(if vm {
                transport.start_vm(node.as_deref(), *vmid).await?
            } else {
                transport.start_container(node.as_deref(), *vmid).await?
            }),
            GuestAction::Stop { vmid, node } => Report::outcome(if vm {
                transport.stop_vm(node.as_deref(), *vmid).await?
            } else {
                transport.stop_container(node.as_deref(), *vmid).await?
            }),
            GuestAction::Shutdown { vmid, node, timeout, force_stop } => {
                let options = ShutdownOptions {
                    timeout: *timeout,
                    force_stop: force_stop.then_some(true),
                };
                Report::outcome(if vm {
                    transport.shutdown_vm(node.as_deref(), *vmid, &options).await?
                } else {
                    transport.shutdown_container(node.as_deref(), *vmid, &options).await?
                })
            }
            GuestAction::Reboot { vmid, node } => Report::outcome(if vm {
                transport.reboot_vm(node.as_deref(), *vmid).await?
            } else {
                transport.reboot_container(node.as_deref(), *vmid).await?
            }),
            GuestAction::Create(args) => {
                let extra = parse_params(&args.params)?;
                Report::outcome(if vm {
                    transport.create_vm(&vm_create_options(args, extra)).await?
                } else {
                    let options = container_create_options(args, extra)?;
                    transport.create_container(&options).await?
                })
            }
            GuestAction::Delete { vmid, node, purge, force } => {
                self.policy
                    .ensure_allowed(&format!("delete {} {}", kind, vmid), self.confirm)?;
                info!(vmid, kind = %kind, "Deleting guest");

                Report::outcome(if vm {
                    let options = VmDeleteOptions {
                        vmid: *vmid,
                        node: node.clone(),
                        purge: purge.then_some(true),
                        ..Default::default()
                    };
                    transport.delete_vm(&options).await?
                } else {
                    let options = ContainerDeleteOptions {
                        vmid: *vmid,
                        node: node.clone(),
                        purge: purge.then_some(true),
                        force: force.then_some(true),
                        ..Default::default()
                    };
                    transport.delete_container(&options).await?
                })
            }
            GuestAction::Clone { vmid, newid, node, name, target, storage, snapname, full } => {
                Report::outcome(if vm {
                    let options = VmCloneOptions {
                        vmid: *vmid,
                        newid: *newid,
                        node: node.clone(),
                        name: name.clone(),
                        target: target.clone(),
                        storage: storage.clone(),
                        snapname: snapname.clone(),
                        full: full.then_some(true),
                        ..Default::default()
                    };
                    transport.clone_vm(&options).await?
                } else {
                    let options = ContainerCloneOptions {
                        vmid: *vmid,
                        newid: *newid,
                        node: node.clone(),
                        hostname: name.clone(),
                        target: target.clone(),
                        storage: storage.clone(),
                        snapname: snapname.clone(),
                        full: full.then_some(true),
                        ..Default::default()
                    };
                    transport.clone_container(&options).await?
                })
            }
        }
    }

    async fn snapshot(&self, transport: Arc<dyn Transport>, action: &SnapshotAction) -> Result<Report> {
        let kind_of = |container: bool| if container { GuestKind::Container } else { GuestKind::Vm };

        match action {
            SnapshotAction::List { vmid, node, container } => Report::data(
                transport
                    .list_snapshots(kind_of(*container), node.as_deref(), *vmid)
                    .await?,
            ),
            SnapshotAction::Create { vmid, name, node, description, vmstate, container } => {
                let options = SnapshotCreateOptions {
                    name: name.clone(),
                    description: description.clone(),
                    vmstate: vmstate.then_some(true),
                    ..Default::default()
                };
                Report::outcome(
                    transport
                        .create_snapshot(kind_of(*container), node.as_deref(), *vmid, &options)
                        .await?,
                )
            }
            SnapshotAction::Delete { vmid, name, node, container } => {
                let kind = kind_of(*container);
                self.policy.ensure_allowed(
                    &format!("delete snapshot '{}' of {} {}", name, kind, vmid),
                    self.confirm,
                )?;
                Report::outcome(
                    transport
                        .delete_snapshot(kind, node.as_deref(), *vmid, name)
                        .await?,
                )
            }
            SnapshotAction::Rollback { vmid, name, node, container } => Report::outcome(
                transport
                    .rollback_snapshot(kind_of(*container), node.as_deref(), *vmid, name)
                    .await?,
            ),
        }
    }
}

/// Parse repeated `KEY=VALUE` parameters. Values that read as JSON scalars
/// (numbers, booleans) keep their type; anything else is a string.
fn parse_params(params: &[String]) -> Result<ExtraParams> {
    params
        .iter()
        .map(|param| {
            let (key, raw) = param
                .split_once('=')
                .with_context(|| format!("parameter '{}' is not KEY=VALUE", param))?;
            let value = match serde_json::from_str::<Value>(raw) {
                Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
                _ => Value::String(raw.to_string()),
            };
            Ok((key.trim().to_string(), value))
        })
        .collect()
}

fn vm_create_options(args: &CreateArgs, extra: ExtraParams) -> VmCreateOptions {
    VmCreateOptions {
        vmid: args.vmid,
        node: args.node.clone(),
        name: args.name.clone(),
        memory: args.memory,
        cores: args.cores,
        storage: args.storage.clone(),
        disk_size: args.disk_size.clone(),
        iso: args.iso.clone(),
        net: args.net.clone(),
        description: args.description.clone(),
        start: args.start,
        onboot: args.onboot,
        extra,
        ..Default::default()
    }
}

fn container_create_options(args: &CreateArgs, extra: ExtraParams) -> Result<ContainerCreateOptions> {
    let ostemplate = args
        .ostemplate
        .clone()
        .context("container create requires --ostemplate")?;

    Ok(ContainerCreateOptions {
        vmid: args.vmid,
        ostemplate,
        node: args.node.clone(),
        hostname: args.name.clone(),
        memory: args.memory,
        cores: args.cores,
        storage: args.storage.clone(),
        disk_size: args.disk_size.clone(),
        net: args.net.clone(),
        description: args.description.clone(),
        unprivileged: args.unprivileged,
        start: args.start,
        onboot: args.onboot,
        extra,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn dispatcher(confirm: bool, safe_mode: bool) -> (Arc<MockTransport>, Arc<MockTransport>, Dispatcher) {
        let vm = VmRecord {
            vmid: 100,
            name: "web".to_string(),
            node: "pve1".to_string(),
            status: VmStatus::Running,
            ..Default::default()
        };
        let ssh = Arc::new(MockTransport::new(BackendKind::Ssh).with_vm(vm.clone()));
        let api = Arc::new(MockTransport::new(BackendKind::Api).with_vm(vm));
        let router = Router::from_backends(
            Some(ssh.clone() as Arc<dyn Transport>),
            Some(api.clone() as Arc<dyn Transport>),
        )
        .unwrap();
        router.connect().await.unwrap();

        let dispatcher = Dispatcher::new(router, None, DestructivePolicy::new(safe_mode), confirm);
        (ssh, api, dispatcher)
    }

    fn vm(action: GuestAction) -> Command {
        Command::Vm { action }
    }

    fn delete_100() -> Command {
        vm(GuestAction::Delete { vmid: 100, node: None, purge: false, force: false })
    }

    #[tokio::test]
    async fn test_delete_without_confirm_never_reaches_backend() {
        let (ssh, api, dispatcher) = dispatcher(false, false).await;

        let err = dispatcher.run(&delete_100()).await.unwrap_err();
        assert!(err.to_string().contains("requires explicit confirmation"));
        assert!(!ssh.was_called("delete_vm"));
        assert!(!api.was_called("delete_vm"));
    }

    #[tokio::test]
    async fn test_safe_mode_blocks_confirmed_delete() {
        let (ssh, api, dispatcher) = dispatcher(true, true).await;

        let err = dispatcher.run(&delete_100()).await.unwrap_err();
        assert!(err.to_string().contains("safe mode"));
        assert!(api.calls().is_empty());
        assert!(ssh.calls().is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_delete_goes_to_write_backend() {
        let (ssh, api, dispatcher) = dispatcher(true, false).await;

        let report = dispatcher.run(&delete_100()).await.unwrap();
        assert!(report.success);
        assert!(api.was_called("delete_vm 100"));
        assert!(!ssh.was_called("delete_vm"));
    }

    #[tokio::test]
    async fn test_snapshot_delete_is_gated() {
        let (ssh, _, dispatcher) = dispatcher(false, false).await;
        let command = Command::Snapshot {
            action: SnapshotAction::Delete {
                vmid: 100,
                name: "snap1".to_string(),
                node: None,
                container: false,
            },
        };

        assert!(dispatcher.run(&command).await.is_err());
        assert!(!ssh.was_called("delete_snapshot"));
    }

    #[tokio::test]
    async fn test_failed_outcome_is_reported_not_thrown() {
        let (_, _, dispatcher) = dispatcher(false, false).await;

        let report = dispatcher
            .run(&vm(GuestAction::Start { vmid: 100, node: None }))
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.value["success"], json!(false));
    }

    #[tokio::test]
    async fn test_create_passes_params_through() {
        let (_, api, dispatcher) = dispatcher(false, false).await;
        let args = CreateArgs {
            vmid: 110,
            name: Some("new".to_string()),
            params: vec!["balloon=512".to_string(), "tags=a;b".to_string()],
            ..Default::default()
        };

        let report = dispatcher.run(&vm(GuestAction::Create(args))).await.unwrap();
        assert!(report.success);
        assert!(api.was_called("create_vm 110"));
    }

    #[tokio::test]
    async fn test_container_create_requires_template() {
        let (_, api, dispatcher) = dispatcher(false, false).await;
        let command = Command::Ct { action: GuestAction::Create(CreateArgs { vmid: 300, ..Default::default() }) };

        assert!(dispatcher.run(&command).await.is_err());
        assert!(!api.was_called("create_container"));
    }

    #[test]
    fn test_operation_classes() {
        assert_eq!(operation_class(&vm(GuestAction::List { node: None })), OperationClass::Read);
        assert_eq!(operation_class(&delete_100()), OperationClass::Write);
        assert_eq!(
            operation_class(&Command::Exec { command: vec!["uptime".to_string()] }),
            OperationClass::Config
        );
        assert_eq!(
            operation_class(&Command::Api {
                method: "post".to_string(),
                path: "/nodes/pve1/qemu".to_string(),
                data: None
            }),
            OperationClass::Write
        );
    }

    #[test]
    fn test_parse_params() {
        let params = parse_params(&[
            "balloon=512".to_string(),
            "numa=true".to_string(),
            "tags=web;prod".to_string(),
        ])
        .unwrap();
        assert_eq!(params["balloon"], json!(512));
        assert_eq!(params["numa"], json!(true));
        assert_eq!(params["tags"], json!("web;prod"));

        assert!(parse_params(&["novalue".to_string()]).is_err());
    }
}
