//! REST backend: token-authenticated HTTPS against `/api2/json`.
//!
//! Every response carries its payload under a `data` key, which is unwrapped
//! before anything else looks at it. Mutating endpoints answer with a task
//! identifier string.

pub mod payload;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::ApiConfig;
use crate::error::{Result, TransportError};
use crate::traits::{first_node, outcome_from, ApiMethod, BackendKind, CommandOutput, Transport};
use crate::types::*;

use self::payload::Payload;

/// REST backend.
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    connected: AtomicBool,
}

impl RestBackend {
    /// Create a backend for `https://<host>:<port>/api2/json`.
    pub fn new(config: &ApiConfig, timeout: Duration) -> Result<Self> {
        Self::with_base_url(config.base_url(), config, timeout)
    }

    /// Create a backend against an explicit base URL (local test servers).
    pub fn with_base_url(
        base_url: impl Into<String>,
        config: &ApiConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let mut authorization = HeaderValue::from_str(&config.authorization()).map_err(|_| {
            TransportError::Configuration("API token contains invalid header characters".to_string())
        })?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| TransportError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            connected: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected("api"))
        }
    }

    /// Issue one request and unwrap the `data` envelope.
    async fn send(&self, method: ApiMethod, path: &str, payload: Option<Value>) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(method = %method, url = %url, "Sending API request");

        let mut request = self.client.request(http_method(method), &url);
        if let Some(payload) = payload {
            request = match method {
                ApiMethod::Get => request.query(&query_pairs(&payload)?),
                _ => request.json(&payload),
            };
        }

        let response = request.send().await.map_err(|e| self.map_reqwest_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_reqwest_error(e))?;

        if !status.is_success() {
            let detail = match body.trim() {
                "" => status.canonical_reason().unwrap_or("no response body").to_string(),
                trimmed => trimmed.to_string(),
            };
            warn!(status = status.as_u16(), url = %url, "API request rejected");
            return Err(TransportError::Command(format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        unwrap_data(&body)
    }

    async fn request(&self, method: ApiMethod, path: &str, payload: Option<Value>) -> Result<Value> {
        self.ensure_connected()?;
        self.send(method, path, payload).await
    }

    async fn get_list(&self, path: &str, what: &str) -> Result<Vec<Value>> {
        match self.request(ApiMethod::Get, path, None).await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            _ => Err(TransportError::Parse(format!("expected a list of {}", what))),
        }
    }

    /// Send a mutating request; a rejected request becomes a failed outcome.
    async fn mutate(
        &self,
        method: ApiMethod,
        path: &str,
        payload: Payload,
        target: impl FnOnce() -> String,
    ) -> Result<OperationOutcome> {
        let result = self
            .request(method, path, payload.into_body())
            .await
            .map(|data| match data {
                Value::String(upid) => OperationOutcome::with_task(upid),
                _ => OperationOutcome::ok(),
            });
        outcome_from(result, target)
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

    /// `/nodes/{node}/{qemu|lxc}/{vmid}`, resolving the node first.
    async fn guest_path(&self, kind: GuestKind, node: Option<&str>, vmid: u32) -> Result<String> {
        let node = self.resolve_node(node).await?;
        Ok(format!(
            "/nodes/{}/{}/{}",
            urlencoding::encode(&node),
            kind.api_segment(),
            vmid
        ))
    }

    async fn guest_status_action(
        &self,
        kind: GuestKind,
        node: Option<&str>,
        vmid: u32,
        action: &str,
        payload: Payload,
    ) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let path = format!("{}/status/{}", self.guest_path(kind, node, vmid).await?, action);
        self.mutate(ApiMethod::Post, &path, payload, guest_target(kind, action, vmid))
            .await
    }

    async fn create_guest(
        &self,
        kind: GuestKind,
        node: Option<&str>,
        vmid: u32,
        payload: Payload,
    ) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let node = self.resolve_node(node).await?;
        let path = format!("/nodes/{}/{}", urlencoding::encode(&node), kind.api_segment());
        self.mutate(ApiMethod::Post, &path, payload, guest_target(kind, "create", vmid))
            .await
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout.as_secs())
        } else if e.is_decode() {
            TransportError::Parse(e.to_string())
        } else {
            TransportError::Connection(e.to_string())
        }
    }
}

fn guest_target(kind: GuestKind, action: &str, vmid: u32) -> impl FnOnce() -> String + '_ {
    move || format!("{} {} {}", action, kind, vmid)
}

fn http_method(method: ApiMethod) -> Method {
    match method {
        ApiMethod::Get => Method::GET,
        ApiMethod::Post => Method::POST,
        ApiMethod::Put => Method::PUT,
        ApiMethod::Delete => Method::DELETE,
    }
}

/// Flatten a JSON object into query parameters.
fn query_pairs(payload: &Value) -> Result<Vec<(String, String)>> {
    let Value::Object(map) = payload else {
        return Err(TransportError::InvalidArgument(
            "GET parameters must be a JSON object".to_string(),
        ));
    };

    Ok(map
        .iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::Null => return None,
                Value::Bool(b) => u8::from(*b).to_string(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), rendered))
        })
        .collect())
}

fn unwrap_data(body: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TransportError::Parse(format!("invalid JSON response: {}", e)))?;

    match value {
        Value::Object(mut map) => map
            .remove("data")
            .ok_or_else(|| TransportError::Parse("response has no data envelope".to_string())),
        _ => Err(TransportError::Parse("response is not a JSON object".to_string())),
    }
}

#[async_trait]
impl Transport for RestBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Api
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let version = self
            .send(ApiMethod::Get, "/version", None)
            .await
            .map_err(|e| match e {
                TransportError::Timeout(_) | TransportError::Connection(_) => e,
                other => TransportError::Connection(format!("API probe failed: {}", other)),
            })?;

        self.connected.store(true, Ordering::SeqCst);
        let version = version
            .get("version")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        info!(version, "REST backend connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(base_url = %self.base_url, "REST backend disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute_command(&self, command: &str) -> Result<CommandOutput> {
        Err(TransportError::Unsupported(format!(
            "raw command '{}' on the api backend",
            command
        )))
    }

    #[instrument(skip(self, payload))]
    async fn api_request(
        &self,
        method: ApiMethod,
        path: &str,
        payload: Option<Value>,
    ) -> Result<Value> {
        self.request(method, path, payload).await
    }

    // =========================================================================
    // Virtual Machines
    // =========================================================================

    #[instrument(skip(self))]
    async fn list_vms(&self, node: Option<&str>) -> Result<Vec<VmRecord>> {
        self.ensure_connected()?;
        let node = self.resolve_node(node).await?;
        let path = format!("/nodes/{}/qemu", urlencoding::encode(&node));
        let items = self.get_list(&path, "VMs").await?;
        Ok(map_list(&items, "VM", |item| VmRecord::from_json(item, &node, None)))
    }

    #[instrument(skip(self))]
    async fn get_vm(&self, node: Option<&str>, vmid: u32) -> Result<VmRecord> {
        self.ensure_connected()?;
        let node = self.resolve_node(node).await?;
        let path = format!("/nodes/{}/qemu/{}/status/current", urlencoding::encode(&node), vmid);
        let status = self.request(ApiMethod::Get, &path, None).await?;
        VmRecord::from_json(&status, &node, Some(vmid))
            .ok_or_else(|| TransportError::Parse(format!("no status for VM {}", vmid)))
    }

    async fn start_vm(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.guest_status_action(GuestKind::Vm, node, vmid, "start", Payload::new())
            .await
    }

    async fn stop_vm(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.guest_status_action(GuestKind::Vm, node, vmid, "stop", Payload::new())
            .await
    }

    async fn shutdown_vm(
        &self,
        node: Option<&str>,
        vmid: u32,
        options: &ShutdownOptions,
    ) -> Result<OperationOutcome> {
        self.guest_status_action(GuestKind::Vm, node, vmid, "shutdown", payload::shutdown(options))
            .await
    }

    async fn reboot_vm(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.guest_status_action(GuestKind::Vm, node, vmid, "reboot", Payload::new())
            .await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid))]
    async fn create_vm(&self, options: &VmCreateOptions) -> Result<OperationOutcome> {
        self.create_guest(
            GuestKind::Vm,
            options.node.as_deref(),
            options.vmid,
            payload::vm_create(options),
        )
        .await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid))]
    async fn delete_vm(&self, options: &VmDeleteOptions) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let path = self
            .guest_path(GuestKind::Vm, options.node.as_deref(), options.vmid)
            .await?;
        self.mutate(
            ApiMethod::Delete,
            &path,
            payload::vm_delete(options),
            guest_target(GuestKind::Vm, "delete", options.vmid),
        )
        .await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid, newid = options.newid))]
    async fn clone_vm(&self, options: &VmCloneOptions) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let path = self
            .guest_path(GuestKind::Vm, options.node.as_deref(), options.vmid)
            .await?;
        self.mutate(
            ApiMethod::Post,
            &format!("{}/clone", path),
            payload::vm_clone(options),
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
        let node = self.resolve_node(node).await?;
        let path = format!("/nodes/{}/lxc", urlencoding::encode(&node));
        let items = self.get_list(&path, "containers").await?;
        Ok(map_list(&items, "container", |item| {
            ContainerRecord::from_json(item, &node, None)
        }))
    }

    #[instrument(skip(self))]
    async fn get_container(&self, node: Option<&str>, vmid: u32) -> Result<ContainerRecord> {
        self.ensure_connected()?;
        let node = self.resolve_node(node).await?;
        let path = format!("/nodes/{}/lxc/{}/status/current", urlencoding::encode(&node), vmid);
        let status = self.request(ApiMethod::Get, &path, None).await?;
        ContainerRecord::from_json(&status, &node, Some(vmid))
            .ok_or_else(|| TransportError::Parse(format!("no status for container {}", vmid)))
    }

    async fn start_container(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.guest_status_action(GuestKind::Container, node, vmid, "start", Payload::new())
            .await
    }

    async fn stop_container(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.guest_status_action(GuestKind::Container, node, vmid, "stop", Payload::new())
            .await
    }

    async fn shutdown_container(
        &self,
        node: Option<&str>,
        vmid: u32,
        options: &ShutdownOptions,
    ) -> Result<OperationOutcome> {
        self.guest_status_action(
            GuestKind::Container,
            node,
            vmid,
            "shutdown",
            payload::shutdown(options),
        )
        .await
    }

    async fn reboot_container(&self, node: Option<&str>, vmid: u32) -> Result<OperationOutcome> {
        self.guest_status_action(GuestKind::Container, node, vmid, "reboot", Payload::new())
            .await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid))]
    async fn create_container(&self, options: &ContainerCreateOptions) -> Result<OperationOutcome> {
        if options.ostemplate.trim().is_empty() {
            return Err(TransportError::InvalidArgument(
                "container create requires an ostemplate".to_string(),
            ));
        }
        self.create_guest(
            GuestKind::Container,
            options.node.as_deref(),
            options.vmid,
            payload::container_create(options),
        )
        .await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid))]
    async fn delete_container(&self, options: &ContainerDeleteOptions) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let path = self
            .guest_path(GuestKind::Container, options.node.as_deref(), options.vmid)
            .await?;
        self.mutate(
            ApiMethod::Delete,
            &path,
            payload::container_delete(options),
            guest_target(GuestKind::Container, "delete", options.vmid),
        )
        .await
    }

    #[instrument(skip(self, options), fields(vmid = options.vmid, newid = options.newid))]
    async fn clone_container(&self, options: &ContainerCloneOptions) -> Result<OperationOutcome> {
        self.ensure_connected()?;
        let path = self
            .guest_path(GuestKind::Container, options.node.as_deref(), options.vmid)
            .await?;
        self.mutate(
            ApiMethod::Post,
            &format!("{}/clone", path),
            payload::container_clone(options),
            guest_target(GuestKind::Container, "clone", options.vmid),
        )
        .await
    }

    // =========================================================================
    // Nodes & Storage
    // =========================================================================

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let items = self.get_list("/nodes", "nodes").await?;
        Ok(map_list(&items, "node", NodeRecord::from_json))
    }

    #[instrument(skip(self))]
    async fn get_node_status(&self, node: &str) -> Result<NodeRecord> {
        let path = format!("/nodes/{}/status", urlencoding::encode(node));
        let status = self.request(ApiMethod::Get, &path, None).await?;
        Ok(NodeRecord::from_status_json(node, &status))
    }

    #[instrument(skip(self))]
    async fn list_storage(&self, node: Option<&str>) -> Result<Vec<StorageRecord>> {
        self.ensure_connected()?;
        let node = self.resolve_node(node).await?;
        let path = format!("/nodes/{}/storage", urlencoding::encode(&node));
        let items = self.get_list(&path, "storage").await?;
        Ok(map_list(&items, "storage", StorageRecord::from_json))
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
        let path = format!("{}/snapshot", self.guest_path(kind, node, vmid).await?);
        match self.request(ApiMethod::Get, &path, None).await? {
            Value::Array(items) => Ok(SnapshotRecord::list_from_json(&items)),
            _ => {
                warn!(vmid, "Unexpected snapshot listing, treating as empty");
                Ok(Vec::new())
            }
        }
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
        let path = format!("{}/snapshot", self.guest_path(kind, node, vmid).await?);
        self.mutate(
            ApiMethod::Post,
            &path,
            payload::snapshot_create(kind, options),
            guest_target(kind, "snapshot", vmid),
        )
        .await
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
        let path = format!(
            "{}/snapshot/{}",
            self.guest_path(kind, node, vmid).await?,
            urlencoding::encode(name)
        );
        self.mutate(
            ApiMethod::Delete,
            &path,
            Payload::new(),
            guest_target(kind, "delete snapshot of", vmid),
        )
        .await
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
        let path = format!(
            "{}/snapshot/{}/rollback",
            self.guest_path(kind, node, vmid).await?,
            urlencoding::encode(name)
        );
        self.mutate(
            ApiMethod::Post,
            &path,
            Payload::new(),
            guest_target(kind, "rollback", vmid),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_data_envelope() {
        assert_eq!(unwrap_data(r#"{"data":{"version":"8.1"}}"#).unwrap(), json!({"version": "8.1"}));
        assert_eq!(unwrap_data(r#"{"data":null}"#).unwrap(), Value::Null);
        assert!(matches!(unwrap_data(r#"{"errors":{}}"#), Err(TransportError::Parse(_))));
        assert!(matches!(unwrap_data("<html>"), Err(TransportError::Parse(_))));
    }

    #[test]
    fn test_query_pairs_render_scalars() {
        let mut pairs = query_pairs(&json!({"full": true, "type": "vm", "limit": 5, "skip": null})).unwrap();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("full".to_string(), "1".to_string()),
                ("limit".to_string(), "5".to_string()),
                ("type".to_string(), "vm".to_string()),
            ]
        );
        assert!(query_pairs(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = ApiConfig {
            host: "pve".to_string(),
            token_id: "root@pam!t".to_string(),
            token_secret: "s".to_string(),
            ..Default::default()
        };
        let backend = RestBackend::with_base_url("http://127.0.0.1:1/api2/json/", &config, Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url(), "http://127.0.0.1:1/api2/json");
        assert!(!backend.is_connected());
    }

    #[tokio::test]
    async fn test_execute_command_is_unsupported() {
        let config = ApiConfig::default();
        let backend = RestBackend::with_base_url("http://127.0.0.1:1", &config, Duration::from_secs(1)).unwrap();
        let err = backend.execute_command("qm list").await.unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_calls_before_connect_fail() {
        let config = ApiConfig::default();
        let backend = RestBackend::with_base_url("http://127.0.0.1:1", &config, Duration::from_secs(1)).unwrap();
        let err = backend.list_nodes().await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected("api")));
    }
}
