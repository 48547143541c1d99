//! # pvebridge Transport
//!
//! Dual-transport access to a Proxmox VE cluster behind one operation contract.
//!
//! Two interchangeable backends implement [`Transport`]:
//! - **Shell** - a persistent SSH session running `qm`, `pct` and `pvesh`
//! - **REST** - token-authenticated HTTPS against `/api2/json`
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────┐
//!                │            Router            │
//!                │ preference + operation class │
//!                └──────────────┬───────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │        Transport Trait       │
//!                │ (list_vms, start_vm, ...)    │
//!                └──────────────┬───────────────┘
//!                               │
//!             ┌─────────────────┴─────────────────┐
//!             ▼                                   ▼
//!   ┌───────────────────┐               ┌───────────────────┐
//!   │   ShellBackend    │               │    RestBackend    │
//!   │  (russh session)  │               │     (reqwest)     │
//!   └───────────────────┘               └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pvebridge_transport::{ClusterConfig, OperationClass, Router};
//!
//! #[tokio::main]
//! async fn main() -> pvebridge_transport::Result<()> {
//!     let config: ClusterConfig = serde_yaml::from_str(CONFIG)?;
//!     let router = Router::new(&config)?;
//!     router.connect().await?;
//!
//!     let transport = router.get_transport(None, OperationClass::Read)?;
//!     for vm in transport.list_vms(None).await? {
//!         println!("{} {} {:?}", vm.vmid, vm.name, vm.status);
//!     }
//!
//!     router.disconnect().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod guard;
pub mod mock;
pub mod rest;
pub mod router;
pub mod shell;
pub mod traits;
pub mod types;

pub use config::{ApiConfig, ClusterConfig, SshAuth, SshConfig};
pub use error::{Result, TransportError};
pub use guard::DestructivePolicy;
pub use mock::MockTransport;
pub use rest::RestBackend;
pub use router::{OperationClass, Router};
pub use shell::{ShellBackend, ShellSession};
pub use traits::{ApiMethod, BackendKind, CommandOutput, Transport};
pub use types::*;
