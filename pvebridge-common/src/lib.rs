//! # pvebridge Common
//!
//! Shared utilities for the pvebridge crates.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use pvebridge_common::init_logging;
//!
//! init_logging("info").unwrap();
//! tracing::info!(node = "pve1", "Connected");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
