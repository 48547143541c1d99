//! Gate for destructive operations.
//!
//! Backends delete whatever they are asked to delete. Callers run
//! [`DestructivePolicy::ensure_allowed`] before every `delete_*` call:
//! the call is allowed only with an explicit confirmation, and never while
//! the cluster is in safe mode.

use tracing::warn;

use crate::error::{Result, TransportError};

/// Cluster-wide policy for destructive operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestructivePolicy {
    pub safe_mode: bool,
}

impl DestructivePolicy {
    pub fn new(safe_mode: bool) -> Self {
        Self { safe_mode }
    }

    /// Check that `operation` may proceed.
    pub fn ensure_allowed(&self, operation: &str, confirm: bool) -> Result<()> {
        if self.safe_mode {
            warn!(operation, "Destructive operation blocked by safe mode");
            return Err(TransportError::InvalidArgument(format!(
                "{} refused: safe mode is active",
                operation
            )));
        }
        if !confirm {
            warn!(operation, "Destructive operation attempted without confirmation");
            return Err(TransportError::InvalidArgument(format!(
                "{} requires explicit confirmation (confirm=true)",
                operation
            )));
        }
        Ok(())
    }
}
