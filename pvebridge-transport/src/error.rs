//! Error types for the transport layer.

use thiserror::Error;

/// Errors that can occur while talking to the cluster.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Backend unreachable or authentication rejected.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The backend was used before `connect()` succeeded.
    #[error("{0} backend is not connected")]
    NotConnected(&'static str),

    /// The cluster ran the request but reported failure
    /// (non-zero exit status or HTTP error status).
    #[error("Command failed: {0}")]
    Command(String),

    /// Raw primitive invoked on the backend that does not speak it.
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(String),

    /// No usable backend, or a preference naming a backend that was never configured.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Caller supplied arguments that cannot be turned into a request.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Output or response body could not be parsed.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The request did not complete within the configured timeout.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
