//! Error types for proxy control.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use socksgate_core::ConfigError;
use socksgate_storage::StorageError;
use thiserror::Error;

/// Coarse classification used for notifications and API status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfig,
    HostServiceError,
    ProxyApplyMismatch,
    StorageUnavailable,
    ConnectionFailure,
    ServiceUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfig => "invalid_config",
            Self::HostServiceError => "host_service_error",
            Self::ProxyApplyMismatch => "proxy_apply_mismatch",
            Self::StorageUnavailable => "storage_unavailable",
            Self::ConnectionFailure => "connection_failure",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// User input failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The host proxy service refused or failed a request.
    #[error("Host proxy service error: {0}")]
    HostService(String),

    /// The host proxy service did not answer in time.
    #[error("Host proxy service timed out after {0:?}")]
    Timeout(Duration),

    /// The host reports a different configuration than the one just applied.
    #[error("Proxy settings mismatch: expected {expected}, host reports {actual}")]
    ApplyMismatch { expected: String, actual: String },

    /// Persisted settings could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Traffic cannot reach the upstream proxy.
    #[error("Proxy connection failed: {0}")]
    ConnectionFailure(String),

    /// The proxy service task is gone.
    #[error("Proxy service is not running")]
    ServiceUnavailable,
}

impl ProxyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::HostService(_) | Self::Timeout(_) => ErrorKind::HostServiceError,
            Self::ApplyMismatch { .. } => ErrorKind::ProxyApplyMismatch,
            Self::Storage(_) => ErrorKind::StorageUnavailable,
            Self::ConnectionFailure(_) => ErrorKind::ConnectionFailure,
            Self::ServiceUnavailable => ErrorKind::ServiceUnavailable,
        }
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
