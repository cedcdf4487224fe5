//! Validation errors for user-supplied proxy configuration.

use thiserror::Error;

/// Errors raised when proxy configuration fails validation at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Proxy host is empty after trimming.
    #[error("proxy host must not be empty")]
    EmptyHost,

    /// Proxy host contains characters that cannot appear in a host name.
    #[error("invalid proxy host: {0}")]
    InvalidHost(String),

    /// Port is not a number in 1-65535.
    #[error("invalid proxy port: {0}")]
    InvalidPort(String),

    /// Whitelist entry is not an exact host or a `*.domain` pattern.
    #[error("invalid whitelist pattern: {0}")]
    InvalidPattern(String),
}

/// Result type for configuration validation.
pub type Result<T> = std::result::Result<T, ConfigError>;
