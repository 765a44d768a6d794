//! Central error types for the Gaudi-K8s operator
//!
//! Uses `thiserror` for ergonomic, type-safe error handling with
//! automatic `Display` and `Error` trait implementations.

use thiserror::Error;

/// Central error type for the Gaudi-K8s operator
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error from kube-rs
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Two DeviceConfigs resolve to overlapping node sets
    #[error("conflicting DeviceConfig NodeSelectors found for resource: {0}")]
    ConflictingNodeSelectors(String),
}

/// Result type alias for operator operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Check if this error type should trigger a fast retry
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::KubeError(_))
    }
}
