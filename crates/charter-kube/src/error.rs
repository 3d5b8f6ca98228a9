//! Error types for charter-kube

use thiserror::Error;

/// Result type for charter-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while building contexts or running release actions
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Kubeconfig could not be read or resolved
    #[error("cannot load kubeconfig {path}: {message}")]
    Kubeconfig { path: String, message: String },

    /// Namespace is not a valid DNS-1123 label
    #[error("invalid namespace '{namespace}': {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    /// Release name is not usable as a release identifier
    #[error("invalid release name '{name}': {reason}")]
    InvalidReleaseName { name: String, reason: String },

    /// Release not found
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// Release already exists
    #[error("release '{name}' already exists in namespace '{namespace}'")]
    ReleaseAlreadyExists { name: String, namespace: String },

    /// Another operation is in progress
    #[error("another operation is in progress for release '{name}': {status}")]
    OperationInProgress { name: String, status: String },

    /// Applying or deleting the manifest failed for some resources
    #[error("{action} failed for {count} resource(s): {details}")]
    ResourcesFailed {
        action: String,
        count: usize,
        details: String,
    },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Release data too large for a single Secret
    #[error("release data too large ({size} bytes, max {max} bytes)")]
    ReleaseTooLarge { size: usize, max: usize },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Manifest rendering error
    #[error("render error: {0}")]
    Render(String),

    /// Chart error
    #[error("chart error: {0}")]
    Chart(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<charter_core::CoreError> for KubeError {
    fn from(e: charter_core::CoreError) -> Self {
        KubeError::Chart(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}
