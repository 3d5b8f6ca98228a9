//! Error types for repository operations

use thiserror::Error;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Repository File Errors ============
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Invalid repository URL: {url} - {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("Cannot read repository file {path}: {message}")]
    RepositoryFile { path: String, message: String },

    #[error("Cannot lock repository file {path}: {message}")]
    Lock { path: String, message: String },

    // ============ Network Errors ============
    #[error("{url:?} is not a valid chart repository or cannot be reached: {message}")]
    RepositoryUnreachable {
        name: String,
        url: String,
        message: String,
    },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limited by server. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("TLS configuration error: {message}")]
    Tls { message: String },

    // ============ Authentication Errors ============
    #[error("Authentication required for {url}")]
    AuthRequired { url: String },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    // ============ Index Errors ============
    #[error("Index parse error: {message}")]
    IndexParseError { message: String },

    // ============ Chart Errors ============
    #[error("Invalid chart reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Chart not found: {name} in repository {repo}")]
    ChartNotFound { name: String, repo: String },

    #[error("Version not found: {name}@{version} in repository {repo}")]
    VersionNotFound {
        name: String,
        version: String,
        repo: String,
    },

    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    // ============ Dependency Errors ============
    #[error("Dependency resolution failed: {message}")]
    ResolutionFailed { message: String },

    #[error("No version of {name} satisfies constraint {constraint} (available: {available})")]
    UnsatisfiableConstraint {
        name: String,
        constraint: String,
        available: String,
    },

    #[error("Cannot update dependencies of packaged chart {path}: {missing}")]
    PackagedChart { path: String, missing: String },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Chart error: {0}")]
    Core(#[from] charter_core::CoreError),
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        RepoError::NetworkError {
            message: e.to_string(),
        }
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<semver::Error> for RepoError {
    fn from(e: semver::Error) -> Self {
        RepoError::ResolutionFailed {
            message: format!("Invalid version: {}", e),
        }
    }
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;
