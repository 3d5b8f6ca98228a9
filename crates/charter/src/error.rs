//! Error taxonomy of the chart and release workflow
//!
//! Every variant names the chart, release, namespace or path the failure
//! belongs to, so callers can decide whether a retry makes sense.

use miette::Diagnostic;
use thiserror::Error;

use charter_repo::RepoError;

/// Result type for charter operations
pub type Result<T> = std::result::Result<T, ChartError>;

/// Hint attached to chart lookups that fail against repositories
pub const STALE_INDEX_HINT: &str =
    "the repository index may be stale; refresh your repositories and try again";

#[derive(Error, Debug, Diagnostic)]
pub enum ChartError {
    /// Local configuration is unusable: settings, execution context, repository URL or TLS files
    #[error("configuration error: {message}")]
    #[diagnostic(code(charter::configuration))]
    Configuration { message: String },

    /// A repository index could not be downloaded
    #[error("repository {name:?} at {url} is unreachable: {message}")]
    #[diagnostic(
        code(charter::repository_unreachable),
        help("check the repository URL and your network access")
    )]
    RepositoryUnreachable {
        name: String,
        url: String,
        message: String,
    },

    /// The local repository file is unreadable or malformed
    #[error("repository file {path}: {message}")]
    #[diagnostic(code(charter::repository))]
    Repository { path: String, message: String },

    #[error("can't locate chart `{name}-{version}`: {message}")]
    #[diagnostic(code(charter::chart_not_found))]
    ChartNotFound {
        name: String,
        version: String,
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("cannot load chart from {path}: {message}")]
    #[diagnostic(code(charter::load))]
    Load { path: String, message: String },

    #[error("dependencies of chart {chart:?} are not satisfied: {message}")]
    #[diagnostic(
        code(charter::dependency),
        help("check the dependencies declared in Chart.yaml and the repositories they reference")
    )]
    Dependency { chart: String, message: String },

    #[error("chart {name:?} has type {chart_type:?} and is not installable")]
    #[diagnostic(
        code(charter::not_installable),
        help("only application charts can be installed; library charts are used as dependencies")
    )]
    NotInstallable { name: String, chart_type: String },

    #[error("failed to install chart {chart:?} as release {release:?}: {message}")]
    #[diagnostic(code(charter::install))]
    Install {
        chart: String,
        release: String,
        message: String,
    },

    #[error("failed to upgrade release {release:?} with chart {chart:?}: {message}")]
    #[diagnostic(code(charter::upgrade))]
    Upgrade {
        chart: String,
        release: String,
        message: String,
    },

    #[error("failed to uninstall release {release:?} in namespace {namespace:?}: {message}")]
    #[diagnostic(code(charter::uninstall))]
    Uninstall {
        release: String,
        namespace: String,
        message: String,
    },

    #[error("failed to list releases in namespace {namespace:?}: {message}")]
    #[diagnostic(code(charter::list))]
    List { namespace: String, message: String },
}

impl ChartError {
    /// Classify a repository error raised while managing `repository_config`
    pub(crate) fn from_repo(err: RepoError, repository_config: &std::path::Path) -> Self {
        match err {
            RepoError::RepositoryUnreachable { name, url, message } => {
                ChartError::RepositoryUnreachable { name, url, message }
            }
            local @ (RepoError::InvalidRepositoryUrl { .. } | RepoError::Tls { .. }) => {
                ChartError::configuration(local.to_string())
            }
            other => ChartError::Repository {
                path: repository_config.display().to_string(),
                message: other.to_string(),
            },
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ChartError::Configuration {
            message: message.into(),
        }
    }

    pub fn is_chart_not_found(&self) -> bool {
        matches!(self, ChartError::ChartNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_not_found_carries_hint() {
        let err = ChartError::ChartNotFound {
            name: "stable/app".to_string(),
            version: "1.2.0".to_string(),
            message: "Version not found".to_string(),
            help: Some(STALE_INDEX_HINT.to_string()),
        };
        assert_eq!(
            err.to_string(),
            "can't locate chart `stable/app-1.2.0`: Version not found"
        );
        assert_eq!(err.help().map(|h| h.to_string()), Some(STALE_INDEX_HINT.to_string()));
        assert_eq!(
            err.code().map(|c| c.to_string()),
            Some("charter::chart_not_found".to_string())
        );
    }

    #[test]
    fn test_from_repo_distinguishes_unreachable() {
        let path = std::path::Path::new("/cfg/repositories.yaml");
        let unreachable = ChartError::from_repo(
            RepoError::RepositoryUnreachable {
                name: "stable".to_string(),
                url: "https://charts.example.com".to_string(),
                message: "connection refused".to_string(),
            },
            path,
        );
        assert!(matches!(unreachable, ChartError::RepositoryUnreachable { ref name, .. } if name == "stable"));
        assert!(unreachable.to_string().starts_with("repository \"stable\" at"));

        let tls = ChartError::from_repo(
            RepoError::Tls {
                message: "certFile and keyFile must be set together".to_string(),
            },
            path,
        );
        assert!(matches!(tls, ChartError::Configuration { .. }));

        let malformed = ChartError::from_repo(
            RepoError::RepositoryFile {
                path: path.display().to_string(),
                message: "bad yaml".to_string(),
            },
            path,
        );
        assert!(matches!(malformed, ChartError::Repository { .. }));
    }
}
