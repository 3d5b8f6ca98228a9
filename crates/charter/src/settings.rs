//! Paths and transport settings shared by every operation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use charter_kube::ActionConfigFactory;
use charter_repo::{HttpOptions, default_repository_cache, default_repository_config};

use crate::dependencies::DependencyPolicy;
use crate::error::{ChartError, Result};

pub const ENV_REPOSITORY_CONFIG: &str = "CHARTER_REPOSITORY_CONFIG";
pub const ENV_REPOSITORY_CACHE: &str = "CHARTER_REPOSITORY_CACHE";
pub const ENV_KUBECONFIG: &str = "KUBECONFIG";
pub const ENV_TIMEOUT: &str = "CHARTER_TIMEOUT";

/// Settings for repository access and cluster actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Repository file (`repositories.yaml`)
    pub repository_config: PathBuf,

    /// Index and chart download cache
    pub repository_cache: PathBuf,

    /// Kubeconfig file; unset means kube's default inference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    /// Skip TLS verification when talking to chart repositories
    pub repository_insecure_skip_tls_verify: bool,

    /// Skip TLS verification when talking to the cluster API server
    pub cluster_insecure_skip_tls_verify: bool,

    /// Request timeout for repositories and the cluster; unset is unbounded
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Groups to impersonate on the cluster
    pub impersonate_groups: Vec<String>,

    pub dependency_policy: DependencyPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repository_config: default_repository_config()
                .unwrap_or_else(|_| PathBuf::from(".charter/repositories.yaml")),
            repository_cache: default_repository_cache()
                .unwrap_or_else(|_| PathBuf::from(".charter/cache")),
            kubeconfig: None,
            repository_insecure_skip_tls_verify: true,
            cluster_insecure_skip_tls_verify: false,
            timeout: None,
            impersonate_groups: Vec::new(),
            dependency_policy: DependencyPolicy::default(),
        }
    }
}

impl Settings {
    /// Settings rooted in a single directory, for tests and sandboxes
    pub fn in_dir(root: &Path) -> Self {
        Self {
            repository_config: root.join("repositories.yaml"),
            repository_cache: root.join("cache"),
            ..Default::default()
        }
    }

    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<Self> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Read settings from a YAML file; absent keys keep their defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChartError::configuration(format!("cannot read settings {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            ChartError::configuration(format!("invalid settings {}: {}", path.display(), e))
        })
    }

    /// Apply environment overrides looked up through `lookup`
    pub fn overlay_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = non_empty(ENV_REPOSITORY_CONFIG) {
            self.repository_config = PathBuf::from(path);
        }
        if let Some(path) = non_empty(ENV_REPOSITORY_CACHE) {
            self.repository_cache = PathBuf::from(path);
        }
        if let Some(path) = non_empty(ENV_KUBECONFIG) {
            self.kubeconfig = Some(PathBuf::from(path));
        }
        if let Some(raw) = non_empty(ENV_TIMEOUT) {
            let timeout = humantime_serde::re::humantime::parse_duration(raw.trim()).map_err(|e| {
                ChartError::configuration(format!("invalid {} {:?}: {}", ENV_TIMEOUT, raw, e))
            })?;
            // Zero keeps requests unbounded
            self.timeout = (!timeout.is_zero()).then_some(timeout);
        }
        Ok(self)
    }

    /// Transport options for repository requests
    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            insecure_skip_tls_verify: self.repository_insecure_skip_tls_verify,
            timeout: self.timeout,
        }
    }

    /// Factory for the execution contexts of cluster actions
    pub fn action_config_factory(&self) -> ActionConfigFactory {
        ActionConfigFactory::new(&self.repository_cache)
            .with_kubeconfig(self.kubeconfig.clone())
            .with_insecure_skip_tls_verify(self.cluster_insecure_skip_tls_verify)
            .with_timeout(self.timeout)
            .with_impersonate_groups(self.impersonate_groups.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.repository_insecure_skip_tls_verify);
        assert!(!settings.cluster_insecure_skip_tls_verify);
        assert!(settings.timeout.is_none());
        assert!(settings.impersonate_groups.is_empty());
        assert_eq!(settings.dependency_policy, DependencyPolicy::CheckFirst);
    }

    #[test]
    fn test_overlay_env() {
        let env: HashMap<&str, &str> = [
            (ENV_REPOSITORY_CONFIG, "/etc/charter/repositories.yaml"),
            (ENV_REPOSITORY_CACHE, "/var/cache/charter"),
            (ENV_KUBECONFIG, "/home/ops/.kube/config"),
            (ENV_TIMEOUT, "2m 30s"),
        ]
        .into_iter()
        .collect();

        let settings = Settings::default()
            .overlay_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(
            settings.repository_config,
            PathBuf::from("/etc/charter/repositories.yaml")
        );
        assert_eq!(settings.repository_cache, PathBuf::from("/var/cache/charter"));
        assert_eq!(settings.kubeconfig, Some(PathBuf::from("/home/ops/.kube/config")));
        assert_eq!(settings.timeout, Some(Duration::from_secs(150)));

        let zero = Settings::default()
            .overlay_env(|k| (k == ENV_TIMEOUT).then(|| "0s".to_string()))
            .unwrap();
        assert!(zero.timeout.is_none());

        let invalid = Settings::default().overlay_env(|k| (k == ENV_TIMEOUT).then(|| "soon".to_string()));
        assert!(matches!(invalid, Err(ChartError::Configuration { .. })));
    }

    #[test]
    fn test_load_from_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            "repositoryConfig: /srv/repos.yaml\ntimeout: 45s\nclusterInsecureSkipTlsVerify: true\ndependencyPolicy: always-update\n",
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.repository_config, PathBuf::from("/srv/repos.yaml"));
        assert_eq!(settings.timeout, Some(Duration::from_secs(45)));
        assert!(settings.cluster_insecure_skip_tls_verify);
        assert!(settings.repository_insecure_skip_tls_verify);
        assert_eq!(settings.dependency_policy, DependencyPolicy::AlwaysUpdate);

        assert!(Settings::load_from(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_action_config_factory_carries_settings() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::in_dir(dir.path());
        settings.impersonate_groups = vec!["ops".to_string()];

        let ctx = settings.action_config_factory().build("default").unwrap();
        assert_eq!(ctx.cache_dir, dir.path().join("cache"));
        assert_eq!(ctx.impersonate_groups, vec!["ops".to_string()]);
        assert!(!ctx.insecure_skip_tls_verify);
    }
}
