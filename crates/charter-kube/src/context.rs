//! Namespace-scoped execution contexts
//!
//! An [`ExecutionContext`] carries everything a release action needs to
//! reach the cluster: the kubeconfig to read, the target namespace, the
//! transport settings and the impersonation groups. Building one never
//! contacts the cluster; the client is created when an action runs.

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KubeError, Result};
use crate::names::validate_namespace;

/// Settings for one release action against one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Target namespace
    pub namespace: String,

    /// Kubeconfig file; `None` infers from the environment
    pub kubeconfig: Option<PathBuf>,

    /// Shared cache directory
    pub cache_dir: PathBuf,

    /// Skip verification of the API server certificate
    pub insecure_skip_tls_verify: bool,

    /// Per-request timeout; `None` is unbounded
    pub timeout: Option<Duration>,

    /// Groups to impersonate; empty disables impersonation
    pub impersonate_groups: Vec<String>,
}

impl ExecutionContext {
    /// Resolve the kube client configuration for this context
    pub async fn kube_config(&self) -> Result<Config> {
        let mut config = match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| KubeError::Kubeconfig {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| KubeError::Kubeconfig {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })?
            }
            None => Config::infer().await.map_err(|e| KubeError::Kubeconfig {
                path: "<inferred>".to_string(),
                message: e.to_string(),
            })?,
        };

        config.default_namespace = self.namespace.clone();
        config.read_timeout = self.timeout;
        config.write_timeout = self.timeout;

        if self.insecure_skip_tls_verify {
            tracing::warn!("TLS verification of the cluster API server is disabled");
            config.accept_invalid_certs = true;
        }
        if !self.impersonate_groups.is_empty() {
            config.auth_info.impersonate_groups = Some(self.impersonate_groups.clone());
        }

        Ok(config)
    }

    /// Connect a client for this context
    pub async fn client(&self) -> Result<Client> {
        let config = self.kube_config().await?;
        Ok(Client::try_from(config)?)
    }
}

/// Builds [`ExecutionContext`]s sharing one set of connection settings
#[derive(Debug, Clone, Default)]
pub struct ActionConfigFactory {
    kubeconfig: Option<PathBuf>,
    cache_dir: PathBuf,
    insecure_skip_tls_verify: bool,
    timeout: Option<Duration>,
    impersonate_groups: Vec<String>,
}

impl ActionConfigFactory {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    pub fn with_insecure_skip_tls_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_tls_verify = insecure;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_impersonate_groups(mut self, groups: Vec<String>) -> Self {
        self.impersonate_groups = groups;
        self
    }

    /// Build the context for `namespace`
    ///
    /// Fails when the namespace is not a DNS-1123 label or when an explicit
    /// kubeconfig path does not exist.
    pub fn build(&self, namespace: &str) -> Result<ExecutionContext> {
        validate_namespace(namespace)?;

        if let Some(path) = &self.kubeconfig {
            if !path.is_file() {
                return Err(KubeError::Kubeconfig {
                    path: path.display().to_string(),
                    message: "file does not exist".to_string(),
                });
            }
        }

        Ok(ExecutionContext {
            namespace: namespace.to_string(),
            kubeconfig: self.kubeconfig.clone(),
            cache_dir: self.cache_dir.clone(),
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
            timeout: self.timeout,
            impersonate_groups: self.impersonate_groups.clone(),
        })
    }
}
