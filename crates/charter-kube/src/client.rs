//! Release transitions
//!
//! [`ReleaseClient`] combines a storage driver, a manifest applier and a
//! renderer. Every transition first records a pending revision, then changes
//! the cluster, then records the outcome, so a failure always leaves a
//! `failed` revision behind instead of a half-recorded release.

use charter_core::{LoadedChart, Values};

use crate::actions::{InstallOptions, UninstallOptions, UpgradeOptions};
use crate::error::{KubeError, Result};
use crate::names::{validate_namespace, validate_release_name};
use crate::release::{ChartInfo, ReleaseState, StoredRelease};
use crate::render::{ManifestRenderer, RawManifestRenderer};
use crate::resources::ManifestApplier;
use crate::storage::StorageDriver;

/// Runs install, upgrade, uninstall and list against one storage backend
pub struct ReleaseClient<S: StorageDriver, A: ManifestApplier, R: ManifestRenderer = RawManifestRenderer> {
    storage: S,
    applier: A,
    renderer: R,
}

impl<S: StorageDriver, A: ManifestApplier> ReleaseClient<S, A> {
    pub fn new(storage: S, applier: A) -> Self {
        Self {
            storage,
            applier,
            renderer: RawManifestRenderer,
        }
    }
}

impl<S: StorageDriver, A: ManifestApplier, R: ManifestRenderer> ReleaseClient<S, A, R> {
    /// Replace the manifest renderer
    pub fn with_renderer<R2: ManifestRenderer>(self, renderer: R2) -> ReleaseClient<S, A, R2> {
        ReleaseClient {
            storage: self.storage,
            applier: self.applier,
            renderer,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    fn effective_values(chart: &LoadedChart, overrides: &Values) -> Values {
        let mut values = chart.values.clone();
        values.merge(overrides);
        values
    }

    /// Latest revision of a release, or `None` if it was never recorded
    async fn latest(&self, namespace: &str, name: &str) -> Result<Option<StoredRelease>> {
        match self.storage.get_latest(namespace, name).await {
            Ok(release) => Ok(Some(release)),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Record the failure on `release` and hand back the original error
    async fn fail(&self, release: &mut StoredRelease, error: KubeError) -> KubeError {
        release.mark_failed(error.to_string());
        if let Err(e) = self.storage.update(release).await {
            tracing::warn!(
                release = %release.name,
                revision = release.revision,
                error = %e,
                "could not record failed revision"
            );
        }
        error
    }

    /// Install a new release
    ///
    /// A name whose latest revision is `uninstalled` (history kept) is
    /// reused with the next revision number.
    pub async fn install(
        &self,
        chart: &LoadedChart,
        overrides: &Values,
        options: &InstallOptions,
    ) -> Result<StoredRelease> {
        validate_release_name(&options.name)?;
        validate_namespace(&options.namespace)?;

        let previous = self.latest(&options.namespace, &options.name).await?;
        if let Some(previous) = &previous {
            if previous.is_live() {
                return Err(KubeError::ReleaseAlreadyExists {
                    name: options.name.clone(),
                    namespace: options.namespace.clone(),
                });
            }
        }

        let values = Self::effective_values(chart, overrides);
        let manifest = self.renderer.render(chart, &values)?;

        let mut release = StoredRelease::for_install(
            options.name.clone(),
            options.namespace.clone(),
            ChartInfo::from(&chart.metadata),
            values,
            manifest,
        );
        if let Some(previous) = previous {
            release.revision = previous.revision + 1;
        }

        if options.create_namespace {
            self.applier.ensure_namespace(&options.namespace).await?;
        }

        self.storage.create(&release).await?;
        tracing::debug!(release = %release.name, revision = release.revision, "install pending");

        let applied = match self.applier.apply(&release.namespace, &release.manifest).await {
            Ok(summary) => summary.into_result("apply"),
            Err(e) => Err(e),
        };
        if let Err(e) = applied {
            return Err(self.fail(&mut release, e).await);
        }

        release.mark_deployed();
        self.storage.update(&release).await?;
        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            revision = release.revision,
            chart = %release.chart.name,
            "release installed"
        );
        Ok(release)
    }

    /// Upgrade an existing release to a new revision
    ///
    /// On success the newest `deployed` revision becomes `superseded`.
    /// A `failed` latest revision keeps its state so the failure stays in history.
    pub async fn upgrade(
        &self,
        chart: &LoadedChart,
        overrides: &Values,
        options: &UpgradeOptions,
    ) -> Result<StoredRelease> {
        let not_found = || KubeError::ReleaseNotFound {
            name: options.name.clone(),
            namespace: options.namespace.clone(),
        };

        let previous = self
            .latest(&options.namespace, &options.name)
            .await?
            .filter(StoredRelease::is_live)
            .ok_or_else(not_found)?;

        if previous.state.is_pending() {
            return Err(KubeError::OperationInProgress {
                name: previous.name.clone(),
                status: previous.state.status_name().to_string(),
            });
        }

        let values = Self::effective_values(chart, overrides);
        let manifest = self.renderer.render(chart, &values)?;
        let mut release =
            StoredRelease::for_upgrade(&previous, ChartInfo::from(&chart.metadata), values, manifest);

        self.storage.create(&release).await?;
        tracing::debug!(release = %release.name, revision = release.revision, "upgrade pending");

        let applied = match self.applier.apply(&release.namespace, &release.manifest).await {
            Ok(summary) => summary.into_result("apply"),
            Err(e) => Err(e),
        };
        if let Err(e) = applied {
            return Err(self.fail(&mut release, e).await);
        }

        let deployed = self
            .storage
            .history(&options.namespace, &options.name)
            .await?
            .into_iter()
            .filter(|r| r.revision != release.revision && r.state == ReleaseState::Deployed)
            .max_by_key(|r| r.revision);
        if let Some(mut deployed) = deployed {
            deployed.mark_superseded();
            self.storage.update(&deployed).await?;
        }

        release.mark_deployed();
        self.storage.update(&release).await?;
        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            revision = release.revision,
            "release upgraded"
        );
        Ok(release)
    }

    /// Remove a release's resources and, unless asked to keep it, its history
    pub async fn uninstall(&self, options: &UninstallOptions) -> Result<StoredRelease> {
        let mut release = self
            .latest(&options.namespace, &options.name)
            .await?
            .filter(StoredRelease::is_live)
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: options.name.clone(),
                namespace: options.namespace.clone(),
            })?;

        release.mark_uninstalling();
        self.storage.update(&release).await?;

        let deleted = match self.applier.delete(&release.namespace, &release.manifest).await {
            Ok(summary) => summary.into_result("delete"),
            Err(e) => Err(e),
        };
        if let Err(e) = deleted {
            return Err(self.fail(&mut release, e).await);
        }

        release.mark_uninstalled();
        self.storage.update(&release).await?;

        if !options.keep_history {
            self.storage
                .delete_all(&options.namespace, &options.name)
                .await?;
        }

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            keep_history = options.keep_history,
            "release uninstalled"
        );
        Ok(release)
    }

    /// Latest revision of every live release in `namespace`, by name
    pub async fn list(&self, namespace: &str) -> Result<Vec<StoredRelease>> {
        live_releases(&self.storage, namespace).await
    }
}

/// Latest revision of every live release in `namespace`, sorted by name
pub async fn live_releases<S: StorageDriver + ?Sized>(
    storage: &S,
    namespace: &str,
) -> Result<Vec<StoredRelease>> {
    let mut releases: Vec<StoredRelease> = storage
        .list(namespace)
        .await?
        .into_iter()
        .filter(StoredRelease::is_live)
        .collect();
    releases.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(releases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingApplier;
    use crate::storage::MockStorageDriver;
    use charter_core::ChartFiles;
    use std::path::PathBuf;

    fn chart(version: &str, template: &str) -> LoadedChart {
        let mut files = ChartFiles::new();
        files.insert(
            "Chart.yaml".to_string(),
            format!("apiVersion: v2\nname: app\nversion: {}\n", version).into_bytes(),
        );
        files.insert("values.yaml".to_string(), b"replicaCount: 1\nimage: app\n".to_vec());
        files.insert("templates/main.yaml".to_string(), template.as_bytes().to_vec());
        LoadedChart::from_files(files, PathBuf::from("/charts/app")).unwrap()
    }

    fn client() -> ReleaseClient<MockStorageDriver, RecordingApplier> {
        ReleaseClient::new(MockStorageDriver::new(), RecordingApplier::new())
    }

    #[tokio::test]
    async fn test_install_records_deployed_release() {
        let client = client();
        let overrides = Values::from_yaml("replicaCount: 3\n").unwrap();

        let release = client
            .install(
                &chart("1.0.0", "kind: ConfigMap\n"),
                &overrides,
                &InstallOptions::new("web", "default"),
            )
            .await
            .unwrap();

        assert_eq!(release.revision, 1);
        assert_eq!(release.state, ReleaseState::Deployed);
        assert_eq!(release.values.get("replicaCount"), Some(&serde_json::json!(3)));
        assert_eq!(release.values.get("image"), Some(&serde_json::json!("app")));
        assert!(release.manifest.contains("kind: ConfigMap"));
        assert_eq!(client.applier().applied().len(), 1);

        let err = client
            .install(
                &chart("1.0.0", "kind: ConfigMap\n"),
                &Values::new(),
                &InstallOptions::new("web", "default"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ReleaseAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_install_failure_leaves_failed_revision() {
        let client = ReleaseClient::new(
            MockStorageDriver::new(),
            RecordingApplier::new().failing("admission webhook denied"),
        );

        let err = client
            .install(
                &chart("1.0.0", "kind: ConfigMap\n"),
                &Values::new(),
                &InstallOptions::new("web", "default"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("admission webhook denied"));

        let stored = client.storage().get("default", "web", 1).await.unwrap();
        assert!(matches!(stored.state, ReleaseState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_create_namespace() {
        let client = client();
        client
            .install(
                &chart("1.0.0", "kind: ConfigMap\n"),
                &Values::new(),
                &InstallOptions::new("web", "fresh").with_create_namespace(true),
            )
            .await
            .unwrap();
        assert_eq!(client.applier().namespaces(), vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_upgrade_supersedes_previous() {
        let client = client();
        client
            .install(
                &chart("1.0.0", "kind: ConfigMap\n"),
                &Values::new(),
                &InstallOptions::new("web", "default"),
            )
            .await
            .unwrap();

        let upgraded = client
            .upgrade(
                &chart("1.1.0", "kind: Secret\n"),
                &Values::new(),
                &UpgradeOptions::new("web", "default"),
            )
            .await
            .unwrap();

        assert_eq!(upgraded.revision, 2);
        assert_eq!(upgraded.chart.version, "1.1.0");
        assert_eq!(upgraded.state, ReleaseState::Deployed);

        let first = client.storage().get("default", "web", 1).await.unwrap();
        assert_eq!(first.state, ReleaseState::Superseded);
        assert_eq!(client.applier().applied().len(), 2);
    }

    #[tokio::test]
    async fn test_upgrade_after_failure_keeps_failed_revision() {
        let client = client();
        client
            .install(
                &chart("1.0.0", "kind: ConfigMap\n"),
                &Values::new(),
                &InstallOptions::new("web", "default"),
            )
            .await
            .unwrap();

        let mut failed = StoredRelease::for_upgrade(
            &client.storage().get("default", "web", 1).await.unwrap(),
            ChartInfo::from(&chart("1.1.0", "").metadata),
            Values::new(),
            String::new(),
        );
        failed.mark_failed("image pull backoff".to_string());
        client.storage().create(&failed).await.unwrap();

        let upgraded = client
            .upgrade(
                &chart("1.2.0", "kind: Secret\n"),
                &Values::new(),
                &UpgradeOptions::new("web", "default"),
            )
            .await
            .unwrap();
        assert_eq!(upgraded.revision, 3);

        let history: Vec<(u32, &'static str)> = client
            .storage()
            .history("default", "web")
            .await
            .unwrap()
            .iter()
            .map(|r| (r.revision, r.state.status_name()))
            .collect();
        assert_eq!(
            history,
            vec![(3, "deployed"), (2, "failed"), (1, "superseded")]
        );
    }

    #[tokio::test]
    async fn test_upgrade_requires_live_release() {
        let client = client();
        let err = client
            .upgrade(
                &chart("1.0.0", "kind: ConfigMap\n"),
                &Values::new(),
                &UpgradeOptions::new("missing", "default"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ReleaseNotFound { .. }));
    }

    #[tokio::test]
    async fn test_uninstall_keep_history_then_reinstall() {
        let client = client();
        let c = chart("1.0.0", "kind: ConfigMap\n");
        client
            .install(&c, &Values::new(), &InstallOptions::new("web", "default"))
            .await
            .unwrap();

        let removed = client
            .uninstall(&UninstallOptions::new("web", "default").with_keep_history(true))
            .await
            .unwrap();
        assert_eq!(removed.state, ReleaseState::Uninstalled);
        assert_eq!(client.applier().deleted().len(), 1);
        assert!(client.list("default").await.unwrap().is_empty());

        let reinstalled = client
            .install(&c, &Values::new(), &InstallOptions::new("web", "default"))
            .await
            .unwrap();
        assert_eq!(reinstalled.revision, 2);
    }

    #[tokio::test]
    async fn test_uninstall_purges_history() {
        let client = client();
        client
            .install(
                &chart("1.0.0", "kind: ConfigMap\n"),
                &Values::new(),
                &InstallOptions::new("web", "default"),
            )
            .await
            .unwrap();

        client
            .uninstall(&UninstallOptions::new("web", "default"))
            .await
            .unwrap();
        assert!(client.storage().all_releases().is_empty());

        let err = client
            .uninstall(&UninstallOptions::new("web", "default"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::ReleaseNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let client = client();
        for name in ["zeta", "alpha"] {
            client
                .install(
                    &chart("1.0.0", "kind: ConfigMap\n"),
                    &Values::new(),
                    &InstallOptions::new(name, "default"),
                )
                .await
                .unwrap();
        }

        let names: Vec<_> = client
            .list("default")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
        assert!(client.list("other").await.unwrap().is_empty());
    }
}
