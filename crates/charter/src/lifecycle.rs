//! Install, upgrade, list and uninstall as single-pass operations
//!
//! Install and upgrade run strictly in this order: build the execution
//! context, locate the chart, load it, reject non-installable charts, make
//! its dependencies present, reload it, then run the cluster action. The
//! reload is what lets freshly downloaded subcharts reach the manifest.

use std::path::Path;

use charter_core::{ChartLoader, FsChartLoader, LoadedChart, Values};
use charter_kube::{
    ActionConfigFactory, ClusterActions, ExecutionContext, InstallOptions, KubeClusterActions,
    StoredRelease, UninstallOptions, UpgradeOptions, generate_release_name,
};
use charter_repo::{
    ChartDownloader, DependencyManager, RepoChartDownloader, RepositoryDependencyManager,
};

use crate::dependencies::DependencyResolver;
use crate::error::{ChartError, Result};
use crate::locator::ChartLocator;
use crate::settings::Settings;

/// Controller wired to the filesystem, the configured repositories and the cluster
pub type DefaultController = ReleaseLifecycleController<
    FsChartLoader,
    RepoChartDownloader,
    RepositoryDependencyManager,
    KubeClusterActions,
>;

/// Runs release operations over pluggable loading, download, dependency and cluster capabilities
pub struct ReleaseLifecycleController<L, D, M, C>
where
    L: ChartLoader,
    D: ChartDownloader,
    M: DependencyManager,
    C: ClusterActions,
{
    factory: ActionConfigFactory,
    locator: ChartLocator<D>,
    loader: L,
    resolver: DependencyResolver<M>,
    cluster: C,
}

impl DefaultController {
    /// Build the production controller from settings
    pub fn from_settings(settings: &Settings) -> Self {
        let http = settings.http_options();
        let downloader = RepoChartDownloader::new(&settings.repository_config, &settings.repository_cache)
            .with_http_options(http.clone());
        // Always refresh indices first: a missing dependency usually means a stale index
        let manager =
            RepositoryDependencyManager::new(&settings.repository_config, &settings.repository_cache)
                .with_http_options(http)
                .with_skip_update(false);

        Self::new(
            settings.action_config_factory(),
            ChartLocator::new(downloader, &settings.repository_cache),
            FsChartLoader,
            DependencyResolver::new(manager, settings.dependency_policy),
            KubeClusterActions::new(),
        )
    }
}

impl<L, D, M, C> ReleaseLifecycleController<L, D, M, C>
where
    L: ChartLoader,
    D: ChartDownloader,
    M: DependencyManager,
    C: ClusterActions,
{
    pub fn new(
        factory: ActionConfigFactory,
        locator: ChartLocator<D>,
        loader: L,
        resolver: DependencyResolver<M>,
        cluster: C,
    ) -> Self {
        Self {
            factory,
            locator,
            loader,
            resolver,
            cluster,
        }
    }

    pub fn locator(&self) -> &ChartLocator<D> {
        &self.locator
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn resolver(&self) -> &DependencyResolver<M> {
        &self.resolver
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    fn context(&self, namespace: &str) -> Result<ExecutionContext> {
        self.factory.build(namespace).map_err(|e| {
            ChartError::configuration(format!(
                "cannot build execution context for namespace {:?}: {}",
                namespace, e
            ))
        })
    }

    fn load(&self, path: &Path) -> Result<LoadedChart> {
        self.loader.load(path).map_err(|e| ChartError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Locate, gate and dependency-complete a chart, returning the reloaded chart
    async fn prepare(&self, name: &str, version: &str) -> Result<LoadedChart> {
        let path = self.locator.locate(name, version).await?;
        let chart = self.load(&path)?;
        tracing::debug!(chart = %chart.name(), path = %path.display(), "chart loaded");

        if !chart.is_installable() {
            return Err(ChartError::NotInstallable {
                name: chart.name().to_string(),
                chart_type: chart.metadata.display_type().to_string(),
            });
        }

        self.resolver.ensure_dependencies(&chart, &path).await?;

        // Dependencies may have changed what is on disk
        let chart = self.load(&path)?;
        tracing::debug!(chart = %chart.name(), subcharts = chart.subcharts.len(), "chart reloaded");
        Ok(chart)
    }

    /// Install `name` at `version` under a generated release name
    pub async fn install(
        &self,
        name: &str,
        version: &str,
        namespace: &str,
        values: &Values,
    ) -> Result<StoredRelease> {
        let ctx = self.context(namespace)?;
        let release_name = generate_release_name(name);
        let chart = self.prepare(name, version).await?;

        let options = InstallOptions::new(&release_name, namespace).with_create_namespace(true);
        let release = self
            .cluster
            .install(&ctx, &chart, values, &options)
            .await
            .map_err(|e| ChartError::Install {
                chart: chart.name().to_string(),
                release: release_name.clone(),
                message: e.to_string(),
            })?;

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            revision = release.revision,
            "install complete"
        );
        Ok(release)
    }

    /// Upgrade `release_name` to chart `name` at `version`
    pub async fn upgrade(
        &self,
        name: &str,
        version: &str,
        release_name: &str,
        namespace: &str,
        values: &Values,
    ) -> Result<StoredRelease> {
        let ctx = self.context(namespace)?;
        let chart = self.prepare(name, version).await?;

        let options = UpgradeOptions::new(release_name, namespace);
        let release = self
            .cluster
            .upgrade(&ctx, &chart, values, &options)
            .await
            .map_err(|e| ChartError::Upgrade {
                chart: chart.name().to_string(),
                release: release_name.to_string(),
                message: e.to_string(),
            })?;

        tracing::info!(
            release = %release.name,
            namespace = %release.namespace,
            revision = release.revision,
            "upgrade complete"
        );
        Ok(release)
    }

    /// Live releases in `namespace`
    pub async fn list_releases(&self, namespace: &str) -> Result<Vec<StoredRelease>> {
        let ctx = self.context(namespace)?;
        self.cluster.list(&ctx).await.map_err(|e| ChartError::List {
            namespace: namespace.to_string(),
            message: e.to_string(),
        })
    }

    /// Uninstall `release_name`, purging its history
    pub async fn uninstall(&self, release_name: &str, namespace: &str) -> Result<StoredRelease> {
        let ctx = self.context(namespace)?;
        let release = self
            .cluster
            .uninstall(&ctx, &UninstallOptions::new(release_name, namespace))
            .await
            .map_err(|e| ChartError::Uninstall {
                release: release_name.to_string(),
                namespace: namespace.to_string(),
                message: e.to_string(),
            })?;

        tracing::info!(release = %release_name, namespace = %namespace, "uninstall complete");
        Ok(release)
    }
}
