//! The cluster action capability
//!
//! [`ClusterActions`] is the boundary the release workflow talks to: given
//! an execution context it performs install, upgrade, list or uninstall and
//! returns release records. [`KubeClusterActions`] does so against the
//! cluster the context points at.

use async_trait::async_trait;

use charter_core::{LoadedChart, Values};

use crate::actions::{InstallOptions, UninstallOptions, UpgradeOptions};
use crate::client::{ReleaseClient, live_releases};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::release::StoredRelease;
use crate::resources::ResourceManager;
use crate::storage::SecretsDriver;

/// Release actions scoped by an [`ExecutionContext`]
#[async_trait]
pub trait ClusterActions: Send + Sync {
    async fn install(
        &self,
        ctx: &ExecutionContext,
        chart: &LoadedChart,
        values: &Values,
        options: &InstallOptions,
    ) -> Result<StoredRelease>;

    async fn upgrade(
        &self,
        ctx: &ExecutionContext,
        chart: &LoadedChart,
        values: &Values,
        options: &UpgradeOptions,
    ) -> Result<StoredRelease>;

    /// Live releases in the context's namespace
    async fn list(&self, ctx: &ExecutionContext) -> Result<Vec<StoredRelease>>;

    async fn uninstall(
        &self,
        ctx: &ExecutionContext,
        options: &UninstallOptions,
    ) -> Result<StoredRelease>;
}

/// Cluster actions backed by Secrets storage and Server-Side Apply
///
/// A client is connected per call; nothing is held between actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeClusterActions;

impl KubeClusterActions {
    pub fn new() -> Self {
        Self
    }

    async fn release_client(
        ctx: &ExecutionContext,
    ) -> Result<ReleaseClient<SecretsDriver, ResourceManager>> {
        let client = ctx.client().await?;
        let resources = ResourceManager::new(client.clone()).await?;
        Ok(ReleaseClient::new(SecretsDriver::new(client), resources))
    }
}

#[async_trait]
impl ClusterActions for KubeClusterActions {
    async fn install(
        &self,
        ctx: &ExecutionContext,
        chart: &LoadedChart,
        values: &Values,
        options: &InstallOptions,
    ) -> Result<StoredRelease> {
        Self::release_client(ctx)
            .await?
            .install(chart, values, options)
            .await
    }

    async fn upgrade(
        &self,
        ctx: &ExecutionContext,
        chart: &LoadedChart,
        values: &Values,
        options: &UpgradeOptions,
    ) -> Result<StoredRelease> {
        Self::release_client(ctx)
            .await?
            .upgrade(chart, values, options)
            .await
    }

    async fn list(&self, ctx: &ExecutionContext) -> Result<Vec<StoredRelease>> {
        // Listing only reads storage, so API discovery is skipped
        let storage = SecretsDriver::new(ctx.client().await?);
        live_releases(&storage, &ctx.namespace).await
    }

    async fn uninstall(
        &self,
        ctx: &ExecutionContext,
        options: &UninstallOptions,
    ) -> Result<StoredRelease> {
        Self::release_client(ctx).await?.uninstall(options).await
    }
}
