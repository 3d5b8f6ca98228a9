//! In-memory cluster fakes for testing
//!
//! [`RecordingApplier`] stands in for the API server and
//! [`MockClusterActions`] runs the real release transitions on top of it and
//! [`MockStorageDriver`], so release semantics stay identical to production.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

use charter_core::{LoadedChart, Values};

use crate::actions::{InstallOptions, UninstallOptions, UpgradeOptions};
use crate::client::ReleaseClient;
use crate::cluster::ClusterActions;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::release::StoredRelease;
use crate::resources::{ManifestApplier, OperationSummary};
use crate::storage::MockStorageDriver;

/// A manifest handed to the applier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedManifest {
    pub namespace: String,
    pub manifest: String,
}

#[derive(Debug, Default)]
struct Recorded {
    applied: Vec<RecordedManifest>,
    deleted: Vec<RecordedManifest>,
    namespaces: Vec<String>,
}

/// Manifest applier that records instead of contacting a cluster
#[derive(Clone, Default)]
pub struct RecordingApplier {
    recorded: Arc<RwLock<Recorded>>,
    failure: Option<String>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every resource as failed with `message`
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn applied(&self) -> Vec<RecordedManifest> {
        self.recorded
            .read()
            .map(|r| r.applied.clone())
            .unwrap_or_default()
    }

    pub fn deleted(&self) -> Vec<RecordedManifest> {
        self.recorded
            .read()
            .map(|r| r.deleted.clone())
            .unwrap_or_default()
    }

    /// Namespaces ensured so far
    pub fn namespaces(&self) -> Vec<String> {
        self.recorded
            .read()
            .map(|r| r.namespaces.clone())
            .unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut Recorded)) {
        if let Ok(mut recorded) = self.recorded.write() {
            f(&mut recorded);
        }
    }

    fn summary(&self, manifest: &str) -> OperationSummary {
        let mut summary = OperationSummary::default();
        match &self.failure {
            Some(message) => summary
                .failed
                .push(("manifest".to_string(), message.clone())),
            None => summary.succeeded.push(format!("{} bytes", manifest.len())),
        }
        summary
    }
}

#[async_trait]
impl ManifestApplier for RecordingApplier {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        self.record(|r| r.namespaces.push(namespace.to_string()));
        Ok(())
    }

    async fn apply(&self, namespace: &str, manifest: &str) -> Result<OperationSummary> {
        self.record(|r| {
            r.applied.push(RecordedManifest {
                namespace: namespace.to_string(),
                manifest: manifest.to_string(),
            })
        });
        Ok(self.summary(manifest))
    }

    async fn delete(&self, namespace: &str, manifest: &str) -> Result<OperationSummary> {
        self.record(|r| {
            r.deleted.push(RecordedManifest {
                namespace: namespace.to_string(),
                manifest: manifest.to_string(),
            })
        });
        Ok(self.summary(manifest))
    }
}

/// Counts of cluster actions performed, for assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActionCounts {
    pub installs: usize,
    pub upgrades: usize,
    pub lists: usize,
    pub uninstalls: usize,
}

impl ActionCounts {
    pub fn total(&self) -> usize {
        self.installs + self.upgrades + self.lists + self.uninstalls
    }
}

/// In-memory [`ClusterActions`]
///
/// Clones share state, so a test can keep a handle while the controller
/// owns another.
#[derive(Clone)]
pub struct MockClusterActions {
    client: Arc<ReleaseClient<MockStorageDriver, RecordingApplier>>,
    storage: MockStorageDriver,
    applier: RecordingApplier,
    counts: Arc<RwLock<ActionCounts>>,
    contexts: Arc<RwLock<Vec<ExecutionContext>>>,
}

impl Default for MockClusterActions {
    fn default() -> Self {
        Self::with_applier(RecordingApplier::new())
    }
}

impl MockClusterActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_applier(applier: RecordingApplier) -> Self {
        Self::with_parts(MockStorageDriver::new(), applier)
    }

    /// Start from pre-existing release records
    pub fn with_releases(releases: Vec<StoredRelease>) -> Self {
        Self::with_parts(MockStorageDriver::with_releases(releases), RecordingApplier::new())
    }

    fn with_parts(storage: MockStorageDriver, applier: RecordingApplier) -> Self {
        Self {
            client: Arc::new(ReleaseClient::new(storage.clone(), applier.clone())),
            storage,
            applier,
            counts: Arc::default(),
            contexts: Arc::default(),
        }
    }

    pub fn storage(&self) -> &MockStorageDriver {
        &self.storage
    }

    pub fn applier(&self) -> &RecordingApplier {
        &self.applier
    }

    pub fn counts(&self) -> ActionCounts {
        self.counts.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// Contexts passed to every action, in call order
    pub fn contexts(&self) -> Vec<ExecutionContext> {
        self.contexts.read().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, ctx: &ExecutionContext, count: impl FnOnce(&mut ActionCounts)) {
        if let Ok(mut counts) = self.counts.write() {
            count(&mut counts);
        }
        if let Ok(mut contexts) = self.contexts.write() {
            contexts.push(ctx.clone());
        }
    }
}

#[async_trait]
impl ClusterActions for MockClusterActions {
    async fn install(
        &self,
        ctx: &ExecutionContext,
        chart: &LoadedChart,
        values: &Values,
        options: &InstallOptions,
    ) -> Result<StoredRelease> {
        self.record(ctx, |c| c.installs += 1);
        self.client.install(chart, values, options).await
    }

    async fn upgrade(
        &self,
        ctx: &ExecutionContext,
        chart: &LoadedChart,
        values: &Values,
        options: &UpgradeOptions,
    ) -> Result<StoredRelease> {
        self.record(ctx, |c| c.upgrades += 1);
        self.client.upgrade(chart, values, options).await
    }

    async fn list(&self, ctx: &ExecutionContext) -> Result<Vec<StoredRelease>> {
        self.record(ctx, |c| c.lists += 1);
        self.client.list(&ctx.namespace).await
    }

    async fn uninstall(
        &self,
        ctx: &ExecutionContext,
        options: &UninstallOptions,
    ) -> Result<StoredRelease> {
        self.record(ctx, |c| c.uninstalls += 1);
        self.client.uninstall(options).await
    }
}
