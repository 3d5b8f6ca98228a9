//! Charter Kube - execution contexts and release transitions
//!
//! This crate provides:
//! - **Execution contexts**: `ActionConfigFactory` builds namespace-scoped connection settings
//! - **Release records**: revisions with a small state machine, stored in Kubernetes Secrets
//! - **Release transitions**: install, upgrade, uninstall and list through `ReleaseClient`
//! - **Cluster actions**: the `ClusterActions` capability with a live and an in-memory implementation

pub mod actions;
pub mod client;
pub mod cluster;
pub mod context;
pub mod error;
pub mod mock;
pub mod names;
pub mod release;
pub mod render;
pub mod resources;
pub mod storage;

pub use actions::{InstallOptions, UninstallOptions, UpgradeOptions};
pub use client::{ReleaseClient, live_releases};
pub use cluster::{ClusterActions, KubeClusterActions};
pub use context::{ActionConfigFactory, ExecutionContext};
pub use error::{KubeError, Result};
pub use mock::{ActionCounts, MockClusterActions, RecordedManifest, RecordingApplier};
pub use names::{
    chart_base_name, generate_release_name, release_name_at, validate_namespace,
    validate_release_name,
};
pub use release::{ChartInfo, ReleaseState, StoredRelease};
pub use render::{ManifestRenderer, RawManifestRenderer};
pub use resources::{ManifestApplier, OperationSummary, ResourceManager};
pub use storage::{MockStorageDriver, OperationCounts, SecretsDriver, StorageDriver};
