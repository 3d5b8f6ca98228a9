//! Charter - chart resolution and release transitions for Kubernetes
//!
//! This crate ties the workspace together:
//! - [`Repositories`]: adding, refreshing and removing chart repositories
//! - [`ChartLocator`]: local paths first, repository downloads otherwise
//! - [`DependencyResolver`]: declared dependencies present before any action
//! - [`ReleaseLifecycleController`]: install, upgrade, list and uninstall
//!
//! Logging goes through `tracing`; nothing is printed unless the caller
//! installs a subscriber.

pub mod dependencies;
pub mod error;
pub mod lifecycle;
pub mod locator;
pub mod repositories;
pub mod settings;

pub use dependencies::{DependencyPolicy, DependencyResolver};
pub use error::{ChartError, Result, STALE_INDEX_HINT};
pub use lifecycle::{DefaultController, ReleaseLifecycleController};
pub use locator::ChartLocator;
pub use repositories::Repositories;
pub use settings::Settings;

pub use charter_core::{ChartLoader, FsChartLoader, LoadedChart, MockChartLoader, Values};
pub use charter_kube::{
    ActionConfigFactory, ClusterActions, ExecutionContext, KubeClusterActions, MockClusterActions,
    ReleaseState, StoredRelease,
};
pub use charter_repo::{
    ChartDownloader, DependencyManager, MockChartDownloader, MockDependencyManager,
    RepoChartDownloader, RepositoryDependencyManager, RepositoryEntry, RepositoryIndexStore,
};
