//! Charter Repo - chart repositories, downloads and dependency updates
//!
//! This crate provides:
//! - `RepositoryIndexStore`: the repository file and the per-repository index cache
//! - `ChartDownloader`: fetching `repo/chart` references or archive URLs
//! - `DependencyManager`: making a chart's declared dependencies present under `charts/`
//!
//! Every read-modify-write of the repository file holds an exclusive lock
//! on a sibling `.lock` file.

pub mod config;
pub mod dependency;
pub mod downloader;
pub mod error;
pub mod filelock;
pub mod http;
pub mod index;
pub mod lock;
pub mod mock;
pub mod repository;
pub mod store;

pub use config::{
    RepositoryEntry, RepositoryFile, default_repository_cache, default_repository_config,
    ensure_dir,
};
pub use dependency::{
    DependencyCheck, DependencyManager, RepositoryDependencyManager, VersionMismatch,
    check_dependencies,
};
pub use downloader::{ChartDownloader, DownloadedChart, RepoChartDownloader, Verification};
pub use error::{RepoError, Result};
pub use filelock::RepositoryFileLock;
pub use http::HttpOptions;
pub use index::{ChartVersion, RepositoryIndex};
pub use lock::{ChartLock, LockedDependency};
pub use mock::{DownloadCall, MockChartDownloader, MockDependencyManager};
pub use repository::ChartRepository;
pub use store::RepositoryIndexStore;
