//! In-memory downloader and dependency manager for testing
//!
//! Neither touches the network. Both record their calls so tests can
//! assert that a code path never reached a repository.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use charter_core::{CHARTS_DIR, LoadedChart};

use crate::config::ensure_dir;
use crate::dependency::DependencyManager;
use crate::downloader::{ChartDownloader, DownloadedChart, Verification, compute_digest};
use crate::error::{RepoError, Result};

/// A recorded `download_to` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCall {
    pub reference: String,
    pub version: String,
    pub dest: PathBuf,
}

/// Downloader serving pre-registered archives
#[derive(Clone, Default)]
pub struct MockChartDownloader {
    /// (reference, version) -> archive bytes
    archives: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
    calls: Arc<RwLock<Vec<DownloadCall>>>,
}

impl MockChartDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the archive returned for `reference` at `version`
    ///
    /// An empty `version` registers what a "latest" request receives.
    pub fn with_archive(self, reference: &str, version: &str, bytes: Vec<u8>) -> Self {
        if let Ok(mut archives) = self.archives.write() {
            archives.insert((reference.to_string(), version.to_string()), bytes);
        }
        self
    }

    pub fn calls(&self) -> Vec<DownloadCall> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ChartDownloader for MockChartDownloader {
    async fn download_to(&self, reference: &str, version: &str, dest: &Path) -> Result<DownloadedChart> {
        if let Ok(mut calls) = self.calls.write() {
            calls.push(DownloadCall {
                reference: reference.to_string(),
                version: version.to_string(),
                dest: dest.to_path_buf(),
            });
        }

        let bytes = self
            .archives
            .read()
            .ok()
            .and_then(|a| a.get(&(reference.to_string(), version.to_string())).cloned())
            .ok_or_else(|| {
                let (repo, name) = reference.split_once('/').unwrap_or(("", reference));
                if version.is_empty() {
                    RepoError::ChartNotFound {
                        name: name.to_string(),
                        repo: repo.to_string(),
                    }
                } else {
                    RepoError::VersionNotFound {
                        name: name.to_string(),
                        version: version.to_string(),
                        repo: repo.to_string(),
                    }
                }
            })?;

        ensure_dir(dest)?;
        let base = reference.rsplit('/').next().unwrap_or(reference);
        let version = if version.is_empty() { "latest" } else { version };
        let path = dest.join(format!("{}-{}.tgz", base, version));
        std::fs::write(&path, &bytes)?;

        Ok(DownloadedChart {
            path,
            verification: Verification {
                digest: compute_digest(&bytes),
                verified: false,
            },
        })
    }
}

/// Dependency manager writing pre-registered archives into `charts/`
#[derive(Clone, Default)]
pub struct MockDependencyManager {
    /// dependency name -> (version, archive bytes)
    fixtures: Arc<RwLock<HashMap<String, (String, Vec<u8>)>>>,
    updates: Arc<RwLock<Vec<PathBuf>>>,
    failure: Option<String>,
}

impl MockDependencyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the archive written for dependency `name`
    pub fn with_dependency(self, name: &str, version: &str, bytes: Vec<u8>) -> Self {
        if let Ok(mut fixtures) = self.fixtures.write() {
            fixtures.insert(name.to_string(), (version.to_string(), bytes));
        }
        self
    }

    /// Make every update fail with `message`
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Chart directories updated so far
    pub fn updates(&self) -> Vec<PathBuf> {
        self.updates.read().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn update_count(&self) -> usize {
        self.updates.read().map(|u| u.len()).unwrap_or_default()
    }
}

#[async_trait]
impl DependencyManager for MockDependencyManager {
    async fn update(&self, chart: &LoadedChart, chart_dir: &Path) -> Result<()> {
        if let Ok(mut updates) = self.updates.write() {
            updates.push(chart_dir.to_path_buf());
        }

        if let Some(message) = &self.failure {
            return Err(RepoError::ResolutionFailed {
                message: message.clone(),
            });
        }

        let charts_dir = chart_dir.join(CHARTS_DIR);
        for dependency in &chart.metadata.dependencies {
            let (version, bytes) = self
                .fixtures
                .read()
                .ok()
                .and_then(|f| f.get(&dependency.name).cloned())
                .ok_or_else(|| RepoError::ChartNotFound {
                    name: dependency.name.clone(),
                    repo: dependency.repository.clone(),
                })?;

            ensure_dir(&charts_dir)?;
            std::fs::write(
                charts_dir.join(format!("{}-{}.tgz", dependency.name, version)),
                bytes,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charter_core::{ChartFiles, write_archive};
    use tempfile::TempDir;

    fn archive(name: &str, version: &str) -> Vec<u8> {
        let mut files = ChartFiles::new();
        files.insert(
            "Chart.yaml".to_string(),
            format!("apiVersion: v2\nname: {}\nversion: {}\n", name, version).into_bytes(),
        );
        write_archive(name, &files).unwrap()
    }

    #[tokio::test]
    async fn test_downloader_records_calls() {
        let temp = TempDir::new().unwrap();
        let downloader = MockChartDownloader::new().with_archive("stable/app", "1.2.0", archive("app", "1.2.0"));

        let downloaded = downloader
            .download_to("stable/app", "1.2.0", temp.path())
            .await
            .unwrap();
        assert_eq!(downloaded.path, temp.path().join("app-1.2.0.tgz"));
        assert!(LoadedChart::load(&downloaded.path).is_ok());

        let err = downloader
            .download_to("stable/app", "9.9.9", temp.path())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::VersionNotFound { .. }));
        assert_eq!(downloader.call_count(), 2);
    }

    #[tokio::test]
    async fn test_dependency_manager_writes_fixtures() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("Chart.yaml"),
            "apiVersion: v2\nname: web\nversion: 1.0.0\ndependencies:\n  - name: redis\n    version: 17.x\n    repository: \"@stable\"\n",
        )
        .unwrap();
        let chart = LoadedChart::load(temp.path()).unwrap();

        let manager = MockDependencyManager::new().with_dependency("redis", "17.3.0", archive("redis", "17.3.0"));
        manager.update(&chart, temp.path()).await.unwrap();

        assert!(temp.path().join("charts/redis-17.3.0.tgz").exists());
        assert_eq!(manager.updates(), vec![temp.path().to_path_buf()]);

        let failing = MockDependencyManager::new().failing("index unavailable");
        assert!(failing.update(&chart, temp.path()).await.is_err());
        assert_eq!(failing.update_count(), 1);
    }
}
