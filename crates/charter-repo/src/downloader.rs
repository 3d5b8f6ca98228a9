//! Chart archive downloads
//!
//! A chart reference is either `repo/chart`, resolved through the repository
//! file and that repository's cached index, or a direct `http(s)://` URL to
//! an archive.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::config::{RepositoryEntry, RepositoryFile, ensure_dir};
use crate::error::{RepoError, Result};
use crate::http::{HttpOptions, RepositoryClient};
use crate::repository::ChartRepository;

/// Integrity information about a downloaded archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// `sha256:<hex>` digest of the downloaded bytes
    pub digest: String,

    /// Whether the digest was checked against one published in the index
    pub verified: bool,
}

/// A chart archive written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedChart {
    pub path: PathBuf,
    pub verification: Verification,
}

/// Capability to fetch a chart archive into a directory
#[async_trait]
pub trait ChartDownloader: Send + Sync {
    /// Download `reference` at `version` (empty = latest) into `dest`
    async fn download_to(&self, reference: &str, version: &str, dest: &Path) -> Result<DownloadedChart>;
}

/// Downloads charts from the repositories in the repository file
#[derive(Debug, Clone)]
pub struct RepoChartDownloader {
    repository_config: PathBuf,
    repository_cache: PathBuf,
    http: HttpOptions,
}

impl RepoChartDownloader {
    pub fn new(repository_config: impl Into<PathBuf>, repository_cache: impl Into<PathBuf>) -> Self {
        Self {
            repository_config: repository_config.into(),
            repository_cache: repository_cache.into(),
            http: HttpOptions::default(),
        }
    }

    pub fn with_http_options(mut self, http: HttpOptions) -> Self {
        self.http = http;
        self
    }

    async fn download_from_repository(
        &self,
        reference: &str,
        repo_name: &str,
        chart_name: &str,
        version: &str,
        dest: &Path,
    ) -> Result<DownloadedChart> {
        let file = RepositoryFile::load(&self.repository_config)?;
        let entry = file
            .get(repo_name)
            .cloned()
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: repo_name.to_string(),
            })?;

        let repository = ChartRepository::new(entry, &self.repository_cache, &self.http)?;
        let index = repository.load_index().await?;

        let chart = index.get(chart_name, version).ok_or_else(|| {
            if version.trim().is_empty() || index.entries.get(chart_name).is_none() {
                RepoError::ChartNotFound {
                    name: chart_name.to_string(),
                    repo: repo_name.to_string(),
                }
            } else {
                RepoError::VersionNotFound {
                    name: chart_name.to_string(),
                    version: version.to_string(),
                    repo: repo_name.to_string(),
                }
            }
        })?;

        let url = chart.download_url().ok_or_else(|| RepoError::ChartNotFound {
            name: format!("{} {} (no download URL)", chart_name, chart.version),
            repo: repo_name.to_string(),
        })?;

        let bytes = repository.fetch(url).await?;
        let verification = verify(reference, &bytes, chart.digest.as_deref())?;
        let path = write_archive(dest, &archive_file_name(url, chart_name, &chart.version), &bytes)?;

        tracing::info!(
            chart = %chart_name,
            version = %chart.version,
            repository = %repo_name,
            path = %path.display(),
            "chart downloaded"
        );
        Ok(DownloadedChart { path, verification })
    }

    async fn download_url(&self, url: &str, dest: &Path) -> Result<DownloadedChart> {
        // A direct URL may still belong to a configured repository and its credentials
        let file = RepositoryFile::load(&self.repository_config)?;
        let entry = file
            .repositories
            .iter()
            .find(|r| url.starts_with(r.url.trim_end_matches('/')))
            .cloned()
            .unwrap_or_else(|| RepositoryEntry::new("", url));

        let client = RepositoryClient::for_entry(&entry, &self.http)?;
        let bytes = client.get_bytes(url, &entry.url).await?;
        let verification = verify(url, &bytes, None)?;
        let path = write_archive(dest, &archive_file_name(url, "chart", "latest"), &bytes)?;
        Ok(DownloadedChart { path, verification })
    }
}

#[async_trait]
impl ChartDownloader for RepoChartDownloader {
    async fn download_to(&self, reference: &str, version: &str, dest: &Path) -> Result<DownloadedChart> {
        let reference = reference.trim();

        if reference.starts_with("http://") || reference.starts_with("https://") {
            return self.download_url(reference, dest).await;
        }

        let (repo_name, chart_name) = split_reference(reference)?;
        self.download_from_repository(reference, repo_name, chart_name, version, dest)
            .await
    }
}

/// Split `repo/chart` into its two parts
pub fn split_reference(reference: &str) -> Result<(&str, &str)> {
    match reference.split_once('/') {
        Some((repo, chart)) if !repo.is_empty() && !chart.is_empty() && !chart.contains('/') => {
            Ok((repo, chart))
        }
        _ => Err(RepoError::InvalidReference {
            reference: reference.to_string(),
            reason: "expected <repository>/<chart>".to_string(),
        }),
    }
}

/// `sha256:<hex>` digest of a byte slice
pub fn compute_digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Check if two digests match (with or without the `sha256:` prefix)
fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |d: &str| {
        d.trim()
            .to_lowercase()
            .trim_start_matches("sha256:")
            .trim_start_matches("sha256-")
            .to_string()
    };
    normalize(expected) == normalize(actual)
}

pub(crate) fn verify(name: &str, bytes: &[u8], expected: Option<&str>) -> Result<Verification> {
    let digest = compute_digest(bytes);
    match expected.filter(|d| !d.trim().is_empty()) {
        Some(expected) if !digest_matches(expected, &digest) => Err(RepoError::IntegrityMismatch {
            name: name.to_string(),
            expected: expected.to_string(),
            actual: digest,
        }),
        Some(_) => Ok(Verification {
            digest,
            verified: true,
        }),
        None => Ok(Verification {
            digest,
            verified: false,
        }),
    }
}

/// File name for a downloaded archive, taken from its URL when possible
fn archive_file_name(url: &str, chart_name: &str, version: &str) -> String {
    let from_url = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(String::from))
        })
        .or_else(|| url.rsplit('/').next().map(String::from))
        .filter(|name| charter_core::is_chart_archive(Path::new(name)));

    from_url.unwrap_or_else(|| format!("{}-{}.tgz", chart_name, version))
}

fn write_archive(dest: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    ensure_dir(dest)?;
    let path = dest.join(file_name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}
