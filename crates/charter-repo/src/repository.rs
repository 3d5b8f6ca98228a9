//! A single chart repository and its cached index

use std::path::{Path, PathBuf};

use crate::config::{RepositoryEntry, ensure_dir};
use crate::error::{RepoError, Result};
use crate::http::{HttpOptions, RepositoryClient, index_url, resolve_reference_url};
use crate::index::RepositoryIndex;

/// Cached index location for a repository
pub fn index_cache_path(cache_dir: &Path, repository: &str) -> PathBuf {
    cache_dir.join(format!("{}-index.yaml", repository))
}

/// Cached chart-name list location for a repository
pub fn charts_cache_path(cache_dir: &Path, repository: &str) -> PathBuf {
    cache_dir.join(format!("{}-charts.txt", repository))
}

/// A chart repository bound to the shared cache directory
#[derive(Debug, Clone)]
pub struct ChartRepository {
    entry: RepositoryEntry,
    cache_dir: PathBuf,
    client: RepositoryClient,
}

impl ChartRepository {
    pub fn new(entry: RepositoryEntry, cache_dir: impl Into<PathBuf>, options: &HttpOptions) -> Result<Self> {
        index_url(&entry.url)?;
        let client = RepositoryClient::for_entry(&entry, options)?;
        Ok(Self {
            entry,
            cache_dir: cache_dir.into(),
            client,
        })
    }

    pub fn entry(&self) -> &RepositoryEntry {
        &self.entry
    }

    /// Where this repository's index is cached
    pub fn index_path(&self) -> PathBuf {
        index_cache_path(&self.cache_dir, &self.entry.name)
    }

    /// Download the repository index and store it in the cache
    ///
    /// The index is parsed before it is written, so a server answering with
    /// something that is not an index never replaces a good cached copy.
    pub async fn download_index_file(&self) -> Result<PathBuf> {
        let url = index_url(&self.entry.url)?;
        tracing::debug!(repository = %self.entry.name, %url, "downloading repository index");

        let bytes = self.client.get_bytes(&url, &self.entry.url).await?;
        let index = RepositoryIndex::from_bytes(&bytes)?;

        ensure_dir(&self.cache_dir)?;
        let index_path = self.index_path();
        std::fs::write(&index_path, &bytes)?;

        let mut names = index.names().join("\n");
        names.push('\n');
        std::fs::write(charts_cache_path(&self.cache_dir, &self.entry.name), names)?;

        tracing::info!(
            repository = %self.entry.name,
            charts = index.entries.len(),
            path = %index_path.display(),
            "repository index cached"
        );
        Ok(index_path)
    }

    /// Load the cached index, downloading it first if it is not cached yet
    pub async fn load_index(&self) -> Result<RepositoryIndex> {
        let path = self.index_path();
        if !path.exists() {
            self.download_index_file().await?;
        }
        RepositoryIndex::load(&path)
    }

    /// Download a chart archive referenced by the index
    pub async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let url = resolve_reference_url(&self.entry.url, reference)?;
        tracing::debug!(repository = %self.entry.name, %url, "downloading chart archive");
        self.client.get_bytes(&url, &self.entry.url).await
    }
}

/// Map a failed index download to the unreachable-repository error
pub(crate) fn unreachable(entry: &RepositoryEntry, err: RepoError) -> RepoError {
    match err {
        RepoError::RepositoryUnreachable { .. } => err,
        other => RepoError::RepositoryUnreachable {
            name: entry.name.clone(),
            url: entry.url.clone(),
            message: other.to_string(),
        },
    }
}
