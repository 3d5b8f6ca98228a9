//! Resolving a chart name or path to a local chart

use std::path::{Path, PathBuf};

use charter_repo::{ChartDownloader, ensure_dir};

use crate::error::{ChartError, Result, STALE_INDEX_HINT};

/// Resolves chart references to absolute local paths
///
/// Existing local paths win and never touch the network. Inputs that look
/// like paths but do not exist fail immediately. Anything else is
/// downloaded into the cache directory.
pub struct ChartLocator<D: ChartDownloader> {
    downloader: D,
    cache_dir: PathBuf,
}

impl<D: ChartDownloader> ChartLocator<D> {
    pub fn new(downloader: D, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloader,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn downloader(&self) -> &D {
        &self.downloader
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolve `name_or_path` at `version` (empty = latest)
    pub async fn locate(&self, name_or_path: &str, version: &str) -> Result<PathBuf> {
        let name = name_or_path.trim();
        let not_found = |message: String, help: Option<String>| ChartError::ChartNotFound {
            name: name.to_string(),
            version: version.to_string(),
            message,
            help,
        };

        let path = Path::new(name);
        if !name.is_empty() && path.exists() {
            let absolute = std::path::absolute(path).map_err(|e| not_found(e.to_string(), None))?;
            tracing::debug!(chart = %name, path = %absolute.display(), "using local chart");
            return Ok(absolute);
        }

        if path.is_absolute() || name.starts_with('.') {
            return Err(not_found("path not found".to_string(), None));
        }

        ensure_dir(&self.cache_dir).map_err(|e| not_found(e.to_string(), None))?;

        let downloaded = self
            .downloader
            .download_to(name, version, &self.cache_dir)
            .await
            .map_err(|e| not_found(e.to_string(), Some(STALE_INDEX_HINT.to_string())))?;

        std::path::absolute(&downloaded.path).map_err(|e| not_found(e.to_string(), None))
    }
}
