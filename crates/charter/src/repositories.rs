//! Repository management with workflow-level errors

use charter_repo::{RepositoryEntry, RepositoryIndexStore};

use crate::error::{ChartError, Result};
use crate::settings::Settings;

/// The repository file and index cache named by [`Settings`]
pub struct Repositories {
    store: RepositoryIndexStore,
}

impl Repositories {
    pub fn new(settings: &Settings) -> Self {
        Self {
            store: RepositoryIndexStore::new(&settings.repository_config, &settings.repository_cache)
                .with_http_options(settings.http_options()),
        }
    }

    pub fn store(&self) -> &RepositoryIndexStore {
        &self.store
    }

    /// Fetch the entry's index and upsert the entry into the repository file
    pub async fn add_repository(&self, entry: RepositoryEntry) -> Result<()> {
        self.store
            .add_repository(entry)
            .await
            .map_err(|e| ChartError::from_repo(e, self.store.repository_config()))
    }

    /// Refresh every configured index, returning the refreshed names
    pub async fn update_repositories(&self) -> Result<Vec<String>> {
        self.store
            .update_repositories()
            .await
            .map_err(|e| ChartError::from_repo(e, self.store.repository_config()))
    }

    pub fn remove_repository(&self, name: &str) -> Result<RepositoryEntry> {
        self.store
            .remove_repository(name)
            .map_err(|e| ChartError::from_repo(e, self.store.repository_config()))
    }

    pub fn list_repositories(&self) -> Result<Vec<RepositoryEntry>> {
        self.store
            .load()
            .map(|file| file.repositories)
            .map_err(|e| ChartError::from_repo(e, self.store.repository_config()))
    }
}
