//! Known repositories and their cached indices

use std::path::{Path, PathBuf};

use crate::config::{RepositoryEntry, RepositoryFile, ensure_dir};
use crate::error::{RepoError, Result};
use crate::filelock::RepositoryFileLock;
use crate::http::HttpOptions;
use crate::repository::{ChartRepository, charts_cache_path, index_cache_path, unreachable};

/// Persists the repository file and refreshes cached indices
#[derive(Debug, Clone)]
pub struct RepositoryIndexStore {
    repository_config: PathBuf,
    repository_cache: PathBuf,
    http: HttpOptions,
}

impl RepositoryIndexStore {
    pub fn new(repository_config: impl Into<PathBuf>, repository_cache: impl Into<PathBuf>) -> Self {
        Self {
            repository_config: repository_config.into(),
            repository_cache: repository_cache.into(),
            http: HttpOptions::default(),
        }
    }

    /// Transport options applied to every repository client
    pub fn with_http_options(mut self, http: HttpOptions) -> Self {
        self.http = http;
        self
    }

    pub fn repository_config(&self) -> &Path {
        &self.repository_config
    }

    pub fn repository_cache(&self) -> &Path {
        &self.repository_cache
    }

    /// Read the repository file (missing file = no repositories)
    pub fn load(&self) -> Result<RepositoryFile> {
        RepositoryFile::load(&self.repository_config)
    }

    /// Add or update a repository
    ///
    /// The index is downloaded and cached before the repository file is
    /// touched, so an unreachable repository never ends up configured.
    /// Only the local read-modify-write runs under the repository file lock;
    /// the lock is never held across a network call.
    pub async fn add_repository(&self, entry: RepositoryEntry) -> Result<()> {
        if let Some(parent) = self.repository_config.parent() {
            ensure_dir(parent)?;
        }

        let repository = ChartRepository::new(entry.clone(), &self.repository_cache, &self.http)?;
        repository
            .download_index_file()
            .await
            .map_err(|e| unreachable(&entry, e))?;

        let replaced = {
            let _lock = RepositoryFileLock::acquire(&self.repository_config)?;
            let mut file = self.load()?;
            let replaced = file.update(entry.clone());
            file.write(&self.repository_config)?;
            replaced
        };

        tracing::info!(
            repository = %entry.name,
            url = %entry.url,
            replaced,
            "repository added"
        );
        Ok(())
    }

    /// Refresh the cached index of every configured repository
    ///
    /// All repositories are attempted; the first failure is returned after
    /// the others have been refreshed.
    pub async fn update_repositories(&self) -> Result<Vec<String>> {
        let file = self.load()?;
        let mut updated = Vec::new();
        let mut first_error = None;

        for entry in &file.repositories {
            let result = match ChartRepository::new(entry.clone(), &self.repository_cache, &self.http) {
                Ok(repository) => repository
                    .download_index_file()
                    .await
                    .map(|_| ())
                    .map_err(|e| unreachable(entry, e)),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => updated.push(entry.name.clone()),
                Err(e) => {
                    tracing::warn!(repository = %entry.name, error = %e, "repository update failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(updated),
        }
    }

    /// Remove a repository and its cached index
    pub fn remove_repository(&self, name: &str) -> Result<RepositoryEntry> {
        let _lock = RepositoryFileLock::acquire(&self.repository_config)?;
        let mut file = self.load()?;
        let removed = file.remove(name)?;
        file.write(&self.repository_config)?;

        for cached in [
            index_cache_path(&self.repository_cache, name),
            charts_cache_path(&self.repository_cache, name),
        ] {
            match std::fs::remove_file(&cached) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RepoError::Io(e)),
            }
        }

        tracing::info!(repository = %name, "repository removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INDEX: &str = "apiVersion: v1\nentries: {}\n";

    async fn index_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INDEX))
            .mount(&server)
            .await;
        server
    }

    fn store(temp: &TempDir) -> RepositoryIndexStore {
        RepositoryIndexStore::new(
            temp.path().join("config").join("repositories.yaml"),
            temp.path().join("cache"),
        )
    }

    #[tokio::test]
    async fn test_add_repository_twice_keeps_one_entry() {
        let server = index_server().await;
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let entry = RepositoryEntry::new("stable", server.uri());
        store.add_repository(entry.clone()).await.unwrap();
        store.add_repository(entry).await.unwrap();

        let file = store.load().unwrap();
        assert_eq!(file.names(), vec!["stable"]);
        assert!(temp.path().join("cache").join("stable-index.yaml").exists());
    }

    #[tokio::test]
    async fn test_unreachable_repository_is_not_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let err = store
            .add_repository(RepositoryEntry::new("broken", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, RepoError::RepositoryUnreachable { ref name, .. } if name == "broken"));
        assert!(err.to_string().contains("is not a valid chart repository or cannot be reached"));
        assert!(store.load().unwrap().repositories.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_repository_file_is_not_unreachable() {
        let server = index_server().await;
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        std::fs::create_dir_all(temp.path().join("config")).unwrap();
        std::fs::write(store.repository_config(), "repositories: {broken").unwrap();

        let err = store
            .add_repository(RepositoryEntry::new("stable", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, RepoError::RepositoryFile { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_adds_on_one_thread_both_complete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(INDEX)
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let both = async {
            tokio::join!(
                store.add_repository(RepositoryEntry::new("stable", server.uri())),
                store.add_repository(RepositoryEntry::new("incubator", server.uri())),
            )
        };
        let (first, second) = tokio::time::timeout(Duration::from_secs(10), both)
            .await
            .expect("concurrent adds did not finish");
        first.unwrap();
        second.unwrap();

        let file = store.load().unwrap();
        let mut names = file.names();
        names.sort();
        assert_eq!(names, vec!["incubator", "stable"]);
    }

    #[tokio::test]
    async fn test_local_configuration_errors_are_not_unreachable() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let err = store
            .add_repository(RepositoryEntry::new("ftp", "ftp://charts.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidRepositoryUrl { .. }));

        let mut entry = RepositoryEntry::new("secure", "https://charts.example.com");
        entry.cert_file = Some(temp.path().join("cert.pem"));
        let err = store.add_repository(entry).await.unwrap_err();
        assert!(matches!(err, RepoError::Tls { .. }));

        assert!(store.load().unwrap().repositories.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let server = index_server().await;
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store
            .add_repository(RepositoryEntry::new("stable", server.uri()))
            .await
            .unwrap();
        std::fs::remove_file(temp.path().join("cache").join("stable-index.yaml")).unwrap();

        assert_eq!(store.update_repositories().await.unwrap(), vec!["stable"]);
        assert!(temp.path().join("cache").join("stable-index.yaml").exists());

        let removed = store.remove_repository("stable").unwrap();
        assert_eq!(removed.name, "stable");
        assert!(store.load().unwrap().repositories.is_empty());
        assert!(!temp.path().join("cache").join("stable-index.yaml").exists());
        assert!(matches!(
            store.remove_repository("stable").unwrap_err(),
            RepoError::RepositoryNotFound { .. }
        ));
    }
}
