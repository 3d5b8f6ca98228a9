//! Repository file management
//!
//! Stores the set of known chart repositories in `repositories.yaml`,
//! by default under `~/.config/charter/`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};

/// Permission bits for directories holding repository state
pub const DATA_DIR_MODE: u32 = 0o755;

/// Permission bits for the repository file (it may carry passwords)
pub const REPOSITORY_FILE_MODE: u32 = 0o600;

/// Repository file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryFile {
    #[serde(default)]
    pub api_version: String,

    /// When the file was last written
    #[serde(default = "Utc::now")]
    pub generated: DateTime<Utc>,

    /// Configured repositories, unique by name
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
}

impl Default for RepositoryFile {
    fn default() -> Self {
        Self {
            api_version: String::new(),
            generated: Utc::now(),
            repositories: Vec::new(),
        }
    }
}

impl RepositoryFile {
    /// Load the repository file
    ///
    /// A missing file is an empty repository set. Any other read or parse
    /// failure is reported as [`RepoError::RepositoryFile`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(RepoError::RepositoryFile {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|e| RepoError::RepositoryFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Write the repository file with restrictive permissions
    ///
    /// The content goes to a sibling temp file first and is renamed into
    /// place, so readers never observe a half-written file.
    pub fn write(&mut self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }

        self.generated = Utc::now();
        let content = serde_yaml::to_string(self)?;

        let tmp = path.with_extension("yaml.tmp");
        {
            let mut options = std::fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(REPOSITORY_FILE_MODE);
            }
            let mut file = options.open(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Get a repository by name
    pub fn get(&self, name: &str) -> Option<&RepositoryEntry> {
        self.repositories.iter().find(|r| r.name == name)
    }

    /// Whether a repository with this name is configured
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace a repository, keyed by name
    ///
    /// Returns `true` when an existing entry was replaced.
    pub fn update(&mut self, entry: RepositoryEntry) -> bool {
        match self.repositories.iter_mut().find(|r| r.name == entry.name) {
            Some(existing) => {
                *existing = entry;
                true
            }
            None => {
                self.repositories.push(entry);
                false
            }
        }
    }

    /// Remove a repository by name
    pub fn remove(&mut self, name: &str) -> Result<RepositoryEntry> {
        let idx = self
            .repositories
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: name.to_string(),
            })?;
        Ok(self.repositories.remove(idx))
    }

    /// Find the repository serving a URL
    pub fn find_by_url(&self, url: &str) -> Option<&RepositoryEntry> {
        let wanted = url.trim_end_matches('/');
        self.repositories
            .iter()
            .find(|r| r.url.trim_end_matches('/') == wanted)
    }

    /// List all repository names
    pub fn names(&self) -> Vec<&str> {
        self.repositories.iter().map(|r| r.name.as_str()).collect()
    }
}

/// A configured chart repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    /// Unique name for this repository
    pub name: String,

    /// Repository base URL
    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Client certificate (PEM)
    #[serde(rename = "certFile", default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,

    /// Client key (PEM)
    #[serde(rename = "keyFile", default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,

    /// CA bundle (PEM)
    #[serde(rename = "caFile", default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// Send credentials to every host, not only the repository's own
    #[serde(default)]
    pub pass_credentials_all: bool,
}

impl RepositoryEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_insecure_skip_tls_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_tls_verify = insecure;
        self
    }

    /// Whether basic credentials are configured
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }
}

/// Create a directory (and parents) with [`DATA_DIR_MODE`]
///
/// An existing directory is not an error.
pub fn ensure_dir(path: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DATA_DIR_MODE);
    }
    match builder.create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Default repository file location
pub fn default_repository_config() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| RepoError::RepositoryFile {
        path: "repositories.yaml".to_string(),
        message: "Could not determine config directory".to_string(),
    })?;
    Ok(config_dir.join("charter").join("repositories.yaml"))
}

/// Default repository cache location
pub fn default_repository_cache() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir().ok_or_else(|| RepoError::RepositoryFile {
        path: "repository".to_string(),
        message: "Could not determine cache directory".to_string(),
    })?;
    Ok(cache_dir.join("charter").join("repository"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let file = RepositoryFile::load(&temp.path().join("repositories.yaml")).unwrap();
        assert!(file.repositories.is_empty());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repositories.yaml");
        std::fs::write(&path, "repositories: [unterminated").unwrap();

        let err = RepositoryFile::load(&path).unwrap_err();
        assert!(matches!(err, RepoError::RepositoryFile { .. }));
    }

    #[test]
    fn test_update_is_an_upsert() {
        let mut file = RepositoryFile::default();
        assert!(!file.update(RepositoryEntry::new("stable", "https://a.example.com")));
        assert!(!file.update(RepositoryEntry::new("bitnami", "https://b.example.com")));
        assert!(file.update(RepositoryEntry::new("stable", "https://c.example.com")));

        assert_eq!(file.names(), vec!["stable", "bitnami"]);
        assert_eq!(file.get("stable").unwrap().url, "https://c.example.com");
    }

    #[test]
    fn test_write_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("repositories.yaml");

        let mut file = RepositoryFile::default();
        file.update(
            RepositoryEntry::new("stable", "https://charts.example.com")
                .with_basic_auth("admin", "s3cret")
                .with_insecure_skip_tls_verify(true),
        );
        file.write(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("insecure_skip_tls_verify: true"));
        assert!(!temp.path().join("nested").join("repositories.yaml.tmp").exists());

        let reloaded = RepositoryFile::load(&path).unwrap();
        assert_eq!(reloaded.repositories, file.repositories);
        assert!(reloaded.get("stable").unwrap().has_credentials());
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_is_not_world_writable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("repositories.yaml");
        RepositoryFile::default().write(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o002, 0);
    }

    #[test]
    fn test_ensure_dir_tolerates_existing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a").join("b");
        ensure_dir(&dir).unwrap();
        ensure_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_find_by_url_ignores_trailing_slash() {
        let mut file = RepositoryFile::default();
        file.update(RepositoryEntry::new("stable", "https://charts.example.com/"));
        assert_eq!(
            file.find_by_url("https://charts.example.com").map(|r| r.name.as_str()),
            Some("stable")
        );
    }
}
