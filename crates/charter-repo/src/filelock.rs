//! Exclusive advisory lock around repository file mutation

use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::config::ensure_dir;
use crate::error::{RepoError, Result};

/// Held exclusive lock on a repository file
///
/// The lock lives in a sibling `<stem>.lock` file and is released when the
/// guard is dropped.
#[derive(Debug)]
pub struct RepositoryFileLock {
    _file: File,
    path: PathBuf,
}

impl RepositoryFileLock {
    /// Block until the lock for `repository_file` is acquired
    pub fn acquire(repository_file: &Path) -> Result<Self> {
        let path = lock_path(repository_file);
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }

        let lock_err = |e: std::io::Error| RepoError::Lock {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;
        file.lock_exclusive().map_err(lock_err)?;

        tracing::debug!(lock = %path.display(), "acquired repository file lock");
        Ok(Self { _file: file, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `repositories.yaml` is guarded by `repositories.lock`
pub fn lock_path(repository_file: &Path) -> PathBuf {
    repository_file.with_extension("lock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path() {
        assert_eq!(
            lock_path(Path::new("/home/u/.config/charter/repositories.yaml")),
            PathBuf::from("/home/u/.config/charter/repositories.lock")
        );
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let temp = TempDir::new().unwrap();
        let repo_file = temp.path().join("config").join("repositories.yaml");

        let guard = RepositoryFileLock::acquire(&repo_file).unwrap();
        assert!(guard.path().exists());

        let (tx, rx) = mpsc::channel();
        let contender = repo_file.clone();
        let handle = std::thread::spawn(move || {
            let _second = RepositoryFileLock::acquire(&contender).unwrap();
            tx.send(()).unwrap();
        });

        // The second acquisition must wait for the first guard
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }
}
