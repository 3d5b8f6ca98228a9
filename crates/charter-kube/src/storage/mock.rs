//! Mock storage driver for testing
//!
//! Stores releases in memory, so release transitions can be exercised
//! without a Kubernetes cluster.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{StorageDriver, latest_per_name};
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// namespace -> name -> revision -> release
type Store = HashMap<String, HashMap<String, BTreeMap<u32, StoredRelease>>>;

/// In-memory storage driver for testing
#[derive(Clone, Default)]
pub struct MockStorageDriver {
    store: Arc<RwLock<Store>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl MockStorageDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<StoredRelease>) -> Self {
        let driver = Self::new();
        if let Ok(mut store) = driver.store.write() {
            for release in releases {
                store
                    .entry(release.namespace.clone())
                    .or_default()
                    .entry(release.name.clone())
                    .or_default()
                    .insert(release.revision, release);
            }
        }
        driver
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    /// Every stored revision, in no particular order
    pub fn all_releases(&self) -> Vec<StoredRelease> {
        self.store
            .read()
            .map(|store| {
                store
                    .values()
                    .flat_map(|ns| ns.values())
                    .flat_map(|revisions| revisions.values())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn count(&self, op: impl FnOnce(&mut OperationCounts)) {
        if let Ok(mut ops) = self.operations.write() {
            op(&mut ops);
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>> {
        self.store
            .read()
            .map_err(|_| KubeError::Storage("mock store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>> {
        self.store
            .write()
            .map_err(|_| KubeError::Storage("mock store lock poisoned".to_string()))
    }
}

fn not_found(namespace: &str, name: &str) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

#[async_trait]
impl StorageDriver for MockStorageDriver {
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease> {
        self.count(|ops| ops.gets += 1);
        self.read()?
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|revisions| revisions.get(&revision))
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn get_latest(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.count(|ops| ops.gets += 1);
        self.read()?
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .and_then(|revisions| revisions.values().next_back())
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<StoredRelease>> {
        self.count(|ops| ops.lists += 1);
        let releases: Vec<StoredRelease> = self
            .read()?
            .get(namespace)
            .map(|ns| {
                ns.values()
                    .flat_map(|revisions| revisions.values())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(latest_per_name(releases))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.count(|ops| ops.lists += 1);
        let releases: Vec<StoredRelease> = self
            .read()?
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .map(|revisions| revisions.values().rev().cloned().collect())
            .unwrap_or_default();

        if releases.is_empty() {
            return Err(not_found(namespace, name));
        }
        Ok(releases)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        self.count(|ops| ops.creates += 1);
        let mut store = self.write()?;
        let revisions = store
            .entry(release.namespace.clone())
            .or_default()
            .entry(release.name.clone())
            .or_default();

        if revisions.contains_key(&release.revision) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            });
        }

        revisions.insert(release.revision, release.clone());
        Ok(())
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        self.count(|ops| ops.updates += 1);
        let mut store = self.write()?;
        let slot = store
            .get_mut(&release.namespace)
            .and_then(|ns| ns.get_mut(&release.name))
            .and_then(|revisions| revisions.get_mut(&release.revision))
            .ok_or_else(|| not_found(&release.namespace, &release.name))?;
        *slot = release.clone();
        Ok(())
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.count(|ops| ops.deletes += 1);
        let releases: Vec<StoredRelease> = self
            .write()?
            .get_mut(namespace)
            .and_then(|ns| ns.remove(name))
            .map(|revisions| revisions.into_values().rev().collect())
            .unwrap_or_default();

        if releases.is_empty() {
            return Err(not_found(namespace, name));
        }
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{ChartInfo, ReleaseState};
    use charter_core::Values;

    fn create_test_release(name: &str, namespace: &str, revision: u32) -> StoredRelease {
        let mut release = StoredRelease::for_install(
            name.to_string(),
            namespace.to_string(),
            ChartInfo {
                name: "test-chart".to_string(),
                version: "1.0.0".to_string(),
                chart_type: None,
                app_version: None,
            },
            Values::new(),
            String::new(),
        );
        release.revision = revision;
        release.state = ReleaseState::Deployed;
        release
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let driver = MockStorageDriver::new();
        driver
            .create(&create_test_release("web", "default", 1))
            .await
            .unwrap();

        assert_eq!(driver.get("default", "web", 1).await.unwrap().revision, 1);
        assert!(matches!(
            driver.get("default", "web", 2).await.unwrap_err(),
            KubeError::ReleaseNotFound { .. }
        ));
        assert!(matches!(
            driver
                .create(&create_test_release("web", "default", 1))
                .await
                .unwrap_err(),
            KubeError::ReleaseAlreadyExists { .. }
        ));

        let counts = driver.operation_counts();
        assert_eq!(counts.creates, 2);
        assert_eq!(counts.gets, 2);
    }

    #[tokio::test]
    async fn test_latest_history_and_list() {
        let driver = MockStorageDriver::with_releases(vec![
            create_test_release("web", "default", 1),
            create_test_release("web", "default", 2),
            create_test_release("api", "default", 1),
            create_test_release("web", "other", 5),
        ]);

        assert_eq!(driver.get_latest("default", "web").await.unwrap().revision, 2);

        let history: Vec<_> = driver
            .history("default", "web")
            .await
            .unwrap()
            .iter()
            .map(|r| r.revision)
            .collect();
        assert_eq!(history, vec![2, 1]);

        let listed: Vec<_> = driver
            .list("default")
            .await
            .unwrap()
            .iter()
            .map(|r| (r.name.clone(), r.revision))
            .collect();
        assert_eq!(listed, vec![("api".to_string(), 1), ("web".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_update_requires_existing_revision() {
        let driver = MockStorageDriver::new();
        let mut release = create_test_release("web", "default", 1);
        assert!(driver.update(&release).await.is_err());

        driver.create(&release).await.unwrap();
        release.mark_superseded();
        driver.update(&release).await.unwrap();
        assert_eq!(
            driver.get("default", "web", 1).await.unwrap().state,
            ReleaseState::Superseded
        );
    }

    #[tokio::test]
    async fn test_delete_all() {
        let driver = MockStorageDriver::with_releases(vec![
            create_test_release("web", "default", 1),
            create_test_release("web", "default", 2),
        ]);

        let deleted = driver.delete_all("default", "web").await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(driver.all_releases().is_empty());
        assert!(driver.delete_all("default", "web").await.is_err());
    }
}
