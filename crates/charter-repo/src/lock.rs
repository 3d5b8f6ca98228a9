//! `Chart.lock`: the exact dependency versions last written to `charts/`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use charter_core::Dependency;

use crate::downloader::compute_digest;
use crate::error::Result;

/// Lock file name, next to `Chart.yaml`
pub const LOCK_FILE: &str = "Chart.lock";

/// Resolved dependencies of a chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartLock {
    /// Exact versions placed under `charts/`
    #[serde(default)]
    pub dependencies: Vec<LockedDependency>,

    /// Digest of the declared dependency list the lock was resolved from
    pub digest: String,

    pub generated: DateTime<Utc>,
}

/// A dependency pinned to one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedDependency {
    pub name: String,

    /// Exact resolved version (not a range)
    pub version: String,

    #[serde(default)]
    pub repository: String,
}

impl ChartLock {
    pub fn new(declared: &[Dependency], dependencies: Vec<LockedDependency>) -> Result<Self> {
        Ok(Self {
            dependencies,
            digest: declared_digest(declared)?,
            generated: Utc::now(),
        })
    }

    /// Read `Chart.lock` from a chart directory, `None` when absent
    pub fn load(chart_dir: &Path) -> Result<Option<Self>> {
        let path = chart_dir.join(LOCK_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_yaml::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `Chart.lock` into a chart directory
    pub fn save(&self, chart_dir: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(chart_dir.join(LOCK_FILE), content)?;
        Ok(())
    }

    /// Whether the declared dependencies changed since the lock was written
    pub fn is_outdated(&self, declared: &[Dependency]) -> Result<bool> {
        Ok(self.digest != declared_digest(declared)?)
    }

    pub fn get(&self, name: &str) -> Option<&LockedDependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}

fn declared_digest(declared: &[Dependency]) -> Result<String> {
    let serialized = serde_yaml::to_string(declared)?;
    Ok(compute_digest(serialized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn redis(version: &str) -> Dependency {
        Dependency {
            name: "redis".to_string(),
            version: version.to_string(),
            repository: "@stable".to_string(),
            condition: None,
            tags: vec![],
            alias: None,
        }
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        assert!(ChartLock::load(temp.path()).unwrap().is_none());

        let lock = ChartLock::new(
            &[redis("17.x")],
            vec![LockedDependency {
                name: "redis".to_string(),
                version: "17.3.0".to_string(),
                repository: "@stable".to_string(),
            }],
        )
        .unwrap();
        lock.save(temp.path()).unwrap();

        let loaded = ChartLock::load(temp.path()).unwrap().unwrap();
        assert_eq!(loaded, lock);
        assert_eq!(loaded.get("redis").unwrap().version, "17.3.0");
    }

    #[test]
    fn test_outdated_when_constraint_changes() {
        let lock = ChartLock::new(&[redis("17.x")], vec![]).unwrap();
        assert!(!lock.is_outdated(&[redis("17.x")]).unwrap());
        assert!(lock.is_outdated(&[redis("18.x")]).unwrap());
    }
}
