//! Repository index types
//!
//! The `index.yaml` served at the root of every chart repository

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use charter_core::Dependency;
use charter_core::chart::parse_version_req;

use crate::error::{RepoError, Result};

/// Repository index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// When this index was generated
    #[serde(default = "Utc::now")]
    pub generated: DateTime<Utc>,

    /// Chart versions indexed by chart name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartVersion>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl Default for RepositoryIndex {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            generated: Utc::now(),
            entries: HashMap::new(),
        }
    }
}

impl RepositoryIndex {
    /// Parse index from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let index: Self = serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })?;
        if index.api_version.is_empty() {
            return Err(RepoError::IndexParseError {
                message: "no API version specified".to_string(),
            });
        }
        Ok(index)
    }

    /// Parse index from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Load a cached index file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Look up a chart version
    ///
    /// An empty `version` selects the latest stable release. A full version
    /// must match exactly; anything else is treated as a semver constraint
    /// and the highest match wins.
    pub fn get(&self, name: &str, version: &str) -> Option<&ChartVersion> {
        let version = version.trim();
        if version.is_empty() {
            return self.get_latest(name);
        }
        if Version::parse(version.trim_start_matches('v')).is_ok() {
            return self.get_version(name, version);
        }
        parse_version_req(version)
            .ok()
            .and_then(|req| self.best_match(name, &req))
    }

    /// Get the latest non-prerelease version of a chart
    ///
    /// Falls back to the highest prerelease when nothing stable exists.
    pub fn get_latest(&self, name: &str) -> Option<&ChartVersion> {
        let versions = self.entries.get(name)?;
        let newest = |stable_only: bool| {
            versions
                .iter()
                .filter_map(|e| e.parsed_version().map(|v| (v, e)))
                .filter(|(v, _)| !stable_only || v.pre.is_empty())
                .max_by(|(a, _), (b, _)| a.cmp(b))
                .map(|(_, e)| e)
        };
        newest(true).or_else(|| newest(false))
    }

    /// Get a specific version of a chart
    pub fn get_version(&self, name: &str, version: &str) -> Option<&ChartVersion> {
        let wanted = version.trim_start_matches('v');
        self.entries
            .get(name)?
            .iter()
            .find(|e| e.version.trim_start_matches('v') == wanted)
    }

    /// Find the highest version matching a constraint
    pub fn best_match(&self, name: &str, req: &VersionReq) -> Option<&ChartVersion> {
        self.entries
            .get(name)?
            .iter()
            .filter_map(|e| e.parsed_version().map(|v| (v, e)))
            .filter(|(v, _)| req.matches(v))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, e)| e)
    }

    /// Resolve a dependency's constraint to a concrete chart version
    pub fn resolve(&self, dependency: &Dependency) -> Result<&ChartVersion> {
        let versions = self
            .entries
            .get(&dependency.name)
            .ok_or_else(|| RepoError::ChartNotFound {
                name: dependency.name.clone(),
                repo: dependency.repository.clone(),
            })?;

        if let Some(exact) = self.get_version(&dependency.name, dependency.version.trim()) {
            return Ok(exact);
        }

        let req = dependency.version_req()?;
        self.best_match(&dependency.name, &req)
            .ok_or_else(|| RepoError::UnsatisfiableConstraint {
                name: dependency.name.clone(),
                constraint: dependency.version.clone(),
                available: versions
                    .iter()
                    .map(|e| e.version.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// List all chart names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// One version of a chart in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    pub name: String,

    /// Chart version (semver)
    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// URLs to download the chart archive, absolute or relative to the repository
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deprecated: bool,

    #[serde(default)]
    pub api_version: Option<String>,

    /// Chart type (application or library)
    #[serde(default, rename = "type")]
    pub chart_type: Option<String>,
}

impl ChartVersion {
    /// Get the primary download URL
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }

    /// Parse version as semver
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(self.version.trim_start_matches('v')).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> RepositoryIndex {
        let yaml = r#"
apiVersion: v1
entries:
  app:
    - name: app
      version: 1.3.0
      urls: [app-1.3.0.tgz]
      digest: sha256:abc
    - name: app
      version: 1.2.0
      urls: [app-1.2.0.tgz]
    - name: app
      version: 2.0.0-rc.1
      urls: [app-2.0.0-rc.1.tgz]
  redis:
    - name: redis
      version: 17.3.0
      urls: [https://cdn.example.com/redis-17.3.0.tgz]
    - name: redis
      version: 18.0.1
      urls: [https://cdn.example.com/redis-18.0.1.tgz]
"#;
        RepositoryIndex::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_latest_skips_prereleases() {
        let index = sample_index();
        assert_eq!(index.get("app", "").unwrap().version, "1.3.0");
        assert_eq!(index.get_latest("redis").unwrap().version, "18.0.1");
    }

    #[test]
    fn test_exact_version() {
        let index = sample_index();
        let entry = index.get("app", "1.2.0").unwrap();
        assert_eq!(entry.download_url(), Some("app-1.2.0.tgz"));
        assert!(index.get("app", "1.1.0").is_none());
        assert!(index.get("app", "1.2.5").is_none());
        assert!(index.get("missing", "").is_none());
    }

    #[test]
    fn test_constraint_lookup() {
        let index = sample_index();
        assert_eq!(index.get("redis", "^17").unwrap().version, "17.3.0");
        assert_eq!(index.get("redis", ">= 17.0.0").unwrap().version, "18.0.1");
    }

    #[test]
    fn test_resolve_dependency() {
        let index = sample_index();
        let dep = |version: &str| Dependency {
            name: "redis".to_string(),
            version: version.to_string(),
            repository: "https://charts.example.com".to_string(),
            condition: None,
            tags: vec![],
            alias: None,
        };

        assert_eq!(index.resolve(&dep("17.x")).unwrap().version, "17.3.0");
        let err = index.resolve(&dep(">= 19.0.0")).unwrap_err();
        assert!(matches!(err, RepoError::UnsatisfiableConstraint { .. }));
        assert!(err.to_string().contains("17.3.0, 18.0.1"));
    }

    #[test]
    fn test_missing_api_version_rejected() {
        let err = RepositoryIndex::from_yaml("apiVersion: \"\"\nentries: {}\n").unwrap_err();
        assert!(matches!(err, RepoError::IndexParseError { .. }));
        assert!(RepositoryIndex::from_bytes(b"<html>not an index</html>").is_err());
    }

    #[test]
    fn test_names_sorted() {
        assert_eq!(sample_index().names(), vec!["app", "redis"]);
    }
}
