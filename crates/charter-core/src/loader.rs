//! Chart loading from a directory or a packaged archive

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::archive::{self, ChartFiles};
use crate::chart::{
    CHART_FILE, CHARTS_DIR, ChartMetadata, REQUIREMENTS_FILE, Requirements, TEMPLATES_DIR,
    VALUES_FILE,
};
use crate::error::{CoreError, Result};
use crate::values::Values;

/// A file belonging to a chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartFile {
    /// Path relative to the chart root, `/`-separated
    pub name: String,
    pub data: Vec<u8>,
}

/// A chart loaded into memory together with its subcharts
#[derive(Debug, Clone)]
pub struct LoadedChart {
    /// Parsed `Chart.yaml`
    pub metadata: ChartMetadata,

    /// Default values from `values.yaml`
    pub values: Values,

    /// Files under `templates/`, sorted by name
    pub templates: Vec<ChartFile>,

    /// Charts present under `charts/`, either unpacked or as archives
    pub subcharts: Vec<LoadedChart>,

    /// Where the chart was loaded from
    pub source: PathBuf,
}

impl LoadedChart {
    /// Load a chart from a directory or a `.tgz` archive
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CoreError::ChartNotFound {
                path: path.display().to_string(),
            });
        }

        if path.is_dir() {
            Self::load_dir(path)
        } else {
            Self::load_archive(path)
        }
    }

    /// Load an unpacked chart directory
    pub fn load_dir(root: &Path) -> Result<Self> {
        let files = read_chart_dir(root)?;
        Self::from_files(files, root.to_path_buf())
    }

    /// Load a packaged chart archive
    pub fn load_archive(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let files = archive::read_archive(&bytes).map_err(|e| CoreError::InvalidChart {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_files(files, path.to_path_buf())
    }

    /// Build a chart from its file set
    pub fn from_files(mut files: ChartFiles, source: PathBuf) -> Result<Self> {
        let invalid = |message: String| CoreError::InvalidChart {
            path: source.display().to_string(),
            message,
        };

        let chart_yaml = files
            .remove(CHART_FILE)
            .ok_or_else(|| invalid(format!("{} not found", CHART_FILE)))?;
        let chart_yaml = String::from_utf8(chart_yaml).map_err(|e| invalid(e.to_string()))?;
        let mut metadata = ChartMetadata::from_yaml(&chart_yaml).map_err(|e| invalid(e.to_string()))?;

        // apiVersion v1 charts declare dependencies in a separate file
        if let Some(requirements) = files.remove(REQUIREMENTS_FILE) {
            if metadata.api_version == "v1" && metadata.dependencies.is_empty() {
                let requirements: Requirements = serde_yaml::from_slice(&requirements)?;
                metadata.dependencies = requirements.dependencies;
            }
        }

        let values = match files.remove(VALUES_FILE) {
            Some(raw) => {
                let raw = String::from_utf8(raw).map_err(|e| invalid(e.to_string()))?;
                Values::from_yaml(&raw)?
            }
            None => Values::new(),
        };

        let templates_prefix = format!("{}/", TEMPLATES_DIR);
        let charts_prefix = format!("{}/", CHARTS_DIR);
        let mut templates = Vec::new();
        let mut archives: Vec<(String, Vec<u8>)> = Vec::new();
        let mut unpacked: BTreeMap<String, ChartFiles> = BTreeMap::new();

        for (name, data) in files {
            if name.starts_with(&templates_prefix) {
                templates.push(ChartFile { name, data });
            } else if let Some(rest) = name.strip_prefix(&charts_prefix) {
                match rest.split_once('/') {
                    Some((dir, inner)) => {
                        unpacked
                            .entry(dir.to_string())
                            .or_default()
                            .insert(inner.to_string(), data);
                    }
                    None if archive::is_chart_archive(Path::new(rest)) => {
                        archives.push((rest.to_string(), data));
                    }
                    None => {}
                }
            }
        }

        let mut subcharts = Vec::new();
        for (dir, sub_files) in unpacked {
            let sub_source = source.join(CHARTS_DIR).join(&dir);
            subcharts.push(Self::from_files(sub_files, sub_source)?);
        }
        for (file_name, bytes) in archives {
            let sub_source = source.join(CHARTS_DIR).join(&file_name);
            let sub_files = archive::read_archive(&bytes).map_err(|e| CoreError::InvalidChart {
                path: sub_source.display().to_string(),
                message: e.to_string(),
            })?;
            subcharts.push(Self::from_files(sub_files, sub_source)?);
        }

        Ok(Self {
            metadata,
            values,
            templates,
            subcharts,
            source,
        })
    }

    /// Chart name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Whether the chart may be installed or upgraded
    pub fn is_installable(&self) -> bool {
        self.metadata.is_installable()
    }

    /// Find a loaded subchart by name
    pub fn subchart(&self, name: &str) -> Option<&LoadedChart> {
        self.subcharts.iter().find(|c| c.metadata.name == name)
    }
}

/// Read every file of an unpacked chart, keyed by its `/`-separated relative path
pub fn read_chart_dir(root: &Path) -> Result<ChartFiles> {
    let mut files = ChartFiles::new();

    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::InvalidChart {
            path: root.display().to_string(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(name, std::fs::read(entry.path())?);
    }

    Ok(files)
}

/// Capability to turn a filesystem path into a loaded chart
pub trait ChartLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedChart>;
}

/// Loads charts from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsChartLoader;

impl ChartLoader for FsChartLoader {
    fn load(&self, path: &Path) -> Result<LoadedChart> {
        LoadedChart::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn create_test_chart(dir: &Path) {
        write(
            dir,
            "Chart.yaml",
            "apiVersion: v2\nname: web\nversion: 1.0.0\ndependencies:\n  - name: redis\n    version: 17.x\n    repository: https://charts.example.com\n",
        );
        write(dir, "values.yaml", "replicaCount: 1\n");
        write(dir, "templates/deployment.yaml", "kind: Deployment\n");
        write(dir, "templates/service.yaml", "kind: Service\n");
        write(dir, "README.md", "# web\n");
    }

    #[test]
    fn test_load_directory() {
        let temp = TempDir::new().unwrap();
        create_test_chart(temp.path());

        let chart = LoadedChart::load(temp.path()).unwrap();

        assert_eq!(chart.name(), "web");
        assert_eq!(chart.metadata.dependencies.len(), 1);
        assert_eq!(chart.values.get("replicaCount"), Some(&serde_json::json!(1)));
        let names: Vec<_> = chart.templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["templates/deployment.yaml", "templates/service.yaml"]);
        assert!(chart.subcharts.is_empty());
    }

    #[test]
    fn test_load_directory_with_unpacked_and_archived_subcharts() {
        let temp = TempDir::new().unwrap();
        create_test_chart(temp.path());
        write(
            temp.path(),
            "charts/common/Chart.yaml",
            "apiVersion: v2\nname: common\nversion: 2.0.0\ntype: library\n",
        );

        let mut redis = ChartFiles::new();
        redis.insert(
            "Chart.yaml".to_string(),
            b"apiVersion: v2\nname: redis\nversion: 17.3.0\n".to_vec(),
        );
        redis.insert("templates/statefulset.yaml".to_string(), b"kind: StatefulSet\n".to_vec());
        let bytes = archive::write_archive("redis", &redis).unwrap();
        std::fs::write(temp.path().join("charts/redis-17.3.0.tgz"), bytes).unwrap();

        let chart = LoadedChart::load(temp.path()).unwrap();

        assert_eq!(chart.subcharts.len(), 2);
        assert!(!chart.subchart("common").unwrap().is_installable());
        let redis = chart.subchart("redis").unwrap();
        assert_eq!(redis.metadata.version.to_string(), "17.3.0");
        assert_eq!(redis.templates.len(), 1);
        assert!(redis.source.ends_with("charts/redis-17.3.0.tgz"));
    }

    #[test]
    fn test_load_archive() {
        let temp = TempDir::new().unwrap();
        let mut files = ChartFiles::new();
        files.insert(
            "Chart.yaml".to_string(),
            b"apiVersion: v2\nname: app\nversion: 1.2.0\ntype: application\n".to_vec(),
        );
        files.insert("values.yaml".to_string(), b"replicaCount: 1\n".to_vec());
        let path = temp.path().join("app-1.2.0.tgz");
        std::fs::write(&path, archive::write_archive("app", &files).unwrap()).unwrap();

        let chart = FsChartLoader.load(&path).unwrap();

        assert_eq!(chart.name(), "app");
        assert!(chart.is_installable());
        assert_eq!(chart.source, path);
    }

    #[test]
    fn test_legacy_requirements_file() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "Chart.yaml", "apiVersion: v1\nname: old\nversion: 0.1.0\n");
        write(
            temp.path(),
            "requirements.yaml",
            "dependencies:\n  - name: mysql\n    version: 1.x\n    repository: \"@stable\"\n",
        );

        let chart = LoadedChart::load(temp.path()).unwrap();
        assert_eq!(chart.metadata.dependencies[0].name, "mysql");
    }

    #[test]
    fn test_missing_chart_yaml() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "values.yaml", "a: 1\n");

        let err = LoadedChart::load(temp.path()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidChart { .. }));
        assert!(err.to_string().contains("Chart.yaml not found"));
    }

    #[test]
    fn test_missing_path() {
        let err = LoadedChart::load("/definitely/not/here").unwrap_err();
        assert!(matches!(err, CoreError::ChartNotFound { .. }));
    }
}
