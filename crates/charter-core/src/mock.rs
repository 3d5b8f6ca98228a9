//! In-memory chart loader for testing

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{CoreError, Result};
use crate::loader::{ChartLoader, LoadedChart};

/// Chart loader serving pre-registered charts
///
/// Every call is recorded so tests can assert how often, and in which order,
/// paths were loaded.
#[derive(Clone, Default)]
pub struct MockChartLoader {
    charts: Arc<RwLock<HashMap<PathBuf, LoadedChart>>>,
    loads: Arc<RwLock<Vec<PathBuf>>>,
}

impl MockChartLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the chart returned for `path`
    pub fn with_chart(self, path: impl Into<PathBuf>, chart: LoadedChart) -> Self {
        self.insert(path, chart);
        self
    }

    /// Register or replace the chart returned for `path`
    pub fn insert(&self, path: impl Into<PathBuf>, chart: LoadedChart) {
        if let Ok(mut charts) = self.charts.write() {
            charts.insert(path.into(), chart);
        }
    }

    /// Paths loaded so far, in call order
    pub fn loads(&self) -> Vec<PathBuf> {
        self.loads.read().map(|l| l.clone()).unwrap_or_default()
    }
}

impl ChartLoader for MockChartLoader {
    fn load(&self, path: &Path) -> Result<LoadedChart> {
        if let Ok(mut loads) = self.loads.write() {
            loads.push(path.to_path_buf());
        }

        self.charts
            .read()
            .ok()
            .and_then(|charts| charts.get(path).cloned())
            .ok_or_else(|| CoreError::ChartNotFound {
                path: path.display().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ChartFiles;

    #[test]
    fn test_serves_registered_chart_and_records_loads() {
        let mut files = ChartFiles::new();
        files.insert(
            "Chart.yaml".to_string(),
            b"apiVersion: v2\nname: app\nversion: 1.0.0\n".to_vec(),
        );
        let chart = LoadedChart::from_files(files, PathBuf::from("/charts/app")).unwrap();
        let loader = MockChartLoader::new().with_chart("/charts/app", chart);

        assert_eq!(loader.load(Path::new("/charts/app")).unwrap().name(), "app");
        assert!(loader.load(Path::new("/charts/other")).is_err());
        assert_eq!(
            loader.loads(),
            vec![PathBuf::from("/charts/app"), PathBuf::from("/charts/other")]
        );
    }
}
