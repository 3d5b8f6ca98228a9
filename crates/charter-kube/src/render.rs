//! Manifest assembly from a loaded chart
//!
//! Template evaluation is pluggable. [`RawManifestRenderer`] emits template
//! files as they are, which is what releases of pre-rendered charts need.

use charter_core::{ChartFile, LoadedChart, Values};

use crate::error::Result;

/// Turns a chart and its effective values into a multi-document manifest
pub trait ManifestRenderer: Send + Sync {
    fn render(&self, chart: &LoadedChart, values: &Values) -> Result<String>;
}

/// Concatenates the templates of a chart and, recursively, its subcharts
///
/// Partials (`_*.tpl`), `NOTES.txt` and library subcharts contribute nothing.
/// Each document is preceded by a `# Source:` comment naming its origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawManifestRenderer;

impl ManifestRenderer for RawManifestRenderer {
    fn render(&self, chart: &LoadedChart, _values: &Values) -> Result<String> {
        let mut documents = Vec::new();
        collect_documents(chart, chart.name(), &mut documents);
        Ok(documents.join("\n---\n"))
    }
}

fn collect_documents(chart: &LoadedChart, path: &str, documents: &mut Vec<String>) {
    for template in &chart.templates {
        if !is_manifest(template) {
            continue;
        }
        let content = String::from_utf8_lossy(&template.data);
        let content = content.trim().trim_start_matches("---").trim();
        if content.is_empty() {
            continue;
        }
        documents.push(format!("# Source: {}/{}\n{}", path, template.name, content));
    }

    for sub in &chart.subcharts {
        if !sub.is_installable() {
            continue;
        }
        let sub_path = format!("{}/charts/{}", path, sub.name());
        collect_documents(sub, &sub_path, documents);
    }
}

fn is_manifest(template: &ChartFile) -> bool {
    let file_name = template.name.rsplit('/').next().unwrap_or(&template.name);
    if file_name.starts_with('_') || file_name == "NOTES.txt" {
        return false;
    }
    [".yaml", ".yml", ".json"]
        .iter()
        .any(|ext| file_name.ends_with(ext))
}
