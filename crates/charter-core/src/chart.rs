//! Chart definition (`Chart.yaml`)

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Chart metadata file name
pub const CHART_FILE: &str = "Chart.yaml";

/// Legacy (apiVersion v1) dependency file name
pub const REQUIREMENTS_FILE: &str = "requirements.yaml";

/// Default values file name
pub const VALUES_FILE: &str = "values.yaml";

/// Directory holding a chart's dependencies
pub const CHARTS_DIR: &str = "charts";

/// Directory holding a chart's templates
pub const TEMPLATES_DIR: &str = "templates";

/// The only declared chart type, besides none at all, that may be installed
pub const APPLICATION_CHART_TYPE: &str = "application";

/// Chart metadata as declared in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// API version (`v2`, or `v1` for legacy charts)
    #[serde(default)]
    pub api_version: String,

    /// Chart name
    pub name: String,

    /// Chart version (SemVer 2)
    pub version: Version,

    /// Declared chart type (`application`, `library`, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Declared dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

impl ChartMetadata {
    /// Parse `Chart.yaml` content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let metadata: ChartMetadata = serde_yaml::from_str(content)?;
        if metadata.name.trim().is_empty() {
            return Err(CoreError::InvalidChart {
                path: CHART_FILE.to_string(),
                message: "chart name must not be empty".to_string(),
            });
        }
        Ok(metadata)
    }

    /// Whether a chart with this metadata may be installed or upgraded
    ///
    /// Charts without a declared type, or with the `application` type, are
    /// installable. Library charts and any unknown type are not.
    pub fn is_installable(&self) -> bool {
        match self.chart_type.as_deref() {
            None | Some("") => true,
            Some(t) => t == APPLICATION_CHART_TYPE,
        }
    }

    /// Declared type for display, `application` when unset
    pub fn display_type(&self) -> &str {
        match self.chart_type.as_deref() {
            None | Some("") => APPLICATION_CHART_TYPE,
            Some(t) => t,
        }
    }
}

/// A declared dependency on another chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Dependency chart name
    pub name: String,

    /// Version constraint (semver range, or an exact version)
    #[serde(default)]
    pub version: String,

    /// Repository URL, `@name`/`alias:name` reference, `file://` path,
    /// or empty for a chart vendored in `charts/`
    #[serde(default)]
    pub repository: String,

    /// Values path deciding whether the dependency is rendered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Alias name (overrides the dependency name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Dependency {
    /// The name the dependency is known by in its parent
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Parsed version constraint
    ///
    /// An empty constraint matches any version.
    pub fn version_req(&self) -> Result<VersionReq> {
        parse_version_req(&self.version)
    }

    /// Whether `version` satisfies this dependency's constraint
    pub fn is_satisfied_by(&self, version: &Version) -> Result<bool> {
        let raw = self.version.trim();
        if let Ok(exact) = Version::parse(raw.trim_start_matches('v')) {
            return Ok(&exact == version);
        }
        Ok(self.version_req()?.matches(version))
    }
}

/// Legacy dependency file (`requirements.yaml`)
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Requirements {
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// Parse a version constraint as written in `Chart.yaml`
///
/// Accepts space-separated range terms (`>= 1.0.0 < 2.0.0`) as well as the
/// comma-separated form. An empty constraint or `*` matches everything.
pub fn parse_version_req(raw: &str) -> Result<VersionReq> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "*" {
        return Ok(VersionReq::STAR);
    }
    Ok(VersionReq::parse(&normalize_constraint(raw))?)
}

/// Turn space-separated range terms into the comma-separated form semver expects
fn normalize_constraint(raw: &str) -> String {
    if raw.contains(',') || raw.contains("||") {
        return raw.to_string();
    }
    let mut terms: Vec<String> = Vec::new();
    for token in raw.split_whitespace() {
        match terms.last_mut() {
            Some(last) if matches!(last.as_str(), ">" | ">=" | "<" | "<=" | "=" | "~" | "^") => {
                last.push_str(token);
            }
            _ => terms.push(token.to_string()),
        }
    }
    terms.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(chart_type: Option<&str>) -> ChartMetadata {
        ChartMetadata {
            api_version: "v2".to_string(),
            name: "app".to_string(),
            version: Version::new(1, 2, 0),
            chart_type: chart_type.map(String::from),
            description: None,
            app_version: None,
            kube_version: None,
            keywords: vec![],
            dependencies: vec![],
        }
    }

    #[test]
    fn test_installable_types() {
        assert!(metadata(None).is_installable());
        assert!(metadata(Some("")).is_installable());
        assert!(metadata(Some("application")).is_installable());
        assert!(!metadata(Some("library")).is_installable());
        assert!(!metadata(Some("Application")).is_installable());
    }

    #[test]
    fn test_parse_chart_yaml() {
        let yaml = r#"
apiVersion: v2
name: web
version: 0.3.1
type: application
appVersion: "1.16.0"
dependencies:
  - name: redis
    version: ">= 17.0.0 < 18.0.0"
    repository: https://charts.example.com
    alias: cache
  - name: common
    version: 2.x
    repository: "@stable"
"#;
        let meta = ChartMetadata::from_yaml(yaml).unwrap();
        assert_eq!(meta.name, "web");
        assert_eq!(meta.version, Version::new(0, 3, 1));
        assert_eq!(meta.display_type(), "application");
        assert_eq!(meta.dependencies.len(), 2);
        assert_eq!(meta.dependencies[0].effective_name(), "cache");
        assert_eq!(meta.dependencies[1].effective_name(), "common");
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = ChartMetadata::from_yaml("apiVersion: v2\nname: \"\"\nversion: 1.0.0\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidChart { .. }));
    }

    #[test]
    fn test_dependency_constraints() {
        let dep = |version: &str| Dependency {
            name: "redis".to_string(),
            version: version.to_string(),
            repository: String::new(),
            condition: None,
            tags: vec![],
            alias: None,
        };

        let v17 = Version::new(17, 3, 0);
        assert!(dep(">= 17.0.0 < 18.0.0").is_satisfied_by(&v17).unwrap());
        assert!(!dep(">= 18.0.0").is_satisfied_by(&v17).unwrap());
        assert!(dep("17.3.0").is_satisfied_by(&v17).unwrap());
        assert!(!dep("17.2.0").is_satisfied_by(&v17).unwrap());
        assert!(dep("").is_satisfied_by(&v17).unwrap());
        assert!(dep("^17").is_satisfied_by(&v17).unwrap());
    }
}
