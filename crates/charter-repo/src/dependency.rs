//! Dependency checking and `charts/` population
//!
//! A chart's declared dependencies are satisfied when a chart of the same
//! name, at a version matching the declared constraint, is present under its
//! `charts/` directory (unpacked or as an archive). [`RepositoryDependencyManager`]
//! makes that true by resolving each dependency against its repository index
//! and placing the archives there.

use async_trait::async_trait;
use semver::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use charter_core::chart::CHART_FILE;
use charter_core::{
    CHARTS_DIR, ChartMetadata, Dependency, LoadedChart, is_chart_archive, read_archive,
    read_chart_dir, write_archive,
};

use crate::config::{RepositoryEntry, RepositoryFile, ensure_dir};
use crate::downloader::{compute_digest, verify};
use crate::error::{RepoError, Result};
use crate::http::HttpOptions;
use crate::lock::{ChartLock, LockedDependency};
use crate::repository::{ChartRepository, unreachable};

/// Staging directory under `charts/` while an update is in progress
const STAGING_DIR: &str = "tmpcharts";

/// A present subchart whose version does not satisfy the declared constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMismatch {
    pub name: String,
    pub constraint: String,
    pub found: Version,
}

/// Outcome of comparing declared dependencies with the charts present
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyCheck {
    pub missing: Vec<String>,
    pub mismatched: Vec<VersionMismatch>,
}

impl DependencyCheck {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }

    /// One-line description of what is unsatisfied
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing: {}", self.missing.join(", ")));
        }
        for m in &self.mismatched {
            parts.push(format!("{} {} does not satisfy {}", m.name, m.found, m.constraint));
        }
        parts.join("; ")
    }
}

/// Compare a chart's declared dependencies with its loaded subcharts
pub fn check_dependencies(chart: &LoadedChart) -> Result<DependencyCheck> {
    let mut check = DependencyCheck::default();

    for dependency in &chart.metadata.dependencies {
        match chart.subchart(&dependency.name) {
            None => check.missing.push(dependency.name.clone()),
            Some(sub) => {
                if !dependency.is_satisfied_by(&sub.metadata.version)? {
                    check.mismatched.push(VersionMismatch {
                        name: dependency.name.clone(),
                        constraint: dependency.version.clone(),
                        found: sub.metadata.version.clone(),
                    });
                }
            }
        }
    }

    Ok(check)
}

/// Capability to make a chart's declared dependencies physically present
#[async_trait]
pub trait DependencyManager: Send + Sync {
    /// Populate `chart_dir/charts` so every dependency of `chart` is satisfied
    async fn update(&self, chart: &LoadedChart, chart_dir: &Path) -> Result<()>;
}

/// Where a declared dependency comes from
#[derive(Debug, Clone)]
enum Source {
    Repository(RepositoryEntry),
    Local(PathBuf),
    Vendored,
}

/// Resolves dependencies against the configured repositories
#[derive(Debug, Clone)]
pub struct RepositoryDependencyManager {
    repository_config: PathBuf,
    repository_cache: PathBuf,
    skip_update: bool,
    http: HttpOptions,
}

impl RepositoryDependencyManager {
    pub fn new(repository_config: impl Into<PathBuf>, repository_cache: impl Into<PathBuf>) -> Self {
        Self {
            repository_config: repository_config.into(),
            repository_cache: repository_cache.into(),
            skip_update: false,
            http: HttpOptions::default(),
        }
    }

    /// Use cached indices as they are instead of refreshing them first
    pub fn with_skip_update(mut self, skip_update: bool) -> Self {
        self.skip_update = skip_update;
        self
    }

    pub fn with_http_options(mut self, http: HttpOptions) -> Self {
        self.http = http;
        self
    }

    fn repositories(&self, sources: &[(&Dependency, Source)]) -> Result<BTreeMap<String, ChartRepository>> {
        let mut repositories = BTreeMap::new();
        for (_, source) in sources {
            if let Source::Repository(entry) = source {
                if !repositories.contains_key(&entry.name) {
                    let repository =
                        ChartRepository::new(entry.clone(), &self.repository_cache, &self.http)?;
                    repositories.insert(entry.name.clone(), repository);
                }
            }
        }
        Ok(repositories)
    }

    /// Write every non-vendored dependency into `staging`
    ///
    /// Returns the staged `(dependency name, file name)` pairs and the lock
    /// entries for all dependencies.
    async fn stage(
        &self,
        chart: &LoadedChart,
        sources: &[(&Dependency, Source)],
        repositories: &BTreeMap<String, ChartRepository>,
        staging: &Path,
    ) -> Result<(Vec<(String, String)>, Vec<LockedDependency>)> {
        let mut staged = Vec::new();
        let mut locked = Vec::new();

        for (dependency, source) in sources {
            let version = match source {
                Source::Repository(entry) => {
                    let repository = repositories.get(&entry.name).ok_or_else(|| {
                        RepoError::RepositoryNotFound {
                            name: entry.name.clone(),
                        }
                    })?;
                    let index = repository.load_index().await?;
                    let resolved = index.resolve(dependency)?;
                    let url = resolved.download_url().ok_or_else(|| RepoError::ChartNotFound {
                        name: format!("{} {} (no download URL)", dependency.name, resolved.version),
                        repo: entry.name.clone(),
                    })?;

                    let bytes = repository.fetch(url).await?;
                    verify(&dependency.name, &bytes, resolved.digest.as_deref())?;

                    let file_name = format!("{}-{}.tgz", dependency.name, resolved.version);
                    std::fs::write(staging.join(&file_name), &bytes)?;
                    staged.push((dependency.name.clone(), file_name));
                    resolved.version.clone()
                }
                Source::Local(path) => {
                    let (file_name, version) = package_local(dependency, path, staging)?;
                    staged.push((dependency.name.clone(), file_name));
                    version
                }
                Source::Vendored => match chart.subchart(&dependency.name) {
                    Some(sub) => sub.metadata.version.to_string(),
                    None => {
                        return Err(RepoError::ResolutionFailed {
                            message: format!(
                                "dependency {} has no repository and is not present in {}/",
                                dependency.name, CHARTS_DIR
                            ),
                        });
                    }
                },
            };

            tracing::debug!(dependency = %dependency.name, %version, "dependency resolved");
            locked.push(LockedDependency {
                name: dependency.name.clone(),
                version,
                repository: dependency.repository.clone(),
            });
        }

        Ok((staged, locked))
    }
}

#[async_trait]
impl DependencyManager for RepositoryDependencyManager {
    async fn update(&self, chart: &LoadedChart, chart_dir: &Path) -> Result<()> {
        let declared = &chart.metadata.dependencies;
        if declared.is_empty() {
            return Ok(());
        }

        if !chart_dir.is_dir() {
            return Err(RepoError::PackagedChart {
                path: chart_dir.display().to_string(),
                missing: check_dependencies(chart)?.summary(),
            });
        }

        let file = RepositoryFile::load(&self.repository_config)?;
        let sources = declared
            .iter()
            .map(|dependency| source_for(dependency, &file, chart_dir).map(|s| (dependency, s)))
            .collect::<Result<Vec<_>>>()?;

        let repositories = self.repositories(&sources)?;
        if !self.skip_update {
            for repository in repositories.values() {
                repository
                    .download_index_file()
                    .await
                    .map_err(|e| unreachable(repository.entry(), e))?;
            }
        }

        let charts_dir = chart_dir.join(CHARTS_DIR);
        let staging = charts_dir.join(STAGING_DIR);
        remove_dir_if_exists(&staging)?;
        ensure_dir(&staging)?;

        let (staged, locked) = match self.stage(chart, &sources, &repositories, &staging).await {
            Ok(result) => result,
            Err(e) => {
                if let Err(cleanup) = remove_dir_if_exists(&staging) {
                    tracing::warn!(path = %staging.display(), error = %cleanup, "cannot remove staging directory");
                }
                return Err(e);
            }
        };

        for (name, file_name) in &staged {
            remove_stale_copies(&charts_dir, name)?;
            std::fs::rename(staging.join(file_name), charts_dir.join(file_name))?;
        }
        remove_dir_if_exists(&staging)?;

        ChartLock::new(declared, locked)?.save(chart_dir)?;

        tracing::info!(
            chart = %chart.name(),
            dependencies = declared.len(),
            path = %charts_dir.display(),
            "dependencies updated"
        );
        Ok(())
    }
}

fn source_for(dependency: &Dependency, file: &RepositoryFile, chart_dir: &Path) -> Result<Source> {
    let repository = dependency.repository.trim();

    if repository.is_empty() {
        return Ok(Source::Vendored);
    }

    if let Some(path) = repository.strip_prefix("file://") {
        let path = Path::new(path);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            chart_dir.join(path)
        };
        return Ok(Source::Local(path));
    }

    if let Some(name) = repository
        .strip_prefix('@')
        .or_else(|| repository.strip_prefix("alias:"))
    {
        return file
            .get(name)
            .cloned()
            .map(Source::Repository)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: name.to_string(),
            });
    }

    if repository.starts_with("http://") || repository.starts_with("https://") {
        let entry = file
            .find_by_url(repository)
            .cloned()
            .unwrap_or_else(|| adhoc_entry(repository));
        return Ok(Source::Repository(entry));
    }

    Err(RepoError::ResolutionFailed {
        message: format!(
            "dependency {} has unsupported repository {:?}",
            dependency.name, repository
        ),
    })
}

/// A repository entry for a URL that is not in the repository file
///
/// Named after the URL digest so its index gets a stable cache location.
fn adhoc_entry(url: &str) -> RepositoryEntry {
    let digest = compute_digest(url.trim_end_matches('/').as_bytes());
    let short: String = digest.trim_start_matches("sha256:").chars().take(16).collect();
    RepositoryEntry::new(format!("adhoc-{}", short), url)
}

/// Package a `file://` dependency into `staging`
fn package_local(dependency: &Dependency, path: &Path, staging: &Path) -> Result<(String, String)> {
    let files = if path.is_dir() {
        read_chart_dir(path)?
    } else if path.is_file() && is_chart_archive(path) {
        read_archive(&std::fs::read(path)?)?
    } else {
        return Err(RepoError::ResolutionFailed {
            message: format!(
                "local dependency {} not found at {}",
                dependency.name,
                path.display()
            ),
        });
    };

    let loaded = LoadedChart::from_files(files.clone(), path.to_path_buf())?;
    let version = &loaded.metadata.version;
    if !dependency.is_satisfied_by(version)? {
        return Err(RepoError::UnsatisfiableConstraint {
            name: dependency.name.clone(),
            constraint: dependency.version.clone(),
            available: version.to_string(),
        });
    }

    let bytes = write_archive(&loaded.metadata.name, &files)?;
    let file_name = format!("{}-{}.tgz", dependency.name, version);
    std::fs::write(staging.join(&file_name), bytes)?;
    Ok((file_name, version.to_string()))
}

/// Remove copies of dependency `name` left by a previous update or vendored by hand
///
/// Covers `<name>-<version>.tgz` archives and unpacked directories whose
/// `Chart.yaml` names the dependency. Unpacked copies load before archives,
/// so leaving one behind would shadow the freshly staged version.
fn remove_stale_copies(charts_dir: &Path, name: &str) -> Result<()> {
    for entry in std::fs::read_dir(charts_dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if path.is_dir() {
            if file_name != STAGING_DIR && unpacked_chart_name(&path).as_deref() == Some(name) {
                tracing::debug!(path = %path.display(), "removing stale unpacked dependency");
                std::fs::remove_dir_all(&path)?;
            }
        } else if archive_version(file_name, name).is_some() {
            tracing::debug!(path = %path.display(), "removing stale dependency archive");
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Chart name declared by an unpacked chart directory, if it has a readable `Chart.yaml`
fn unpacked_chart_name(dir: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(dir.join(CHART_FILE)).ok()?;
    ChartMetadata::from_yaml(&raw).ok().map(|metadata| metadata.name)
}

/// Version part of `<name>-<version>.tgz`, if `file_name` has that shape
fn archive_version(file_name: &str, name: &str) -> Option<Version> {
    let rest = file_name.strip_prefix(name)?.strip_prefix('-')?;
    let version = rest
        .strip_suffix(".tgz")
        .or_else(|| rest.strip_suffix(".tar.gz"))?;
    Version::parse(version).ok()
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
