//! Chart archive (`.tgz`) reading and packaging
//!
//! A chart archive holds a single top-level directory named after the chart.
//! Reading strips that directory so paths are relative to the chart root,
//! the same shape a chart directory walk produces.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Component, Path};
use tar::{Archive, Builder, Header};

use crate::error::{CoreError, Result};

/// File contents keyed by `/`-separated path relative to the chart root
pub type ChartFiles = BTreeMap<String, Vec<u8>>;

/// Whether a path names a chart archive
pub fn is_chart_archive(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

/// Read every regular file of a gzipped chart archive
pub fn read_archive(bytes: &[u8]) -> Result<ChartFiles> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut files = ChartFiles::new();
    let mut top_level: Option<String> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.into_owned();
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(CoreError::Archive {
                        message: format!("illegal path in archive: {}", path.display()),
                    });
                }
            }
        }

        // Files at the archive root carry no chart directory
        if parts.len() < 2 {
            return Err(CoreError::Archive {
                message: format!("file {} is outside the chart directory", path.display()),
            });
        }

        let root = parts.remove(0);
        match &top_level {
            Some(existing) if existing != &root => {
                return Err(CoreError::Archive {
                    message: format!(
                        "archive holds more than one chart directory ({} and {})",
                        existing, root
                    ),
                });
            }
            Some(_) => {}
            None => top_level = Some(root),
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        files.insert(parts.join("/"), data);
    }

    if files.is_empty() {
        return Err(CoreError::Archive {
            message: "archive contains no files".to_string(),
        });
    }

    Ok(files)
}

/// Package chart files into a gzipped archive rooted at `chart_name/`
pub fn write_archive(chart_name: &str, files: &ChartFiles) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for (path, content) in files {
        let mut header = Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0); // Reproducible builds: use epoch time
        header.set_cksum();
        builder.append_data(&mut header, format!("{}/{}", chart_name, path), content.as_slice())?;
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_files() -> ChartFiles {
        let mut files = ChartFiles::new();
        files.insert(
            "Chart.yaml".to_string(),
            b"apiVersion: v2\nname: app\nversion: 1.0.0\n".to_vec(),
        );
        files.insert("templates/cm.yaml".to_string(), b"kind: ConfigMap\n".to_vec());
        files
    }

    #[test]
    fn test_written_archive_strips_chart_directory_on_read() {
        let bytes = write_archive("app", &sample_files()).unwrap();
        let files = read_archive(&bytes).unwrap();

        assert_eq!(files.len(), 2);
        assert!(files.contains_key("Chart.yaml"));
        assert_eq!(files["templates/cm.yaml"], b"kind: ConfigMap\n");
    }

    #[test]
    fn test_is_chart_archive() {
        assert!(is_chart_archive(Path::new("/tmp/app-1.0.0.tgz")));
        assert!(is_chart_archive(Path::new("app-1.0.0.tar.gz")));
        assert!(!is_chart_archive(Path::new("/tmp/app")));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(read_archive(b"definitely not gzip").is_err());
    }
}
