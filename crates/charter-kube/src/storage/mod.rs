//! Storage drivers for persisting release revisions
//!
//! The production driver keeps one Kubernetes Secret per revision, holding
//! the release as gzip-compressed, base64-encoded JSON. The in-memory
//! driver backs tests.

mod mock;
mod secrets;

pub use mock::{MockStorageDriver, OperationCounts};
pub use secrets::SecretsDriver;

use async_trait::async_trait;
use base64::Engine;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// Maximum size for a single Kubernetes Secret (1MB - some overhead)
pub const MAX_RESOURCE_SIZE: usize = 1_000_000;

/// Label marking every storage object owned by charter
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "charter";

pub const RELEASE_NAME_LABEL: &str = "charter.sh/release-name";
pub const RELEASE_REVISION_LABEL: &str = "charter.sh/release-revision";
pub const RELEASE_STATUS_LABEL: &str = "charter.sh/release-status";

/// Storage driver trait for release persistence
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Get a specific revision
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease>;

    /// Get the newest revision of a release
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.history(namespace, name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    /// Newest revision of every release in a namespace
    async fn list(&self, namespace: &str) -> Result<Vec<StoredRelease>>;

    /// All revisions of a release, newest first
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Store a new revision
    async fn create(&self, release: &StoredRelease) -> Result<()>;

    /// Replace an existing revision
    async fn update(&self, release: &StoredRelease) -> Result<()>;

    /// Delete every revision of a release
    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;
}

/// Keep only the newest revision per release name, newest first
pub(crate) fn latest_per_name(mut releases: Vec<StoredRelease>) -> Vec<StoredRelease> {
    releases.sort_by(|a, b| a.name.cmp(&b.name).then(b.revision.cmp(&a.revision)));
    releases.dedup_by(|later, earlier| later.name == earlier.name);
    releases
}

/// Serialize, gzip and base64-encode a release
pub fn encode_for_storage(release: &StoredRelease) -> Result<String> {
    let json = serde_json::to_vec(release)?;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| KubeError::Compression(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| KubeError::Compression(e.to_string()))?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);
    if encoded.len() > MAX_RESOURCE_SIZE {
        return Err(KubeError::ReleaseTooLarge {
            size: encoded.len(),
            max: MAX_RESOURCE_SIZE,
        });
    }
    Ok(encoded)
}

/// Reverse of [`encode_for_storage`]
pub fn decode_from_storage(data: &str) -> Result<StoredRelease> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;

    let mut decoder = flate2::read::GzDecoder::new(decoded.as_slice());
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| KubeError::Compression(e.to_string()))?;

    Ok(serde_json::from_slice(&json)?)
}

/// Labels applied to every storage object, used for selection
pub fn storage_labels(release: &StoredRelease) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.insert(RELEASE_NAME_LABEL.to_string(), release.name.clone());
    labels.insert(RELEASE_REVISION_LABEL.to_string(), release.revision.to_string());
    labels.insert(
        RELEASE_STATUS_LABEL.to_string(),
        release.state.status_name().to_string(),
    );
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::{ChartInfo, ReleaseState};
    use charter_core::Values;

    fn release(name: &str, revision: u32) -> StoredRelease {
        let mut release = StoredRelease::for_install(
            name.to_string(),
            "default".to_string(),
            ChartInfo {
                name: "app".to_string(),
                version: "1.0.0".to_string(),
                chart_type: None,
                app_version: None,
            },
            Values::from_yaml("replicaCount: 2\n").unwrap(),
            "kind: ConfigMap\n".to_string(),
        );
        release.revision = revision;
        release
    }

    #[test]
    fn test_encode_decode() {
        let mut original = release("web", 3);
        original.mark_deployed();

        let encoded = encode_for_storage(&original).unwrap();
        let decoded = decode_from_storage(&encoded).unwrap();

        assert_eq!(decoded.name, "web");
        assert_eq!(decoded.revision, 3);
        assert_eq!(decoded.state, ReleaseState::Deployed);
        assert_eq!(decoded.values, original.values);
        assert_eq!(decoded.manifest, original.manifest);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_from_storage("not base64!").is_err());
        let not_gzip = base64::engine::general_purpose::STANDARD.encode(b"plain");
        assert!(matches!(
            decode_from_storage(&not_gzip).unwrap_err(),
            KubeError::Compression(_)
        ));
    }

    #[test]
    fn test_storage_labels() {
        let labels = storage_labels(&release("web", 2));
        assert_eq!(labels[MANAGED_BY_LABEL], "charter");
        assert_eq!(labels[RELEASE_NAME_LABEL], "web");
        assert_eq!(labels[RELEASE_REVISION_LABEL], "2");
        assert_eq!(labels[RELEASE_STATUS_LABEL], "pending-install");
    }

    #[test]
    fn test_latest_per_name() {
        let latest = latest_per_name(vec![
            release("web", 1),
            release("api", 1),
            release("web", 3),
            release("web", 2),
        ]);
        let summary: Vec<_> = latest.iter().map(|r| (r.name.as_str(), r.revision)).collect();
        assert_eq!(summary, vec![("api", 1), ("web", 3)]);
    }
}
