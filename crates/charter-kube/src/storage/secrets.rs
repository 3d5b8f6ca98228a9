//! Kubernetes Secrets storage driver
//!
//! One Secret per revision, named after [`StoredRelease::storage_key`] and
//! labelled for selection by release name.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use std::collections::BTreeMap;

use super::{
    MANAGED_BY, MANAGED_BY_LABEL, RELEASE_NAME_LABEL, StorageDriver, decode_from_storage,
    encode_for_storage, latest_per_name, storage_labels,
};
use crate::error::{KubeError, Result};
use crate::release::{StoredRelease, storage_key};

/// Secret type of stored releases
const SECRET_TYPE: &str = "charter.sh/release.v1";

/// Data key holding the encoded release
const RELEASE_KEY: &str = "release";

/// Kubernetes Secrets storage driver
#[derive(Clone)]
pub struct SecretsDriver {
    client: Client,
}

impl SecretsDriver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets_api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn build_secret(&self, release: &StoredRelease) -> Result<Secret> {
        let encoded = encode_for_storage(release)?;

        let mut data = BTreeMap::new();
        data.insert(
            RELEASE_KEY.to_string(),
            k8s_openapi::ByteString(encoded.into_bytes()),
        );

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(release.storage_key()),
                namespace: Some(release.namespace.clone()),
                labels: Some(storage_labels(release)),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        })
    }

    async fn list_secrets(&self, namespace: &str, name: Option<&str>) -> Result<Vec<StoredRelease>> {
        let mut selector = format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY);
        if let Some(name) = name {
            selector.push_str(&format!(",{}={}", RELEASE_NAME_LABEL, name));
        }

        let secrets = self
            .secrets_api(namespace)
            .list(&ListParams::default().labels(&selector))
            .await?;

        let mut releases = Vec::with_capacity(secrets.items.len());
        for secret in &secrets.items {
            match parse_secret(secret) {
                Ok(release) => releases.push(release),
                Err(e) => tracing::warn!(
                    secret = secret.metadata.name.as_deref().unwrap_or("unnamed"),
                    error = %e,
                    "skipping unreadable release secret"
                ),
            }
        }
        Ok(releases)
    }
}

fn parse_secret(secret: &Secret) -> Result<StoredRelease> {
    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(RELEASE_KEY))
        .ok_or_else(|| KubeError::Storage("Secret missing 'release' data".to_string()))?;

    let encoded = std::str::from_utf8(&data.0)
        .map_err(|e| KubeError::Storage(format!("Invalid UTF-8 in secret: {}", e)))?;

    decode_from_storage(encoded)
}

#[async_trait]
impl StorageDriver for SecretsDriver {
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease> {
        match self.secrets_api(namespace).get(&storage_key(name, revision)).await {
            Ok(secret) => parse_secret(&secret),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: &str) -> Result<Vec<StoredRelease>> {
        let releases = self.list_secrets(namespace, None).await?;
        Ok(latest_per_name(releases))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let mut releases = self.list_secrets(namespace, Some(name)).await?;
        if releases.is_empty() {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }

        // Newest first
        releases.sort_by(|a, b| b.revision.cmp(&a.revision));
        Ok(releases)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let secret = self.build_secret(release)?;
        match self
            .secrets_api(&release.namespace)
            .create(&PostParams::default(), &secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        let api = self.secrets_api(&release.namespace);
        let key = release.storage_key();

        let mut secret = self.build_secret(release)?;
        // Replace needs the current resourceVersion
        let current = api.get(&key).await?;
        secret.metadata.resource_version = current.metadata.resource_version;

        api.replace(&key, &PostParams::default(), &secret).await?;
        Ok(())
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let releases = self.history(namespace, name).await?;
        let api = self.secrets_api(namespace);

        for release in &releases {
            match api.delete(&release.storage_key(), &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(releases)
    }
}
