//! Applying and deleting release manifests
//!
//! [`ResourceManager`] resolves every document of a manifest through API
//! discovery and uses Server-Side Apply, so applying the same manifest twice
//! is a no-op and an upgrade only changes the fields it owns.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams, PropagationPolicy},
    core::{GroupVersionKind, ObjectMeta, TypeMeta},
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};

use crate::error::{KubeError, Result};

/// Field manager name for Server-Side Apply
pub const FIELD_MANAGER: &str = "charter";

/// Annotation that keeps a resource on uninstall
const RESOURCE_POLICY_ANNOTATION: &str = "helm.sh/resource-policy";
const RESOURCE_POLICY_KEEP: &str = "keep";

/// Summary of apply/delete operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationSummary {
    /// Successfully processed resources
    pub succeeded: Vec<String>,
    /// Failed resources with errors
    pub failed: Vec<(String, String)>,
    /// Skipped resources (e.g., due to policy)
    pub skipped: Vec<(String, String)>,
}

impl OperationSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn failures into an error naming every failed resource
    pub fn into_result(self, action: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let details = self
            .failed
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err))
            .collect::<Vec<_>>()
            .join("; ");
        Err(KubeError::ResourcesFailed {
            action: action.to_string(),
            count: self.failed.len(),
            details,
        })
    }
}

/// Capability to change cluster state from a manifest
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Create the namespace unless it already exists
    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;

    /// Apply every document of `manifest`, defaulting to `namespace`
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<OperationSummary>;

    /// Delete every document of `manifest`, in reverse apply order
    async fn delete(&self, namespace: &str, manifest: &str) -> Result<OperationSummary>;
}

/// Split a multi-document manifest, skipping empty and comment-only documents
pub fn split_manifest(manifest: &str) -> Vec<&str> {
    manifest
        .split("\n---")
        .map(|doc| doc.trim().trim_start_matches("---").trim())
        .filter(|doc| {
            !doc.lines()
                .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
        })
        .collect()
}

/// Position of a kind in apply order; deletion runs the other way round
pub fn apply_order(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" | "ClusterRole" | "ClusterRoleBinding" | "Role" | "RoleBinding" => 2,
        "ConfigMap" | "Secret" | "PersistentVolumeClaim" | "StorageClass" => 3,
        "Service" | "Ingress" | "NetworkPolicy" => 4,
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Job" | "CronJob" | "Pod" => 5,
        _ => 6,
    }
}

/// Parsed resource ready for Kubernetes operations
#[derive(Debug, Clone)]
struct ParsedResource {
    obj: DynamicObject,
    gvk: GroupVersionKind,
    api_resource: ApiResource,
    capabilities: ApiCapabilities,
}

impl ParsedResource {
    fn display_name(&self) -> String {
        let name = self.obj.metadata.name.as_deref().unwrap_or("unnamed");
        match &self.obj.metadata.namespace {
            Some(ns) => format!("{}/{}/{}", ns, self.gvk.kind, name),
            None => format!("{}/{}", self.gvk.kind, name),
        }
    }

    fn has_keep_policy(&self) -> bool {
        self.obj
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(RESOURCE_POLICY_ANNOTATION))
            .map(String::as_str)
            == Some(RESOURCE_POLICY_KEEP)
    }

    fn name(&self) -> Result<&str> {
        self.obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| KubeError::InvalidManifest(format!("{} has no metadata.name", self.gvk.kind)))
    }
}

/// Applies and deletes manifests against a live cluster
pub struct ResourceManager {
    client: Client,
    discovery: Discovery,
}

impl ResourceManager {
    /// Create a manager, running API discovery once
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self { client, discovery })
    }

    fn parse_manifest(&self, manifest: &str, default_namespace: &str) -> Result<Vec<ParsedResource>> {
        split_manifest(manifest)
            .into_iter()
            .enumerate()
            .map(|(index, doc)| {
                self.parse_document(doc, default_namespace).map_err(|e| {
                    KubeError::InvalidManifest(format!("document {}: {}", index, e))
                })
            })
            .collect()
    }

    fn parse_document(&self, doc: &str, default_namespace: &str) -> Result<ParsedResource> {
        let mut obj: DynamicObject = serde_yaml::from_str(doc)?;

        let type_meta = obj
            .types
            .as_ref()
            .ok_or_else(|| KubeError::InvalidManifest("resource missing apiVersion or kind".to_string()))?;
        let gvk = gvk_from_type_meta(type_meta);

        let (api_resource, capabilities) = self.discovery.resolve_gvk(&gvk).ok_or_else(|| {
            KubeError::InvalidManifest(format!(
                "unknown resource type {}/{}",
                type_meta.api_version, type_meta.kind
            ))
        })?;

        if capabilities.scope == Scope::Namespaced && obj.metadata.namespace.is_none() {
            obj.metadata.namespace = Some(default_namespace.to_string());
        }

        Ok(ParsedResource {
            obj,
            gvk,
            api_resource,
            capabilities,
        })
    }

    fn api_for_resource(&self, resource: &ParsedResource) -> Api<DynamicObject> {
        match (&resource.capabilities.scope, resource.obj.metadata.namespace.as_deref()) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &resource.api_resource)
            }
            _ => Api::all_with(self.client.clone(), &resource.api_resource),
        }
    }

    async fn apply_resource(&self, resource: &ParsedResource) -> Result<()> {
        let name = resource.name()?;
        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;

        self.api_for_resource(resource)
            .patch(name, &params, &Patch::Apply(&resource.obj))
            .await?;
        Ok(())
    }

    async fn delete_resource(&self, resource: &ParsedResource) -> Result<bool> {
        let name = resource.name()?;
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        match self.api_for_resource(resource).delete(name, &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ManifestApplier for ResourceManager {
    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(namespace).await?.is_some() {
            return Ok(());
        }

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                tracing::info!(%namespace, "namespace created");
                Ok(())
            }
            // Created concurrently
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply(&self, namespace: &str, manifest: &str) -> Result<OperationSummary> {
        let mut resources = self.parse_manifest(manifest, namespace)?;
        resources.sort_by_key(|r| apply_order(&r.gvk.kind));

        let mut summary = OperationSummary::default();
        for resource in &resources {
            let name = resource.display_name();
            match self.apply_resource(resource).await {
                Ok(()) => {
                    tracing::debug!(resource = %name, "applied");
                    summary.succeeded.push(name);
                }
                Err(e) => summary.failed.push((name, e.to_string())),
            }
        }
        Ok(summary)
    }

    async fn delete(&self, namespace: &str, manifest: &str) -> Result<OperationSummary> {
        let mut resources = self.parse_manifest(manifest, namespace)?;
        resources.sort_by_key(|r| std::cmp::Reverse(apply_order(&r.gvk.kind)));

        let mut summary = OperationSummary::default();
        for resource in &resources {
            let name = resource.display_name();
            if resource.has_keep_policy() {
                summary.skipped.push((name, "resource-policy: keep".to_string()));
                continue;
            }
            match self.delete_resource(resource).await {
                Ok(true) => summary.succeeded.push(name),
                Ok(false) => summary.skipped.push((name, "not found".to_string())),
                Err(e) => summary.failed.push((name, e.to_string())),
            }
        }
        Ok(summary)
    }
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_manifest() {
        let manifest = "# Source: web/templates/a.yaml\nkind: ConfigMap\n---\n# only a comment\n---\n\n---\nkind: Service\n";
        let docs = split_manifest(manifest);
        assert_eq!(docs.len(), 2);
        assert!(docs[0].ends_with("kind: ConfigMap"));
        assert_eq!(docs[1], "kind: Service");
    }

    #[test]
    fn test_apply_order() {
        assert!(apply_order("Namespace") < apply_order("CustomResourceDefinition"));
        assert!(apply_order("ConfigMap") < apply_order("Deployment"));
        assert!(apply_order("Service") < apply_order("StatefulSet"));
        assert_eq!(apply_order("Widget"), 6);
    }

    #[test]
    fn test_gvk_from_type_meta() {
        let gvk = gvk_from_type_meta(&TypeMeta {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
        });
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");

        let core = gvk_from_type_meta(&TypeMeta {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
        });
        assert!(core.group.is_empty());
    }

    #[test]
    fn test_summary_into_result() {
        let ok = OperationSummary {
            succeeded: vec!["default/ConfigMap/a".to_string()],
            ..Default::default()
        };
        assert!(ok.into_result("apply").is_ok());

        let failed = OperationSummary {
            failed: vec![("default/Service/b".to_string(), "forbidden".to_string())],
            ..Default::default()
        };
        let err = failed.into_result("apply").unwrap_err();
        assert_eq!(
            err.to_string(),
            "apply failed for 1 resource(s): default/Service/b: forbidden"
        );
    }
}
