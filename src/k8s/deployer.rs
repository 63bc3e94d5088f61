//! Cluster deployment via server-side apply
//!
//! Applies the rendered manifests with a constant field manager, so re-running
//! under the same name idempotently replaces an older instance. Cleanup
//! deletes the run namespace; the cascade removes the Deployment and Service.

use std::path::Path;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::k8s::manifests::{self, RunConfig};

/// Field manager for server-side apply; constant so reruns replace.
const FIELD_MANAGER: &str = "reversepf-k8s";

/// Applies and deletes the remote agent's cluster resources.
#[derive(Clone)]
pub struct Deployer {
    client: Client,
}

impl Deployer {
    /// Build a deployer from an optional kubeconfig path and context override.
    pub async fn new(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Self> {
        let client = create_client(kubeconfig, context).await?;
        Ok(Self { client })
    }

    /// The underlying kube client.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Apply the Namespace, Deployment, and Service for a run, in that order.
    pub async fn deploy_remote_components(&self, config: &RunConfig) -> Result<()> {
        info!("deploying remote resources");
        info!(namespace = %config.namespace, "applying namespace");
        self.apply(&manifests::namespace_manifest(config)).await?;
        info!(namespace = %config.namespace, "applying deployment");
        self.apply(&manifests::deployment_manifest(config)).await?;
        info!(namespace = %config.namespace, "applying service");
        self.apply(&manifests::service_manifest(config)).await?;
        Ok(())
    }

    /// Server-side apply one rendered manifest.
    async fn apply(&self, manifest: &str) -> Result<()> {
        let parsed = ParsedManifest::parse(manifest)?;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let api: Api<DynamicObject> = match &parsed.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &parsed.api_resource),
            None => Api::all_with(self.client.clone(), &parsed.api_resource),
        };
        api.patch(&parsed.name, &params, &Patch::Apply(&parsed.value))
            .await?;
        Ok(())
    }

    /// Delete the run namespace. Safe to call even when apply only partially
    /// succeeded; failures are logged with a manual-cleanup hint.
    pub async fn cleanup(&self, namespace: &str) {
        info!("cleaning up remote resources");
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if let Err(e) = namespaces.delete(namespace, &DeleteParams::default()).await {
            error!(error = %e, "unable to clean up, please delete the namespace manually");
        }
    }
}

/// Create a kube client, honoring an explicit kubeconfig path and a context
/// override. With neither set, the default client config applies (standard
/// kubeconfig path, `KUBECONFIG`, or in-cluster).
async fn create_client(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Client> {
    if kubeconfig.is_none() && context.is_none() {
        return Ok(Client::try_default().await?);
    }
    let config_file = match kubeconfig {
        Some(path) => Kubeconfig::read_from(path)?,
        None => Kubeconfig::read()?,
    };
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    let config = Config::from_custom_kubeconfig(config_file, &options).await?;
    Ok(Client::try_from(config)?)
}

/// A rendered manifest parsed far enough to address its API endpoint.
#[derive(Debug)]
struct ParsedManifest {
    value: serde_json::Value,
    name: String,
    namespace: Option<String>,
    api_resource: ApiResource,
}

impl ParsedManifest {
    fn parse(manifest: &str) -> Result<Self> {
        let value: serde_json::Value = serde_yaml::from_str(manifest)?;

        let api_version = value
            .get("apiVersion")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::manifest("missing apiVersion"))?
            .to_string();
        let kind = value
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::manifest("missing kind"))?
            .to_string();
        let name = value
            .pointer("/metadata/name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::manifest("missing metadata.name"))?
            .to_string();
        let namespace = value
            .pointer("/metadata/namespace")
            .and_then(serde_json::Value::as_str)
            .map(String::from);

        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), api_version.clone()),
        };

        let api_resource = ApiResource {
            group,
            version,
            api_version,
            plural: pluralize(&kind),
            kind: kind.clone(),
        };

        Ok(Self {
            value,
            name,
            namespace,
            api_resource,
        })
    }
}

/// Simple pluralization for Kubernetes resource kinds.
fn pluralize(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        format!("{stem}ies")
    } else if lower.ends_with('s') {
        format!("{lower}es")
    } else {
        format!("{lower}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::manifests::{deployment_manifest, namespace_manifest, service_manifest};

    fn demo_config() -> RunConfig {
        RunConfig::new("demo", "reversepf:test", 9000, 9001, 8081)
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("Namespace"), "namespaces");
        assert_eq!(pluralize("Deployment"), "deployments");
        assert_eq!(pluralize("Service"), "services");
        assert_eq!(pluralize("Pod"), "pods");
        assert_eq!(pluralize("NetworkPolicy"), "networkpolicies");
    }

    #[test]
    fn parse_namespace_manifest() {
        let parsed = ParsedManifest::parse(&namespace_manifest(&demo_config())).unwrap();
        assert_eq!(parsed.name, "reversepf-demo");
        assert_eq!(parsed.namespace, None);
        assert_eq!(parsed.api_resource.kind, "Namespace");
        assert_eq!(parsed.api_resource.group, "");
        assert_eq!(parsed.api_resource.version, "v1");
        assert_eq!(parsed.api_resource.plural, "namespaces");
    }

    #[test]
    fn parse_deployment_manifest() {
        let parsed = ParsedManifest::parse(&deployment_manifest(&demo_config())).unwrap();
        assert_eq!(parsed.name, "reversepf");
        assert_eq!(parsed.namespace, Some("reversepf-demo".to_string()));
        assert_eq!(parsed.api_resource.group, "apps");
        assert_eq!(parsed.api_resource.version, "v1");
        assert_eq!(parsed.api_resource.api_version, "apps/v1");
        assert_eq!(parsed.api_resource.plural, "deployments");
    }

    #[test]
    fn parse_service_manifest() {
        let parsed = ParsedManifest::parse(&service_manifest(&demo_config())).unwrap();
        assert_eq!(parsed.name, "reversepf");
        assert_eq!(parsed.api_resource.plural, "services");
    }

    #[test]
    fn parse_rejects_manifest_without_kind() {
        let result = ParsedManifest::parse("apiVersion: v1\nmetadata:\n  name: x\n");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("kind"));
    }

    #[test]
    fn parse_rejects_manifest_without_name() {
        let result = ParsedManifest::parse("apiVersion: v1\nkind: Namespace\nmetadata: {}\n");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("name"));
    }
}
