//! Cluster-backed repository and credential stores
//!
//! Repositories are the `chartroom.io/v1beta1` custom resources
//! `ChartRepository` (cluster-scoped) and `ProjectChartRepository`
//! (namespaced), read through the dynamic API. Credentials come from core
//! `Secret` and `ConfigMap` objects.

use async_trait::async_trait;
use chartroom_repo::{
    CaConfig, CredentialStore, RepoError, RepositoryRecord, RepositoryScope, RepositoryStore,
    TlsClientConfig,
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, ApiResource, DynamicObject, ListParams};
use kube::core::GroupVersionKind;
use kube::Client;
use serde::Deserialize;
use std::collections::BTreeMap;

/// API group of the repository resources
pub const API_GROUP: &str = "chartroom.io";

/// API version of the repository resources
pub const API_VERSION: &str = "v1beta1";

/// Cluster-scoped repository resource
pub fn cluster_repository_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(API_GROUP, API_VERSION, "ChartRepository"),
        "chartrepositories",
    )
}

/// Namespaced repository resource
pub fn project_repository_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(API_GROUP, API_VERSION, "ProjectChartRepository"),
        "projectchartrepositories",
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositorySpec {
    #[serde(default)]
    connection_config: ConnectionSpec,
    #[serde(default)]
    disabled: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionSpec {
    #[serde(default)]
    url: String,
    #[serde(default)]
    url_prefix_override: Option<String>,
    #[serde(default)]
    tls_client_config: Option<ObjectRef>,
    #[serde(default)]
    ca: Option<ObjectRef>,
}

#[derive(Debug, Deserialize)]
struct ObjectRef {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

/// Convert a repository resource into a record
///
/// Returns `None` for repositories marked `disabled`. A TLS or CA reference
/// with an empty name is treated as absent.
pub fn record_from_object(
    object: &DynamicObject,
    scope: RepositoryScope,
) -> chartroom_repo::Result<Option<RepositoryRecord>> {
    let name = object
        .metadata
        .name
        .clone()
        .ok_or_else(|| RepoError::ClusterApi {
            message: "repository object has no name".to_string(),
        })?;

    let spec: RepositorySpec = match object.data.get("spec") {
        Some(spec) => serde_json::from_value(spec.clone()).map_err(|e| RepoError::ClusterApi {
            message: format!("invalid spec for repository {}: {}", name, e),
        })?,
        None => RepositorySpec::default(),
    };

    if spec.disabled {
        tracing::debug!(repository = %name, "skipping disabled repository");
        return Ok(None);
    }

    let connection = spec.connection_config;
    if connection.url.is_empty() {
        return Err(RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: format!("repository {} has no connectionConfig.url", name),
        });
    }

    let namespace = match scope {
        RepositoryScope::Cluster => String::new(),
        RepositoryScope::Project => object.metadata.namespace.clone().unwrap_or_default(),
    };

    Ok(Some(RepositoryRecord {
        name,
        namespace,
        scope,
        base_url: connection.url,
        url_prefix_override: connection.url_prefix_override.filter(|p| !p.is_empty()),
        tls_client_config: connection
            .tls_client_config
            .filter(|tls| !tls.name.is_empty())
            .map(|tls| TlsClientConfig {
                secret_name: tls.name,
                secret_namespace: tls.namespace.filter(|ns| !ns.is_empty()),
            }),
        ca_config: connection
            .ca
            .filter(|ca| !ca.name.is_empty())
            .map(|ca| CaConfig {
                config_object_name: ca.name,
            }),
    }))
}

fn cluster_error(e: kube::Error) -> RepoError {
    RepoError::ClusterApi {
        message: e.to_string(),
    }
}

/// [`RepositoryStore`] over the repository custom resources
#[derive(Clone)]
pub struct KubeRepositoryStore {
    client: Client,
}

impl KubeRepositoryStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, scope: RepositoryScope, namespace: &str) -> Api<DynamicObject> {
        match scope {
            RepositoryScope::Cluster => {
                Api::all_with(self.client.clone(), &cluster_repository_resource())
            }
            RepositoryScope::Project => Api::namespaced_with(
                self.client.clone(),
                namespace,
                &project_repository_resource(),
            ),
        }
    }

    async fn list_scope(
        &self,
        scope: RepositoryScope,
        namespace: &str,
    ) -> chartroom_repo::Result<Vec<RepositoryRecord>> {
        let objects = self
            .api(scope, namespace)
            .list(&ListParams::default())
            .await
            .map_err(cluster_error)?;

        let mut records = Vec::with_capacity(objects.items.len());
        for object in &objects.items {
            match record_from_object(object, scope) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "skipping malformed repository"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl RepositoryStore for KubeRepositoryStore {
    async fn get(
        &self,
        scope: RepositoryScope,
        namespace: &str,
        name: &str,
    ) -> chartroom_repo::Result<Option<RepositoryRecord>> {
        let object = self
            .api(scope, namespace)
            .get_opt(name)
            .await
            .map_err(cluster_error)?;

        match object {
            Some(object) => record_from_object(&object, scope),
            None => Ok(None),
        }
    }

    async fn list(&self, namespace: &str) -> chartroom_repo::Result<Vec<RepositoryRecord>> {
        let mut records = self.list_scope(RepositoryScope::Project, namespace).await?;
        records.extend(self.list_scope(RepositoryScope::Cluster, namespace).await?);
        Ok(records)
    }
}

/// [`CredentialStore`] reading `Secret` and `ConfigMap` objects
#[derive(Clone)]
pub struct KubeCredentialStore {
    client: Client,
}

impl KubeCredentialStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialStore for KubeCredentialStore {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> chartroom_repo::Result<Option<BTreeMap<String, Vec<u8>>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get_opt(name).await.map_err(cluster_error)?;

        Ok(secret.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, value.0))
                .collect()
        }))
    }

    async fn get_config_object(
        &self,
        namespace: &str,
        name: &str,
    ) -> chartroom_repo::Result<Option<BTreeMap<String, String>>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api.get_opt(name).await.map_err(cluster_error)?;

        Ok(config_map.map(|cm| cm.data.unwrap_or_default()))
    }
}
