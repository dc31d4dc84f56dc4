//! Repository records and the store that serves them
//!
//! A repository is either cluster-scoped (visible everywhere) or
//! project-scoped (visible only inside its namespace). Records are fetched
//! fresh on every resolution; nothing here caches.

use async_trait::async_trait;
use chartroom_core::Settings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use crate::error::{RepoError, Result};

/// Where a repository record lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryScope {
    Cluster,
    Project,
}

/// Reference to a TLS client certificate secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsClientConfig {
    pub secret_name: String,

    /// Defaults to the system namespace when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_namespace: Option<String>,
}

/// Reference to a CA bundle config object (always in the system namespace)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaConfig {
    pub config_object_name: String,
}

/// How to reach a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_config: Option<TlsClientConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_config: Option<CaConfig>,
}

impl ConnectionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            tls_client_config: None,
            ca_config: None,
        }
    }
}

/// A registered package repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRecord {
    pub name: String,

    /// Empty for cluster-scoped repositories
    #[serde(default)]
    pub namespace: String,

    pub scope: RepositoryScope,

    pub base_url: String,

    /// Prefix matched against package URLs instead of `base_url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_prefix_override: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_config: Option<TlsClientConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_config: Option<CaConfig>,
}

impl RepositoryRecord {
    /// Cluster-scoped repository without credentials
    pub fn cluster(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            scope: RepositoryScope::Cluster,
            base_url: base_url.into(),
            url_prefix_override: None,
            tls_client_config: None,
            ca_config: None,
        }
    }

    /// Project-scoped repository without credentials
    pub fn project(
        name: impl Into<String>,
        namespace: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            scope: RepositoryScope::Project,
            ..Self::cluster(name, base_url)
        }
    }

    pub fn with_tls_secret(mut self, name: impl Into<String>, namespace: Option<&str>) -> Self {
        self.tls_client_config = Some(TlsClientConfig {
            secret_name: name.into(),
            secret_namespace: namespace.map(str::to_string),
        });
        self
    }

    pub fn with_ca(mut self, config_object_name: impl Into<String>) -> Self {
        self.ca_config = Some(CaConfig {
            config_object_name: config_object_name.into(),
        });
        self
    }

    pub fn with_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix_override = Some(prefix.into());
        self
    }

    /// Prefix used for URL ownership checks
    pub fn match_prefix(&self) -> &str {
        self.url_prefix_override
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.base_url)
    }

    /// Connection settings for this repository
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            base_url: self.base_url.clone(),
            tls_client_config: self.tls_client_config.clone(),
            ca_config: self.ca_config.clone(),
        }
    }

    /// Get the index URL
    pub fn index_url(&self) -> String {
        format!("{}/index.yaml", self.base_url.trim_end_matches('/'))
    }

    /// `namespace/name` for project repositories, `name` otherwise
    pub fn display_name(&self) -> String {
        match self.scope {
            RepositoryScope::Cluster => self.name.clone(),
            RepositoryScope::Project => format!("{}/{}", self.namespace, self.name),
        }
    }
}

/// Read access to repository records
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Fetch one record; `namespace` is ignored for cluster scope
    async fn get(
        &self,
        scope: RepositoryScope,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RepositoryRecord>>;

    /// Records visible from `namespace`: project records first, then cluster records
    async fn list(&self, namespace: &str) -> Result<Vec<RepositoryRecord>>;
}

/// Repository list file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryFile {
    #[serde(default = "default_api_version")]
    api_version: String,

    #[serde(default)]
    repositories: Vec<RepositoryRecord>,
}

fn default_api_version() -> String {
    "chartroom.io/v1".to_string()
}

/// In-process repository store, optionally backed by a YAML file
#[derive(Debug, Default)]
pub struct MemoryRepositoryStore {
    records: RwLock<Vec<RepositoryRecord>>,
}

impl MemoryRepositoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = RepositoryRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().collect()),
        }
    }

    /// Load records from a repository list file; a missing file is empty
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let file: RepositoryFile = serde_yaml::from_str(&content)?;
        Ok(Self::with_records(file.repositories))
    }

    /// Load the repository list named by `settings.repository_config`
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::load_from(&settings.repository_config)
    }

    /// Save to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = RepositoryFile {
            api_version: default_api_version(),
            repositories: self.records(),
        };
        std::fs::write(path, serde_yaml::to_string(&file)?)?;
        Ok(())
    }

    /// Add or replace a record (matched by scope, namespace and name)
    pub fn upsert(&self, record: RepositoryRecord) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.iter_mut().find(|r| {
            r.scope == record.scope && r.namespace == record.namespace && r.name == record.name
        }) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub fn remove(&self, scope: RepositoryScope, namespace: &str, name: &str) -> Result<RepositoryRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let idx = records
            .iter()
            .position(|r| r.scope == scope && r.name == name && matches_namespace(r, namespace))
            .ok_or_else(|| RepoError::RepositoryNotFound {
                reference: name.to_string(),
                namespace: namespace.to_string(),
            })?;
        Ok(records.remove(idx))
    }

    /// Snapshot of all records in insertion order
    pub fn records(&self) -> Vec<RepositoryRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn matches_namespace(record: &RepositoryRecord, namespace: &str) -> bool {
    record.scope == RepositoryScope::Cluster || record.namespace == namespace
}

#[async_trait]
impl RepositoryStore for MemoryRepositoryStore {
    async fn get(
        &self,
        scope: RepositoryScope,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RepositoryRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .find(|r| r.scope == scope && r.name == name && matches_namespace(r, namespace))
            .cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<RepositoryRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let project = records
            .iter()
            .filter(|r| r.scope == RepositoryScope::Project && r.namespace == namespace);
        let cluster = records
            .iter()
            .filter(|r| r.scope == RepositoryScope::Cluster);
        Ok(project.chain(cluster).cloned().collect())
    }
}
