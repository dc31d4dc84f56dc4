//! Per-repository TLS credentials
//!
//! A repository's [`ConnectionConfig`] may reference a secret holding a TLS
//! client certificate and a config object holding a CA bundle. The
//! [`CredentialMaterializer`] reads both and stages them as files.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::error::{RepoError, Result};
use crate::staging::StagedFiles;

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";

pub const TLS_CERT_PATTERN: &str = "tlscrt-*";
pub const TLS_KEY_PATTERN: &str = "tlskey-*";
pub const CA_CERT_PATTERN: &str = "cacert-*";

/// Read access to secrets and config objects
///
/// `Ok(None)` means the object does not exist; `Err` is reserved for
/// failures talking to the backing store.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>>;

    async fn get_config_object(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;
}

/// In-process credential store
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    secrets: HashMap<(String, String), BTreeMap<String, Vec<u8>>>,
    config_objects: HashMap<(String, String), BTreeMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret<K, V>(
        mut self,
        namespace: &str,
        name: &str,
        data: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let data = data.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.secrets
            .insert((namespace.to_string(), name.to_string()), data);
        self
    }

    pub fn with_config_object<K, V>(
        mut self,
        namespace: &str,
        name: &str,
        data: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let data = data.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.config_objects
            .insert((namespace.to_string(), name.to_string()), data);
        self
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        Ok(self
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_config_object(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self
            .config_objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Paths of staged TLS material; each is optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialBundle {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
}

impl CredentialBundle {
    pub fn is_empty(&self) -> bool {
        self.cert_file.is_none() && self.key_file.is_none() && self.ca_file.is_none()
    }

    /// Both halves of a client certificate are present
    pub fn has_client_cert(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}

/// Turns a connection config into staged credential files
#[derive(Clone)]
pub struct CredentialMaterializer {
    store: Arc<dyn CredentialStore>,
    system_namespace: String,
}

impl CredentialMaterializer {
    pub fn new(store: Arc<dyn CredentialStore>, system_namespace: impl Into<String>) -> Self {
        Self {
            store,
            system_namespace: system_namespace.into(),
        }
    }

    pub fn system_namespace(&self) -> &str {
        &self.system_namespace
    }

    /// Read and stage the credentials `cfg` references
    ///
    /// Every file written is tracked by `staged`, including those written
    /// before a later step fails.
    pub async fn materialize(
        &self,
        cfg: &ConnectionConfig,
        staged: &mut StagedFiles,
    ) -> Result<CredentialBundle> {
        let mut bundle = CredentialBundle::default();

        if let Some(tls) = &cfg.tls_client_config {
            let namespace = tls
                .secret_namespace
                .as_deref()
                .filter(|ns| !ns.is_empty())
                .unwrap_or(&self.system_namespace);

            let secret = self
                .store
                .get_secret(namespace, &tls.secret_name)
                .await?
                .ok_or_else(|| RepoError::CredentialObjectNotFound {
                    kind: "Secret".to_string(),
                    name: tls.secret_name.clone(),
                    namespace: namespace.to_string(),
                })?;

            // both halves must exist before anything is written
            let cert = require_key(&secret, TLS_CERT_KEY, &tls.secret_name)?;
            let key = require_key(&secret, TLS_KEY_KEY, &tls.secret_name)?;

            bundle.cert_file = Some(staged.stage(cert, TLS_CERT_PATTERN)?);
            bundle.key_file = Some(staged.stage(key, TLS_KEY_PATTERN)?);
        }

        if let Some(ca) = &cfg.ca_config {
            let config = self
                .store
                .get_config_object(&self.system_namespace, &ca.config_object_name)
                .await?
                .ok_or_else(|| RepoError::CredentialObjectNotFound {
                    kind: "ConfigMap".to_string(),
                    name: ca.config_object_name.clone(),
                    namespace: self.system_namespace.clone(),
                })?;

            let bundle_pem = config.get(CA_BUNDLE_KEY).ok_or_else(|| {
                RepoError::CredentialKeyMissing {
                    key: CA_BUNDLE_KEY.to_string(),
                    object_name: ca.config_object_name.clone(),
                }
            })?;

            bundle.ca_file = Some(staged.stage(bundle_pem.as_bytes(), CA_CERT_PATTERN)?);
        }

        tracing::debug!(
            base_url = %cfg.base_url,
            client_cert = bundle.has_client_cert(),
            ca = bundle.ca_file.is_some(),
            "materialized repository credentials"
        );

        Ok(bundle)
    }
}

fn require_key<'a>(
    data: &'a BTreeMap<String, Vec<u8>>,
    key: &str,
    object_name: &str,
) -> Result<&'a [u8]> {
    data.get(key)
        .map(Vec::as_slice)
        .ok_or_else(|| RepoError::CredentialKeyMissing {
            key: key.to_string(),
            object_name: object_name.to_string(),
        })
}
