//! Repository index types
//!
//! Helm-compatible `index.yaml`. Entries are kept in a sorted map so that
//! scanning the index is deterministic.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use url::Url;

use crate::error::{RepoError, Result};

/// Repository index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// When this index was generated
    #[serde(default = "Utc::now")]
    pub generated: DateTime<Utc>,

    /// Package versions keyed by name
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<IndexEntry>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl Default for RepositoryIndex {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            generated: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

impl RepositoryIndex {
    /// Parse index from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })
    }

    /// Parse index from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// Get the latest (highest semver) version of a package
    pub fn get_latest(&self, name: &str) -> Option<&IndexEntry> {
        self.entries
            .get(name)?
            .iter()
            .max_by(|a, b| compare_versions(&a.version, &b.version))
    }

    /// Get a specific version of a package
    pub fn get_version(&self, name: &str, version: &str) -> Option<&IndexEntry> {
        self.entries
            .get(name)?
            .iter()
            .find(|e| e.version == version)
    }

    /// Find the entry whose download URL, made absolute against `base_url`,
    /// equals `url` exactly
    ///
    /// Both sides are compared in canonical form, so an explicit default port
    /// or an uppercase host still matches the entry it names.
    pub fn find_by_url(&self, url: &str, base_url: &str) -> Option<&IndexEntry> {
        let canonical = Url::parse(url).ok().map(|u| u.to_string());
        self.entries.values().flatten().find(|entry| {
            entry.urls.iter().any(|u| {
                u == url
                    || resolve_url(base_url, u)
                        .is_ok_and(|candidate| canonical.as_deref() == Some(candidate.as_str()))
            })
        })
    }

    /// Add an entry to the index
    pub fn add_entry(&mut self, entry: IndexEntry) {
        self.entries
            .entry(entry.name.clone())
            .or_default()
            .push(entry);
    }
}

/// Semver ordering, with unparseable versions sorting below parseable ones
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a).ok(), Version::parse(b).ok()) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Make a download URL absolute against the repository base URL
///
/// Absolute URLs are returned unchanged. Relative ones are joined onto the
/// base URL treated as a directory.
pub fn resolve_url(base_url: &str, url: &str) -> Result<String> {
    if let Ok(absolute) = Url::parse(url) {
        return Ok(absolute.to_string());
    }

    let base = format!("{}/", base_url.trim_end_matches('/'));
    let base = Url::parse(&base).map_err(|e| RepoError::InvalidRepositoryUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(base.join(url)?.to_string())
}

/// Package entry in the index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// URLs to download the package archive
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deprecated: bool,

    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl IndexEntry {
    /// Get the primary download URL
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }

    /// Parse version as semver
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }
}
