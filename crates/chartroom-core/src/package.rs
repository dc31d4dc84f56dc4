//! Package descriptor (`Chart.yaml`)

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, Result};

/// Annotation recording the archive URL a release was installed from
pub const CHART_URL_ANNOTATION: &str = "chart_url";

/// Package metadata as declared in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    /// Descriptor API version (v1 or v2)
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Package name (required)
    pub name: String,

    /// Package version (required). Kept as written; see `parsed_version`.
    pub version: String,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Application version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Home URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,

    /// Keywords
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Maintainers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,

    /// Declared dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,

    /// Annotations
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

fn default_api_version() -> String {
    "v2".to_string()
}

impl PackageMetadata {
    /// Create minimal metadata
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            name: name.into(),
            version: version.into(),
            description: None,
            app_version: None,
            home: None,
            keywords: Vec::new(),
            maintainers: Vec::new(),
            dependencies: Vec::new(),
            annotations: HashMap::new(),
        }
    }

    /// Parse `Chart.yaml` content and validate required fields
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let metadata: Self = serde_yaml::from_str(yaml)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check required fields
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidPackage {
                message: "name is required".to_string(),
            });
        }
        if self.version.trim().is_empty() {
            return Err(CoreError::InvalidPackage {
                message: format!("version is required for package '{}'", self.name),
            });
        }
        Ok(())
    }

    /// Parse version as semver
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }

    /// The archive URL recorded by a previous install, if any
    pub fn chart_url(&self) -> Option<&str> {
        self.annotations
            .get(CHART_URL_ANNOTATION)
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }

    /// Record the archive URL this package was fetched from
    pub fn set_chart_url(&mut self, url: impl Into<String>) {
        self.annotations
            .insert(CHART_URL_ANNOTATION.to_string(), url.into());
    }
}

/// Maintainer information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Declared package dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Dependency name
    pub name: String,

    /// Version constraint
    #[serde(default)]
    pub version: String,

    /// Repository URL
    #[serde(default)]
    pub repository: String,

    /// Runtime condition expression (dot path into values)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Static enable flag
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Alias name (overrides dependency name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Dependency {
    /// Get the effective name (alias if set, otherwise name)
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Whether the dependency is active for the given values
    ///
    /// A condition path missing from `values` counts as enabled.
    pub fn is_active(&self, values: &serde_json::Value) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(condition) = &self.condition else {
            return true;
        };

        let mut current = values;
        for part in condition.split('.') {
            match current.get(part) {
                Some(v) => current = v,
                None => return true,
            }
        }

        match current {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.is_empty() && s != "false" && s != "0",
            _ => true,
        }
    }
}
