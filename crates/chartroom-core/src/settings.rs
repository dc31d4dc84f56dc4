//! Loader settings
//!
//! Settings are a plain value handed to whoever needs them. Defaults live
//! under the user's cache and config directories and can be overridden from
//! the environment or a YAML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Namespace holding shared credential objects when none is given
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "chartroom-config";

pub const ENV_CACHE: &str = "CHARTROOM_CACHE";
pub const ENV_SYSTEM_NAMESPACE: &str = "CHARTROOM_SYSTEM_NAMESPACE";
pub const ENV_CLEANUP: &str = "CHARTROOM_CLEANUP";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Where downloaded archives and indexes are cached
    pub cache_dir: PathBuf,

    /// Repository list file read by the in-process repository store
    pub repository_config: PathBuf,

    /// Namespace for CA config objects and default TLS secrets
    pub system_namespace: String,

    /// Delete staged credential files when an operation finishes
    pub cleanup_files: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let cache = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("chartroom");
        let config = dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("chartroom");

        Self {
            cache_dir: cache.join("repository"),
            repository_config: config.join("repositories.yaml"),
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_string(),
            cleanup_files: true,
        }
    }
}

impl Settings {
    /// Defaults overridden by `CHARTROOM_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Load from a YAML file; missing fields keep their defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_yaml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save to a YAML file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Apply overrides from an environment-like lookup
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CACHE).filter(|v| !v.is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(ns) = lookup(ENV_SYSTEM_NAMESPACE).filter(|v| !v.is_empty()) {
            self.system_namespace = ns;
        }
        if let Some(flag) = lookup(ENV_CLEANUP) {
            self.cleanup_files = !matches!(flag.trim(), "0" | "false" | "FALSE" | "False");
        }
        self
    }

    /// Builder-style cleanup toggle
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup_files = cleanup;
        self
    }

    /// Builder-style repository list path
    pub fn with_repository_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.repository_config = path.into();
        self
    }

    /// Builder-style cache directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.system_namespace.trim().is_empty() {
            return Err(CoreError::InvalidSettings {
                message: "systemNamespace must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
