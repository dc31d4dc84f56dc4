//! File-based storage driver
//!
//! Layout: `<base>/<namespace>/<name>/v<version>.json`. Useful without a
//! cluster and for keeping release history across process restarts.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{StorageDriver, deserialize_release, not_found, serialize_release};
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// File-based storage driver
pub struct FileDriver {
    base_dir: PathBuf,
}

impl FileDriver {
    /// Create a new file driver, creating `base_dir` if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn release_path(&self, namespace: &str, name: &str, version: u32) -> PathBuf {
        self.release_dir(namespace, name)
            .join(format!("v{}.json", version))
    }

    fn release_dir(&self, namespace: &str, name: &str) -> PathBuf {
        self.base_dir.join(namespace).join(name)
    }

    fn read_release(&self, path: &Path) -> Result<StoredRelease> {
        let data = std::fs::read(path)?;
        deserialize_release(&data)
    }
}

#[async_trait]
impl StorageDriver for FileDriver {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        let path = self.release_path(namespace, name, version);
        if !path.exists() {
            return Err(not_found(namespace, name));
        }
        self.read_release(&path)
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let dir = self.release_dir(namespace, name);
        if !dir.exists() {
            return Err(not_found(namespace, name));
        }

        let mut releases = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                match self.read_release(&path) {
                    Ok(release) => releases.push(release),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable release file");
                    }
                }
            }
        }

        if releases.is_empty() {
            return Err(not_found(namespace, name));
        }

        // Sort by version descending
        releases.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(releases)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.version);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = serialize_release(release)?;
        // create_new makes the revision key check atomic
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => KubeError::ReleaseAlreadyExists {
                    name: release.name.clone(),
                    namespace: release.namespace.clone(),
                },
                _ => KubeError::Io(e),
            })?;
        file.write_all(&data)?;
        Ok(())
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.version);
        if !path.exists() {
            return Err(not_found(&release.namespace, &release.name));
        }
        std::fs::write(&path, serialize_release(release)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartroom_core::{PackageArchive, PackageMetadata, Values};
    use tempfile::TempDir;

    fn test_release(name: &str, version: u32) -> StoredRelease {
        let package = PackageArchive::new(PackageMetadata::new("influxdb", "3.0.2"));
        let mut release = StoredRelease::for_install(name, "default", &package, Values::new());
        release.version = version;
        release
    }

    #[tokio::test]
    async fn test_file_driver_create_and_get() {
        let temp = TempDir::new().unwrap();
        let driver = FileDriver::new(temp.path()).unwrap();

        let release = test_release("metrics", 1);
        driver.create(&release).await.unwrap();

        let loaded = driver.get("default", "metrics", 1).await.unwrap();
        assert_eq!(loaded, release);
        assert!(temp.path().join("default/metrics/v1.json").exists());
    }

    #[tokio::test]
    async fn test_file_driver_create_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let driver = FileDriver::new(temp.path()).unwrap();

        driver.create(&test_release("metrics", 1)).await.unwrap();
        let err = driver.create(&test_release("metrics", 1)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_file_driver_history() {
        let temp = TempDir::new().unwrap();
        let driver = FileDriver::new(temp.path()).unwrap();

        for version in [1, 2, 3] {
            driver.create(&test_release("metrics", version)).await.unwrap();
        }

        let versions: Vec<u32> = driver
            .history("default", "metrics")
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![3, 2, 1]);
        assert!(driver.history("default", "unknown").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_file_driver_update() {
        let temp = TempDir::new().unwrap();
        let driver = FileDriver::new(temp.path()).unwrap();

        let mut release = test_release("metrics", 1);
        assert!(driver.update(&release).await.is_err());

        driver.create(&release).await.unwrap();
        release.mark_deployed();
        driver.update(&release).await.unwrap();
        assert!(driver.get("default", "metrics", 1).await.unwrap().is_deployed());
    }
}
