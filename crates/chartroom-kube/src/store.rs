//! Release store: the install/upgrade state transitions
//!
//! [`StorageReleaseStore`] records a pending revision, hands it to a
//! [`ManifestApplier`], then marks it deployed (superseding the previous
//! revision) or failed.

use async_trait::async_trait;
use chartroom_core::{PackageArchive, Values};
use std::sync::Arc;

use crate::error::{KubeError, Result};
use crate::release::StoredRelease;
use crate::storage::StorageDriver;

/// Release persistence and apply, as seen by the orchestrator
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Latest deployed revision
    ///
    /// `ReleaseNotFound` when the release has no history,
    /// `ReleaseRevisionNotFound` when it has history but nothing deployed.
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<StoredRelease>;

    /// Install revision 1
    async fn run_install(
        &self,
        name: &str,
        namespace: &str,
        package: &PackageArchive,
        values: &Values,
    ) -> Result<StoredRelease>;

    /// Create and deploy the next revision; `None` keeps the deployed package
    async fn run_upgrade(
        &self,
        name: &str,
        namespace: &str,
        package: Option<&PackageArchive>,
        values: &Values,
    ) -> Result<StoredRelease>;
}

/// Applies a release's manifest to the cluster
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    async fn apply(&self, release: &StoredRelease) -> Result<()>;
}

/// Applier that accepts every release without touching the cluster
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopApplier;

#[async_trait]
impl ManifestApplier for NoopApplier {
    async fn apply(&self, release: &StoredRelease) -> Result<()> {
        tracing::debug!(
            release = %release.name,
            namespace = %release.namespace,
            version = release.version,
            "skipping apply"
        );
        Ok(())
    }
}

/// [`ReleaseStore`] on top of a [`StorageDriver`]
pub struct StorageReleaseStore {
    driver: Arc<dyn StorageDriver>,
    applier: Arc<dyn ManifestApplier>,
}

impl StorageReleaseStore {
    pub fn new(driver: Arc<dyn StorageDriver>, applier: Arc<dyn ManifestApplier>) -> Self {
        Self { driver, applier }
    }

    /// Store without a cluster behind it
    pub fn without_apply(driver: Arc<dyn StorageDriver>) -> Self {
        Self::new(driver, Arc::new(NoopApplier))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        match self.driver.history(namespace, name).await {
            Ok(history) => Ok(history),
            Err(KubeError::ReleaseNotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Apply `release` and record the outcome
    async fn deploy(&self, mut release: StoredRelease) -> Result<StoredRelease> {
        if let Err(e) = self.applier.apply(&release).await {
            let message = e.to_string();
            release.mark_failed(message.clone());
            if let Err(update_err) = self.driver.update(&release).await {
                tracing::warn!(
                    release = %release.name,
                    version = release.version,
                    error = %update_err,
                    "failed to record failed revision"
                );
            }
            return Err(KubeError::ApplyFailed {
                name: release.name,
                namespace: release.namespace,
                message,
            });
        }

        release.mark_deployed();
        self.driver.update(&release).await?;
        Ok(release)
    }
}

/// Newest deployed revision in a history listed newest first
fn deployed_revision(history: &[StoredRelease], namespace: &str, name: &str) -> Result<StoredRelease> {
    if history.is_empty() {
        return Err(KubeError::ReleaseNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
    }

    history
        .iter()
        .find(|release| release.is_deployed())
        .cloned()
        .ok_or_else(|| KubeError::ReleaseRevisionNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        })
}

#[async_trait]
impl ReleaseStore for StorageReleaseStore {
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        let history = self.history(namespace, name).await?;
        deployed_revision(&history, namespace, name)
    }

    async fn run_install(
        &self,
        name: &str,
        namespace: &str,
        package: &PackageArchive,
        values: &Values,
    ) -> Result<StoredRelease> {
        if !self.history(namespace, name).await?.is_empty() {
            return Err(KubeError::ReleaseAlreadyExists {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }

        let release = StoredRelease::for_install(name, namespace, package, values.clone());
        self.driver.create(&release).await?;

        let release = self.deploy(release).await?;
        tracing::info!(release = %name, namespace = %namespace, "installed release");
        Ok(release)
    }

    async fn run_upgrade(
        &self,
        name: &str,
        namespace: &str,
        package: Option<&PackageArchive>,
        values: &Values,
    ) -> Result<StoredRelease> {
        let history = self.history(namespace, name).await?;
        let mut previous = deployed_revision(&history, namespace, name)?;
        // numbering continues past failed revisions
        let next_version = history.first().map_or(previous.version, |latest| latest.version) + 1;

        let release = StoredRelease::for_upgrade(&previous, next_version, package, values.clone());
        self.driver.create(&release).await?;

        let release = self.deploy(release).await?;

        previous.mark_superseded();
        if let Err(e) = self.driver.update(&previous).await {
            tracing::warn!(
                release = %name,
                namespace = %namespace,
                version = previous.version,
                error = %e,
                "failed to mark previous revision superseded"
            );
        }

        tracing::info!(
            release = %name,
            namespace = %namespace,
            version = release.version,
            "upgraded release"
        );
        Ok(release)
    }
}
