//! In-memory storage driver
//!
//! Keeps releases in a shared map; clones share the same data, which lets a
//! test hold on to the driver it handed to a release store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use super::{StorageDriver, not_found};
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

type Revisions = BTreeMap<u32, StoredRelease>;

/// In-memory storage driver
#[derive(Clone, Default)]
pub struct MockStorageDriver {
    /// Storage: namespace -> name -> version -> release
    store: Arc<RwLock<HashMap<String, HashMap<String, Revisions>>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
}

impl MockStorageDriver {
    /// Create a new empty driver
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: impl IntoIterator<Item = StoredRelease>) -> Self {
        let driver = Self::new();
        {
            let mut store = driver.store.write().unwrap_or_else(PoisonError::into_inner);
            for release in releases {
                store
                    .entry(release.namespace.clone())
                    .or_default()
                    .entry(release.name.clone())
                    .or_default()
                    .insert(release.version, release);
            }
        }
        driver
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get all releases
    pub fn all_releases(&self) -> Vec<StoredRelease> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store
            .values()
            .flat_map(|ns| ns.values())
            .flat_map(|revisions| revisions.values())
            .cloned()
            .collect()
    }

    fn count(&self, op: impl FnOnce(&mut OperationCounts)) {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        op(&mut ops);
    }

    fn revisions<T>(&self, namespace: &str, name: &str, f: impl FnOnce(&Revisions) -> T) -> Option<T> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store
            .get(namespace)
            .and_then(|ns| ns.get(name))
            .filter(|revisions| !revisions.is_empty())
            .map(f)
    }
}

#[async_trait]
impl StorageDriver for MockStorageDriver {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        self.count(|ops| ops.gets += 1);
        self.revisions(namespace, name, |revisions| revisions.get(&version).cloned())
            .flatten()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        self.count(|ops| ops.gets += 1);
        self.revisions(namespace, name, |revisions| {
            revisions.values().rev().cloned().collect()
        })
        .ok_or_else(|| not_found(namespace, name))
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        self.count(|ops| ops.creates += 1);

        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let revisions = store
            .entry(release.namespace.clone())
            .or_default()
            .entry(release.name.clone())
            .or_default();

        if revisions.contains_key(&release.version) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            });
        }

        revisions.insert(release.version, release.clone());
        Ok(())
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        self.count(|ops| ops.updates += 1);

        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let revision = store
            .get_mut(&release.namespace)
            .and_then(|ns| ns.get_mut(&release.name))
            .and_then(|revisions| revisions.get_mut(&release.version))
            .ok_or_else(|| not_found(&release.namespace, &release.name))?;

        *revision = release.clone();
        Ok(())
    }
}
