//! Storage drivers for persisting release revisions
//!
//! - **Mock**: in-memory, for tests and embedding
//! - **File**: one JSON document per revision under a base directory
//!
//! `create` must fail with [`KubeError::ReleaseAlreadyExists`] when the
//! revision key is taken; this is what keeps two concurrent upgrades from
//! producing the same revision.

mod file;
mod mock;

pub use file::FileDriver;
pub use mock::{MockStorageDriver, OperationCounts};

use async_trait::async_trait;

use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// Storage driver trait for release persistence
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Get a specific release by name and version
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease>;

    /// All revisions for a name, newest first
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Store a new revision; fails if the revision already exists
    async fn create(&self, release: &StoredRelease) -> Result<()>;

    /// Overwrite an existing revision
    async fn update(&self, release: &StoredRelease) -> Result<()>;
}

/// Serialize a release to JSON bytes
pub fn serialize_release(release: &StoredRelease) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(release)?)
}

/// Deserialize a release from JSON bytes
pub fn deserialize_release(data: &[u8]) -> Result<StoredRelease> {
    Ok(serde_json::from_slice(data)?)
}

fn not_found(namespace: &str, name: &str) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}
