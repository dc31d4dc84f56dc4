//! Chartroom Kube - cluster integration and the package orchestrator
//!
//! This crate provides:
//! - **Cluster Stores**: Repository records from `ChartRepository` /
//!   `ProjectChartRepository` resources, credentials from Secrets and ConfigMaps
//! - **Release Management**: Revision state machine with in-memory and file storage drivers
//! - **Dependency Check**: Declared dependencies must be bundled with the package
//! - **Orchestrator**: Get, install and upgrade from a package URL, with
//!   chart-URL provenance and scoped credential cleanup

pub mod cluster;
pub mod dependency;
pub mod error;
pub mod orchestrator;
pub mod release;
pub mod storage;
pub mod store;

pub use cluster::{KubeCredentialStore, KubeRepositoryStore};
pub use dependency::{BundledDependencyChecker, DependencyChecker};
pub use error::{KubeError, Result};
pub use orchestrator::{
    FetchedPackage, GetRequest, InstallRequest, OperationState, PackageOrchestrator,
    ReleaseOutcome, UpgradeRequest,
};
pub use release::{ReleaseState, StoredRelease};
pub use storage::{FileDriver, MockStorageDriver, OperationCounts, StorageDriver};
pub use store::{ManifestApplier, NoopApplier, ReleaseStore, StorageReleaseStore};
