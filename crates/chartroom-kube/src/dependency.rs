//! Dependency check run before an upgrade

use chartroom_core::{PackageArchive, Values};

use crate::error::{KubeError, Result};

/// Verifies a package's declared dependencies can be satisfied
pub trait DependencyChecker: Send + Sync {
    fn check(&self, package: &PackageArchive, values: &Values) -> Result<()>;
}

/// Requires every active dependency to be bundled under `charts/`
///
/// Conditions are evaluated against the package defaults overlaid with the
/// supplied values. A dependency matches a bundled sub-package by its
/// effective name (alias first) or its declared name.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledDependencyChecker;

impl DependencyChecker for BundledDependencyChecker {
    fn check(&self, package: &PackageArchive, values: &Values) -> Result<()> {
        let mut effective = package.values.clone();
        if !values.is_empty() {
            effective.merge(values);
        }

        let bundled = package.bundled_names();
        let missing: Vec<String> = package
            .metadata
            .dependencies
            .iter()
            .filter(|dep| dep.is_active(effective.inner()))
            .filter(|dep| {
                !bundled
                    .iter()
                    .any(|name| *name == dep.effective_name() || *name == dep.name)
            })
            .map(|dep| dep.effective_name().to_string())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        tracing::debug!(package = %package.name(), ?missing, "dependency check failed");
        Err(KubeError::DependencyCheckFailed {
            package: package.name().to_string(),
            missing,
        })
    }
}
